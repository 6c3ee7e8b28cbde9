use std::fs;
use std::future::Future;
use std::path::Path;

use crit_core::{parse_payload, CallError, Chunk, CritError, Finding, Result, TokenUsage};
use crit_llm::{LlmClient, LlmError, LlmRequest};

pub const DEFAULT_PROMPT: &str = r#"You review technical documentation for statements that contradict each other.

Compare the two excerpts below. Report only genuine contradictions or inconsistencies: two
statements that cannot both be true, conflicting values, limits, steps, dates or requirements.
Differences in wording, scope or level of detail are not contradictions. An excerpt may be
compared with itself; report contradictions inside it in that case.

Excerpt {chunk1_id}
Document: {chunk1_doc}
Title: {chunk1_title}
---
{chunk1_text}
---

Excerpt {chunk2_id}
Document: {chunk2_doc}
Title: {chunk2_title}
---
{chunk2_text}
---

Answer with a JSON object of this shape and nothing else:
{{"findings": [{{"rationale": "why the statements conflict",
  "fragments": [{{"chunk_id": "<excerpt id>", "quotation": "<verbatim text from that excerpt>"}}]}}]}}
Quotations must be copied verbatim from the excerpt whose id they carry. Use an empty
"findings" list when there is no contradiction."#;

/// What one comparator call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparatorReply {
    pub findings: Vec<Finding>,
    pub usage: TokenUsage,
}

/// Judges whether two chunks contradict each other.
pub trait Comparator {
    fn compare(
        &self,
        left: &Chunk,
        right: &Chunk,
    ) -> impl Future<Output = std::result::Result<ComparatorReply, CallError>>;
}

/// Prompt with `{chunk1_id}`-style placeholders; `{{` and `}}` are literal braces.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT)
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let template = fs::read_to_string(path).map_err(|err| {
            CritError::Config(format!("failed to read prompt {}: {err}", path.display()))
        })?;
        Ok(Self::new(template))
    }

    /// Substitutes placeholders in one pass, so braces inside chunk text are left alone.
    pub fn render(&self, left: &Chunk, right: &Chunk) -> String {
        let mut out = String::with_capacity(self.template.len() + left.text.len() + right.text.len());
        let mut rest = self.template.as_str();
        while let Some(pos) = rest.find(['{', '}']) {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if tail.starts_with("{{") {
                out.push('{');
                rest = &tail[2..];
            } else if tail.starts_with("}}") {
                out.push('}');
                rest = &tail[2..];
            } else if let Some((value, consumed)) = tail
                .strip_prefix('{')
                .and_then(|body| placeholder(body, left, right))
            {
                out.push_str(value);
                rest = &tail[consumed + 1..];
            } else {
                out.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

// `body` follows an opening brace; returns the value and the bytes consumed through `}`.
fn placeholder<'a>(body: &str, left: &'a Chunk, right: &'a Chunk) -> Option<(&'a str, usize)> {
    let end = body.find('}')?;
    let value = match &body[..end] {
        "chunk1_id" => left.id.as_str(),
        "chunk2_id" => right.id.as_str(),
        "chunk1_doc" => left.document.as_str(),
        "chunk2_doc" => right.document.as_str(),
        "chunk1_title" => left.title.as_str(),
        "chunk2_title" => right.title.as_str(),
        "chunk1_text" => left.text.as_str(),
        "chunk2_text" => right.text.as_str(),
        _ => return None,
    };
    Some((value, end + 1))
}

/// Comparator backed by a chat model answering in JSON at temperature zero.
#[derive(Clone)]
pub struct LlmComparator {
    client: LlmClient,
    template: PromptTemplate,
}

impl LlmComparator {
    pub fn new(client: LlmClient, template: PromptTemplate) -> Self {
        Self { client, template }
    }
}

impl Comparator for LlmComparator {
    async fn compare(
        &self,
        left: &Chunk,
        right: &Chunk,
    ) -> std::result::Result<ComparatorReply, CallError> {
        let prompt = self.template.render(left, right);
        let response = self
            .client
            .chat(&LlmRequest::deterministic_json(None, prompt))
            .await
            .map_err(classify)?;
        let findings = parse_payload(&response.content)?;
        Ok(ComparatorReply {
            findings,
            usage: TokenUsage {
                input_tokens: response.prompt_tokens as u64,
                output_tokens: response.completion_tokens as u64,
            },
        })
    }
}

fn classify(err: LlmError) -> CallError {
    if err.is_transient() {
        CallError::Transient(err.to_string())
    } else if err.is_decode() {
        CallError::Malformed(err.to_string())
    } else {
        CallError::Fatal(err.to_string())
    }
}
