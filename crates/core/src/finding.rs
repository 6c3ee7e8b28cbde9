use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::error::CallError;

/// Verbatim quotation taken from one chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fragment {
    pub chunk_id: String,
    pub quotation: String,
}

/// One contradiction reported by the comparator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub rationale: String,
    pub fragments: Vec<Fragment>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Audit record of one compared pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonResult {
    pub pair_index: usize,
    pub chunk1: Chunk,
    pub chunk2: Chunk,
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub attempts: u32,
}

/// A pair that could not be compared, kept when the run continues past failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairFailure {
    pub pair_index: usize,
    pub left: String,
    pub right: String,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Deserialize)]
struct Payload {
    findings: Vec<Finding>,
}

/// Parses the comparator's JSON answer into findings.
///
/// An empty `findings` array is a valid "no contradiction" answer; anything that does not
/// have that shape is reported as [`CallError::Malformed`].
pub fn parse_payload(raw: &str) -> std::result::Result<Vec<Finding>, CallError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(CallError::Malformed("empty response".to_string()));
    }
    let payload: Payload = serde_json::from_str(body)
        .map_err(|err| CallError::Malformed(format!("unexpected payload: {err}")))?;
    for (idx, finding) in payload.findings.iter().enumerate() {
        if finding.rationale.trim().is_empty() {
            return Err(CallError::Malformed(format!(
                "finding {idx} has an empty rationale"
            )));
        }
        if let Some(fragment) = finding
            .fragments
            .iter()
            .find(|fragment| fragment.chunk_id.trim().is_empty())
        {
            return Err(CallError::Malformed(format!(
                "finding {idx} quotes {:?} without a chunk_id",
                fragment.quotation
            )));
        }
    }
    Ok(payload.findings)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // drop the info string ("json") on the opening fence line
    match rest.find('\n') {
        Some(newline) => rest[newline + 1..].trim(),
        None => {
            let rest = rest.trim_start();
            rest.strip_prefix("json")
                .or_else(|| rest.strip_prefix("JSON"))
                .unwrap_or(rest)
                .trim()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_findings_with_fragments() {
        let raw = r#"{"findings": [{"rationale": "Different limits", "fragments": [
            {"chunk_id": "aaaa1111", "quotation": "limit is 10"},
            {"chunk_id": "bbbb2222", "quotation": "limit is 20"}
        ]}]}"#;
        let findings = parse_payload(raw).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].fragments[1].quotation, "limit is 20");
    }

    #[test]
    fn empty_findings_is_not_an_error() {
        assert!(parse_payload(r#"{"findings": []}"#).unwrap().is_empty());
    }

    #[test]
    fn accepts_fenced_json() {
        let raw = "```json\n{\"findings\": []}\n```";
        assert!(parse_payload(raw).unwrap().is_empty());
        for raw in ["```json{\"findings\": []}```", "``` json {\"findings\": []} ```", "```{\"findings\": []}```"] {
            assert!(parse_payload(raw).unwrap().is_empty(), "{raw}");
        }
    }

    #[test]
    fn malformed_payloads_are_distinct_from_no_findings() {
        for raw in [
            "",
            "not json",
            r#"{"result": []}"#,
            r#"{"findings": [{"rationale": "", "fragments": []}]}"#,
            r#"{"findings": [{"rationale": "x", "fragments": [{"chunk_id": "", "quotation": "q"}]}]}"#,
            r#"{"findings": [{"rationale": "x"}]}"#,
        ] {
            assert!(
                matches!(parse_payload(raw), Err(CallError::Malformed(_))),
                "{raw:?} should be malformed"
            );
        }
    }
}
