use std::env;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const AZURE_DEFAULT_API_VERSION: &str = "2024-06-01";
const JSON_ONLY_INSTRUCTION: &str = "Respond with a single JSON object and nothing else.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    AzureOpenAi,
    Anthropic,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::AzureOpenAi => "azure",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "azure" | "azure-openai" | "azure_openai" => Some(LlmProvider::AzureOpenAi),
            "anthropic" => Some(LlmProvider::Anthropic),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi | LlmProvider::AzureOpenAi => "gpt-4o",
            LlmProvider::Anthropic => "claude-3-5-sonnet-latest",
            LlmProvider::Local => "local",
        }
    }
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("{0} is not set")]
    MissingCredential(String),
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("{provider} request failed: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} returned error (status {status}): {body}")]
    Status {
        provider: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("failed to decode {provider} response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },
}

impl LlmError {
    /// Errors worth retrying: network failures, rate limiting, timeouts and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Transport { .. } => true,
            LlmError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || status.is_server_error()
            }
            _ => false,
        }
    }

    /// The service answered with something that is not a usable completion.
    pub fn is_decode(&self) -> bool {
        matches!(self, LlmError::Decode { .. })
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    pub temperature: Option<f32>,
    /// Ask the provider for a JSON object only.
    pub json_mode: bool,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Temperature zero and JSON-only output.
    pub fn deterministic_json(system: Option<String>, user: String) -> Self {
        Self {
            system,
            user,
            temperature: Some(0.0),
            json_mode: true,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Azure(AzureConfig),
    Anthropic(AnthropicConfig),
    Local,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

#[derive(Clone)]
struct AzureConfig {
    api_key: String,
    endpoint: String,
    api_version: String,
}

#[derive(Clone)]
struct AnthropicConfig {
    api_key: String,
    max_tokens: u32,
}

impl LlmClient {
    /// Builds a client, reading credentials from the environment.
    ///
    /// For Azure the model is the deployment name.
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        let http = Client::new();
        let config = match provider {
            LlmProvider::OpenAi => {
                let base_url = env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| OPENAI_DEFAULT_BASE_URL.to_string());
                let api_key = read_api_key("OPENAI_API_KEY")?;
                if base_url == OPENAI_DEFAULT_BASE_URL {
                    validate_api_key("OPENAI_API_KEY", &api_key)?;
                }
                ProviderConfig::OpenAi(OpenAiConfig { api_key, base_url })
            }
            LlmProvider::AzureOpenAi => ProviderConfig::Azure(AzureConfig {
                api_key: read_api_key("AZURE_OPENAI_API_KEY")?,
                endpoint: read_api_key("AZURE_OPENAI_ENDPOINT")?,
                api_version: env::var("OPENAI_API_VERSION")
                    .unwrap_or_else(|_| AZURE_DEFAULT_API_VERSION.to_string()),
            }),
            LlmProvider::Anthropic => {
                let api_key = read_api_key("ANTHROPIC_API_KEY")?;
                validate_api_key("ANTHROPIC_API_KEY", &api_key)?;
                ProviderConfig::Anthropic(AnthropicConfig {
                    api_key,
                    max_tokens: env::var("ANTHROPIC_MAX_TOKENS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(4096),
                })
            }
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http,
            provider,
            model,
            config,
        })
    }

    /// Offline client that never leaves the process.
    pub fn local() -> Self {
        Self {
            http: Client::new(),
            provider: LlmProvider::Local,
            model: LlmProvider::Local.default_model().to_string(),
            config: ProviderConfig::Local,
        }
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::OpenAi(cfg) => {
                let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
                let builder = self.http.post(url).bearer_auth(&cfg.api_key);
                self.chat_completions("openai", builder, req, true).await
            }
            ProviderConfig::Azure(cfg) => {
                let url = format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    cfg.endpoint.trim_end_matches('/'),
                    self.model,
                    cfg.api_version
                );
                let builder = self.http.post(url).header("api-key", &cfg.api_key);
                self.chat_completions("azure", builder, req, false).await
            }
            ProviderConfig::Anthropic(cfg) => self.chat_anthropic(cfg, req).await,
            ProviderConfig::Local => Ok(chat_local(req)),
        }
    }

    async fn chat_completions(
        &self,
        provider: &'static str,
        builder: reqwest::RequestBuilder,
        req: &LlmRequest,
        send_model: bool,
    ) -> Result<LlmResponse> {
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": req.user }));
        let mut payload = json!({ "messages": messages });
        if send_model {
            payload["model"] = json!(self.model);
        }
        if let Some(temperature) = req.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = req.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if req.json_mode {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        let response = builder
            .json(&payload)
            .send()
            .await
            .map_err(|err| transport(provider, err))?;
        let value = decode_body(provider, response).await?;
        let content = extract_chat_text(&value).ok_or_else(|| LlmError::Decode {
            provider,
            message: "missing message content".to_string(),
        })?;
        let usage: ChatUsage = value
            .get("usage")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    async fn chat_anthropic(&self, cfg: &AnthropicConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": req.max_tokens.unwrap_or(cfg.max_tokens),
            "messages": [ { "role": "user", "content": req.user } ],
        });
        let system = match (&req.system, req.json_mode) {
            (Some(system), true) => Some(format!("{system}\n\n{JSON_ONLY_INSTRUCTION}")),
            (Some(system), false) => Some(system.clone()),
            (None, true) => Some(JSON_ONLY_INSTRUCTION.to_string()),
            (None, false) => None,
        };
        if let Some(system) = system {
            payload["system"] = json!(system);
        }
        if let Some(temperature) = req.temperature {
            payload["temperature"] = json!(temperature);
        }
        let response = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &cfg.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .map_err(|err| transport("anthropic", err))?;
        let value = decode_body("anthropic", response).await?;
        let parsed: AnthropicResponse =
            serde_json::from_value(value).map_err(|err| LlmError::Decode {
                provider: "anthropic",
                message: err.to_string(),
            })?;
        let text = parsed
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| LlmError::Decode {
                provider: "anthropic",
                message: "missing text in Anthropic response".to_string(),
            })?;
        let usage = parsed.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        })
    }
}

// Offline mode reports nothing, so dry runs exercise the full pipeline for free.
fn chat_local(req: &LlmRequest) -> LlmResponse {
    let content = if req.json_mode {
        json!({ "findings": [] }).to_string()
    } else {
        String::new()
    };
    LlmResponse {
        content,
        prompt_tokens: 0,
        completion_tokens: 0,
    }
}

fn transport(provider: &'static str, err: reqwest::Error) -> LlmError {
    LlmError::Transport {
        provider,
        message: err.to_string(),
    }
}

async fn decode_body(provider: &'static str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| transport(provider, err))?;
    if !status.is_success() {
        return Err(LlmError::Status {
            provider,
            status,
            body,
        });
    }
    serde_json::from_str(&body).map_err(|err| LlmError::Decode {
        provider,
        message: err.to_string(),
    })
}

fn read_api_key(var: &str) -> Result<String> {
    env::var(var).map_err(|_| LlmError::MissingCredential(var.to_string()))
}

fn validate_api_key(var: &str, value: &str) -> Result<()> {
    if var.contains("ANTHROPIC") && !value.starts_with("sk-ant-") {
        return Err(LlmError::InvalidCredential(format!(
            "{var} must start with 'sk-ant-'"
        )));
    }
    if var.contains("OPENAI") && !value.starts_with("sk-") {
        return Err(LlmError::InvalidCredential(format!(
            "{var} must start with 'sk-' (see https://platform.openai.com/)"
        )));
    }
    Ok(())
}

fn extract_chat_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(|text| text.to_string())
}

#[derive(Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}
