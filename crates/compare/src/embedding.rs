use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crit_core::{CallError, CritError, Embedder, HashEmbedder, HashEmbedderConfig, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `hash` (offline) or `openai`.
    pub provider: String,
    pub model: String,
    /// Requested output size for the openai backend, bucket count for the hash backend.
    pub dimensions: Option<usize>,
    pub batch_size: usize,
    pub timeout_secs: u64,
    /// SQLite file caching vectors between runs.
    pub cache: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
            batch_size: 64,
            timeout_secs: 60,
            cache: None,
        }
    }
}

#[derive(Clone)]
enum EmbeddingBackend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbeddingClient),
}

/// Embedding client selected by configuration.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(CritError::Config(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        let backend = match config.provider.to_lowercase().as_str() {
            "hash" => EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig {
                dimensions: config
                    .dimensions
                    .unwrap_or(HashEmbedderConfig::default().dimensions),
                ..HashEmbedderConfig::default()
            })),
            "openai" => EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new(
                &config.model,
                config.dimensions,
                Duration::from_secs(config.timeout_secs),
            )?),
            other => {
                return Err(CritError::Config(format!(
                    "unknown embedding provider {other:?}"
                )))
            }
        };
        Ok(Self {
            backend,
            batch_size: config.batch_size,
        })
    }

    pub fn hash() -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig::default())),
            batch_size: EmbeddingConfig::default().batch_size,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl Embedder for EmbeddingClient {
    fn model_id(&self) -> String {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => embedder.model_id(),
            EmbeddingBackend::OpenAi(client) => client.model_id(),
        }
    }

    fn embed_batch(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => embedder.embed_batch(inputs),
            EmbeddingBackend::OpenAi(client) => client.embed_batch(inputs),
        }
    }
}

#[derive(Clone)]
struct OpenAiEmbeddingClient {
    http: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    api_key: String,
}

impl OpenAiEmbeddingClient {
    fn new(model: &str, dimensions: Option<usize>, timeout: Duration) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            CritError::Config("OPENAI_API_KEY is required for openai embeddings".to_string())
        })?;
        if api_key.trim().is_empty() {
            return Err(CritError::Config("OPENAI_API_KEY is empty".to_string()));
        }
        let base = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_OPENAI_BASE.to_string());
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CritError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            http,
            endpoint: format!("{}/embeddings", base.trim_end_matches('/')),
            model: model.to_string(),
            dimensions,
            api_key: api_key.trim().to_string(),
        })
    }

    fn model_id(&self) -> String {
        match self.dimensions {
            Some(dims) => format!("openai:{}:{dims}", self.model),
            None => format!("openai:{}", self.model),
        }
    }

    fn embed_batch(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|err| CallError::Transient(format!("embeddings request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let message = format!("embeddings request failed ({status}): {body}");
            return Err(if is_transient_status(status) {
                CallError::Transient(message)
            } else {
                CallError::Fatal(message)
            });
        }
        let mut parsed: EmbeddingResponse = response
            .json()
            .map_err(|err| CallError::Malformed(format!("embedding response: {err}")))?;
        if parsed.data.len() != inputs.len() {
            return Err(CallError::Malformed(format!(
                "received {} embeddings for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }
        parsed.data.sort_by_key(|entry| entry.index);
        Ok(parsed
            .data
            .into_iter()
            .map(|entry| entry.embedding)
            .collect())
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
