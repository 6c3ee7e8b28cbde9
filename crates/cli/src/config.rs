use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use crit_compare::{EmbeddingConfig, ExecutorConfig, FailurePolicy, PricingConfig, RetryPolicy};
use crit_core::{ChunkConfig, PairStrategy, DEFAULT_NEIGHBORS};
use crit_llm::LlmProvider;
use serde::Deserialize;

use crate::cli::{CompareOverrides, StrategyArg};

pub const DEFAULT_CONFIG: &str = "crit.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CritConfig {
    pub chunking: ChunkConfig,
    pub pairing: PairStrategy,
    pub executor: ExecutorConfig,
    pub retry: RetryPolicy,
    pub llm: LlmSection,
    pub embedding: EmbeddingConfig,
    pub output: OutputSection,
    pub pricing: PricingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    /// Falls back to the provider's default model.
    pub model: Option<String>,
    /// Prompt template file replacing the built-in one.
    pub prompt: Option<PathBuf>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            prompt: None,
        }
    }
}

impl LlmSection {
    pub fn provider(&self) -> Result<LlmProvider> {
        LlmProvider::from_str(&self.provider)
            .ok_or_else(|| anyhow!("unknown llm provider {}", self.provider))
    }

    pub fn model(&self, provider: LlmProvider) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub dir: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("3-outputs"),
        }
    }
}

impl CritConfig {
    /// Reads the config file (a missing file means defaults), then applies `CRIT_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG));
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| anyhow!("invalid config: {e}"))
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("CRIT_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Some(model) = lookup("CRIT_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(workers) = lookup("CRIT_WORKERS") {
            self.executor.workers = workers
                .trim()
                .parse()
                .map_err(|_| anyhow!("CRIT_WORKERS must be a positive integer, got {workers}"))?;
        }
        if let Some(sample) = lookup("CRIT_SAMPLE") {
            let sample = sample.trim();
            self.executor.sample = if sample.is_empty() {
                None
            } else {
                match sample.parse::<usize>() {
                    Ok(n) if n > 0 => Some(n),
                    _ => bail!("CRIT_SAMPLE must be a positive integer, got {sample}"),
                }
            };
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &CompareOverrides) {
        let neighbors = match self.pairing {
            PairStrategy::Vector { neighbors } => neighbors,
            PairStrategy::Exhaustive => DEFAULT_NEIGHBORS,
        };
        match overrides.strategy {
            Some(StrategyArg::Exhaustive) => self.pairing = PairStrategy::Exhaustive,
            Some(StrategyArg::Vector) => self.pairing = PairStrategy::Vector { neighbors },
            None => {}
        }
        if let (Some(k), PairStrategy::Vector { neighbors }) = (overrides.neighbors, &mut self.pairing) {
            *neighbors = k;
        }
        if let Some(workers) = overrides.workers {
            self.executor.workers = workers;
        }
        if overrides.sample.is_some() {
            self.executor.sample = overrides.sample;
        }
        if overrides.sample_seed.is_some() {
            self.executor.sample_seed = overrides.sample_seed;
        }
        if overrides.keep_going {
            self.executor.failure_policy = FailurePolicy::Record;
        }
        if let Some(provider) = &overrides.provider {
            self.llm.provider = provider.clone();
        }
        if let Some(model) = &overrides.model {
            self.llm.model = Some(model.clone());
        }
        if let Some(dir) = &overrides.output_dir {
            self.output.dir = dir.clone();
        }
    }

    /// Rejects settings that would fail later in the run, before any work starts.
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.pairing.validate()?;
        self.executor.validate()?;
        self.retry.validate()?;
        self.llm.provider()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CritConfig::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.chunking, ChunkConfig::default());
        assert_eq!(config.pairing, PairStrategy::Exhaustive);
        assert_eq!(config.executor.workers, 4);
        assert_eq!(config.output.dir, PathBuf::from("3-outputs"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sections_parse_from_toml() {
        let config = CritConfig::from_toml(
            r#"
            [chunking]
            chunk_size = 256

            [pairing]
            strategy = "vector"
            neighbors = 3

            [executor]
            workers = 8
            failure_policy = "record"

            [retry]
            max_attempts = 3

            [llm]
            provider = "anthropic"

            [embedding]
            provider = "hash"
            cache = "cache/embeddings.sqlite"

            [pricing.anthropic."claude-3-5-sonnet-latest"]
            prompt_per_1m = 3.0
            completion_per_1m = 15.0
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 256);
        assert_eq!(config.chunking.overlap, 20);
        assert_eq!(config.pairing, PairStrategy::Vector { neighbors: 3 });
        assert_eq!(config.executor.workers, 8);
        assert_eq!(config.executor.failure_policy, FailurePolicy::Record);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_wait, 60.0);
        let provider = config.llm.provider().unwrap();
        assert_eq!(provider, LlmProvider::Anthropic);
        let rate = config
            .pricing
            .rate_for(provider.as_str(), &config.llm.model(provider));
        assert!((rate.prompt_per_1k - 0.003).abs() < 1e-12);
        assert_eq!(
            config.embedding.cache,
            Some(PathBuf::from("cache/embeddings.sqlite"))
        );
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = CritConfig::default();
        let vars: HashMap<&str, &str> = [
            ("CRIT_PROVIDER", "local"),
            ("CRIT_MODEL", "tiny"),
            ("CRIT_WORKERS", "2"),
            ("CRIT_SAMPLE", "10"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.llm.provider, "local");
        assert_eq!(config.llm.model.as_deref(), Some("tiny"));
        assert_eq!(config.executor.workers, 2);
        assert_eq!(config.executor.sample, Some(10));

        let err = config.apply_env(|key| (key == "CRIT_WORKERS").then(|| "many".to_string()));
        assert!(err.is_err());
    }

    #[test]
    fn zero_sample_is_rejected_from_env_and_file() {
        let mut config = CritConfig::default();
        let err = config.apply_env(|key| (key == "CRIT_SAMPLE").then(|| "0".to_string()));
        assert!(err.is_err());
        assert_eq!(config.executor.sample, None);

        config
            .apply_env(|key| (key == "CRIT_SAMPLE").then(|| " ".to_string()))
            .unwrap();
        assert_eq!(config.executor.sample, None);

        let from_file = CritConfig::from_toml("[executor]\nsample = 0\n").unwrap();
        assert!(from_file.validate().is_err());
    }

    #[test]
    fn invalid_overlap_is_caught_before_running() {
        let config = CritConfig::from_toml("[chunking]\nchunk_size = 10\noverlap = 10\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn flags_switch_strategy_and_policy() {
        let mut config = CritConfig::default();
        config.apply_overrides(&CompareOverrides {
            strategy: Some(StrategyArg::Vector),
            neighbors: Some(7),
            keep_going: true,
            ..CompareOverrides::default()
        });
        assert_eq!(config.pairing, PairStrategy::Vector { neighbors: 7 });
        assert_eq!(config.executor.failure_policy, FailurePolicy::Record);
    }
}
