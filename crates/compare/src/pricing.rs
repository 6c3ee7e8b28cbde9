use std::collections::HashMap;

use crit_core::TokenUsage;
use serde::{Deserialize, Serialize};

/// Per-model prices, as written in the `[pricing]` section of the config file.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct PricingConfig {
    #[serde(default)]
    pub openai: HashMap<String, PricingEntry>,
    #[serde(default)]
    pub azure: HashMap<String, PricingEntry>,
    #[serde(default)]
    pub anthropic: HashMap<String, PricingEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PricingEntry {
    pub prompt_per_1k: Option<f64>,
    pub completion_per_1k: Option<f64>,
    pub prompt_per_1m: Option<f64>,
    pub completion_per_1m: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingRate {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl Default for PricingRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl PricingRate {
    /// Used when the config has no entry for the model: 0.015 / 0.6 per million tokens.
    pub const DEFAULT: PricingRate = PricingRate {
        prompt_per_1k: 0.000_015,
        completion_per_1k: 0.000_6,
    };

    pub const FREE: PricingRate = PricingRate {
        prompt_per_1k: 0.0,
        completion_per_1k: 0.0,
    };

    pub fn cost(&self, usage: TokenUsage) -> f64 {
        usage.input_tokens as f64 / 1000.0 * self.prompt_per_1k
            + usage.output_tokens as f64 / 1000.0 * self.completion_per_1k
    }
}

impl PricingConfig {
    pub fn lookup(&self, provider: &str, model: &str) -> Option<PricingRate> {
        match provider {
            "openai" => Self::lookup_entry(&self.openai, model),
            "azure" => Self::lookup_entry(&self.azure, model),
            "anthropic" => Self::lookup_entry(&self.anthropic, model),
            "local" => Some(PricingRate::FREE),
            _ => None,
        }
    }

    pub fn rate_for(&self, provider: &str, model: &str) -> PricingRate {
        self.lookup(provider, model).unwrap_or(PricingRate::DEFAULT)
    }

    fn lookup_entry(map: &HashMap<String, PricingEntry>, model: &str) -> Option<PricingRate> {
        map.get(model)
            .or_else(|| map.get(&model.to_lowercase()))
            .and_then(|entry| entry.normalized())
    }
}

impl PricingEntry {
    pub fn normalized(&self) -> Option<PricingRate> {
        let prompt = self
            .prompt_per_1k
            .or_else(|| self.prompt_per_1m.map(|value| value / 1000.0));
        let completion = self
            .completion_per_1k
            .or_else(|| self.completion_per_1m.map(|value| value / 1000.0));
        if prompt.is_none() && completion.is_none() {
            return None;
        }
        Some(PricingRate {
            prompt_per_1k: prompt.unwrap_or(0.0),
            completion_per_1k: completion.unwrap_or(0.0),
        })
    }
}
