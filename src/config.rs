//! Environment-driven configuration
//!
//! Values come from the process environment, optionally seeded from a
//! `.env` file. Unset variables fall back to defaults.

use crate::agent::OrchestratorConfig;
use crate::error::OrchestrationError;
use crate::retry::RetryPolicy;
use crate::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL_PATH: &str = "models/strategy_classifier.json";
pub const DEFAULT_COINGECKO_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: Option<String>,
    pub alpha_vantage_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub coingecko_url: String,
    pub alpha_vantage_url: String,
    /// Price histories served from a JSON file instead of the HTTP providers
    pub market_data_file: Option<PathBuf>,
    pub model_path: PathBuf,
    /// Persisted knowledge index; built from the seed corpus when absent
    pub knowledge_index_path: Option<PathBuf>,
    /// JSON array of `{symbol, content, date?, sentiment?}` added to a fresh index
    pub knowledge_news_file: Option<PathBuf>,
    pub embedding_dimension: usize,
    pub port: u16,
    pub orchestrator: OrchestratorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            alpha_vantage_api_key: None,
            gemini_model: None,
            coingecko_url: DEFAULT_COINGECKO_URL.to_string(),
            alpha_vantage_url: DEFAULT_ALPHA_VANTAGE_URL.to_string(),
            market_data_file: None,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            knowledge_index_path: None,
            knowledge_news_file: None,
            embedding_dimension: 256,
            port: 8080,
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `.env` (if present) and read the environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        let mut orchestrator = defaults.orchestrator.clone();

        if let Some(days) = parse(&get, "LOOKBACK_DAYS")? {
            orchestrator.lookback_days = days;
        }
        if let Some(top_k) = parse(&get, "TOP_K")? {
            orchestrator.top_k = top_k;
        }
        if let Some(attempts) = parse::<usize, _>(&get, "FETCH_ATTEMPTS")? {
            let current = orchestrator.fetch_retry;
            orchestrator.fetch_retry =
                RetryPolicy::new(attempts, current.base_delay_ms, current.max_delay_ms);
        }
        if let Some(base) = parse::<u64, _>(&get, "FETCH_BACKOFF_MS")? {
            let current = orchestrator.fetch_retry;
            orchestrator.fetch_retry =
                RetryPolicy::new(current.max_attempts, base, current.max_delay_ms.max(base));
        }
        if let Some(ms) = parse(&get, "FETCH_TIMEOUT_MS")? {
            orchestrator.fetch_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&get, "PLANNER_TIMEOUT_MS")? {
            orchestrator.planner_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&get, "INDICATOR_TIMEOUT_MS")? {
            orchestrator.indicator_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&get, "KNOWLEDGE_TIMEOUT_MS")? {
            orchestrator.knowledge_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&get, "CLASSIFIER_TIMEOUT_MS")? {
            orchestrator.classifier_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&get, "SYNTHESIS_TIMEOUT_MS")? {
            orchestrator.synthesis_timeout = Duration::from_millis(ms);
        }

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| OrchestrationError::Config(format!("PORT '{}': {}", raw, e)))?,
            None => defaults.port,
        };

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY"),
            alpha_vantage_api_key: get("ALPHA_VANTAGE_API_KEY"),
            gemini_model: get("GEMINI_MODEL"),
            coingecko_url: get("COINGECKO_URL").unwrap_or(defaults.coingecko_url),
            alpha_vantage_url: get("ALPHA_VANTAGE_URL").unwrap_or(defaults.alpha_vantage_url),
            market_data_file: get("MARKET_DATA_FILE").map(PathBuf::from),
            model_path: get("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            knowledge_index_path: get("KNOWLEDGE_INDEX_PATH").map(PathBuf::from),
            knowledge_news_file: get("KNOWLEDGE_NEWS_FILE").map(PathBuf::from),
            embedding_dimension: parse(&get, "EMBEDDING_DIMENSION")?
                .unwrap_or(defaults.embedding_dimension),
            port,
            orchestrator,
        })
    }
}

fn parse<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| OrchestrationError::Config(format!("{} '{}': {}", key, raw, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
        assert!(config.gemini_api_key.is_none());
        assert_eq!(config.orchestrator.fetch_retry.max_attempts, 3);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = config_from(&[
            ("API_PORT", "9000"),
            ("GEMINI_API_KEY", "key"),
            ("LOOKBACK_DAYS", "120"),
            ("FETCH_ATTEMPTS", "5"),
            ("SYNTHESIS_TIMEOUT_MS", "2500"),
            ("ALPHA_VANTAGE_API_KEY", "  "),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.gemini_api_key.as_deref(), Some("key"));
        assert!(config.alpha_vantage_api_key.is_none());
        assert_eq!(config.orchestrator.lookback_days, 120);
        assert_eq!(config.orchestrator.fetch_retry.max_attempts, 5);
        assert_eq!(
            config.orchestrator.synthesis_timeout,
            Duration::from_millis(2_500)
        );
    }

    #[test]
    fn test_bad_number_is_config_error() {
        let result = config_from(&[("TOP_K", "three")]);
        assert!(matches!(result, Err(OrchestrationError::Config(_))));
    }
}
