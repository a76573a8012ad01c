use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::types::DEFAULT_MAX_SAMPLE_VALUES;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    pub prometheus: PrometheusConfig,
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub index: IndexConfig,
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from_env("PROMCTX")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> std::result::Result<Self, ConfigError> {
        let builder = with_defaults(Config::builder())?.add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let builder = with_defaults(Config::builder())?
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("PROMCTX")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.prometheus.validate()?;
        self.index.validate()?;
        self.resolver.validate()
    }
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("prometheus.url", "http://localhost:9090")?
        .set_default("prometheus.username", "")?
        .set_default("prometheus.password", "")?
        .set_default("prometheus.timeout_secs", 120)?
        .set_default("llm.base_url", "https://api.openai.com/v1")?
        .set_default("llm.model", "gpt-4o-mini")?
        .set_default("llm.api_key", "")?
        .set_default("llm.max_tokens", 2000)?
        .set_default("llm.temperature", 0.3)?
        .set_default("llm.timeout_secs", 120)?
        .set_default("storage.data_dir", "info")?
        .set_default("index.metric_batch_size", 10)?
        .set_default("index.label_batch_size", 10)?
        .set_default("index.catalog_batch_size", 100)?
        .set_default("index.max_concurrent_batches", 16)?
        .set_default("index.call_timeout_secs", 120)?
        .set_default("resolver.max_sample_values", DEFAULT_MAX_SAMPLE_VALUES as i64)?
        .set_default("resolver.label_repeat_weight", 0.5)?
        .set_default("resolver.value_match_weight", 0.2)?
        .set_default("resolver.metric_repeat_weight", 0.5)
}

/// Monitoring store connection
#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

impl PrometheusConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_call_timeout_secs(),
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_secs = seconds;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Credentials, when both halves are configured.
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(CoreError::configuration("prometheus.url must be set"));
        }
        if self.username.is_empty() != self.password.is_empty() {
            return Err(CoreError::configuration(
                "either both prometheus.username and prometheus.password should be set, or neither",
            ));
        }
        Ok(())
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self::new("http://localhost:9090")
    }
}

/// LLM endpoint used for synonym generation, query understanding and query generation
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_call_timeout_secs(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::new("https://api.openai.com/v1", "gpt-4o-mini", "")
    }
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.3
}

/// Where the five knowledge documents are persisted
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new("info")
    }
}

/// Index builder tuning
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_synonym_batch_size")]
    pub metric_batch_size: usize,
    #[serde(default = "default_synonym_batch_size")]
    pub label_batch_size: usize,
    #[serde(default = "default_catalog_batch_size")]
    pub catalog_batch_size: usize,
    /// Upper bound on batch workers running at once; 0 means unbounded.
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl IndexConfig {
    pub fn with_metric_batch_size(mut self, size: usize) -> Self {
        self.metric_batch_size = size;
        self
    }

    pub fn with_label_batch_size(mut self, size: usize) -> Self {
        self.label_batch_size = size;
        self
    }

    pub fn with_catalog_batch_size(mut self, size: usize) -> Self {
        self.catalog_batch_size = size;
        self
    }

    pub fn with_max_concurrent_batches(mut self, max: usize) -> Self {
        self.max_concurrent_batches = max;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.metric_batch_size == 0 || self.label_batch_size == 0 || self.catalog_batch_size == 0 {
            return Err(CoreError::configuration("batch sizes must be greater than zero"));
        }
        if self.call_timeout_secs == 0 {
            return Err(CoreError::configuration("index.call_timeout_secs must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metric_batch_size: default_synonym_batch_size(),
            label_batch_size: default_synonym_batch_size(),
            catalog_batch_size: default_catalog_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_synonym_batch_size() -> usize {
    10
}

fn default_catalog_batch_size() -> usize {
    100
}

fn default_max_concurrent_batches() -> usize {
    16
}

fn default_call_timeout_secs() -> u64 {
    120
}

/// Relevance scoring weights
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_max_sample_values")]
    pub max_sample_values: usize,
    #[serde(default = "default_repeat_weight")]
    pub label_repeat_weight: f64,
    #[serde(default = "default_value_match_weight")]
    pub value_match_weight: f64,
    #[serde(default = "default_repeat_weight")]
    pub metric_repeat_weight: f64,
}

impl ResolverConfig {
    pub fn with_max_sample_values(mut self, max: usize) -> Self {
        self.max_sample_values = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_sample_values == 0 {
            return Err(CoreError::configuration("resolver.max_sample_values must be greater than zero"));
        }
        let weights = [self.label_repeat_weight, self.value_match_weight, self.metric_repeat_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(CoreError::configuration("resolver weights must be finite and non-negative"));
        }
        Ok(())
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_sample_values: default_max_sample_values(),
            label_repeat_weight: default_repeat_weight(),
            value_match_weight: default_value_match_weight(),
            metric_repeat_weight: default_repeat_weight(),
        }
    }
}

fn default_max_sample_values() -> usize {
    DEFAULT_MAX_SAMPLE_VALUES
}

fn default_repeat_weight() -> f64 {
    0.5
}

fn default_value_match_weight() -> f64 {
    0.2
}

/// Optional directory with prompt template overrides
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_config_auth_pairing() {
        let config = PrometheusConfig::new("http://prom:9090");
        assert!(config.validate().is_ok());
        assert!(config.basic_auth().is_none());

        let config = config.with_basic_auth("admin", "secret");
        assert!(config.validate().is_ok());
        assert_eq!(config.basic_auth(), Some(("admin", "secret")));

        let half = PrometheusConfig::new("http://prom:9090").with_basic_auth("admin", "");
        assert!(half.validate().is_err());
    }

    #[test]
    fn test_index_config_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.metric_batch_size, 10);
        assert_eq!(config.label_batch_size, 10);
        assert_eq!(config.catalog_batch_size, 100);
        assert_eq!(config.call_timeout(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_index_config_rejects_zero_batch() {
        let config = IndexConfig::default().with_metric_batch_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolver_config_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.max_sample_values, 5);
        assert_eq!(config.label_repeat_weight, 0.5);
        assert_eq!(config.value_match_weight, 0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolver_config_rejects_negative_weight() {
        let mut config = ResolverConfig::default();
        config.value_match_weight = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_env_defaults() {
        let config = AppConfig::load_from_env("PROMCTX_TEST_UNSET_PREFIX").unwrap();
        assert_eq!(config.prometheus.url, "http://localhost:9090");
        assert_eq!(config.index.metric_batch_size, 10);
        assert_eq!(config.resolver.max_sample_values, 5);
        assert_eq!(config.storage.data_dir, PathBuf::from("info"));
        assert!(config.prompts.dir.is_none());
        assert!(config.validate().is_ok());
    }
}
