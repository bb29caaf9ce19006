use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for the OpenAI-compatible generation endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// OpenAI API endpoint
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    /// Environment variable name containing the API key
    #[serde(default = "default_env_var_api_key")]
    pub env_var_api_key: String,
    /// Temperature for response generation (0.0 to 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum tokens for response generation
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Rate limit for API requests per second, per model (0 disables pacing)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: f64,
    /// Upper bound on a single request, including connection setup
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            env_var_api_key: default_env_var_api_key(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            rate_limit_rps: default_rate_limit(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Retry budget for transient generation failures
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Retries after the first attempt before a unit is recorded as failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt - 1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let millis = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(millis)
    }
}

/// Configuration for a collection run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectConfig {
    /// Prompt list (`.jsonl` or one prompt per line)
    pub prompts_source: PathBuf,
    /// Models to query
    pub models: Vec<String>,
    /// Samples collected per prompt per model
    #[serde(default = "default_one")]
    pub repetitions_per_prompt: u32,
    /// Work units grouped per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Simultaneous in-flight calls within a batch
    #[serde(default = "default_one_usize")]
    pub worker_concurrency: usize,
    /// Stop after this many batches
    #[serde(default)]
    pub max_batches: Option<usize>,
    /// Trim the work list to its first N units
    #[serde(default)]
    pub max_total_requests: Option<usize>,
    /// Write placeholder records instead of calling the API
    #[serde(default)]
    pub dry_run: bool,
    /// Response log (JSON Lines, appended)
    pub output_path: PathBuf,
    /// Must stay true; the response log is never truncated
    #[serde(default = "default_true")]
    pub append_mode: bool,
    /// Skip units whose identity is already present in the output log
    #[serde(default)]
    pub resume: bool,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_api_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_env_var_api_key() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_rate_limit() -> f64 {
    10.0
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_one() -> u32 {
    1
}

fn default_one_usize() -> usize {
    1
}

fn default_batch_size() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl CollectConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }

    /// Reject option combinations that cannot run
    pub fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("repetitions_per_prompt", u64::from(self.repetitions_per_prompt))?;
        at_least_one("batch_size", self.batch_size as u64)?;
        at_least_one("worker_concurrency", self.worker_concurrency as u64)?;
        if let Some(max_batches) = self.max_batches {
            at_least_one("max_batches", max_batches as u64)?;
        }
        if let Some(max_total) = self.max_total_requests {
            at_least_one("max_total_requests", max_total as u64)?;
        }

        if self.models.is_empty() {
            return Err(ConfigError::NoModels);
        }
        let mut seen = HashSet::new();
        for (position, model) in self.models.iter().enumerate() {
            if model.trim().is_empty() {
                return Err(ConfigError::EmptyModel(position));
            }
            if !seen.insert(model.as_str()) {
                return Err(ConfigError::DuplicateModel(model.clone()));
            }
        }

        if !self.append_mode {
            return Err(ConfigError::TruncationRequested(self.output_path.clone()));
        }

        let rps = self.api.rate_limit_rps;
        if !rps.is_finite() || rps < 0.0 {
            return Err(ConfigError::InvalidRateLimit(rps));
        }
        at_least_one("request_timeout_secs", self.api.request_timeout_secs)?;
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(ConfigError::BackoffRange {
                base: self.retry.backoff_base_ms,
                max: self.retry.backoff_max_ms,
            });
        }
        Ok(())
    }
}

fn at_least_one(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::BelowMinimum { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(toml_content: &str) -> CollectConfig {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", toml_content).unwrap();
        CollectConfig::from_file(temp_file.path()).unwrap()
    }

    #[test]
    fn test_config_parsing() {
        let config = parse(
            r#"
prompts_source = "prompts/receipts.txt"
models = ["gpt-4o-mini", "gpt-4o"]
repetitions_per_prompt = 3
batch_size = 5
worker_concurrency = 4
max_batches = 2
max_total_requests = 7
dry_run = true
output_path = "data/raw.jsonl"
resume = true

[api]
api_endpoint = "http://localhost:8080/v1"
env_var_api_key = "LOCAL_KEY"
temperature = 0.2
max_tokens = 256
rate_limit_rps = 2.5
request_timeout_secs = 30

[retry]
max_retries = 5
backoff_base_ms = 200
backoff_max_ms = 5000
"#,
        );

        assert_eq!(config.models, vec!["gpt-4o-mini", "gpt-4o"]);
        assert_eq!(config.repetitions_per_prompt, 3);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.max_batches, Some(2));
        assert_eq!(config.max_total_requests, Some(7));
        assert!(config.dry_run);
        assert!(config.resume);
        assert!(config.append_mode);
        assert_eq!(config.api.env_var_api_key, "LOCAL_KEY");
        assert_eq!(config.api.rate_limit_rps, 2.5);
        assert_eq!(config.api.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry.max_retries, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_defaults() {
        let config = parse(
            r#"
prompts_source = "prompts.txt"
models = ["gpt-4o"]
output_path = "raw.jsonl"
"#,
        );

        assert_eq!(config.repetitions_per_prompt, 1);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.worker_concurrency, 1);
        assert_eq!(config.max_batches, None);
        assert_eq!(config.max_total_requests, None);
        assert!(!config.dry_run);
        assert!(config.append_mode);
        assert!(!config.resume);
        assert_eq!(config.api.api_endpoint, "https://api.openai.com/v1");
        assert_eq!(config.api.env_var_api_key, "OPENAI_API_KEY");
        assert_eq!(config.api.temperature, 0.7);
        assert_eq!(config.api.max_tokens, 1000);
        assert_eq!(config.api.rate_limit_rps, 10.0);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_config_file() {
        let err = CollectConfig::from_file(Path::new("/nonexistent/run.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_validation_rejects_bad_combinations() {
        let base = parse(
            r#"
prompts_source = "prompts.txt"
models = ["gpt-4o"]
output_path = "raw.jsonl"
"#,
        );

        let mut config = base.clone();
        config.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BelowMinimum { field: "batch_size", .. })
        ));

        let mut config = base.clone();
        config.worker_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.max_total_requests = Some(0);
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.models = vec![];
        assert!(matches!(config.validate(), Err(ConfigError::NoModels)));

        let mut config = base.clone();
        config.models = vec!["gpt-4o".to_string(), "gpt-4o".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateModel(_))));

        let mut config = base.clone();
        config.models = vec![" ".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::EmptyModel(0))));

        let mut config = base.clone();
        config.append_mode = false;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TruncationRequested(_))
        ));

        let mut config = base.clone();
        config.api.rate_limit_rps = -1.0;
        assert!(config.validate().is_err());

        let mut config = base;
        config.retry.backoff_base_ms = 10_000;
        config.retry.backoff_max_ms = 100;
        assert!(matches!(config.validate(), Err(ConfigError::BackoffRange { .. })));
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let retry = RetryConfig {
            max_retries: 10,
            backoff_base_ms: 100,
            backoff_max_ms: 1000,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(4), Duration::from_millis(800));
        assert_eq!(retry.backoff(5), Duration::from_millis(1000));
        assert_eq!(retry.backoff(80), Duration::from_millis(1000));
    }
}
