//! TOML file configuration structures.
//!
//! These structs directly map to the `hookpost.toml` file format. Every
//! field has a default, so an empty section (or file) is valid apart from
//! the default secret, which must come from somewhere.

use serde::Deserialize;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How often the dispatcher runs.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Rows per `process_pending_events` call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound of the random delay added to every tick, so several
    /// instances do not poll in lockstep.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_interval_secs() -> u64 {
    10
}

fn default_batch_size() -> usize {
    100
}

fn default_jitter_ms() -> u64 {
    500
}

/// Delivery policy.
#[derive(Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Signs rows that carry no secret of their own. Overridden by
    /// `--default-secret` / `WEBHOOK_SECRET`.
    #[serde(default)]
    pub default_secret: String,
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_response_body_limit")]
    pub response_body_limit: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,
}

impl std::fmt::Debug for DeliveryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryConfig")
            .field("default_secret", &"<redacted>")
            .field("base_backoff_secs", &self.base_backoff_secs)
            .field("max_backoff_secs", &self.max_backoff_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("response_body_limit", &self.response_body_limit)
            .field("concurrency", &self.concurrency)
            .field("claim_timeout_secs", &self.claim_timeout_secs)
            .finish()
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            default_secret: String::new(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            response_body_limit: default_response_body_limit(),
            concurrency: default_concurrency(),
            claim_timeout_secs: default_claim_timeout_secs(),
        }
    }
}

fn default_base_backoff_secs() -> u64 {
    60
}

fn default_max_backoff_secs() -> u64 {
    24 * 60 * 60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_response_body_limit() -> usize {
    hookpost_core::config::DEFAULT_RESPONSE_BODY_LIMIT
}

fn default_concurrency() -> usize {
    8
}

fn default_claim_timeout_secs() -> u64 {
    5 * 60
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[scheduler]
interval_secs = 5
batch_size = 50
jitter_ms = 0

[delivery]
default_secret = "whsec_default"
base_backoff_secs = 30
max_backoff_secs = 3600
request_timeout_secs = 10
response_body_limit = 2048
concurrency = 4
claim_timeout_secs = 120

[logging]
format = "json"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.interval_secs, 5);
        assert_eq!(config.scheduler.batch_size, 50);
        assert_eq!(config.delivery.default_secret, "whsec_default");
        assert_eq!(config.delivery.response_body_limit, 2048);
        assert_eq!(config.delivery.claim_timeout_secs, 120);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: FileConfig = toml::from_str("[delivery]\ndefault_secret = \"s\"\n").unwrap();
        assert_eq!(config.scheduler.interval_secs, 10);
        assert_eq!(config.scheduler.batch_size, 100);
        assert_eq!(config.scheduler.jitter_ms, 500);
        assert_eq!(config.delivery.base_backoff_secs, 60);
        assert_eq!(config.delivery.max_backoff_secs, 86_400);
        assert_eq!(config.delivery.request_timeout_secs, 30);
        assert_eq!(config.delivery.response_body_limit, 1024);
        assert_eq!(config.delivery.concurrency, 8);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_secret_is_not_debug_printed() {
        let config: FileConfig =
            toml::from_str("[delivery]\ndefault_secret = \"hunter2\"\n").unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
