//! Configuration module for hookpost-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;
pub mod runtime;

use crate::config::file::{DeliveryConfig, FileConfig, SchedulerConfig};
use crate::config::runtime::{LoadedConfig, ScheduleSettings};
use hookpost_core::config::DispatchPolicy;
use hookpost_sdk::signature::Signer;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    secret_override: Option<String>,
}

impl ConfigLoader {
    /// Create a new config loader. `secret_override` comes from
    /// `--default-secret` or `WEBHOOK_SECRET` and beats the file.
    pub fn new(config_path: impl AsRef<Path>, secret_override: Option<String>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            secret_override,
        }
    }

    /// Read the TOML file, apply overrides, validate, and build the runtime
    /// configuration.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_from_str(&config_content)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn load_from_str(&self, content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;

        if let Some(secret) = self.secret_override.as_ref().filter(|s| !s.is_empty()) {
            file_config.delivery.default_secret = secret.clone();
        }

        validate(&file_config)?;
        Ok(build_loaded_config(file_config))
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let scheduler = &config.scheduler;
    let delivery = &config.delivery;
    let invalid = |message: &str| -> Result<(), ConfigError> {
        Err(ConfigError::ValidationError(message.to_string()))
    };

    if scheduler.interval_secs == 0 {
        return invalid("scheduler.interval_secs must be at least 1");
    }
    if scheduler.batch_size == 0 {
        return invalid("scheduler.batch_size must be at least 1");
    }
    if delivery.default_secret.is_empty() {
        return invalid(
            "delivery.default_secret is empty; set it in the file, with --default-secret or WEBHOOK_SECRET",
        );
    }
    if delivery.concurrency == 0 {
        return invalid("delivery.concurrency must be at least 1");
    }
    if delivery.base_backoff_secs == 0 {
        return invalid("delivery.base_backoff_secs must be at least 1");
    }
    if delivery.max_backoff_secs < delivery.base_backoff_secs {
        return invalid("delivery.max_backoff_secs must not be below base_backoff_secs");
    }
    if delivery.request_timeout_secs == 0 {
        return invalid("delivery.request_timeout_secs must be at least 1");
    }
    // A claim must outlive the request it guards, or a slow but healthy
    // delivery gets recovered by another dispatcher.
    if delivery.claim_timeout_secs <= delivery.request_timeout_secs {
        return invalid("delivery.claim_timeout_secs must exceed request_timeout_secs");
    }
    Ok(())
}

fn build_loaded_config(file_config: FileConfig) -> LoadedConfig {
    let FileConfig {
        scheduler,
        delivery,
        logging,
    } = file_config;
    LoadedConfig {
        schedule: convert_schedule(&scheduler),
        signer: Signer::new(delivery.default_secret.clone().into_bytes()),
        policy: convert_delivery(&delivery),
        log_format: logging.format,
    }
}

fn convert_schedule(s: &SchedulerConfig) -> ScheduleSettings {
    ScheduleSettings {
        interval: Duration::from_secs(s.interval_secs),
        batch_size: s.batch_size,
        jitter: Duration::from_millis(s.jitter_ms),
    }
}

fn convert_delivery(d: &DeliveryConfig) -> DispatchPolicy {
    DispatchPolicy {
        base_backoff: Duration::from_secs(d.base_backoff_secs),
        max_backoff: Duration::from_secs(d.max_backoff_secs),
        request_timeout: Duration::from_secs(d.request_timeout_secs),
        response_body_limit: d.response_body_limit,
        concurrency: d.concurrency,
        claim_timeout: Duration::from_secs(d.claim_timeout_secs),
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
