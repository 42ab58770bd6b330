// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use figment::providers::{Env, Format, Json};
use figment::Figment;
use metrics_core::config::{
    deserialize_optional_duration, deserialize_optional_string, ConfigBuilder, ConfigError,
    ConfigSource, LogLevel, CONFIG_FILE_ENV,
};
use metrics_core::{merge_option, merge_value};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "localhost:8080";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const ENV_KEYS: [&str; 9] = [
    "ADDRESS",
    "KEY",
    "CRYPTO_KEY",
    "POLL_INTERVAL",
    "REPORT_INTERVAL",
    "RATE_LIMIT",
    "QUEUE_CAPACITY",
    "REQUEST_TIMEOUT",
    "LOG_LEVEL",
];

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// `host:port` of the metrics server, optionally with an `http(s)://` scheme.
    pub address: String,
    /// Shared HMAC key. Requests are signed when set.
    pub key: Option<String>,
    /// Path of the hex-encoded server public key. Payloads are encrypted when set.
    pub crypto_key: Option<PathBuf>,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    /// Number of concurrent senders.
    pub rate_limit: usize,
    /// Bound of the batch queue, defaults to `rate_limit`.
    pub queue_capacity: Option<usize>,
    pub request_timeout: Duration,
    pub log_level: LogLevel,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            key: None,
            crypto_key: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
            rate_limit: 1,
            queue_capacity: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_level: LogLevel::Error,
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue_capacity.unwrap_or(self.rate_limit)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("address must not be empty".to_string()));
        }
        if self.rate_limit == 0 {
            return Err(ConfigError::Invalid("rate_limit must be at least 1".to_string()));
        }
        if self.queue_size() == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("poll_interval", self.poll_interval),
            ("report_interval", self.report_interval),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Partial agent config as read from one source.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AgentSource {
    #[serde(deserialize_with = "deserialize_optional_string")]
    address: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    key: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    crypto_key: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    poll_interval: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    report_interval: Option<Duration>,
    rate_limit: Option<usize>,
    queue_capacity: Option<usize>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    request_timeout: Option<Duration>,
    log_level: Option<LogLevel>,
}

fn merge(config: &mut AgentConfig, source: &AgentSource) {
    merge_value!(config, source, address);
    merge_value!(config, source, poll_interval);
    merge_value!(config, source, report_interval);
    merge_value!(config, source, rate_limit);
    merge_value!(config, source, request_timeout);
    merge_value!(config, source, log_level);
    merge_option!(config, source, queue_capacity);
    // an empty key disables signing
    if let Some(key) = &source.key {
        config.key = Some(key.clone()).filter(|k| !k.is_empty());
    }
    if let Some(path) = &source.crypto_key {
        config.crypto_key = Some(PathBuf::from(path)).filter(|p| !p.as_os_str().is_empty());
    }
}

fn extract(figment: &Figment) -> Result<AgentSource, ConfigError> {
    figment
        .extract::<AgentSource>()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

pub struct JsonConfigSource {
    path: PathBuf,
}

impl JsonConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource<AgentConfig> for JsonConfigSource {
    fn load(&self, config: &mut AgentConfig) -> Result<(), ConfigError> {
        if !self.path.is_file() {
            return Err(ConfigError::Parse(format!(
                "config file {} not found",
                self.path.display()
            )));
        }
        let source = extract(&Figment::new().merge(Json::file(&self.path)))?;
        merge(config, &source);
        Ok(())
    }
}

pub struct EnvConfigSource;

impl ConfigSource<AgentConfig> for EnvConfigSource {
    fn load(&self, config: &mut AgentConfig) -> Result<(), ConfigError> {
        let source = extract(&Figment::new().merge(Env::raw().only(&ENV_KEYS)))?;
        merge(config, &source);
        Ok(())
    }
}

/// Defaults, then the JSON file named by `CONFIG`, then environment variables.
pub fn load() -> Result<AgentConfig, ConfigError> {
    let mut builder = ConfigBuilder::<AgentConfig>::default();
    if let Some(path) = env::var_os(CONFIG_FILE_ENV).filter(|p| !p.is_empty()) {
        builder = builder.add_source(Box::new(JsonConfigSource::new(path)));
    }
    let config = builder.add_source(Box::new(EnvConfigSource)).build()?;
    config.validate()?;
    Ok(config)
}
