// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::storage::StorageConfig;
use figment::providers::{Env, Format, Json};
use figment::Figment;
use ipnet::IpNet;
use metrics_core::config::{
    deserialize_optional_bool, deserialize_optional_duration, deserialize_optional_string,
    ConfigBuilder, ConfigError, ConfigSource, LogLevel, CONFIG_FILE_ENV,
};
use metrics_core::merge_value;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "localhost:8080";
pub const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);

const ENV_KEYS: [&str; 9] = [
    "ADDRESS",
    "KEY",
    "CRYPTO_KEY",
    "FILE_STORAGE_PATH",
    "DATABASE_DSN",
    "RESTORE",
    "STORE_INTERVAL",
    "TRUSTED_SUBNET",
    "LOG_LEVEL",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub address: String,
    /// Shared HMAC key. Signed requests are verified when set.
    pub key: Option<String>,
    /// Path of the hex-encoded private key. Update bodies are decrypted when set.
    pub crypto_key: Option<PathBuf>,
    pub file_storage_path: Option<PathBuf>,
    /// Takes precedence over `file_storage_path`.
    pub database_dsn: Option<String>,
    pub restore: bool,
    /// Zero flushes the journal on every write.
    pub store_interval: Duration,
    /// CIDR that `X-Real-IP` must fall into on update routes.
    pub trusted_subnet: Option<String>,
    pub log_level: LogLevel,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            key: None,
            crypto_key: None,
            file_storage_path: None,
            database_dsn: None,
            restore: false,
            store_interval: DEFAULT_STORE_INTERVAL,
            trusted_subnet: None,
            log_level: LogLevel::Error,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("address must not be empty".to_string()));
        }
        self.trusted_network()?;
        Ok(())
    }

    pub fn trusted_network(&self) -> Result<Option<IpNet>, ConfigError> {
        self.trusted_subnet
            .as_deref()
            .map(|cidr| {
                cidr.parse::<IpNet>().map_err(|e| {
                    ConfigError::Invalid(format!("trusted_subnet {cidr:?} is not a CIDR: {e}"))
                })
            })
            .transpose()
    }

    /// Postgres if a DSN is set, else the journal file if a path is set, else memory.
    #[must_use]
    pub fn storage_config(&self) -> StorageConfig {
        if let Some(dsn) = &self.database_dsn {
            return StorageConfig::Postgres { dsn: dsn.clone() };
        }
        if let Some(path) = &self.file_storage_path {
            return StorageConfig::File {
                path: path.clone(),
                restore: self.restore,
                store_interval: self.store_interval,
            };
        }
        StorageConfig::Memory
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerSource {
    #[serde(deserialize_with = "deserialize_optional_string")]
    address: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    key: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    crypto_key: Option<String>,
    #[serde(alias = "store_file", deserialize_with = "deserialize_optional_string")]
    file_storage_path: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    database_dsn: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_bool")]
    restore: Option<bool>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    store_interval: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    trusted_subnet: Option<String>,
    log_level: Option<LogLevel>,
}

fn non_empty(value: &Option<String>) -> Option<Option<String>> {
    value.as_ref().map(|v| Some(v.clone()).filter(|v| !v.is_empty()))
}

fn merge(config: &mut ServerConfig, source: &ServerSource) {
    merge_value!(config, source, address);
    merge_value!(config, source, restore);
    merge_value!(config, source, store_interval);
    merge_value!(config, source, log_level);
    // empty strings switch a feature off
    if let Some(key) = non_empty(&source.key) {
        config.key = key;
    }
    if let Some(dsn) = non_empty(&source.database_dsn) {
        config.database_dsn = dsn;
    }
    if let Some(subnet) = non_empty(&source.trusted_subnet) {
        config.trusted_subnet = subnet;
    }
    if let Some(path) = non_empty(&source.crypto_key) {
        config.crypto_key = path.map(PathBuf::from);
    }
    if let Some(path) = non_empty(&source.file_storage_path) {
        config.file_storage_path = path.map(PathBuf::from);
    }
}

fn extract(figment: &Figment) -> Result<ServerSource, ConfigError> {
    figment
        .extract::<ServerSource>()
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

impl ConfigSource<ServerConfig> for JsonConfigSource {
    fn load(&self, config: &mut ServerConfig) -> Result<(), ConfigError> {
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

impl ConfigSource<ServerConfig> for EnvConfigSource {
    fn load(&self, config: &mut ServerConfig) -> Result<(), ConfigError> {
        let source = extract(&Figment::new().merge(Env::raw().only(&ENV_KEYS)))?;
        merge(config, &source);
        Ok(())
    }
}

/// Defaults, then the JSON file named by `CONFIG`, then environment variables.
pub fn load() -> Result<ServerConfig, ConfigError> {
    let mut builder = ConfigBuilder::<ServerConfig>::default();
    if let Some(path) = env::var_os(CONFIG_FILE_ENV).filter(|p| !p.is_empty()) {
        builder = builder.add_source(Box::new(JsonConfigSource::new(path)));
    }
    let config = builder.add_source(Box::new(EnvConfigSource)).build()?;
    config.validate()?;
    Ok(config)
}
