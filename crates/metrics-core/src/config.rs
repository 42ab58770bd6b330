// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration plumbing shared by the agent and the server.
//!
//! Each binary assembles its config from ordered [`ConfigSource`]s (defaults,
//! then an optional JSON file, then environment variables). Later sources win.
//! Source structs use `Option` fields and are merged with [`merge_value!`] /
//! [`merge_option!`].

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::error;

/// Env var holding the path of the JSON config file.
pub const CONFIG_FILE_ENV: &str = "CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub trait ConfigSource<C> {
    fn load(&self, config: &mut C) -> Result<(), ConfigError>;
}

pub struct ConfigBuilder<C> {
    sources: Vec<Box<dyn ConfigSource<C>>>,
    config: C,
}

impl<C: Default> Default for ConfigBuilder<C> {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            config: C::default(),
        }
    }
}

impl<C> ConfigBuilder<C> {
    #[must_use]
    pub fn add_source(mut self, source: Box<dyn ConfigSource<C>>) -> Self {
        self.sources.push(source);
        self
    }

    /// Applies every source in order. A source that fails to parse is fatal.
    pub fn build(mut self) -> Result<C, ConfigError> {
        for source in &self.sources {
            source.load(&mut self.config)?;
        }
        Ok(self.config)
    }
}

/// Merges `Some` values of a source struct into non-optional config fields.
#[macro_export]
macro_rules! merge_value {
    ($config:expr, $source:expr, $field:ident) => {
        if let Some(value) = &$source.$field {
            $config.$field.clone_from(value);
        }
    };
}

/// Merges `Some` values of a source struct into optional config fields.
#[macro_export]
macro_rules! merge_option {
    ($config:expr, $source:expr, $field:ident) => {
        if $source.$field.is_some() {
            $config.$field.clone_from(&$source.$field);
        }
    };
}

/// Parses `"10"`, `"10s"`, `"500ms"`, `"2m"` or `"1h"`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| ConfigError::Parse(format!("invalid duration '{raw}'")))?;
    let seconds = match unit.trim() {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => {
            return Err(ConfigError::Parse(format!(
                "invalid duration unit '{other}' in '{raw}'"
            )))
        }
    };
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| ConfigError::Parse(format!("invalid duration '{raw}'")))
}

pub fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => match n.as_u64() {
            Some(seconds) => Ok(Some(Duration::from_secs(seconds))),
            None => Err(serde::de::Error::custom(format!(
                "invalid duration {n}, expected a non-negative number of seconds"
            ))),
        },
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_duration(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "invalid duration {other}, expected seconds or a string like \"10s\""
        ))),
    }
}

pub fn deserialize_optional_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(Some(b)),
        Value::Number(n) => Ok(Some(n.as_i64().is_some_and(|v| v != 0))),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "t" | "yes" => Ok(Some(true)),
            "false" | "0" | "f" | "no" => Ok(Some(false)),
            "" => Ok(None),
            other => Err(serde::de::Error::custom(format!(
                "invalid boolean '{other}'"
            ))),
        },
        Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "invalid boolean {other}"
        ))),
    }
}

/// Figment parses numeric-looking env values as numbers; keys and addresses
/// must stay strings.
pub fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, got {other}"
        ))),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    #[must_use]
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Invalid log level: '{s}'. Valid levels are: error, warn, info, debug, trace",
            )),
        }
    }
}

/// Lenient: an unknown level is logged and replaced by the default.
impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if let Value::String(s) = value {
            match LogLevel::from_str(&s) {
                Ok(level) => Ok(level),
                Err(e) => {
                    error!("{e}, using default");
                    Ok(LogLevel::default())
                }
            }
        } else {
            error!("Expected a string for log level, got {value}, using default");
            Ok(LogLevel::default())
        }
    }
}
