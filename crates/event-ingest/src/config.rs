// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ConfigError;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;
/// One day.
pub const MAX_FLUSH_INTERVAL_SECS: u64 = 86_400;

/// Batching parameters of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Entries persisted per flush, and the queue length that triggers one.
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Hard ceiling on queued entries.
    pub max_queue_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

impl IngestConfig {
    /// Reads `BATCH_SIZE`, `FLUSH_INTERVAL_SECONDS` and `MAX_QUEUE_SIZE`, keeping the default for
    /// any variable that is unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            batch_size: env_parse("BATCH_SIZE", DEFAULT_BATCH_SIZE),
            flush_interval: Duration::from_secs(env_parse(
                "FLUSH_INTERVAL_SECONDS",
                DEFAULT_FLUSH_INTERVAL_SECS,
            )),
            max_queue_size: env_parse("MAX_QUEUE_SIZE", DEFAULT_MAX_QUEUE_SIZE),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "BATCH_SIZE must be greater than 0".to_string(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "FLUSH_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.flush_interval > Duration::from_secs(MAX_FLUSH_INTERVAL_SECS) {
            return Err(ConfigError::Invalid(format!(
                "FLUSH_INTERVAL_SECONDS ({}) must be at most {MAX_FLUSH_INTERVAL_SECS}",
                self.flush_interval.as_secs()
            )));
        }
        if self.max_queue_size < self.batch_size {
            return Err(ConfigError::Invalid(format!(
                "MAX_QUEUE_SIZE ({}) must be at least BATCH_SIZE ({})",
                self.max_queue_size, self.batch_size
            )));
        }
        Ok(())
    }
}

/// Parses `key` from the environment, falling back to `default` when it is unset or invalid.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Ignoring invalid {key}={raw:?} ({e}), using {default}");
            default
        }),
        Err(_) => default,
    }
}

/// Parses a boolean environment variable. Accepts the usual truthy and falsy spellings.
#[must_use]
pub fn env_bool(key: &str) -> Option<bool> {
    let raw = env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => {
            warn!("Ignoring invalid boolean {key}={raw:?}");
            None
        }
    }
}
