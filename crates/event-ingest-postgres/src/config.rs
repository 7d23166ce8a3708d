// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use event_ingest::errors::ConfigError;
use event_ingest::schema::validate_identifier;

pub const DEFAULT_MAX_POOL_SIZE: usize = 16;
pub const DEFAULT_FALLBACK_TABLE: &str = "loki_logs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// `postgres://` URL, libpq `key=value` string, or `Host=...;Username=...` pairs.
    pub connection_string: String,
    pub max_pool_size: usize,
    pub fallback_table: String,
}

impl PostgresConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            fallback_table: DEFAULT_FALLBACK_TABLE.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_string.trim().is_empty() {
            return Err(ConfigError::Missing("DATABASE_CONNECTION_STRING"));
        }
        if self.max_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "DB_POOL_SIZE must be greater than 0".to_string(),
            ));
        }
        validate_identifier(&self.fallback_table)
            .map_err(|e| ConfigError::Invalid(format!("FALLBACK_TABLE: {e}")))?;
        Ok(())
    }

    /// Connection string in a form tokio-postgres parses.
    ///
    /// Semicolon separated `Key=Value` pairs are rewritten to libpq keywords, anything else is
    /// passed through.
    #[must_use]
    pub fn normalized_connection_string(&self) -> String {
        let raw = self.connection_string.trim();
        if raw.starts_with("postgres://") || raw.starts_with("postgresql://") || !raw.contains(';')
        {
            return raw.to_string();
        }
        raw.split(';')
            .filter_map(|pair| pair.split_once('='))
            .filter_map(|(key, value)| {
                let keyword = match key.trim().to_ascii_lowercase().replace(' ', "").as_str() {
                    "host" | "server" => "host",
                    "port" => "port",
                    "database" | "dbname" => "dbname",
                    "username" | "user" | "userid" => "user",
                    "password" => "password",
                    "sslmode" => "sslmode",
                    "timeout" => "connect_timeout",
                    "applicationname" => "application_name",
                    _ => return None,
                };
                Some(format!("{keyword}={}", quote_value(value.trim())))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
