// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::cli::ServerArgs;
use event_ingest::config::{env_bool, env_parse, IngestConfig};
use event_ingest::errors::ConfigError;
use event_ingest_postgres::config::{DEFAULT_FALLBACK_TABLE, DEFAULT_MAX_POOL_SIZE};
use event_ingest_postgres::PostgresConfig;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_HTTP_PORT: u16 = 5000;
pub const DEFAULT_SCHEMA_DIR: &str = "./json";
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_ENVIRONMENT: &str = "Production";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
    /// Directory of JSON table descriptors.
    pub schema_dir: PathBuf,
    pub fallback_table: String,
    pub max_request_bytes: usize,
    pub log_level: String,
    pub db_pool_size: usize,
    pub environment: String,
    pub ingest: IngestConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
            database_url: String::new(),
            schema_dir: PathBuf::from(DEFAULT_SCHEMA_DIR),
            fallback_table: DEFAULT_FALLBACK_TABLE.to_string(),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            db_pool_size: DEFAULT_MAX_POOL_SIZE,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            ingest: IngestConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads the process environment. Nothing is checked here, call [`ServerConfig::validate`].
    #[must_use]
    pub fn from_env() -> Self {
        // an explicit LOG_LEVEL wins over VERBOSE_LOGGING
        let log_level = match env::var("LOG_LEVEL") {
            Ok(level) if !level.trim().is_empty() => level.trim().to_lowercase(),
            _ if env_bool("VERBOSE_LOGGING") == Some(true) => "debug".to_string(),
            _ => DEFAULT_LOG_LEVEL.to_string(),
        };

        Self {
            port: env_parse("HTTP_PORT", DEFAULT_HTTP_PORT),
            database_url: env::var("DATABASE_CONNECTION_STRING").unwrap_or_default(),
            schema_dir: env::var("SCHEMA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SCHEMA_DIR)),
            fallback_table: env::var("FALLBACK_TABLE")
                .map(|table| table.trim().to_string())
                .unwrap_or_else(|_| DEFAULT_FALLBACK_TABLE.to_string()),
            max_request_bytes: env_parse("MAX_REQUEST_BYTES", DEFAULT_MAX_REQUEST_BYTES),
            log_level,
            db_pool_size: env_parse("DB_POOL_SIZE", DEFAULT_MAX_POOL_SIZE),
            environment: env::var("ENVIRONMENT")
                .ok()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            ingest: IngestConfig::from_env(),
        }
    }

    /// The environment with command line options layered on top.
    #[must_use]
    pub fn load(args: ServerArgs) -> Self {
        let mut config = Self::from_env();
        args.merge_into(&mut config);
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ingest.validate()?;
        self.postgres().validate()?;
        if self.port == 0 {
            return Err(ConfigError::Invalid(
                "HTTP_PORT must be greater than 0".to_string(),
            ));
        }
        if self.max_request_bytes == 0 {
            return Err(ConfigError::Invalid(
                "MAX_REQUEST_BYTES must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig {
            connection_string: self.database_url.clone(),
            max_pool_size: self.db_pool_size,
            fallback_table: self.fallback_table.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;
    use std::time::Duration;

    const VARS: [&str; 12] = [
        "HTTP_PORT",
        "DATABASE_CONNECTION_STRING",
        "SCHEMA_DIR",
        "FALLBACK_TABLE",
        "MAX_REQUEST_BYTES",
        "LOG_LEVEL",
        "VERBOSE_LOGGING",
        "DB_POOL_SIZE",
        "BATCH_SIZE",
        "FLUSH_INTERVAL_SECONDS",
        "MAX_QUEUE_SIZE",
        "ENVIRONMENT",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_require_connection_string() {
        clear();
        let config = ServerConfig::from_env();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.port, 5000);
        assert_eq!(config.schema_dir, PathBuf::from("./json"));
        assert_eq!(config.max_request_bytes, 10 * 1024 * 1024);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.environment, "Production");

        let error = config.validate().unwrap_err();
        assert!(matches!(
            error,
            ConfigError::Missing("DATABASE_CONNECTION_STRING")
        ));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear();
        env::set_var("HTTP_PORT", "8080");
        env::set_var(
            "DATABASE_CONNECTION_STRING",
            "postgres://ingest@localhost/events",
        );
        env::set_var("SCHEMA_DIR", "/etc/ingest/tables");
        env::set_var("FALLBACK_TABLE", "raw_events");
        env::set_var("DB_POOL_SIZE", "4");
        env::set_var("BATCH_SIZE", "50");
        env::set_var("FLUSH_INTERVAL_SECONDS", "2");
        let config = ServerConfig::from_env();
        clear();

        assert_eq!(config.port, 8080);
        assert_eq!(config.schema_dir, PathBuf::from("/etc/ingest/tables"));
        assert_eq!(config.ingest.batch_size, 50);
        assert_eq!(config.ingest.flush_interval, Duration::from_secs(2));
        assert!(config.validate().is_ok());

        let postgres = config.postgres();
        assert_eq!(postgres.fallback_table, "raw_events");
        assert_eq!(postgres.max_pool_size, 4);
    }

    #[test]
    #[serial]
    fn test_log_level() {
        clear();
        env::set_var("VERBOSE_LOGGING", "true");
        assert_eq!(ServerConfig::from_env().log_level, "debug");

        env::set_var("LOG_LEVEL", "WARN");
        assert_eq!(ServerConfig::from_env().log_level, "warn");

        env::remove_var("LOG_LEVEL");
        env::set_var("VERBOSE_LOGGING", "false");
        assert_eq!(ServerConfig::from_env().log_level, "info");
        clear();
    }

    #[test]
    #[serial]
    fn test_command_line_overrides_environment() {
        clear();
        env::set_var("DATABASE_CONNECTION_STRING", "host=env-db");
        env::set_var("HTTP_PORT", "6000");
        env::set_var("BATCH_SIZE", "50");
        env::set_var("FLUSH_INTERVAL_SECONDS", "2");
        env::set_var("MAX_QUEUE_SIZE", "500");
        env::set_var("ENVIRONMENT", "Staging");
        env::set_var("LOG_LEVEL", "warn");
        let args = ServerArgs::try_parse_from([
            "event-ingest-server",
            "--connection",
            "host=cli-db",
            "--batch-size",
            "200",
            "--flush-interval",
            "9",
            "--max-queue",
            "4000",
            "--environment",
            "Development",
            "--verbose",
        ])
        .unwrap();
        let config = ServerConfig::load(args);
        clear();

        assert_eq!(config.database_url, "host=cli-db");
        assert_eq!(config.ingest.batch_size, 200);
        assert_eq!(config.ingest.flush_interval, Duration::from_secs(9));
        assert_eq!(config.ingest.max_queue_size, 4000);
        assert_eq!(config.environment, "Development");
        assert_eq!(config.log_level, "debug");
        // not given on the command line
        assert_eq!(config.port, 6000);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_environment_kept_without_command_line_options() {
        clear();
        env::set_var("DATABASE_CONNECTION_STRING", "host=env-db");
        env::set_var("BATCH_SIZE", "50");
        env::set_var("LOG_LEVEL", "warn");
        let args = ServerArgs::try_parse_from(["event-ingest-server", "--port", "7000"]).unwrap();
        let config = ServerConfig::load(args);
        clear();

        assert_eq!(config.database_url, "host=env-db");
        assert_eq!(config.ingest.batch_size, 50);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn test_validate_rejects_bad_fallback_table() {
        let config = ServerConfig {
            database_url: "host=localhost".to_string(),
            fallback_table: "Loki Logs".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_small_queue() {
        let config = ServerConfig {
            database_url: "host=localhost".to_string(),
            ingest: IngestConfig {
                batch_size: 100,
                max_queue_size: 10,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
