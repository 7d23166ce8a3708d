// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::ServerConfig;
use clap::Parser;
use std::time::Duration;

/// Command line options. Every option given here overrides its environment variable.
#[derive(Parser, Debug, Default, Clone, PartialEq, Eq)]
#[command(name = "event-ingest-server")]
#[command(about = "Loki push endpoint persisting events to PostgreSQL", long_about = None)]
pub struct ServerArgs {
    /// Database connection string (DATABASE_CONNECTION_STRING).
    #[arg(long = "connection", value_name = "CONNECTION_STRING")]
    pub connection: Option<String>,

    /// Entries per flush (BATCH_SIZE).
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Seconds between timed flushes (FLUSH_INTERVAL_SECONDS).
    #[arg(long = "flush-interval", value_name = "SECONDS")]
    pub flush_interval: Option<u64>,

    /// Maximum queued entries (MAX_QUEUE_SIZE).
    #[arg(long = "max-queue")]
    pub max_queue: Option<usize>,

    /// HTTP listen port (HTTP_PORT).
    #[arg(long)]
    pub port: Option<u16>,

    /// Deployment environment name, reported at startup (ENVIRONMENT).
    #[arg(long)]
    pub environment: Option<String>,

    /// Debug logging, same as VERBOSE_LOGGING=true.
    #[arg(long)]
    pub verbose: bool,
}

impl ServerArgs {
    /// Overwrites `config` with every option that was given.
    pub fn merge_into(self, config: &mut ServerConfig) {
        if let Some(connection) = self.connection {
            config.database_url = connection;
        }
        if let Some(batch_size) = self.batch_size {
            config.ingest.batch_size = batch_size;
        }
        if let Some(secs) = self.flush_interval {
            config.ingest.flush_interval = Duration::from_secs(secs);
        }
        if let Some(max_queue) = self.max_queue {
            config.ingest.max_queue_size = max_queue;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(environment) = self.environment {
            config.environment = environment;
        }
        if self.verbose {
            config.log_level = "debug".to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_parse_all_options() {
        let args = ServerArgs::try_parse_from([
            "event-ingest-server",
            "--connection",
            "host=db user=ingest",
            "--batch-size",
            "250",
            "--flush-interval",
            "10",
            "--max-queue",
            "5000",
            "--port",
            "8080",
            "--environment",
            "Development",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(args.connection.as_deref(), Some("host=db user=ingest"));
        assert_eq!(args.batch_size, Some(250));
        assert_eq!(args.flush_interval, Some(10));
        assert_eq!(args.max_queue, Some(5000));
        assert_eq!(args.port, Some(8080));
        assert_eq!(args.environment.as_deref(), Some("Development"));
        assert!(args.verbose);
    }

    #[test]
    fn test_no_options_change_nothing() {
        let args = ServerArgs::try_parse_from(["event-ingest-server"]).unwrap();
        assert_eq!(args, ServerArgs::default());
        let mut config = ServerConfig::default();
        args.merge_into(&mut config);
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_help_and_unknown_options() {
        let help = ServerArgs::try_parse_from(["event-ingest-server", "--help"]).unwrap_err();
        assert_eq!(help.kind(), ErrorKind::DisplayHelp);
        let invalid = ServerArgs::try_parse_from(["event-ingest-server", "--batch-size", "many"]);
        assert!(invalid.is_err());
    }
}
