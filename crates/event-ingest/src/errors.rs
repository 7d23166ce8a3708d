// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Invalid or inconsistent configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required setting {0}")]
    Missing(&'static str),
}

/// Why a pushed value could not become a pending entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    #[error("expected [timestamp, line], got {0} element(s)")]
    Shape(usize),

    #[error("timestamp must be a string of nanoseconds")]
    TimestampType,

    #[error("unparsable timestamp {0:?}")]
    Timestamp(String),

    #[error("timestamp {0} is before the Unix epoch")]
    NegativeTimestamp(i64),

    #[error("log line must be a string")]
    LineType,
}

/// Failure to decode an entry's content into an event envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("content is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("content is not a JSON object")]
    NotAnObject,

    #[error("missing or empty event_name")]
    MissingEventName,

    #[error("event_data is neither an object nor a JSON-encoded object")]
    InvalidPayload,
}

/// Errors raised while loading table descriptors into the schema registry.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("failed to read descriptor directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no table descriptors found in {0}")]
    Empty(PathBuf),

    #[error("invalid identifier {0:?}: must start with a letter or underscore and contain only lowercase ASCII letters, digits and underscores (max 63)")]
    InvalidIdentifier(String),

    #[error("table {table} declares no columns")]
    NoColumns { table: String },

    #[error("column {column} of table {table} collides with a system column")]
    ReservedColumn { table: String, column: String },

    #[error("column {column} is declared twice in table {table}")]
    DuplicateColumn { table: String, column: String },

    #[error("event {0} is mapped to more than one table")]
    DuplicateEvent(String),

    #[error("table {0} is declared more than once")]
    DuplicateTable(String),
}

/// Storage failures, classified so the writer can tell duplicates from real errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A row with the same fingerprint already exists.
    #[error("uniqueness constraint violated: {0}")]
    UniqueViolation(String),

    /// Connectivity, pool exhaustion, timeouts.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The database refused the statement (schema mismatch, bad value, ...).
    #[error("storage rejected the write: {0}")]
    Rejected(String),
}

impl StoreError {
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

/// Errors returned by the batch service handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("batch service is not running")]
    NotRunning,

    #[error("batch service dropped the response")]
    ResponseDropped,
}
