// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Storage seam: the [`EventStore`] trait and the row shapes handed to it.

use crate::entry::PendingEntry;
use crate::errors::StoreError;
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A typed column value of a projected row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

/// Column name to value, ordered by column name.
pub type Row = BTreeMap<String, FieldValue>;

/// Row of the fallback table: everything needed to replay the entry later.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackRow {
    pub id: Uuid,
    /// Event name when the envelope decoded, empty otherwise.
    pub event_name: String,
    pub raw_content: String,
    pub raw_labels_json: String,
    pub timestamp_ns: i64,
    pub event_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

impl FallbackRow {
    #[must_use]
    pub fn from_entry(
        entry: &PendingEntry,
        event_name: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Self {
        // sorted for stable output
        let sorted: BTreeMap<&String, &String> = entry.labels.iter().collect();
        Self {
            id: Uuid::new_v4(),
            event_name: event_name.unwrap_or_default().to_string(),
            raw_content: entry.content.clone(),
            raw_labels_json: serde_json::to_string(&sorted).unwrap_or_default(),
            timestamp_ns: entry.timestamp_nanos,
            event_timestamp: entry.event_time(),
            created_at,
            fingerprint: entry.fingerprint.clone(),
        }
    }
}

/// Persistence backend for routed batches.
///
/// Implementations must report a fingerprint conflict as [`StoreError::UniqueViolation`] so the
/// writer can count it as a duplicate. Both methods return the number of rows actually inserted.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Inserts `rows` into `table` in one statement.
    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<u64, StoreError>;

    async fn insert_fallback(&self, rows: &[FallbackRow]) -> Result<u64, StoreError>;
}
