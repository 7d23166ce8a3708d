// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::entry::PendingEntry;
use crate::errors::StoreError;
use crate::fingerprint::Labels;
use crate::storage::{EventStore, FallbackRow, FieldValue, Row};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Entries with timestamps taken from `range` and a fixed label set.
pub fn entries(range: Range<i64>) -> Vec<PendingEntry> {
    let labels = Arc::new(Labels::from([("app".to_string(), "test".to_string())]));
    range
        .map(|ts| {
            PendingEntry::new(ts, format!("line {ts}"), Arc::clone(&labels), Utc::now()).unwrap()
        })
        .collect()
}

pub fn event_entry(ts: i64, event_name: &str, data: Value) -> PendingEntry {
    let content = json!({"event_name": event_name, "event_data": data}).to_string();
    PendingEntry::new(ts, content, Arc::new(Labels::new()), Utc::now()).unwrap()
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    fallback: Vec<FallbackRow>,
    fingerprints: HashSet<String>,
    table_failures: HashMap<String, StoreError>,
    fallback_failure: Option<StoreError>,
}

/// In-memory store enforcing fingerprint uniqueness across all tables.
///
/// By default conflicting rows are skipped and the insert reports fewer rows. A strict store
/// fails the whole statement with a unique violation instead. While held, inserts park until
/// released.
#[derive(Default)]
pub struct MemoryStore {
    strict: bool,
    state: Mutex<State>,
    held: AtomicBool,
    entered: Notify,
    released: Notify,
}

impl MemoryStore {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn fail_table(&self, table: &str, error: StoreError) {
        let mut state = self.state.lock().unwrap();
        state.table_failures.insert(table.to_string(), error);
    }

    pub fn fail_fallback(&self, error: StoreError) {
        self.state.lock().unwrap().fallback_failure = Some(error);
    }

    pub fn table_len(&self, table: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.tables.get(table).map_or(0, Vec::len)
    }

    pub fn fallback_len(&self) -> usize {
        self.state.lock().unwrap().fallback.len()
    }

    pub fn fallback_rows(&self) -> Vec<FallbackRow> {
        self.state.lock().unwrap().fallback.clone()
    }

    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Waits until an insert is parked on the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.released.notify_one();
    }

    async fn gate(&self) {
        if self.held.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.released.notified().await;
        }
    }

    fn admit<'a>(
        &self,
        state: &State,
        fingerprints: impl Iterator<Item = &'a str>,
    ) -> Result<Vec<bool>, StoreError> {
        let mut batch = HashSet::new();
        let fresh: Vec<bool> = fingerprints
            .map(|fp| !state.fingerprints.contains(fp) && batch.insert(fp))
            .collect();
        if self.strict && fresh.iter().any(|fresh| !fresh) {
            return Err(StoreError::UniqueViolation("fingerprint".to_string()));
        }
        Ok(fresh)
    }
}

fn row_fingerprint(row: &Row) -> &str {
    match row.get("fingerprint") {
        Some(FieldValue::Text(fp)) => fp,
        _ => "",
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<u64, StoreError> {
        self.gate().await;
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.table_failures.get(table) {
            return Err(error.clone());
        }
        let fresh = self.admit(&state, rows.iter().map(row_fingerprint))?;
        let mut written = 0;
        for (row, fresh) in rows.iter().zip(fresh) {
            if fresh {
                state.fingerprints.insert(row_fingerprint(row).to_string());
                state
                    .tables
                    .entry(table.to_string())
                    .or_default()
                    .push(row.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn insert_fallback(&self, rows: &[FallbackRow]) -> Result<u64, StoreError> {
        self.gate().await;
        let mut state = self.state.lock().unwrap();
        if let Some(error) = &state.fallback_failure {
            return Err(error.clone());
        }
        let fresh = self.admit(&state, rows.iter().map(|r| r.fingerprint.as_str()))?;
        let mut written = 0;
        for (row, fresh) in rows.iter().zip(fresh) {
            if fresh {
                state.fingerprints.insert(row.fingerprint.to_string());
                state.fallback.push(row.clone());
                written += 1;
            }
        }
        Ok(written)
    }
}
