// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory event store with a unique fingerprint constraint

use async_trait::async_trait;
use event_ingest::errors::StoreError;
use event_ingest::storage::{EventStore, FallbackRow, FieldValue, Row};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
    fallback: Vec<FallbackRow>,
    fingerprints: HashSet<String>,
    broken: HashSet<String>,
}

/// Skips rows whose fingerprint is already stored, like `ON CONFLICT DO NOTHING`.
#[derive(Default)]
pub struct MockStore {
    tables: Mutex<Tables>,
}

#[allow(dead_code)]
impl MockStore {
    /// Makes every insert into `table` fail as if the table did not exist.
    pub fn break_table(&self, table: &str) {
        self.tables.lock().unwrap().broken.insert(table.to_string());
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.lock().unwrap();
        tables.rows.get(table).cloned().unwrap_or_default()
    }

    pub fn fallback(&self) -> Vec<FallbackRow> {
        self.tables.lock().unwrap().fallback.clone()
    }

    pub fn total(&self) -> usize {
        self.tables.lock().unwrap().fingerprints.len()
    }
}

pub fn text(row: &Row, column: &str) -> Option<String> {
    match row.get(column) {
        Some(FieldValue::Text(value)) => Some(value.clone()),
        _ => None,
    }
}

#[async_trait]
impl EventStore for MockStore {
    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        if tables.broken.contains(table) {
            return Err(StoreError::Rejected(format!(
                "relation \"{table}\" does not exist"
            )));
        }
        let mut written = 0;
        for row in rows {
            let fingerprint = text(row, "fingerprint").unwrap_or_default();
            if tables.fingerprints.insert(fingerprint) {
                tables
                    .rows
                    .entry(table.to_string())
                    .or_default()
                    .push(row.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn insert_fallback(&self, rows: &[FallbackRow]) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let mut written = 0;
        for row in rows {
            if tables.fingerprints.insert(row.fingerprint.to_string()) {
                tables.fallback.push(row.clone());
                written += 1;
            }
        }
        Ok(written)
    }
}
