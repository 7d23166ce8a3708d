// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persists routed batches.
//!
//! A fingerprint conflict is a duplicate and counts as success. A destination write that fails
//! for any other reason is redirected to the fallback table, and a fallback write that fails is
//! logged and counted as lost.

use crate::errors::StoreError;
use crate::router::{DestinationBatch, RoutedBatch};
use crate::storage::{EventStore, FallbackRow, Row};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::slice;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Outcome counters of one write pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    /// Rows inserted into destination tables.
    pub persisted: usize,
    /// Rows inserted into the fallback table.
    pub fallback: usize,
    pub duplicates: usize,
    /// Destination rows that were sent to the fallback table after a failed write.
    pub redirected: usize,
    pub lost: usize,
}

impl WriteReport {
    pub fn merge(&mut self, other: &WriteReport) {
        self.persisted += other.persisted;
        self.fallback += other.fallback;
        self.duplicates += other.duplicates;
        self.redirected += other.redirected;
        self.lost += other.lost;
    }

    /// Entries that reached a terminal state in storage.
    #[must_use]
    pub fn settled(&self) -> usize {
        self.persisted + self.fallback + self.duplicates
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inserted {
    /// Rows actually written, and rows the store skipped as already present.
    Rows { written: usize, skipped: usize },
    Duplicate,
}

fn inserted(result: Result<u64, StoreError>, attempted: usize) -> Result<Inserted, StoreError> {
    match result {
        Ok(n) => {
            let written = usize::try_from(n).unwrap_or(usize::MAX).min(attempted);
            Ok(Inserted::Rows {
                written,
                skipped: attempted - written,
            })
        }
        Err(StoreError::UniqueViolation(_)) if attempted == 1 => Ok(Inserted::Duplicate),
        Err(e) => Err(e),
    }
}

#[derive(Clone)]
pub struct Writer {
    store: Arc<dyn EventStore>,
}

impl Writer {
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub async fn write(&self, routed: RoutedBatch) -> WriteReport {
        let mut report = WriteReport::default();
        let mut fallback = routed.fallback;

        for batch in routed.destinations {
            self.write_destination(batch, routed.created_at, &mut report, &mut fallback)
                .await;
        }
        if !fallback.is_empty() {
            self.write_fallback(&fallback, &mut report).await;
        }
        report
    }

    async fn write_destination(
        &self,
        batch: DestinationBatch,
        created_at: DateTime<Utc>,
        report: &mut WriteReport,
        fallback: &mut Vec<FallbackRow>,
    ) {
        let table = batch.destination.table.as_str();
        let event_name = batch.destination.event_name.as_str();
        let attempted = batch.rows.len();

        match inserted(self.store.insert_rows(table, &batch.rows).await, attempted) {
            Ok(Inserted::Rows { written, skipped }) => {
                report.persisted += written;
                report.duplicates += skipped;
                debug!("Inserted {written} row(s) into {table}, {skipped} already present");
            }
            Ok(Inserted::Duplicate) => report.duplicates += 1,
            Err(StoreError::UniqueViolation(_)) => {
                debug!(
                    "Unique violation on bulk insert into {table}, retrying {attempted} rows one by one"
                );
                for (row, entry) in batch.rows.iter().zip(&batch.entries) {
                    match self.insert_one(table, row).await {
                        Ok(Inserted::Rows { written, skipped }) => {
                            report.persisted += written;
                            report.duplicates += skipped;
                        }
                        Ok(Inserted::Duplicate) => report.duplicates += 1,
                        Err(e) => {
                            warn!(
                                "Failed to insert entry {} into {table}, redirecting to fallback: {e}",
                                entry.fingerprint
                            );
                            report.redirected += 1;
                            fallback.push(FallbackRow::from_entry(
                                entry,
                                Some(event_name),
                                created_at,
                            ));
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Failed to insert {attempted} row(s) into {table}, redirecting to fallback: {e}"
                );
                report.redirected += attempted;
                fallback.extend(
                    batch
                        .entries
                        .iter()
                        .map(|entry| FallbackRow::from_entry(entry, Some(event_name), created_at)),
                );
            }
        }
    }

    async fn insert_one(&self, table: &str, row: &Row) -> Result<Inserted, StoreError> {
        inserted(self.store.insert_rows(table, slice::from_ref(row)).await, 1)
    }

    async fn write_fallback(&self, rows: &[FallbackRow], report: &mut WriteReport) {
        let attempted = rows.len();
        match inserted(self.store.insert_fallback(rows).await, attempted) {
            Ok(Inserted::Rows { written, skipped }) => {
                report.fallback += written;
                report.duplicates += skipped;
                debug!("Inserted {written} fallback row(s), {skipped} already present");
            }
            Ok(Inserted::Duplicate) => report.duplicates += 1,
            Err(StoreError::UniqueViolation(_)) => {
                for row in rows {
                    let result = self.store.insert_fallback(slice::from_ref(row)).await;
                    match inserted(result, 1) {
                        Ok(Inserted::Rows { written, skipped }) => {
                            report.fallback += written;
                            report.duplicates += skipped;
                        }
                        Ok(Inserted::Duplicate) => report.duplicates += 1,
                        Err(e) => {
                            error!(
                                "Dropping entry {}, fallback insert failed: {e}",
                                row.fingerprint
                            );
                            report.lost += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Dropping {attempted} entries, fallback insert failed: {e}");
                report.lost += attempted;
            }
        }
    }
}
