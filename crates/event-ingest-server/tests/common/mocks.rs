// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use event_ingest::errors::StoreError;
use event_ingest::storage::{EventStore, FallbackRow, Row};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Counts stored rows. While held, every insert parks until [`GatedStore::release`].
#[derive(Default)]
pub struct GatedStore {
    rows: AtomicUsize,
    held: AtomicBool,
    entered: Notify,
    released: Notify,
}

#[allow(dead_code)]
impl GatedStore {
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

    pub fn stored(&self) -> usize {
        self.rows.load(Ordering::SeqCst)
    }

    async fn gate(&self, count: usize) -> Result<u64, StoreError> {
        if self.held.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.released.notified().await;
        }
        self.rows.fetch_add(count, Ordering::SeqCst);
        Ok(count as u64)
    }
}

#[async_trait]
impl EventStore for GatedStore {
    async fn insert_rows(&self, _table: &str, rows: &[Row]) -> Result<u64, StoreError> {
        self.gate(rows.len()).await
    }

    async fn insert_fallback(&self, rows: &[FallbackRow]) -> Result<u64, StoreError> {
        self.gate(rows.len()).await
    }
}
