// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::entry::PendingEntry;
use crate::queue::IngestQueue;
use crate::router::Router;
use crate::writer::{WriteReport, Writer};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// What started a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Interval,
    Threshold,
    Manual,
    Backpressure,
    Shutdown,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushTrigger::Interval => "interval",
            FlushTrigger::Threshold => "threshold",
            FlushTrigger::Manual => "manual",
            FlushTrigger::Backpressure => "backpressure",
            FlushTrigger::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub drained: usize,
    pub written: WriteReport,
}

impl FlushReport {
    pub fn merge(&mut self, other: &FlushReport) {
        self.drained += other.drained;
        self.written.merge(&other.written);
    }
}

/// Drains the queue, routes and writes. At most one flush runs at a time, guarded by the queue's
/// drain lock.
pub struct Flusher {
    queue: Arc<IngestQueue>,
    router: Router,
    writer: Writer,
    batch_size: usize,
}

impl Flusher {
    #[must_use]
    pub fn new(queue: Arc<IngestQueue>, router: Router, writer: Writer, batch_size: usize) -> Self {
        Self {
            queue,
            router,
            writer,
            batch_size,
        }
    }

    /// Flushes up to one batch if no other flush is running.
    ///
    /// Returns `None` when another flush holds the guard.
    pub async fn try_flush(&self, trigger: FlushTrigger) -> Option<FlushReport> {
        let Some(mut guard) = self.queue.try_drain() else {
            debug!("Skipping {trigger} flush, another flush is in progress");
            return None;
        };
        let entries = guard.take(self.batch_size);
        if entries.is_empty() {
            return Some(FlushReport::default());
        }
        let report = self.persist(entries, trigger).await;
        drop(guard);
        Some(report)
    }

    /// Waits for any running flush, then persists everything queued in batch-sized chunks.
    pub async fn flush_all(&self, trigger: FlushTrigger) -> FlushReport {
        let mut guard = self.queue.drain().await;
        let mut total = FlushReport::default();
        loop {
            let entries = guard.take(self.batch_size);
            if entries.is_empty() {
                break;
            }
            let report = self.persist(entries, trigger).await;
            total.merge(&report);
        }
        total
    }

    async fn persist(&self, entries: Vec<PendingEntry>, trigger: FlushTrigger) -> FlushReport {
        let started = Instant::now();
        let drained = entries.len();
        let routed = self.router.route(entries);
        let written = self.writer.write(routed).await;
        debug!(
            "Flushed {drained} entries ({trigger}) in {:?}: {} persisted, {} fallback, {} duplicates, {} lost, {} still queued",
            started.elapsed(),
            written.persisted,
            written.fallback,
            written.duplicates,
            written.lost,
            self.queue.len()
        );
        FlushReport { drained, written }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<IngestQueue> {
        &self.queue
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}
