// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO of pending entries.
//!
//! Producers append through an unbounded channel after reserving capacity on an atomic counter,
//! so appends never take a lock. The receiving half sits behind an async mutex: whoever holds it
//! is the single flusher, and `try_drain` is the non-blocking single-flight acquisition.

use crate::entry::PendingEntry;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, MutexGuard};
use tracing::error;

pub struct IngestQueue {
    tx: UnboundedSender<PendingEntry>,
    rx: Mutex<UnboundedReceiver<PendingEntry>>,
    len: AtomicUsize,
    max_size: usize,
}

impl IngestQueue {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
            max_size,
        }
    }

    /// Appends the whole batch, or nothing.
    ///
    /// Returns the queue length after the append. When the batch does not fit it is handed back
    /// untouched.
    pub fn try_push(&self, batch: Vec<PendingEntry>) -> Result<usize, Vec<PendingEntry>> {
        let count = batch.len();
        if count == 0 {
            return Ok(self.len());
        }
        let reserved = self
            .len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(count)
                    .filter(|next| *next <= self.max_size)
            });
        let previous = match reserved {
            Ok(previous) => previous,
            Err(_) => return Err(batch),
        };

        let mut unsent = 0;
        for entry in batch {
            if self.tx.send(entry).is_err() {
                unsent += 1;
            }
        }
        if unsent > 0 {
            // only possible if the receiver is gone, which the queue itself owns
            error!("Queue receiver closed, {unsent} entries were not enqueued");
            self.len.fetch_sub(unsent, Ordering::AcqRel);
        }
        Ok(previous + count - unsent)
    }

    /// Acquires the drain side if no other flush holds it.
    pub fn try_drain(&self) -> Option<DrainGuard<'_>> {
        self.rx.try_lock().ok().map(|rx| DrainGuard {
            rx,
            len: &self.len,
        })
    }

    /// Waits for the drain side, for the final flush.
    pub async fn drain(&self) -> DrainGuard<'_> {
        DrainGuard {
            rx: self.rx.lock().await,
            len: &self.len,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

/// Exclusive access to the head of the queue. Dropping it releases the flush guard.
pub struct DrainGuard<'a> {
    rx: MutexGuard<'a, UnboundedReceiver<PendingEntry>>,
    len: &'a AtomicUsize,
}

impl DrainGuard<'_> {
    /// Removes up to `max` entries in arrival order.
    pub fn take(&mut self, max: usize) -> Vec<PendingEntry> {
        let mut entries = Vec::with_capacity(max.min(self.len.load(Ordering::Acquire)));
        while entries.len() < max {
            match self.rx.try_recv() {
                Ok(entry) => entries.push(entry),
                Err(_) => break,
            }
        }
        if !entries.is_empty() {
            self.len.fetch_sub(entries.len(), Ordering::AcqRel);
        }
        entries
    }

    pub fn take_all(&mut self) -> Vec<PendingEntry> {
        self.take(usize::MAX)
    }
}
