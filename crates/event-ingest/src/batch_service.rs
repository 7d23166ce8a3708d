// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flush worker and the handle producers use to feed it.
//!
//! The service owns the flush timer and receives commands over a channel. Producers append to the
//! shared queue directly through the [`BatchHandle`], and ask the worker for a flush when the
//! queue reaches the batch size. A batch that does not fit triggers a flush on a detached task,
//! awaited by the producer, before the append is retried once. Dropping the producer's future
//! never abandons entries that flush already drained.

use crate::config::IngestConfig;
use crate::entry::PendingEntry;
use crate::errors::ServiceError;
use crate::flusher::{FlushReport, FlushTrigger, Flusher};
use crate::queue::IngestQueue;
use crate::router::Router;
use crate::schema::SchemaRegistry;
use crate::storage::EventStore;
use crate::writer::Writer;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum BatchCommand {
    Flush {
        trigger: FlushTrigger,
        response_tx: Option<oneshot::Sender<Option<FlushReport>>>,
    },
    Shutdown(oneshot::Sender<FlushReport>),
}

/// Result of handing a batch to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum EnqueueOutcome {
    /// The whole batch was queued; `queued` is the queue length afterwards.
    Accepted { queued: usize },
    /// The queue stayed full after a flush and the whole batch was dropped.
    Rejected { dropped: usize },
}

#[derive(Clone)]
pub struct BatchHandle {
    tx: mpsc::UnboundedSender<BatchCommand>,
    flusher: Arc<Flusher>,
    closed: Arc<AtomicBool>,
}

impl BatchHandle {
    /// Appends `entries` as one unit.
    pub async fn enqueue(
        &self,
        entries: Vec<PendingEntry>,
    ) -> Result<EnqueueOutcome, ServiceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ServiceError::NotRunning);
        }
        let queue = self.flusher.queue();
        let batch = match queue.try_push(entries) {
            Ok(queued) => return Ok(self.accepted(queued)),
            Err(batch) => batch,
        };

        warn!(
            "Queue full ({}/{}), flushing before accepting {} entries",
            queue.len(),
            queue.capacity(),
            batch.len()
        );
        // the flush owns drained entries until they are written, so it must outlive this caller
        let flusher = Arc::clone(&self.flusher);
        let flush =
            tokio::spawn(async move { flusher.try_flush(FlushTrigger::Backpressure).await });
        match flush.await {
            Ok(Some(report)) => debug!("Backpressure flush drained {} entries", report.drained),
            Ok(None) => {}
            Err(e) => error!("Backpressure flush failed: {e}"),
        }

        match queue.try_push(batch) {
            Ok(queued) => Ok(self.accepted(queued)),
            Err(batch) => {
                warn!(
                    "Dropping {} entries, queue still full ({}/{})",
                    batch.len(),
                    queue.len(),
                    queue.capacity()
                );
                Ok(EnqueueOutcome::Rejected {
                    dropped: batch.len(),
                })
            }
        }
    }

    fn accepted(&self, queued: usize) -> EnqueueOutcome {
        if queued >= self.flusher.batch_size() {
            // a closed channel means shutdown is draining the queue anyway
            let _ = self.request_flush(FlushTrigger::Threshold);
        }
        EnqueueOutcome::Accepted { queued }
    }

    /// Asks the worker for a flush without waiting for it.
    pub fn request_flush(&self, trigger: FlushTrigger) -> Result<(), ServiceError> {
        self.tx
            .send(BatchCommand::Flush {
                trigger,
                response_tx: None,
            })
            .map_err(|_| ServiceError::NotRunning)
    }

    /// Runs a flush on the worker and waits for it. `None` means another flush was in progress.
    pub async fn flush(&self) -> Result<Option<FlushReport>, ServiceError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatchCommand::Flush {
                trigger: FlushTrigger::Manual,
                response_tx: Some(response_tx),
            })
            .map_err(|e| {
                error!("Failed to send flush command: {e}");
                ServiceError::NotRunning
            })?;
        response_rx.await.map_err(|_| ServiceError::ResponseDropped)
    }

    /// Stops accepting entries, stops the timer and waits for the final flush.
    pub async fn shutdown(&self) -> Result<FlushReport, ServiceError> {
        self.closed.store(true, Ordering::Release);
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatchCommand::Shutdown(response_tx))
            .map_err(|_| ServiceError::NotRunning)?;
        response_rx.await.map_err(|_| ServiceError::ResponseDropped)
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.flusher.queue().len()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}

pub struct BatchService {
    flusher: Arc<Flusher>,
    rx: mpsc::UnboundedReceiver<BatchCommand>,
    flush_interval: Duration,
    closed: Arc<AtomicBool>,
}

impl BatchService {
    pub fn new(
        config: &IngestConfig,
        registry: Arc<SchemaRegistry>,
        store: Arc<dyn EventStore>,
    ) -> (Self, BatchHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let flusher = Arc::new(Flusher::new(
            Arc::new(IngestQueue::new(config.max_queue_size)),
            Router::new(registry),
            Writer::new(store),
            config.batch_size,
        ));
        let closed = Arc::new(AtomicBool::new(false));

        let service = Self {
            flusher: Arc::clone(&flusher),
            rx,
            flush_interval: config.flush_interval,
            closed: Arc::clone(&closed),
        };
        let handle = BatchHandle {
            tx,
            flusher,
            closed,
        };
        (service, handle)
    }

    /// Processes flush triggers until shutdown is requested or every handle is dropped, then
    /// persists everything still queued.
    pub async fn run(mut self) {
        debug!("Batch service started");
        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        let shutdown_tx = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_on(FlushTrigger::Interval).await;
                }
                command = self.rx.recv() => match command {
                    Some(BatchCommand::Flush { trigger, response_tx }) => {
                        let report = self.flush_on(trigger).await;
                        if let Some(response_tx) = response_tx {
                            if response_tx.send(report).is_err() {
                                error!("Failed to send flush response - receiver dropped");
                            }
                        }
                    }
                    Some(BatchCommand::Shutdown(response_tx)) => break Some(response_tx),
                    None => break None,
                }
            }
        };

        drop(ticker);
        self.closed.store(true, Ordering::Release);
        info!(
            "Batch service shutting down, {} entries queued",
            self.flusher.queue().len()
        );
        let report = self.flusher.flush_all(FlushTrigger::Shutdown).await;
        info!(
            "Final flush drained {} entries: {} persisted, {} fallback, {} duplicates, {} lost",
            report.drained,
            report.written.persisted,
            report.written.fallback,
            report.written.duplicates,
            report.written.lost
        );
        if let Some(response_tx) = shutdown_tx {
            if response_tx.send(report).is_err() {
                error!("Failed to send shutdown response - receiver dropped");
            }
        }
        debug!("Batch service stopped");
    }

    async fn flush_on(&self, trigger: FlushTrigger) -> Option<FlushReport> {
        if trigger != FlushTrigger::Threshold {
            return self.flusher.try_flush(trigger).await;
        }
        // keep going while producers outpace a single batch
        let mut total: Option<FlushReport> = None;
        while self.flusher.queue().len() >= self.flusher.batch_size() {
            match self.flusher.try_flush(trigger).await {
                Some(report) if report.drained > 0 => {
                    total.get_or_insert_with(FlushReport::default).merge(&report);
                }
                _ => break,
            }
        }
        total
    }
}
