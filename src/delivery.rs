//! Upstream delivery worker.
//!
//! Accepted readings are handed to a task that owns the sink and the offline
//! queue, so sink latency never reaches the event path. A full backlog spills
//! straight into the offline queue.

use crate::pipeline::PipelineStatsHandle;
use crate::queue::OfflineQueue;
use crate::reading::Reading;
use crate::sink::Sink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Readings waiting for the sink before new ones spill into the offline queue
pub const DELIVERY_BACKLOG: usize = 32;

/// What the worker tells the pipeline about delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryReport {
    /// A live send failed and the reading went to the offline queue
    SinkFailed,
    /// Offline queue depth after a flush or a failed send
    QueueDepth(usize),
}

/// Where a submitted reading went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Waiting in the backlog for the worker
    Pending,
    /// Backlog full or worker gone; stored in the offline queue
    Spilled,
}

/// Non-blocking entry point used by the pipeline
pub struct DeliveryHandle {
    readings: mpsc::Sender<Reading>,
    queue: Arc<OfflineQueue>,
    stats: PipelineStatsHandle,
    spilled: Arc<AtomicBool>,
}

impl DeliveryHandle {
    pub async fn submit(&self, reading: Reading) -> Submission {
        let reading = match self.readings.try_send(reading) {
            Ok(()) => return Submission::Pending,
            Err(TrySendError::Full(reading)) => {
                debug!("Delivery backlog full, queueing reading offline");
                reading
            }
            Err(TrySendError::Closed(reading)) => {
                warn!("Delivery worker stopped, queueing reading offline");
                reading
            }
        };

        self.queue.enqueue(reading).await;
        self.stats.update(|s| s.queued += 1);
        self.spilled.store(true, Ordering::SeqCst);
        Submission::Spilled
    }
}

/// Task owning the sink; sends live readings and drains the offline queue
pub struct DeliveryWorker {
    sink: Arc<dyn Sink>,
    queue: Arc<OfflineQueue>,
    stats: PipelineStatsHandle,
    flush_interval: Duration,
    readings: mpsc::Receiver<Reading>,
    reports: mpsc::UnboundedSender<DeliveryReport>,
    spilled: Arc<AtomicBool>,
    queue_depth: usize,
}

/// Build a worker with its submission handle and report stream
pub fn delivery_channel(
    sink: Arc<dyn Sink>,
    queue: Arc<OfflineQueue>,
    stats: PipelineStatsHandle,
    flush_interval: Duration,
) -> (
    DeliveryHandle,
    DeliveryWorker,
    mpsc::UnboundedReceiver<DeliveryReport>,
) {
    let (readings_tx, readings) = mpsc::channel(DELIVERY_BACKLOG);
    let (reports, reports_rx) = mpsc::unbounded_channel();
    let spilled = Arc::new(AtomicBool::new(false));

    let handle = DeliveryHandle {
        readings: readings_tx,
        queue: Arc::clone(&queue),
        stats: stats.clone(),
        spilled: Arc::clone(&spilled),
    };
    let worker = DeliveryWorker {
        sink,
        queue,
        stats,
        flush_interval,
        readings,
        reports,
        spilled,
        queue_depth: 0,
    };
    (handle, worker, reports_rx)
}

impl DeliveryWorker {
    /// Deliver until cancelled; unsent readings end up in the offline queue
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Delivery worker started (sink: {})", self.sink.sink_name());

        // Drain what a previous run left behind before taking new readings
        self.flush_until(&cancel).await;

        let mut flush_ticker =
            tokio::time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        flush_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                reading = self.readings.recv() => match reading {
                    Some(reading) => self.deliver(reading, &cancel).await,
                    None => break,
                },
                _ = flush_ticker.tick() => self.flush_until(&cancel).await,
            }
        }

        self.readings.close();
        let mut kept = 0usize;
        while let Ok(reading) = self.readings.try_recv() {
            self.queue.enqueue(reading).await;
            kept += 1;
        }
        if kept > 0 {
            self.stats.update(|s| s.queued += kept as u64);
            info!("Kept {} undelivered reading(s) in the offline queue", kept);
        }
        debug!("Delivery worker stopped");
    }

    async fn deliver(&mut self, reading: Reading, cancel: &CancellationToken) {
        let sent = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.sink.send(&reading) => Some(result),
        };

        match sent {
            Some(Ok(())) => {
                self.stats.update(|s| s.sent += 1);
                let spilled = self.spilled.swap(false, Ordering::SeqCst);
                if spilled || self.queue_depth > 0 {
                    self.flush_until(cancel).await;
                }
            }
            Some(Err(e)) => {
                warn!("Sink {} failed, queueing reading: {}", self.sink.sink_name(), e);
                self.queue.enqueue(reading).await;
                self.stats.update(|s| s.queued += 1);
                self.report(DeliveryReport::SinkFailed);
                self.report_depth().await;
            }
            None => {
                self.queue.enqueue(reading).await;
                self.stats.update(|s| s.queued += 1);
            }
        }
    }

    async fn flush_until(&mut self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => debug!("Offline queue flush interrupted"),
            _ = self.flush() => {}
        }
    }

    /// Drain the offline queue into the sink
    pub async fn flush(&mut self) -> usize {
        let delivered = self.queue.flush(self.sink.as_ref()).await;
        if delivered > 0 {
            self.stats.update(|s| s.flushed += delivered as u64);
        }
        self.report_depth().await;
        delivered
    }

    async fn report_depth(&mut self) {
        self.queue_depth = self.queue.count().await;
        self.report(DeliveryReport::QueueDepth(self.queue_depth));
    }

    fn report(&self, report: DeliveryReport) {
        if self.reports.send(report).is_err() {
            debug!("Delivery report dropped: {:?}", report);
        }
    }
}
