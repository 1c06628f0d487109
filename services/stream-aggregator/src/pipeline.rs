//! Trigger loop
//!
//! On every tick the raw lines buffered since the previous tick are parsed
//! and folded on the worker pool, merged into the cumulative state, rolled
//! up and published. Ticks never overlap: the next one is not awaited
//! until the current publish has returned.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::aggregator::{BatchProcessor, WindowedAggregator};
use crate::config::AggregatorConfig;
use crate::error::{ConfigError, PipelineError};
use crate::metrics::PipelineMetrics;
use crate::publisher::{PublishReport, SnapshotPublisher};
use crate::rollup::Rollups;

/// Result of one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Nothing new to aggregate; artifacts left as they were.
    Skipped { lines: u64, rejected: u64 },
    Published { batch_id: u64, report: PublishReport },
    /// Artifacts could not be written; retried on the next trigger.
    PublishFailed { batch_id: u64, error: String },
}

pub struct Pipeline {
    processor: BatchProcessor,
    aggregator: WindowedAggregator,
    publisher: SnapshotPublisher,
    metrics: Arc<PipelineMetrics>,
    interval: Duration,
    next_batch_id: u64,
    /// Set when a publish failed and the state has not been written since.
    publish_pending: bool,
}

impl Pipeline {
    pub fn new(
        config: &AggregatorConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            processor: BatchProcessor::new(config.workers)?,
            aggregator: WindowedAggregator::new(),
            publisher: SnapshotPublisher::new(&config.output_dir),
            metrics,
            interval: config.trigger_interval(),
            next_batch_id: 0,
            publish_pending: false,
        })
    }

    pub fn aggregator(&self) -> &WindowedAggregator {
        &self.aggregator
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Run one trigger over `lines`.
    pub fn run_trigger(&mut self, lines: &[String]) -> TriggerOutcome {
        let started = Instant::now();

        let batch = self.processor.process(lines);
        self.metrics.record_batch(batch.accepted, &batch.rejected);
        let rejected = batch.rejected_total();
        let accepted = batch.accepted;
        if rejected > 0 {
            info!(rejected, reasons = ?batch.rejected, "Discarded malformed feed lines");
        }

        let merged = self.aggregator.merge_batch(batch.partial);
        if !merged && !self.publish_pending {
            debug!(lines = lines.len(), "No new records, trigger skipped");
            self.metrics.record_trigger(elapsed_us(started), true);
            return TriggerOutcome::Skipped {
                lines: lines.len() as u64,
                rejected,
            };
        }

        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;

        let rollups = Rollups::compute(self.aggregator.state());
        let outcome = match self.publisher.publish(&rollups) {
            Ok(report) => {
                self.publish_pending = false;
                self.metrics.record_publish();
                info!(
                    batch_id,
                    lines = lines.len(),
                    accepted,
                    rejected,
                    groups = self.aggregator.state().len(),
                    records_total = self.aggregator.records_folded(),
                    merges = self.aggregator.merges_applied(),
                    "Batch published: KPIs, monthly, institution and hourly snapshots updated"
                );
                TriggerOutcome::Published { batch_id, report }
            }
            Err(e) => {
                self.publish_pending = true;
                self.metrics.record_publish_failure();
                error!(batch_id, error = %e, "Snapshot publish failed; will retry next trigger");
                TriggerOutcome::PublishFailed {
                    batch_id,
                    error: e.to_string(),
                }
            }
        };

        self.metrics.record_trigger(elapsed_us(started), false);
        outcome
    }

    /// `run_trigger` on tokio's blocking pool; the worker pool and fsync
    /// block the calling thread.
    async fn run_trigger_blocking(mut self, lines: Vec<String>) -> Result<Self, PipelineError> {
        let pipeline = tokio::task::spawn_blocking(move || {
            self.run_trigger(&lines);
            self
        })
        .await?;
        Ok(pipeline)
    }

    /// Drive triggers on the configured interval until `shutdown` resolves.
    ///
    /// The loop keeps ticking after the feed closes so the last published
    /// state stays available. Lines still buffered at shutdown get one
    /// final trigger.
    pub async fn run<F>(
        self,
        mut lines: mpsc::Receiver<String>,
        shutdown: F,
    ) -> Result<Self, PipelineError>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            workers = self.processor.workers(),
            "Trigger loop started"
        );

        let mut pipeline = self;
        let mut feed_open = true;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let (batch, disconnected) = drain(&mut lines);
                    pipeline = pipeline.run_trigger_blocking(batch).await?;
                    if disconnected && feed_open {
                        feed_open = false;
                        info!(
                            records_total = pipeline.aggregator.records_folded(),
                            "Feed input ended, serving last published state"
                        );
                    }
                }
            }
        }

        let (batch, _) = drain(&mut lines);
        if !batch.is_empty() {
            pipeline = pipeline.run_trigger_blocking(batch).await?;
        }
        info!(
            metrics = ?pipeline.metrics.export(),
            rejection_ratio = pipeline.metrics.rejection_ratio(),
            "Trigger loop stopped"
        );
        Ok(pipeline)
    }
}

/// Take everything currently buffered. Also reports whether every sender
/// is gone.
fn drain(lines: &mut mpsc::Receiver<String>) -> (Vec<String>, bool) {
    let mut batch = Vec::new();
    loop {
        match lines.try_recv() {
            Ok(line) => batch.push(line),
            Err(TryRecvError::Empty) => return (batch, false),
            Err(TryRecvError::Disconnected) => return (batch, true),
        }
    }
}

fn elapsed_us(started: Instant) -> u64 {
    started.elapsed().as_micros() as u64
}
