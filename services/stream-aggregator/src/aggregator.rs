//! Windowed aggregation of validated transactions
//!
//! Maintains `GroupKey -> SubAggregate` over the whole history received
//! since start ("complete" semantics). Each trigger folds its batch into a
//! partial map, then merges the partial into the cumulative state. All
//! combinators (sum+sum, count+count, max of maxes, min of mins) are
//! associative and commutative, so the result equals a regroup of every
//! record ever seen without retaining the records themselves.
//!
//! Batches are split into contiguous partitions and folded on a rayon
//! pool; partition count and scheduling order do not affect the output.

use std::collections::btree_map::{self, BTreeMap};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use txn_types::keys::GroupKey;
use txn_types::record::TransactionRecord;

use crate::error::ConfigError;
use crate::ingestion::ParsedBatch;

/// Sum, count, max and min of the values folded under one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAggregate {
    pub sum: Decimal,
    pub count: u64,
    pub max: Decimal,
    pub min: Decimal,
}

impl SubAggregate {
    pub fn from_value(value: Decimal) -> Self {
        Self {
            sum: value,
            count: 1,
            max: value,
            min: value,
        }
    }

    /// Fold one more value in.
    pub fn record(&mut self, value: Decimal) {
        self.merge(&Self::from_value(value));
    }

    /// Combine with another aggregate of the same key.
    ///
    /// Sum and count saturate at their type bounds instead of overflowing.
    pub fn merge(&mut self, other: &SubAggregate) {
        self.sum = self.sum.saturating_add(other.sum);
        self.count = self.count.saturating_add(other.count);
        if other.max > self.max {
            self.max = other.max;
        }
        if other.min < self.min {
            self.min = other.min;
        }
    }
}

/// Grouped state keyed by (month-year, institution, type, hour).
///
/// BTreeMap keeps iteration, and everything derived from it, deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedAggregates {
    groups: BTreeMap<GroupKey, SubAggregate>,
}

impl GroupedAggregates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold_record(&mut self, record: &TransactionRecord) {
        match self.groups.entry(record.group_key()) {
            btree_map::Entry::Occupied(mut entry) => entry.get_mut().record(record.value),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(SubAggregate::from_value(record.value));
            }
        }
    }

    pub fn fold_records<'a>(&mut self, records: impl IntoIterator<Item = &'a TransactionRecord>) {
        for record in records {
            self.fold_record(record);
        }
    }

    /// Merge `other` into `self`, key by key.
    pub fn merge(&mut self, other: GroupedAggregates) {
        for (key, partial) in other.groups {
            match self.groups.entry(key) {
                btree_map::Entry::Occupied(mut entry) => entry.get_mut().merge(&partial),
                btree_map::Entry::Vacant(entry) => {
                    entry.insert(partial);
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &SubAggregate)> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of records folded into all groups.
    pub fn total_count(&self) -> u64 {
        self.groups
            .values()
            .fold(0u64, |total, agg| total.saturating_add(agg.count))
    }
}

impl FromIterator<TransactionRecord> for GroupedAggregates {
    fn from_iter<I: IntoIterator<Item = TransactionRecord>>(iter: I) -> Self {
        let mut grouped = Self::new();
        for record in iter {
            grouped.fold_record(&record);
        }
        grouped
    }
}

/// Result of parsing and folding one trigger's raw lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub partial: GroupedAggregates,
    pub lines: u64,
    pub accepted: u64,
    pub rejected: BTreeMap<&'static str, u64>,
}

impl BatchOutcome {
    fn from_parsed(parsed: ParsedBatch, lines: u64) -> Self {
        let mut partial = GroupedAggregates::new();
        partial.fold_records(&parsed.records);
        Self {
            partial,
            lines,
            accepted: parsed.accepted(),
            rejected: parsed.rejected,
        }
    }

    /// Combine two partition outcomes.
    fn combine(mut self, other: BatchOutcome) -> Self {
        self.partial.merge(other.partial);
        self.lines += other.lines;
        self.accepted += other.accepted;
        for (reason, count) in other.rejected {
            *self.rejected.entry(reason).or_insert(0) += count;
        }
        self
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }
}

/// Parses and folds raw line batches across a fixed pool of workers.
pub struct BatchProcessor {
    pool: ThreadPool,
    workers: usize,
}

impl BatchProcessor {
    pub fn new(workers: usize) -> Result<Self, ConfigError> {
        if workers == 0 {
            return Err(ConfigError::Zero { field: "workers" });
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("aggregator-worker-{i}"))
            .build()
            .map_err(|e| ConfigError::WorkerPool(e.to_string()))?;

        info!(workers, "BatchProcessor initialized");
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Parse and fold `lines`, one contiguous partition per worker.
    pub fn process(&self, lines: &[String]) -> BatchOutcome {
        if lines.is_empty() {
            return BatchOutcome::default();
        }
        let partition_size = lines.len().div_ceil(self.workers);
        debug!(
            lines = lines.len(),
            partitions = lines.len().div_ceil(partition_size),
            "Processing batch"
        );

        self.pool.install(|| {
            lines
                .par_chunks(partition_size)
                .map(|chunk| {
                    BatchOutcome::from_parsed(ParsedBatch::parse(chunk), chunk.len() as u64)
                })
                .reduce(BatchOutcome::default, BatchOutcome::combine)
        })
    }
}

/// Owner of the cumulative aggregate state.
#[derive(Debug, Default)]
pub struct WindowedAggregator {
    state: GroupedAggregates,
    records_folded: u64,
    merges_applied: u64,
}

impl WindowedAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one trigger's partial aggregates into the cumulative state.
    ///
    /// Returns `false`, leaving the state untouched, when the partial is
    /// empty.
    pub fn merge_batch(&mut self, partial: GroupedAggregates) -> bool {
        if partial.is_empty() {
            return false;
        }
        self.records_folded = self.records_folded.saturating_add(partial.total_count());
        self.merges_applied += 1;
        self.state.merge(partial);
        true
    }

    pub fn state(&self) -> &GroupedAggregates {
        &self.state
    }

    pub fn records_folded(&self) -> u64 {
        self.records_folded
    }

    /// Number of non-empty batches merged so far.
    pub fn merges_applied(&self) -> u64 {
        self.merges_applied
    }
}
