//! Stream Aggregator Service
//!
//! Consumes a line-delimited transaction feed and produces:
//! - Cumulative grouped aggregates by (month, institution, type, hour)
//! - A global KPI snapshot (totals, extremes, peak hour, most common type)
//! - A monthly series, an institution ranking and an hourly distribution
//! - Atomically replaced CSV artifacts for a polling dashboard
//!
//! # Architecture
//!
//! ```text
//!   Feed source (TCP)
//!        │
//!    ┌───▼───┐
//!    │ Feed  │  ← line reader, bounded channel
//!    └───┬───┘
//!        │  every trigger
//!    ┌───▼──────────┐
//!    │ Parse + fold │  ← partitioned across workers, partials merged
//!    └───┬──────────┘
//!        │
//!    ┌───▼────────┐
//!    │ Aggregator │  ← cumulative GroupKey → SubAggregate
//!    └───┬────────┘
//!        │
//!    ┌───▼────┐
//!    │ Rollup │  ← KPIs, monthly, institutions, hourly
//!    └───┬────┘
//!        │
//!    ┌───▼───────┐
//!    │ Publisher │  ← tmp + fsync + rename per artifact
//!    └───────────┘
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod feed;
pub mod ingestion;
pub mod metrics;
pub mod pipeline;
pub mod publisher;
pub mod rollup;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
