//! RateWatch Aggregator
//!
//! Periodically refreshes the institutions whose data has gone stale,
//! screens their quotes against cross-institution baselines and merges the
//! survivors into the shared snapshot document.

pub mod aggregator;
pub mod catalogue;
pub mod config;
pub mod feed;
pub mod metrics;
pub mod reconciler;
pub mod scheduler;
pub mod service;
pub mod state;

pub use aggregator::{Aggregator, InstitutionOutcome, TickReport};
pub use config::AggregatorConfig;
pub use feed::FeedDirectoryAdapter;
pub use metrics::{Metrics, MetricsSnapshot};
pub use reconciler::{MergeSummary, Reconciler};
pub use scheduler::StalenessScheduler;
pub use service::{export_metrics, serve};
pub use state::{FailureReason, RefreshOutcome, RefreshState};
