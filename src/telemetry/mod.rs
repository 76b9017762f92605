//! Telemetry: performance metrics, cost tracking, and offline analysis
//!
//! Trackers are append-only record logs owned for the lifetime of a run.
//! They are constructed once per process, shared behind `Arc<Mutex<_>>`
//! across model clients, and `reset()` between independent analyses.

pub mod analysis;
pub mod cost;
pub mod metrics;

use serde::{Deserialize, Serialize};

/// Record field to group aggregate statistics by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Model,
    InterfaceType,
    AnalysisType,
}

pub use analysis::{AnovaOutcome, ComparisonReport, ModelPerformance, PerformanceAnalyzer};
pub use cost::{CostTracker, ModelPricing, PricingTable, UsageDraft, UsageRecord};
pub use metrics::{MetricDraft, MetricsTracker, PerformanceMetric, TokenStats};
