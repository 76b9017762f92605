//! Offline performance analysis
//!
//! Consumes the metrics and cost trackers after a run and compares models
//! and interfaces: per-pair aggregate rows plus a one-way analysis of
//! variance across models on response time, success rate and cost.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

use super::cost::CostTracker;
use super::metrics::MetricsTracker;
use crate::errors::{AppError, Result};

/// Aggregate performance for one (model, interface) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub model_name: String,
    pub interface_type: String,
    /// Percent of successful calls
    pub success_rate: f64,
    pub avg_response_time: f64,
    pub avg_token_usage: f64,
    pub cost_per_request: f64,
    /// Percent of calls carrying an error
    pub error_rate: f64,
    pub sample_size: usize,
}

/// One-way ANOVA result for a single measure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnovaResult {
    /// F statistic; `None` when within-group variance is zero
    pub f_statistic: Option<f64>,
    pub df_between: usize,
    pub df_within: usize,
    pub group_means: BTreeMap<String, f64>,
}

/// ANOVA outcome; fewer than two model groups is reported, not an error
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum AnovaOutcome {
    InsufficientData,
    Computed(AnovaResult),
}

/// Cross-model statistical comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub response_time: AnovaOutcome,
    pub success_rate: AnovaOutcome,
    pub cost: AnovaOutcome,
}

/// Analyze and compare performance across models and interfaces
pub struct PerformanceAnalyzer<'a> {
    metrics: &'a MetricsTracker,
    costs: &'a CostTracker,
}

impl<'a> PerformanceAnalyzer<'a> {
    pub fn new(metrics: &'a MetricsTracker, costs: &'a CostTracker) -> Self {
        Self { metrics, costs }
    }

    /// Aggregate row for a specific model and interface, `None` if no
    /// metric samples exist for the pair
    pub fn model_performance(&self, model: &str, interface: &str) -> Option<ModelPerformance> {
        let relevant: Vec<_> = self
            .metrics
            .metrics()
            .iter()
            .filter(|m| m.model == model && m.interface_type == interface)
            .collect();
        if relevant.is_empty() {
            return None;
        }

        let n = relevant.len();
        let successes = relevant.iter().filter(|m| m.success).count();
        let errors = relevant.iter().filter(|m| m.error.is_some()).count();
        let avg_response_time = relevant.iter().map(|m| m.response_time).sum::<f64>() / n as f64;
        let avg_token_usage =
            relevant.iter().map(|m| m.token_count).sum::<u64>() as f64 / n as f64;

        let relevant_costs: Vec<f64> = self
            .costs
            .records()
            .iter()
            .filter(|r| r.model == model && r.interface_type == interface)
            .map(|r| r.cost)
            .collect();
        let cost_per_request = if relevant_costs.is_empty() {
            0.0
        } else {
            relevant_costs.iter().sum::<f64>() / relevant_costs.len() as f64
        };

        Some(ModelPerformance {
            model_name: model.to_string(),
            interface_type: interface.to_string(),
            success_rate: successes as f64 / n as f64 * 100.0,
            avg_response_time,
            avg_token_usage,
            cost_per_request,
            error_rate: errors as f64 / n as f64 * 100.0,
            sample_size: n,
        })
    }

    /// Aggregate rows for every observed (model, interface) pair
    pub fn compare_models(&self) -> Vec<ModelPerformance> {
        let pairs: BTreeSet<(String, String)> = self
            .metrics
            .metrics()
            .iter()
            .map(|m| (m.model.clone(), m.interface_type.clone()))
            .collect();

        pairs
            .iter()
            .filter_map(|(model, interface)| self.model_performance(model, interface))
            .collect()
    }

    /// One-way ANOVA across models on response time, success rate, cost
    pub fn statistical_analysis(&self) -> ComparisonReport {
        let mut response_times: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut success_rates: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for m in self.metrics.metrics() {
            response_times
                .entry(m.model.clone())
                .or_default()
                .push(m.response_time);
            success_rates
                .entry(m.model.clone())
                .or_default()
                .push(if m.success { 100.0 } else { 0.0 });
        }

        let mut costs: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for r in self.costs.records() {
            costs.entry(r.model.clone()).or_default().push(r.cost);
        }

        ComparisonReport {
            response_time: one_way_anova(&response_times),
            success_rate: one_way_anova(&success_rates),
            cost: one_way_anova(&costs),
        }
    }

    /// Full analysis report
    pub fn report(&self) -> serde_json::Value {
        let overall = self.metrics.metrics();
        let n = overall.len();
        let overall_success = if n > 0 {
            overall.iter().filter(|m| m.success).count() as f64 / n as f64 * 100.0
        } else {
            0.0
        };
        let overall_response_time = if n > 0 {
            overall.iter().map(|m| m.response_time).sum::<f64>() / n as f64
        } else {
            0.0
        };

        json!({
            "timestamp": Utc::now().to_rfc3339(),
            "overall_comparison": self.compare_models(),
            "statistical_analysis": self.statistical_analysis(),
            "summary_metrics": {
                "total_requests": n,
                "total_cost": self.costs.total_cost(),
                "overall_success_rate": overall_success,
                "average_response_time": overall_response_time,
            },
        })
    }

    /// Save the full report to a JSON file
    pub fn save_report(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(&self.report())?;
        std::fs::write(path, data).map_err(|e| AppError::Persistence {
            message: format!("writing {}: {}", path.display(), e),
        })?;
        info!(path = %path.display(), "Performance report saved");
        Ok(())
    }
}

/// One-way ANOVA over named groups of samples.
///
/// Requires at least two groups with at least one sample each; anything
/// less reports `InsufficientData`. The F statistic is `None` when the
/// within-group variance is zero (degenerate, means still reported).
fn one_way_anova(groups: &BTreeMap<String, Vec<f64>>) -> AnovaOutcome {
    let groups: Vec<(&String, &Vec<f64>)> =
        groups.iter().filter(|(_, v)| !v.is_empty()).collect();
    let k = groups.len();
    if k < 2 {
        return AnovaOutcome::InsufficientData;
    }

    let n: usize = groups.iter().map(|(_, v)| v.len()).sum();
    let grand_mean: f64 =
        groups.iter().flat_map(|(_, v)| v.iter()).sum::<f64>() / n as f64;

    let mut group_means = BTreeMap::new();
    let mut ss_between = 0.0;
    let mut ss_within = 0.0;

    for (name, values) in &groups {
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        group_means.insert((*name).clone(), mean);
        ss_between += values.len() as f64 * (mean - grand_mean).powi(2);
        ss_within += values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    }

    let df_between = k - 1;
    let df_within = n.saturating_sub(k);

    let f_statistic = if df_within > 0 && ss_within > 0.0 {
        let ms_between = ss_between / df_between as f64;
        let ms_within = ss_within / df_within as f64;
        Some(ms_between / ms_within)
    } else {
        None
    };

    AnovaOutcome::Computed(AnovaResult {
        f_statistic,
        df_between,
        df_within,
        group_means,
    })
}
