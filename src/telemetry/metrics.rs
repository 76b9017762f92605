//! Performance metrics tracking
//!
//! Append-only log of per-call performance samples with grouped aggregate
//! queries and JSON persistence. One sample is recorded per call
//! resolution, never per retry attempt.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use super::GroupBy;
use crate::errors::{AppError, Result};

/// Record of a single performance measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub timestamp: String,
    pub model: String,
    pub interface_type: String,
    pub analysis_type: String,
    /// Caller-observed response time in seconds, including backoff waits
    pub response_time: f64,
    pub token_count: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_length: Option<usize>,
}

impl PerformanceMetric {
    fn field(&self, group_by: GroupBy) -> &str {
        match group_by {
            GroupBy::Model => &self.model,
            GroupBy::InterfaceType => &self.interface_type,
            GroupBy::AnalysisType => &self.analysis_type,
        }
    }
}

/// Sample data for a new metric; the tracker stamps the timestamp
#[derive(Debug, Clone)]
pub struct MetricDraft {
    pub model: String,
    pub interface_type: String,
    pub analysis_type: String,
    pub response_time: f64,
    pub token_count: u64,
    pub success: bool,
    pub error: Option<String>,
    pub context_length: Option<usize>,
    pub chunks_used: Option<usize>,
    pub response_length: Option<usize>,
}

/// Token usage statistics for one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenStats {
    pub mean: f64,
    pub median: f64,
    pub min: u64,
    pub max: u64,
    /// Sample standard deviation; 0 for a single sample
    pub std_dev: f64,
}

/// Track performance metrics across models and interfaces
#[derive(Debug, Default)]
pub struct MetricsTracker {
    metrics: Vec<PerformanceMetric>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new performance sample
    pub fn add_metric(&mut self, draft: MetricDraft) {
        let metric = PerformanceMetric {
            timestamp: Utc::now().to_rfc3339(),
            model: draft.model,
            interface_type: draft.interface_type,
            analysis_type: draft.analysis_type,
            response_time: draft.response_time,
            token_count: draft.token_count,
            success: draft.success,
            error: draft.error,
            context_length: draft.context_length,
            chunks_used: draft.chunks_used,
            response_length: draft.response_length,
        };

        info!(
            model = %metric.model,
            interface = %metric.interface_type,
            response_time = metric.response_time,
            success = metric.success,
            "Added metric"
        );
        self.metrics.push(metric);
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn metrics(&self) -> &[PerformanceMetric] {
        &self.metrics
    }

    fn grouped(&self, group_by: Option<GroupBy>) -> BTreeMap<String, Vec<&PerformanceMetric>> {
        let mut groups: BTreeMap<String, Vec<&PerformanceMetric>> = BTreeMap::new();
        for metric in &self.metrics {
            let key = match group_by {
                Some(field) => metric.field(field).to_string(),
                None => "overall".to_string(),
            };
            groups.entry(key).or_default().push(metric);
        }
        groups
    }

    /// Success rate in percent, optionally grouped
    pub fn success_rate(&self, group_by: Option<GroupBy>) -> BTreeMap<String, f64> {
        self.grouped(group_by)
            .into_iter()
            .map(|(key, group)| {
                let successes = group.iter().filter(|m| m.success).count();
                (key, successes as f64 / group.len() as f64 * 100.0)
            })
            .collect()
    }

    /// Mean response time in seconds, optionally grouped
    pub fn average_response_time(&self, group_by: Option<GroupBy>) -> BTreeMap<String, f64> {
        self.grouped(group_by)
            .into_iter()
            .map(|(key, group)| {
                let total: f64 = group.iter().map(|m| m.response_time).sum();
                (key, total / group.len() as f64)
            })
            .collect()
    }

    /// Token usage statistics, optionally grouped
    pub fn token_usage_stats(&self, group_by: Option<GroupBy>) -> BTreeMap<String, TokenStats> {
        self.grouped(group_by)
            .into_iter()
            .map(|(key, group)| {
                let tokens: Vec<u64> = group.iter().map(|m| m.token_count).collect();
                (key, token_stats(&tokens))
            })
            .collect()
    }

    /// Count of each distinct error message, optionally grouped
    pub fn error_distribution(
        &self,
        group_by: Option<GroupBy>,
    ) -> BTreeMap<String, BTreeMap<String, usize>> {
        self.grouped(group_by)
            .into_iter()
            .map(|(key, group)| {
                let mut counts: BTreeMap<String, usize> = BTreeMap::new();
                for metric in group {
                    if let Some(error) = &metric.error {
                        *counts.entry(error.clone()).or_default() += 1;
                    }
                }
                (key, counts)
            })
            .collect()
    }

    /// Averages over samples that went through vector retrieval
    pub fn vectorized_stats(&self) -> Option<serde_json::Value> {
        let vectorized: Vec<&PerformanceMetric> = self
            .metrics
            .iter()
            .filter(|m| m.chunks_used.is_some())
            .collect();
        if vectorized.is_empty() {
            return None;
        }

        let avg_chunks = vectorized
            .iter()
            .filter_map(|m| m.chunks_used)
            .sum::<usize>() as f64
            / vectorized.len() as f64;

        let context_lengths: Vec<usize> =
            vectorized.iter().filter_map(|m| m.context_length).collect();
        let avg_context = if context_lengths.is_empty() {
            0.0
        } else {
            context_lengths.iter().sum::<usize>() as f64 / context_lengths.len() as f64
        };

        Some(json!({
            "average_chunks_used": avg_chunks,
            "average_context_length": avg_context,
            "sample_size": vectorized.len(),
        }))
    }

    /// Comprehensive performance summary
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "total_requests": self.metrics.len(),
            "success_rates": {
                "overall": self.success_rate(None),
                "by_model": self.success_rate(Some(GroupBy::Model)),
                "by_interface": self.success_rate(Some(GroupBy::InterfaceType)),
                "by_analysis": self.success_rate(Some(GroupBy::AnalysisType)),
            },
            "response_times": {
                "overall": self.average_response_time(None),
                "by_model": self.average_response_time(Some(GroupBy::Model)),
                "by_interface": self.average_response_time(Some(GroupBy::InterfaceType)),
            },
            "token_usage": {
                "overall": self.token_usage_stats(None),
                "by_model": self.token_usage_stats(Some(GroupBy::Model)),
            },
            "errors": self.error_distribution(Some(GroupBy::Model)),
            "vectorized_metrics": self.vectorized_stats(),
        })
    }

    /// Save all metrics to a JSON file.
    ///
    /// A failed write is reported to the caller; the in-memory log is
    /// untouched either way.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let payload = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "metrics": self.metrics,
            "summary": self.summary(),
        });

        let data = serde_json::to_string_pretty(&payload)?;
        std::fs::write(path, data).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to save metrics");
            AppError::Persistence {
                message: format!("writing {}: {}", path.display(), e),
            }
        })?;

        info!(count = self.metrics.len(), path = %path.display(), "Saved metrics");
        Ok(())
    }

    /// Load metrics from a JSON file, replacing the current log
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| AppError::Persistence {
            message: format!("reading {}: {}", path.display(), e),
        })?;

        #[derive(Deserialize)]
        struct Envelope {
            metrics: Vec<PerformanceMetric>,
        }

        let envelope: Envelope = serde_json::from_str(&data)?;
        self.metrics = envelope.metrics;
        info!(count = self.metrics.len(), path = %path.display(), "Loaded metrics");
        Ok(())
    }

    /// Clear the log; the tracker stays usable
    pub fn reset(&mut self) {
        self.metrics.clear();
        info!("Reset all metrics");
    }
}

fn token_stats(tokens: &[u64]) -> TokenStats {
    let n = tokens.len();
    let mean = tokens.iter().sum::<u64>() as f64 / n as f64;

    let mut sorted = tokens.to_vec();
    sorted.sort_unstable();
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0
    } else {
        sorted[n / 2] as f64
    };

    let std_dev = if n > 1 {
        let variance = tokens
            .iter()
            .map(|&t| (t as f64 - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    TokenStats {
        mean,
        median,
        min: sorted[0],
        max: sorted[n - 1],
        std_dev,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(model: &str, response_time: f64, tokens: u64, success: bool) -> MetricDraft {
        MetricDraft {
            model: model.to_string(),
            interface_type: "api".to_string(),
            analysis_type: "vector_context_qa".to_string(),
            response_time,
            token_count: tokens,
            success,
            error: if success { None } else { Some("upstream error".to_string()) },
            context_length: None,
            chunks_used: None,
            response_length: None,
        }
    }

    #[test]
    fn test_grouped_average_response_time() {
        let mut tracker = MetricsTracker::new();
        for t in [1.0, 2.0, 3.0] {
            tracker.add_metric(draft("A", t, 100, true));
        }
        for t in [4.0, 6.0] {
            tracker.add_metric(draft("B", t, 100, true));
        }

        let averages = tracker.average_response_time(Some(GroupBy::Model));
        assert_eq!(averages["A"], 2.0);
        assert_eq!(averages["B"], 5.0);
    }

    #[test]
    fn test_success_rate_overall_and_grouped() {
        let mut tracker = MetricsTracker::new();
        tracker.add_metric(draft("A", 1.0, 100, true));
        tracker.add_metric(draft("A", 1.0, 100, false));
        tracker.add_metric(draft("B", 1.0, 100, true));

        let overall = tracker.success_rate(None);
        assert!((overall["overall"] - 200.0 / 3.0).abs() < 1e-9);

        let by_model = tracker.success_rate(Some(GroupBy::Model));
        assert_eq!(by_model["A"], 50.0);
        assert_eq!(by_model["B"], 100.0);
    }

    #[test]
    fn test_token_stats_single_sample_has_zero_stddev() {
        let mut tracker = MetricsTracker::new();
        tracker.add_metric(draft("solo", 1.0, 42, true));

        let stats = tracker.token_usage_stats(Some(GroupBy::Model));
        let solo = &stats["solo"];
        assert_eq!(solo.mean, 42.0);
        assert_eq!(solo.median, 42.0);
        assert_eq!(solo.min, 42);
        assert_eq!(solo.max, 42);
        assert_eq!(solo.std_dev, 0.0);
    }

    #[test]
    fn test_token_stats_spread() {
        let stats = token_stats(&[10, 20, 30, 40]);
        assert_eq!(stats.mean, 25.0);
        assert_eq!(stats.median, 25.0);
        assert_eq!(stats.min, 10);
        assert_eq!(stats.max, 40);
        assert!(stats.std_dev > 0.0);
    }

    #[test]
    fn test_error_distribution() {
        let mut tracker = MetricsTracker::new();
        tracker.add_metric(draft("A", 1.0, 100, false));
        tracker.add_metric(draft("A", 1.0, 100, false));
        tracker.add_metric(draft("A", 1.0, 100, true));

        let errors = tracker.error_distribution(Some(GroupBy::Model));
        assert_eq!(errors["A"]["upstream error"], 2);
    }

    #[test]
    fn test_reset_keeps_tracker_usable() {
        let mut tracker = MetricsTracker::new();
        tracker.add_metric(draft("A", 1.0, 100, true));
        tracker.reset();
        assert!(tracker.is_empty());

        tracker.add_metric(draft("A", 2.0, 50, true));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let mut tracker = MetricsTracker::new();
        tracker.add_metric(MetricDraft {
            context_length: Some(1200),
            chunks_used: Some(5),
            response_length: Some(800),
            ..draft("gpt-4", 2.5, 312, true)
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("performance_metrics.json");
        tracker.save(&path).unwrap();

        let mut restored = MetricsTracker::new();
        restored.load(&path).unwrap();
        assert_eq!(restored.len(), 1);

        let m = &restored.metrics()[0];
        assert_eq!(m.model, "gpt-4");
        assert_eq!(m.token_count, 312);
        assert_eq!(m.context_length, Some(1200));
        assert_eq!(m.chunks_used, Some(5));
        assert_eq!(m.response_length, Some(800));
        assert_eq!(m.timestamp, tracker.metrics()[0].timestamp);
    }

    #[test]
    fn test_save_failure_keeps_state() {
        let mut tracker = MetricsTracker::new();
        tracker.add_metric(draft("A", 1.0, 100, true));

        let result = tracker.save("/nonexistent-dir/metrics.json");
        assert!(result.is_err());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let mut tracker = MetricsTracker::new();
        for i in 0..5 {
            tracker.add_metric(draft("A", i as f64, 10, true));
        }
        let stamps: Vec<&str> = tracker.metrics().iter().map(|m| m.timestamp.as_str()).collect();
        for pair in stamps.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }
}
