//! Cost tracking
//!
//! Append-only log of per-call token usage, priced against a swappable
//! per-model pricing table (cost per 1000 tokens). Unknown models cost
//! zero with a logged warning; pricing gaps never fail a caller.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

use super::GroupBy;
use crate::errors::{AppError, Result};

/// Cost per 1000 tokens for one model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Cost per 1k prompt tokens (USD)
    pub input: f64,
    /// Cost per 1k completion tokens (USD)
    pub output: f64,
}

/// Mapping of model name to per-1k token costs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(flatten)]
    models: HashMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut models = HashMap::new();
        let mut add = |name: &str, input: f64, output: f64| {
            models.insert(name.to_string(), ModelPricing { input, output });
        };
        add("gpt-4", 0.03, 0.06);
        add("gpt-4-0613", 0.03, 0.06);
        add("gpt-4-32k", 0.06, 0.12);
        add("gpt-3.5-turbo", 0.0015, 0.002);
        add("gpt-3.5-turbo-16k", 0.003, 0.004);
        add("gemini-pro", 0.00025, 0.0005);
        add("gemini-1.5-pro", 0.0005, 0.001);
        add("claude-3-opus", 0.015, 0.075);
        add("claude-3-sonnet", 0.003, 0.015);
        Self { models }
    }
}

impl PricingTable {
    /// Load a pricing table from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| AppError::Persistence {
            message: format!("reading {}: {}", path.display(), e),
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.models.get(model).copied()
    }

    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.models.insert(model.into(), pricing);
    }
}

/// Record of a single API call's usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: String,
    pub model: String,
    pub interface_type: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub analysis_type: String,
    /// Call duration in seconds
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UsageRecord {
    fn field(&self, group_by: GroupBy) -> &str {
        match group_by {
            GroupBy::Model => &self.model,
            GroupBy::InterfaceType => &self.interface_type,
            GroupBy::AnalysisType => &self.analysis_type,
        }
    }
}

/// Usage data for a new record; the tracker derives cost and timestamp
#[derive(Debug, Clone)]
pub struct UsageDraft {
    pub model: String,
    pub interface_type: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub analysis_type: String,
    pub duration: f64,
    pub error: Option<String>,
}

/// Track costs and usage across models and interfaces
#[derive(Debug)]
pub struct CostTracker {
    pricing: PricingTable,
    records: Vec<UsageRecord>,
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new(PricingTable::default())
    }
}

impl CostTracker {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            records: Vec::new(),
        }
    }

    /// Cost for a specific usage. Pure given (model, tokens); unknown
    /// models cost 0.0 with a warning.
    pub fn calculate_cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        match self.pricing.get(model) {
            Some(pricing) => {
                let input_cost = prompt_tokens as f64 / 1000.0 * pricing.input;
                let output_cost = completion_tokens as f64 / 1000.0 * pricing.output;
                input_cost + output_cost
            }
            None => {
                warn!(model = model, "Unknown model, cost recorded as zero");
                0.0
            }
        }
    }

    /// Append a new usage record
    pub fn add_usage(&mut self, draft: UsageDraft) {
        let total_tokens = draft.prompt_tokens + draft.completion_tokens;
        let cost = self.calculate_cost(&draft.model, draft.prompt_tokens, draft.completion_tokens);

        let record = UsageRecord {
            timestamp: Utc::now().to_rfc3339(),
            model: draft.model,
            interface_type: draft.interface_type,
            prompt_tokens: draft.prompt_tokens,
            completion_tokens: draft.completion_tokens,
            total_tokens,
            cost,
            analysis_type: draft.analysis_type,
            duration: draft.duration,
            error: draft.error,
        };

        info!(
            model = %record.model,
            interface = %record.interface_type,
            tokens = total_tokens,
            cost,
            "Added usage record"
        );
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[UsageRecord] {
        &self.records
    }

    /// Total cost across all usage
    pub fn total_cost(&self) -> f64 {
        self.records.iter().map(|r| r.cost).sum()
    }

    /// Costs grouped by a record field
    pub fn cost_by(&self, group_by: GroupBy) -> BTreeMap<String, f64> {
        let mut costs: BTreeMap<String, f64> = BTreeMap::new();
        for record in &self.records {
            *costs.entry(record.field(group_by).to_string()).or_default() += record.cost;
        }
        costs
    }

    /// Comprehensive usage summary
    pub fn summary(&self) -> serde_json::Value {
        let n = self.records.len();
        let total_tokens: u64 = self.records.iter().map(|r| r.total_tokens).sum();
        let total_duration: f64 = self.records.iter().map(|r| r.duration).sum();

        json!({
            "total_cost": self.total_cost(),
            "total_tokens": total_tokens,
            "total_requests": n,
            "average_tokens_per_request": if n > 0 { total_tokens as f64 / n as f64 } else { 0.0 },
            "average_cost_per_request": if n > 0 { self.total_cost() / n as f64 } else { 0.0 },
            "total_errors": self.records.iter().filter(|r| r.error.is_some()).count(),
            "costs_by_model": self.cost_by(GroupBy::Model),
            "costs_by_interface": self.cost_by(GroupBy::InterfaceType),
            "costs_by_analysis": self.cost_by(GroupBy::AnalysisType),
            "total_duration": total_duration,
            "average_duration": if n > 0 { total_duration / n as f64 } else { 0.0 },
        })
    }

    /// Save all usage records to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let payload = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "records": self.records,
            "summary": self.summary(),
        });

        let data = serde_json::to_string_pretty(&payload)?;
        std::fs::write(path, data).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to save usage records");
            AppError::Persistence {
                message: format!("writing {}: {}", path.display(), e),
            }
        })?;

        info!(count = self.records.len(), path = %path.display(), "Saved usage records");
        Ok(())
    }

    /// Load usage records from a JSON file, replacing the current log
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| AppError::Persistence {
            message: format!("reading {}: {}", path.display(), e),
        })?;

        #[derive(Deserialize)]
        struct Envelope {
            records: Vec<UsageRecord>,
        }

        let envelope: Envelope = serde_json::from_str(&data)?;
        self.records = envelope.records;
        info!(count = self.records.len(), path = %path.display(), "Loaded usage records");
        Ok(())
    }

    /// Clear the log; pricing and tracker stay usable
    pub fn reset(&mut self) {
        self.records.clear();
        info!("Reset all usage records");
    }
}
