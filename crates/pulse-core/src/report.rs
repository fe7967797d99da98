use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::InteractionRecord;

/// Label counts, percentages and example excerpts for a record list.
///
/// All maps are ordered so that serializing the same summary twice produces
/// identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentSummary {
    pub total: usize,
    pub global_counts: BTreeMap<String, usize>,
    /// Share of `total` per label, rounded to one decimal place.
    pub global_percentages: BTreeMap<String, f64>,
    /// Keyed by lower-cased, trimmed platform name.
    pub per_platform_counts: BTreeMap<String, BTreeMap<String, usize>>,
    pub positive_examples: Vec<String>,
    pub negative_examples: Vec<String>,
}

/// Wall-clock seconds spent in each pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingMetrics {
    pub collection_secs: f64,
    pub classification_secs: f64,
    pub consolidation_secs: f64,
    pub total_secs: f64,
}

/// The consolidated, queryable result for one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub topic: String,
    pub total_count: usize,
    pub summary: SentimentSummary,
    pub narrative_text: Option<String>,
    pub timing: TimingMetrics,
    /// Records contributed by each source during the run.
    pub source_counts: BTreeMap<String, usize>,
    pub classification_cost: u64,
    pub data_preview: Vec<InteractionRecord>,
    pub generated_at: DateTime<Utc>,
}

/// One line of the analysis history listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub topic: String,
    pub updated_at: DateTime<Utc>,
    pub total: usize,
}
