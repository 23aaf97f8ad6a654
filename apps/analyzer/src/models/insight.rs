use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One structured finding extracted by the model from a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    pub source_row: u64,
    /// e.g. "hardware-fault", "software-bug", "usability"
    pub category: String,
    pub component: String,
    pub summary: String,
    /// 0.0 – 1.0 when the model reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Model that served the last successful call.
    pub model: String,
    pub input_file: String,
    pub text_column: String,
    pub reviews_analyzed: usize,
    pub insights_found: usize,
    /// Rows whose model response could not be parsed.
    pub skipped_rows: Vec<u64>,
}

/// The final aggregated output document. Written once at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub metadata: RunMetadata,
    pub insights: Vec<InsightRecord>,
}
