use serde::{Deserialize, Serialize};

/// One row of input text to be analyzed.
///
/// `row_index` is the 1-based data row number in the source CSV (the header row
/// is not counted), so it stays stable even when blank rows are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub row_index: u64,
    pub raw_text: String,
}
