//! Input Loader — reads the review CSV and picks the column that holds free text.
//!
//! Column detection scores every column on a sample of rows: the column with the
//! longest average value wins, as long as most of its values are not numeric-only
//! (ids, ratings, prices, dates).

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::models::review::ReviewRecord;

/// Rows inspected when profiling columns.
const DETECTION_SAMPLE_ROWS: usize = 200;
/// A column at or above this share of numeric-only values is never free text.
const MAX_NUMERIC_RATIO: f64 = 0.5;
const MIN_AVG_TEXT_LEN: f64 = 3.0;
/// Header fragments that break exact ties in favour of the likelier column.
const TEXT_HEADER_HINTS: &[&str] = &[
    "review",
    "comment",
    "body",
    "text",
    "feedback",
    "content",
    "recensione",
];

#[derive(Debug, Error)]
pub enum InputError {
    #[error("input file not found: {0}")]
    NotFound(PathBuf),

    #[error("could not read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV has no header row")]
    Empty,

    #[error("no free-text column found among: {}", .columns.join(", "))]
    NoTextColumn { columns: Vec<String> },

    #[error("column '{column}' not found. Available columns: {}", .available.join(", "))]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },

    #[error("column '{column}' contains no non-blank reviews")]
    NoReviews { column: String },
}

/// The whole CSV held in memory. Ragged rows are padded with empty cells.
#[derive(Debug, Clone)]
pub struct ReviewTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Per-column statistics used by text column detection.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProfile {
    pub index: usize,
    pub name: String,
    pub non_empty: usize,
    pub avg_len: f64,
    pub numeric_ratio: f64,
}

impl ColumnProfile {
    fn qualifies(&self) -> bool {
        self.non_empty > 0
            && self.numeric_ratio < MAX_NUMERIC_RATIO
            && self.avg_len >= MIN_AVG_TEXT_LEN
    }

    fn has_text_hint(&self) -> bool {
        let name = self.name.to_lowercase();
        TEXT_HEADER_HINTS.iter().any(|hint| name.contains(hint))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit column name; bypasses detection.
    pub column: Option<String>,
    pub max_reviews: usize,
}

#[derive(Debug, Clone)]
pub struct LoadedReviews {
    pub column: String,
    pub records: Vec<ReviewRecord>,
    pub total_rows: usize,
}

impl ReviewTable {
    pub fn from_path(path: &Path) -> Result<Self, InputError> {
        if !path.is_file() {
            return Err(InputError::NotFound(path.to_path_buf()));
        }
        let file = File::open(path).map_err(csv::Error::from)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, InputError> {
        let reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);
        Self::from_csv(reader)
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Self, InputError> {
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(InputError::Empty);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(String::from).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        Ok(ReviewTable { headers, rows })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Computes detection statistics for every column over the first rows.
pub fn profile_columns(table: &ReviewTable) -> Vec<ColumnProfile> {
    let sample = &table.rows[..table.rows.len().min(DETECTION_SAMPLE_ROWS)];

    table
        .headers
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let mut non_empty = 0usize;
            let mut total_len = 0usize;
            let mut numeric = 0usize;

            for value in sample.iter().filter_map(|row| row.get(index)) {
                if is_blank(value) {
                    continue;
                }
                let value = value.trim();
                non_empty += 1;
                total_len += value.chars().count();
                if is_numeric_like(value) {
                    numeric += 1;
                }
            }

            let (avg_len, numeric_ratio) = if non_empty == 0 {
                (0.0, 0.0)
            } else {
                (
                    total_len as f64 / non_empty as f64,
                    numeric as f64 / non_empty as f64,
                )
            };

            ColumnProfile {
                index,
                name: name.clone(),
                non_empty,
                avg_len,
                numeric_ratio,
            }
        })
        .collect()
}

/// Picks the free-text column: the qualifying column with the greatest average
/// length. Exact ties go to a review-like header, then to the earliest column.
pub fn detect_text_column(table: &ReviewTable) -> Result<usize, InputError> {
    let profiles = profile_columns(table);
    for p in &profiles {
        debug!(
            "column '{}': non_empty={}, avg_len={:.1}, numeric_ratio={:.2}",
            p.name, p.non_empty, p.avg_len, p.numeric_ratio
        );
    }

    let mut best: Option<&ColumnProfile> = None;
    for candidate in profiles.iter().filter(|p| p.qualifies()) {
        best = match best {
            None => Some(candidate),
            Some(current) if candidate.avg_len > current.avg_len => Some(candidate),
            Some(current)
                if candidate.avg_len == current.avg_len
                    && candidate.has_text_hint()
                    && !current.has_text_hint() =>
            {
                Some(candidate)
            }
            keep => keep,
        };
    }

    best.map(|p| p.index).ok_or_else(|| InputError::NoTextColumn {
        columns: table.headers.clone(),
    })
}

/// Loads the review records from `path`, honouring an explicit column override.
///
/// Blank and literal `nan` cells are skipped but keep their row numbers; at most
/// `max_reviews` non-blank reviews are returned.
pub fn load_reviews(path: &Path, options: &LoadOptions) -> Result<LoadedReviews, InputError> {
    let table = ReviewTable::from_path(path)?;
    info!(
        "Loaded {} rows from {} ({} columns)",
        table.rows.len(),
        path.display(),
        table.headers.len()
    );
    select_reviews(&table, options)
}

pub fn select_reviews(
    table: &ReviewTable,
    options: &LoadOptions,
) -> Result<LoadedReviews, InputError> {
    let column_index = match &options.column {
        Some(name) => table
            .column_index(name)
            .ok_or_else(|| InputError::ColumnNotFound {
                column: name.clone(),
                available: table.headers.clone(),
            })?,
        None => detect_text_column(table)?,
    };
    let column = table.headers[column_index].clone();

    let records: Vec<ReviewRecord> = table
        .rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let text = row.get(column_index)?;
            (!is_blank(text)).then(|| ReviewRecord {
                row_index: i as u64 + 1,
                raw_text: text.trim().to_string(),
            })
        })
        .take(options.max_reviews)
        .collect();

    if records.is_empty() {
        return Err(InputError::NoReviews { column });
    }

    info!(
        "Selected column '{}': {} reviews prepared for analysis",
        column,
        records.len()
    );

    Ok(LoadedReviews {
        column,
        records,
        total_rows: table.rows.len(),
    })
}

fn is_blank(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case("nan")
}

/// Plain numbers, dates, ratings like `4/5`, percentages and prices.
fn is_numeric_like(value: &str) -> bool {
    let value = value.trim();
    if value.replace(',', "").parse::<f64>().is_ok() {
        return true;
    }
    let mut has_digit = false;
    for c in value.chars() {
        if c.is_ascii_digit() {
            has_digit = true;
        } else if !matches!(c, '+' | '-' | '.' | ',' | '/' | ':' | '%' | ' ' | '$' | '€' | '£') {
            return false;
        }
    }
    has_digit
}
