//! Report Writer — serializes the final `Report` to disk and renders a console summary.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::models::insight::Report;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("could not write report to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ReportError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ReportError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Writes the report as pretty JSON, replacing any existing file at `path`.
///
/// The JSON goes to a temp file in the same directory first and is then renamed
/// over the target, so readers never observe a half-written report.
pub fn write_report(report: &Report, path: &Path) -> Result<(), ReportError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| ReportError::io(dir, e))?;

    let json = serde_json::to_vec_pretty(report)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ReportError::io(dir, e))?;
    tmp.write_all(&json).map_err(|e| ReportError::io(path, e))?;
    tmp.write_all(b"\n").map_err(|e| ReportError::io(path, e))?;
    tmp.persist(path).map_err(|e| ReportError::io(path, e.error))?;

    info!(
        "Report with {} insights saved to {}",
        report.insights.len(),
        path.display()
    );
    Ok(())
}

/// Loads a report written by `write_report`.
#[cfg(test)]
pub fn read_report(path: &Path) -> Result<Report, ReportError> {
    let bytes = std::fs::read(path).map_err(|e| ReportError::io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Human-readable summary printed at the end of a run.
pub fn render_summary(report: &Report) -> String {
    let meta = &report.metadata;
    let rule = "=".repeat(72);
    let mut out = String::new();

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "REVIEW INSIGHTS REPORT");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Input:     {} (column '{}')", meta.input_file, meta.text_column);
    let _ = writeln!(out, "Model:     {}", meta.model);
    let _ = writeln!(out, "Generated: {}", meta.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "Reviews analyzed: {}", meta.reviews_analyzed);
    let _ = writeln!(out, "Insights found:   {}", meta.insights_found);
    if !meta.skipped_rows.is_empty() {
        let rows: Vec<String> = meta.skipped_rows.iter().map(u64::to_string).collect();
        let _ = writeln!(out, "Skipped rows (unparseable response): {}", rows.join(", "));
    }

    if report.insights.is_empty() {
        let _ = writeln!(out, "\nNo findings.");
        let _ = writeln!(out, "{rule}");
        return out;
    }

    let _ = writeln!(out, "\nBY CATEGORY:");
    for (category, count) in tally(report.insights.iter().map(|i| i.category.as_str())) {
        let _ = writeln!(out, "   {count:>4}  {category}");
    }

    let _ = writeln!(out, "\nBY COMPONENT:");
    for (component, count) in tally(report.insights.iter().map(|i| i.component.as_str())) {
        let _ = writeln!(out, "   {count:>4}  {component}");
    }

    let _ = writeln!(out, "\nFINDINGS:");
    for insight in &report.insights {
        let confidence = insight
            .confidence
            .map(|c| format!(" ({:.0}%)", c * 100.0))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "   row {:>4}  [{}] {}: {}{}",
            insight.source_row, insight.category, insight.component, insight.summary, confidence
        );
    }
    let _ = writeln!(out, "{rule}");
    out
}

/// Counts occurrences, most frequent first, ties alphabetical.
fn tally<'a>(values: impl Iterator<Item = &'a str>) -> Vec<(&'a str, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_default() += 1;
    }
    let mut sorted: Vec<_> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::insight::{InsightRecord, RunMetadata};
    use chrono::Utc;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn insight(row: u64, category: &str, component: &str, confidence: Option<f64>) -> InsightRecord {
        InsightRecord {
            source_row: row,
            category: category.to_string(),
            component: component.to_string(),
            summary: format!("finding for row {row}"),
            confidence,
        }
    }

    fn report(insights: Vec<InsightRecord>) -> Report {
        Report {
            metadata: RunMetadata {
                run_id: Uuid::new_v4(),
                generated_at: Utc::now(),
                model: "gemini-2.5-flash".to_string(),
                input_file: "reviews.csv".to_string(),
                text_column: "comments".to_string(),
                reviews_analyzed: 3,
                insights_found: insights.len(),
                skipped_rows: vec![],
            },
            insights,
        }
    }

    #[test]
    fn test_round_trip_preserves_insights() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("insights.json");
        let original = report(vec![
            insight(1, "hardware-fault", "battery", Some(0.75)),
            insight(2, "usability", "app", None),
            insight(3, "hardware-fault", "hinge", Some(0.5)),
        ]);

        write_report(&original, &path).unwrap();
        let restored = read_report(&path).unwrap();

        assert_eq!(restored.insights, original.insights);
        assert_eq!(restored.metadata.run_id, original.metadata.run_id);
        assert_eq!(restored.metadata.model, "gemini-2.5-flash");
    }

    #[test]
    fn test_write_overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("insights.json");
        std::fs::write(&path, "stale content that is not json").unwrap();

        write_report(&report(vec![insight(1, "other", "box", None)]), &path).unwrap();

        let restored = read_report(&path).unwrap();
        assert_eq!(restored.insights.len(), 1);
    }

    #[test]
    fn test_write_creates_missing_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("nested").join("insights.json");
        write_report(&report(vec![]), &path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn test_output_shape_has_metadata_and_insights() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("insights.json");
        write_report(&report(vec![insight(2, "other", "box", None)]), &path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["metadata"]["generated_at"].is_string());
        assert_eq!(raw["insights"][0]["source_row"], 2);
        // absent confidence is omitted rather than written as null
        assert!(raw["insights"][0].get("confidence").is_none());
    }

    #[test]
    fn test_read_missing_report_is_io_error() {
        let err = read_report(Path::new("/nonexistent/insights.json")).unwrap_err();
        assert!(matches!(err, ReportError::Io { .. }));
    }

    #[test]
    fn test_summary_counts_categories_and_components() {
        let summary = render_summary(&report(vec![
            insight(1, "hardware-fault", "battery", Some(0.9)),
            insight(2, "hardware-fault", "battery", None),
            insight(3, "usability", "app", None),
        ]));
        assert!(summary.contains("      2  hardware-fault"));
        assert!(summary.contains("      1  usability"));
        assert!(summary.contains("      2  battery"));
        assert!(summary.contains("row    1  [hardware-fault] battery: finding for row 1 (90%)"));
        assert!(summary.contains("Insights found:   3"));
    }

    #[test]
    fn test_summary_for_empty_report() {
        let mut r = report(vec![]);
        r.metadata.skipped_rows = vec![4, 9];
        let summary = render_summary(&r);
        assert!(summary.contains("No findings."));
        assert!(summary.contains("Skipped rows (unparseable response): 4, 9"));
    }

    #[test]
    fn test_tally_orders_by_count_then_name() {
        let counts = tally(["b", "a", "b", "c", "a", "b"].into_iter());
        assert_eq!(counts, vec![("b", 3), ("a", 2), ("c", 1)]);
    }
}
