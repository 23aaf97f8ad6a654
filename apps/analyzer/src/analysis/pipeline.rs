//! Review analysis pipeline.
//!
//! Flow: load_reviews → (per batch) build_prompt → generate → parse_insights →
//!       collect → write_report.
//!
//! Batches run strictly one after another. Error policy:
//! - input errors abort before any API call and nothing is written;
//! - an LLM error (after the client's own retries and model fallback) aborts
//!   the run, and nothing is written;
//! - an unparseable response skips that batch's rows and the run continues.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::parser::parse_insights;
use crate::analysis::prompts::{analysis_system, build_prompt};
use crate::config::Config;
use crate::errors::AppError;
use crate::llm_client::TextGenerator;
use crate::loader::{load_reviews, LoadOptions, LoadedReviews};
use crate::models::insight::{InsightRecord, Report, RunMetadata};
use crate::models::review::ReviewRecord;
use crate::report::write_report;

const RESPONSE_PREVIEW_CHARS: usize = 300;

/// Outcome of analyzing every batch, before metadata is attached.
#[derive(Debug, Default)]
pub struct AnalysisOutcome {
    pub insights: Vec<InsightRecord>,
    pub skipped_rows: Vec<u64>,
    /// Model that served the last successful call.
    pub model: Option<String>,
}

/// Runs the whole pipeline for `config` and writes the report.
pub async fn run(config: &Config, llm: &dyn TextGenerator) -> Result<Report, AppError> {
    let loaded = load_reviews(
        &config.input_path,
        &LoadOptions {
            column: config.text_column.clone(),
            max_reviews: config.max_reviews,
        },
    )?;
    info!(
        "Analyzing {} of {} rows from column '{}'",
        loaded.records.len(),
        loaded.total_rows,
        loaded.column
    );

    let outcome = analyze_reviews(&loaded.records, config.batch_size, llm).await?;
    let report = build_report(config, &loaded, outcome, llm);

    write_report(&report, &config.output_path)?;
    Ok(report)
}

/// Sends the reviews to the model in batches of `batch_size` and collects the
/// parsed insights in input order.
pub async fn analyze_reviews(
    records: &[ReviewRecord],
    batch_size: usize,
    llm: &dyn TextGenerator,
) -> Result<AnalysisOutcome, AppError> {
    let system = analysis_system();
    let batch_size = batch_size.max(1);
    let total_batches = records.len().div_ceil(batch_size);
    let mut outcome = AnalysisOutcome::default();

    for (n, batch) in records.chunks(batch_size).enumerate() {
        let rows: Vec<u64> = batch.iter().map(|r| r.row_index).collect();
        info!(
            "Analyzing batch {}/{} (rows {}–{})",
            n + 1,
            total_batches,
            rows[0],
            rows[rows.len() - 1]
        );

        let prompt = build_prompt(batch);
        let completion = llm.generate(&system, &prompt).await?;
        outcome.model = Some(completion.model);

        let parsed = match parse_insights(&completion.text) {
            Ok(parsed) => parsed,
            Err(e) => {
                let preview: String = completion.text.chars().take(RESPONSE_PREVIEW_CHARS).collect();
                warn!(
                    "Skipping rows {:?}: could not parse model response: {}. Response: {}",
                    rows, e, preview
                );
                outcome.skipped_rows.extend(&rows);
                continue;
            }
        };

        for rejected in &parsed.rejected {
            warn!("Dropping malformed insight for rows {:?}: {}", rows, rejected);
        }

        let mut insights: Vec<InsightRecord> = parsed
            .insights
            .into_iter()
            .filter(|insight| {
                let known = rows.contains(&insight.source_row);
                if !known {
                    warn!(
                        "Dropping insight for row {} which was not in the batch {:?}",
                        insight.source_row, rows
                    );
                }
                known
            })
            .collect();
        // stable: keeps the model's order for findings of the same row
        insights.sort_by_key(|i| i.source_row);

        info!("Batch {}: {} insights", n + 1, insights.len());
        outcome.insights.extend(insights);
    }

    Ok(outcome)
}

fn build_report(
    config: &Config,
    loaded: &LoadedReviews,
    outcome: AnalysisOutcome,
    llm: &dyn TextGenerator,
) -> Report {
    let model = outcome.model.unwrap_or_else(|| {
        let active = llm.active_model();
        if active.is_empty() {
            config.primary_model().to_string()
        } else {
            active
        }
    });

    Report {
        metadata: RunMetadata {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            model,
            input_file: config.input_path.display().to_string(),
            text_column: loaded.column.clone(),
            reviews_analyzed: loaded.records.len() - outcome.skipped_rows.len(),
            insights_found: outcome.insights.len(),
            skipped_rows: outcome.skipped_rows,
        },
        insights: outcome.insights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::llm_client::{Completion, LlmError};
    use crate::loader::InputError;
    use crate::report::read_report;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Returns scripted responses in order and records every prompt it receives.
    struct ScriptedLlm {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn ok<I, S>(responses: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self::new(responses.into_iter().map(|r| Ok(r.into())).collect())
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedLlm {
        async fn generate(&self, _system: &str, prompt: &str) -> Result<Completion, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected extra LLM call");
            next.map(|text| Completion {
                text,
                model: "mock-model".to_string(),
            })
        }

        fn active_model(&self) -> String {
            "mock-model".to_string()
        }
    }

    fn insight_json(row: u64, component: &str) -> String {
        format!(
            r#"[{{"source_row": {row}, "category": "hardware-fault", "component": "{component}", "summary": "Problem with the {component}", "confidence": 0.5}}]"#
        )
    }

    fn write_csv(dir: &Path, content: &str) -> std::path::PathBuf {
        let path = dir.join("reviews.csv");
        std::fs::write(&path, content).unwrap();
        path
    }

    const THREE_COMMENTS: &str = "id,rating,comments\n\
        1,2,The battery swells after a month of charging\n\
        2,1,Left speaker crackles at any volume above half\n\
        3,3,Hinge feels loose and the lid wobbles when typing\n";

    #[tokio::test]
    async fn test_three_rows_one_insight_each_in_input_order() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(dir.path(), THREE_COMMENTS);
        let output = dir.path().join("insights.json");
        let mut config = test_config(input, output.clone());
        config.batch_size = 1;

        let llm = ScriptedLlm::ok([
            insight_json(1, "battery"),
            insight_json(2, "speaker"),
            insight_json(3, "hinge"),
        ]);

        let report = run(&config, &llm).await.unwrap();

        assert_eq!(llm.calls(), 3);
        let written = read_report(&output).unwrap();
        assert_eq!(written.insights, report.insights);
        let rows: Vec<u64> = written.insights.iter().map(|i| i.source_row).collect();
        assert_eq!(rows, vec![1, 2, 3]);
        let components: Vec<&str> = written.insights.iter().map(|i| i.component.as_str()).collect();
        assert_eq!(components, vec!["battery", "speaker", "hinge"]);
        assert_eq!(written.metadata.text_column, "comments");
        assert_eq!(written.metadata.reviews_analyzed, 3);
        assert_eq!(written.metadata.insights_found, 3);
        assert_eq!(written.metadata.model, "mock-model");
    }

    #[tokio::test]
    async fn test_all_numeric_input_aborts_without_output() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(dir.path(), "id,rating,price\n1,5,19.99\n2,4,5.00\n");
        let output = dir.path().join("insights.json");
        let config = test_config(input, output.clone());
        let llm = ScriptedLlm::ok(Vec::<String>::new());

        let err = run(&config, &llm).await.unwrap_err();

        assert!(matches!(err, AppError::Input(InputError::NoTextColumn { .. })));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(llm.calls(), 0);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_unparseable_response_skips_rows_and_continues() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(dir.path(), THREE_COMMENTS);
        let output = dir.path().join("insights.json");
        let mut config = test_config(input, output.clone());
        config.batch_size = 1;

        let llm = ScriptedLlm::ok([
            insight_json(1, "battery"),
            "Sorry, I cannot help with that.".to_string(),
            insight_json(3, "hinge"),
        ]);

        let report = run(&config, &llm).await.unwrap();

        let rows: Vec<u64> = report.insights.iter().map(|i| i.source_row).collect();
        assert_eq!(rows, vec![1, 3]);
        assert_eq!(report.metadata.skipped_rows, vec![2]);
        assert_eq!(report.metadata.reviews_analyzed, 2);
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_bracketed_prose_before_payload_keeps_findings() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(dir.path(), THREE_COMMENTS);
        let output = dir.path().join("insights.json");
        let mut config = test_config(input, output);
        config.batch_size = 3;

        let llm = ScriptedLlm::ok([format!(
            "Findings for reviews [1] and [3]:\n{}",
            insight_json(3, "hinge")
        )]);

        let report = run(&config, &llm).await.unwrap();

        assert_eq!(report.insights.len(), 1);
        assert_eq!(report.insights[0].component, "hinge");
        assert!(report.metadata.skipped_rows.is_empty());
    }

    #[tokio::test]
    async fn test_api_error_aborts_run_without_output() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(dir.path(), THREE_COMMENTS);
        let output = dir.path().join("insights.json");
        let mut config = test_config(input, output.clone());
        config.batch_size = 1;

        let llm = ScriptedLlm::new(vec![
            Ok(insight_json(1, "battery")),
            Err(LlmError::Auth {
                status: 401,
                message: "bad key".to_string(),
            }),
        ]);

        let err = run(&config, &llm).await.unwrap_err();

        assert!(matches!(err, AppError::Api(LlmError::Auth { .. })));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(llm.calls(), 2);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_batched_response_sorted_into_input_order() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(dir.path(), THREE_COMMENTS);
        let output = dir.path().join("insights.json");
        let config = test_config(input, output);

        let llm = ScriptedLlm::ok([r#"```json
[
  {"source_row": 3, "category": "hardware-fault", "component": "hinge", "summary": "Loose hinge"},
  {"source_row": 1, "category": "hardware-fault", "component": "battery", "summary": "Swelling battery"},
  {"source_row": 1, "category": "hardware-fault", "component": "charger", "summary": "Charger runs hot"}
]
```"#]);

        let report = run(&config, &llm).await.unwrap();

        assert_eq!(llm.calls(), 1);
        let found: Vec<(u64, &str)> = report
            .insights
            .iter()
            .map(|i| (i.source_row, i.component.as_str()))
            .collect();
        assert_eq!(found, vec![(1, "battery"), (1, "charger"), (3, "hinge")]);
    }

    #[tokio::test]
    async fn test_batches_respect_batch_size() {
        let records: Vec<ReviewRecord> = (1..=5)
            .map(|i| ReviewRecord {
                row_index: i,
                raw_text: format!("review number {i}"),
            })
            .collect();
        let llm = ScriptedLlm::ok(["[]", "[]", "[]"]);

        let outcome = analyze_reviews(&records, 2, &llm).await.unwrap();

        assert!(outcome.insights.is_empty());
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].contains("row=\"1\"") && prompts[0].contains("row=\"2\""));
        assert!(prompts[2].contains("row=\"5\"") && !prompts[2].contains("row=\"4\""));
    }

    #[tokio::test]
    async fn test_insight_for_row_outside_batch_is_dropped() {
        let records = vec![ReviewRecord {
            row_index: 7,
            raw_text: "Fan rattles".to_string(),
        }];
        let llm = ScriptedLlm::ok([insight_json(8, "fan")]);

        let outcome = analyze_reviews(&records, 1, &llm).await.unwrap();

        assert!(outcome.insights.is_empty());
        assert!(outcome.skipped_rows.is_empty());
    }

    #[tokio::test]
    async fn test_existing_output_replaced() {
        let dir = TempDir::new().unwrap();
        let input = write_csv(dir.path(), THREE_COMMENTS);
        let output = dir.path().join("insights.json");
        std::fs::write(&output, "[\"old\"]").unwrap();
        let config = test_config(input, output.clone());

        let llm = ScriptedLlm::ok(["[]"]);
        run(&config, &llm).await.unwrap();

        let written = read_report(&output).unwrap();
        assert!(written.insights.is_empty());
        assert_eq!(written.metadata.reviews_analyzed, 3);
    }
}
