use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Fallback order used when `GEMINI_MODELS` is not set.
pub const DEFAULT_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-flash-latest",
    "gemini-2.5-pro",
    "gemini-pro-latest",
];

/// Command-line overrides. Anything left unset falls back to the environment.
#[derive(Debug, Default, Parser)]
#[command(name = "analyzer", version, about = "Extract structured defect insights from customer reviews")]
pub struct Cli {
    /// CSV file with the reviews (overrides REVIEWS_CSV)
    pub input: Option<PathBuf>,

    /// Where to write the JSON report (overrides INSIGHTS_OUTPUT)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Column holding the review text; skips auto-detection
    #[arg(long)]
    pub column: Option<String>,

    #[arg(long)]
    pub max_reviews: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,
}

/// Application configuration loaded from environment variables.
/// Fails at startup if the API key is missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub models: Vec<String>,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub text_column: Option<String>,
    pub max_reviews: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let models = match std::env::var("GEMINI_MODELS") {
            Ok(raw) => parse_list(&raw),
            Err(_) => DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
        };
        if models.is_empty() {
            bail!("GEMINI_MODELS must name at least one model");
        }

        Ok(Config {
            gemini_api_key: require_env("GEMINI_API_KEY")?,
            gemini_base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            models,
            input_path: std::env::var("REVIEWS_CSV")
                .unwrap_or_else(|_| "reviews.csv".to_string())
                .into(),
            output_path: std::env::var("INSIGHTS_OUTPUT")
                .unwrap_or_else(|_| "insights.json".to_string())
                .into(),
            text_column: std::env::var("REVIEW_COLUMN")
                .ok()
                .filter(|c| !c.trim().is_empty()),
            max_reviews: parse_env("MAX_REVIEWS", 50)?,
            batch_size: parse_env("BATCH_SIZE", 10)?,
            max_retries: parse_env("LLM_MAX_RETRIES", 3)?,
            request_timeout_secs: parse_env("LLM_TIMEOUT_SECS", 120)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Applies command-line overrides on top of the environment configuration.
    pub fn with_cli(mut self, cli: Cli) -> Result<Self> {
        if let Some(input) = cli.input {
            self.input_path = input;
        }
        if let Some(output) = cli.output {
            self.output_path = output;
        }
        if cli.column.is_some() {
            self.text_column = cli.column;
        }
        if let Some(max) = cli.max_reviews {
            self.max_reviews = max;
        }
        if let Some(size) = cli.batch_size {
            self.batch_size = size;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if self.max_reviews == 0 {
            bail!("max reviews must be at least 1");
        }
        if self.max_retries == 0 {
            bail!("LLM_MAX_RETRIES must be at least 1");
        }
        Ok(())
    }

    /// The model reported in run metadata when no call was made.
    pub fn primary_model(&self) -> &str {
        self.models.first().map(String::as_str).unwrap_or(DEFAULT_MODELS[0])
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}

/// Splits a comma-separated list, dropping blanks. Accepts `models/` prefixes
/// the way the Gemini console prints model names.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .map(|s| s.strip_prefix("models/").unwrap_or(s))
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
pub(crate) fn test_config(input: PathBuf, output: PathBuf) -> Config {
    Config {
        gemini_api_key: "test-key".to_string(),
        gemini_base_url: DEFAULT_BASE_URL.to_string(),
        models: vec!["gemini-2.5-flash".to_string()],
        input_path: input,
        output_path: output,
        text_column: None,
        max_reviews: 50,
        batch_size: 10,
        max_retries: 1,
        request_timeout_secs: 5,
        rust_log: "info".to_string(),
    }
}
