mod analysis;
mod config;
mod errors;
mod llm_client;
mod loader;
mod models;
mod report;

use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Cli, Config};
use crate::errors::AppError;
use crate::llm_client::GeminiClient;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration first; logging level comes from it
    let config = match Config::from_env().and_then(|c| c.with_cli(cli)) {
        Ok(config) => config,
        Err(e) => return fail(AppError::Config(e)),
    };

    // Initialize structured logging on stderr; stdout carries the summary only
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting review analyzer v{}", env!("CARGO_PKG_VERSION"));

    match run(&config).await {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

async fn run(config: &Config) -> Result<String, AppError> {
    let llm = GeminiClient::from_config(config)?;
    info!(
        "LLM client initialized (models: {})",
        config.models.join(", ")
    );

    let report = analysis::pipeline::run(config, &llm).await?;
    Ok(report::render_summary(&report))
}

fn fail(e: AppError) -> ExitCode {
    eprintln!("error: {e}");
    ExitCode::from(e.exit_code())
}
