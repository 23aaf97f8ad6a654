use thiserror::Error;

use crate::llm_client::LlmError;
use crate::loader::InputError;
use crate::report::ReportError;

/// Application-level error type.
/// Every fatal failure of a run ends up here and maps to a process exit code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0:#}")]
    Config(#[from] anyhow::Error),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("LLM API error: {0}")]
    Api(#[from] LlmError),

    #[error("Output error: {0}")]
    Output(#[from] ReportError),
}

impl AppError {
    /// 1 = output failure, 2 = configuration or input, 3 = LLM API.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Output(_) => 1,
            AppError::Config(_) | AppError::Input(_) => 2,
            AppError::Api(_) => 3,
        }
    }
}
