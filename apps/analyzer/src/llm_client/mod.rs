/// LLM Client — the single point of entry for all Gemini API calls in the analyzer.
///
/// ARCHITECTURAL RULE: No other module may call the Gemini API directly.
/// All LLM interactions go through `TextGenerator`, implemented here by `GeminiClient`.
///
/// Models are tried in the configured order. A model that is unavailable (404),
/// keeps failing after retries, or answers without any text hands over to the
/// next one; the first model that answers with text stays active for the rest
/// of the run.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod prompts;

const TEMPERATURE: f32 = 0.3;
const TOP_P: f32 = 0.8;
const TOP_K: u32 = 40;
const MAX_OUTPUT_TOKENS: u32 = 4096;
const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("authentication failed (status {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("model '{model}' is not available")]
    ModelUnavailable { model: String },

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("all models failed; last error: {0}")]
    AllModelsFailed(Box<LlmError>),
}

/// Raw text produced by the model, plus which model produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
}

/// Anything that can turn a prompt into raw model text.
/// The pipeline only depends on this trait, so tests can script responses.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<Completion, LlmError>;

    /// The model the next call will try first.
    fn active_model(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub base_url: String,
    pub models: Vec<String>,
    pub max_retries: u32,
    pub timeout: Duration,
    pub retry_base: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: SystemInstruction<'a>,
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'a str,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub struct ResponsePart {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}

impl GenerateContentResponse {
    /// Concatenates the text parts of the first candidate.
    pub fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: String,
}

/// Gemini `generateContent` client with retry and model fallback.
pub struct GeminiClient {
    client: Client,
    settings: GeminiSettings,
    active: AtomicUsize,
}

impl GeminiClient {
    pub fn new(settings: GeminiSettings) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            client,
            settings,
            active: AtomicUsize::new(0),
        })
    }

    pub fn from_config(config: &crate::config::Config) -> Result<Self, LlmError> {
        Self::new(GeminiSettings {
            api_key: config.gemini_api_key.clone(),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            models: config.models.clone(),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.request_timeout_secs),
            retry_base: DEFAULT_RETRY_BASE,
        })
    }

    fn endpoint_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.settings.base_url, model)
    }

    /// Calls one model, retrying on 429 (rate limit), 5xx and transport errors
    /// with exponential backoff.
    async fn call_model(
        &self,
        model: &str,
        body: &GenerateContentRequest<'_>,
    ) -> Result<GenerateContentResponse, LlmError> {
        let url = self.endpoint_url(model);
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..self.settings.max_retries {
            if attempt > 0 {
                // Exponential backoff: base, 2×base, 4×base
                let delay = self.settings.retry_base * (1 << (attempt - 1));
                warn!(
                    "Gemini call to {} attempt {} failed, retrying after {}ms...",
                    model,
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.settings.api_key)
                .header("content-type", "application/json")
                .json(body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Gemini API returned {}: {}", status, body);
                last_error = Some(if status == StatusCode::TOO_MANY_REQUESTS {
                    LlmError::RateLimited {
                        retries: attempt + 1,
                    }
                } else {
                    LlmError::Api {
                        status: status.as_u16(),
                        message: body,
                    }
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<GeminiError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(match status {
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth {
                        status: status.as_u16(),
                        message,
                    },
                    StatusCode::NOT_FOUND => LlmError::ModelUnavailable {
                        model: model.to_string(),
                    },
                    _ => LlmError::Api {
                        status: status.as_u16(),
                        message,
                    },
                });
            }

            let body = response.text().await?;
            let parsed: GenerateContentResponse = serde_json::from_str(&body)?;

            if let Some(usage) = &parsed.usage_metadata {
                debug!(
                    "Gemini call succeeded: model={}, prompt_tokens={}, output_tokens={}",
                    model, usage.prompt_token_count, usage.candidates_token_count
                );
            }

            return Ok(parsed);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: self.settings.max_retries,
        }))
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<Completion, LlmError> {
        let body = GenerateContentRequest {
            system_instruction: SystemInstruction {
                parts: vec![TextPart { text: system }],
            },
            contents: vec![RequestContent {
                role: "user",
                parts: vec![TextPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                top_p: TOP_P,
                top_k: TOP_K,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let start = self.active.load(Ordering::Relaxed);
        let mut last_error: Option<LlmError> = None;

        for (index, model) in self.settings.models.iter().enumerate().skip(start) {
            let result = self.call_model(model, &body).await.and_then(|response| {
                let finish = response
                    .candidates
                    .first()
                    .and_then(|c| c.finish_reason.as_deref())
                    .unwrap_or("unknown");
                if finish == "MAX_TOKENS" {
                    warn!("Model {} hit the output token limit; response may be truncated", model);
                }
                response.text().ok_or_else(|| {
                    debug!("Model {} returned no text (finish reason: {})", model, finish);
                    LlmError::EmptyContent
                })
            });

            match result {
                Ok(text) => {
                    if index != start {
                        info!("Switched to model {}", model);
                        self.active.store(index, Ordering::Relaxed);
                    }
                    return Ok(Completion {
                        text,
                        model: model.clone(),
                    });
                }
                Err(e @ LlmError::Auth { .. }) => return Err(e),
                Err(e) => {
                    warn!("Model {} unavailable: {}", model, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => LlmError::AllModelsFailed(Box::new(e)),
            None => LlmError::ModelUnavailable {
                model: "<none configured>".to_string(),
            },
        })
    }

    fn active_model(&self) -> String {
        let index = self.active.load(Ordering::Relaxed);
        self.settings
            .models
            .get(index)
            .cloned()
            .unwrap_or_default()
    }
}
