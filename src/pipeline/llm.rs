//! VLM-backed [`DetectionPipeline`]: read balloon numerals with a vision model.
//!
//! The request holds the balloon-reading system prompt and one user turn with
//! the page PNG. The reply contract (a bare JSON array) is enforced by
//! [`super::postprocess::parse_detections`]; a reply that does not parse is
//! treated like any other failed attempt and retried.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors and timeouts are transient under load. Exponential
//! backoff (`retry_backoff_ms * 2^attempt`) gives 500 ms → 1 s → 2 s with the
//! defaults. Retries live here, inside the pipeline; the job that calls
//! [`VlmDetector::detect`] never retries a page on its own.

use super::encode::{encode_page, DEFAULT_MAX_EDGE};
use super::postprocess::parse_detections;
use super::DetectionPipeline;
use crate::config::EngineConfig;
use crate::error::{BalloonError, PageError};
use crate::model::Detection;
use crate::prompts::{page_instruction, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Reads balloons by sending each page to a vision LLM.
pub struct VlmDetector {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout: Duration,
    max_edge: u32,
}

impl VlmDetector {
    /// Build a detector from the engine configuration, resolving the provider.
    pub fn from_config(config: &EngineConfig) -> Result<Self, BalloonError> {
        let provider = resolve_provider(config)?;
        Ok(Self::with_provider(provider, config))
    }

    /// Build a detector around an already constructed provider.
    pub fn with_provider(provider: Arc<dyn LLMProvider>, config: &EngineConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout: Duration::from_secs(config.api_timeout_secs.max(1)),
            max_edge: DEFAULT_MAX_EDGE,
        }
    }
}

#[async_trait]
impl DetectionPipeline for VlmDetector {
    async fn detect(&self, page: usize, image: &DynamicImage) -> Result<Vec<Detection>, PageError> {
        let start = Instant::now();
        let encoded = encode_page(image, self.max_edge).map_err(|e| PageError::RenderFailed {
            page,
            detail: format!("image encoding failed: {e}"),
        })?;

        let instruction = page_instruction(page, encoded.sent_width, encoded.sent_height);
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(instruction.as_str(), vec![encoded.data.clone()]),
        ];

        let mut last_err: Option<String> = None;
        let mut timed_out = false;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let reply = match timeout(
                self.api_timeout,
                self.provider.chat(&messages, Some(&self.options)),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    timed_out = false;
                    let msg = format!("{}", e);
                    warn!("Page {}: attempt {} failed: {}", page, attempt + 1, msg);
                    last_err = Some(msg);
                    continue;
                }
                Err(_) => {
                    timed_out = true;
                    warn!("Page {}: attempt {} timed out", page, attempt + 1);
                    last_err = Some(format!("timed out after {:?}", self.api_timeout));
                    continue;
                }
            };

            match parse_detections(&reply.content, encoded.scale, image.width(), image.height()) {
                Ok(detections) => {
                    debug!(
                        "Page {}: {} balloons, {} input / {} output tokens, {:?}",
                        page,
                        detections.len(),
                        reply.prompt_tokens,
                        reply.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(detections);
                }
                Err(msg) => {
                    timed_out = false;
                    warn!("Page {}: attempt {} unparseable: {}", page, attempt + 1, msg);
                    last_err = Some(msg);
                }
            }
        }

        if timed_out {
            return Err(PageError::Timeout {
                page,
                secs: self.api_timeout.as_secs(),
            });
        }
        Err(PageError::DetectionFailed {
            page,
            retries: self.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Build `CompletionOptions` from the engine config.
fn build_options(config: &EngineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, BalloonError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        BalloonError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the vision provider, from most-specific to least-specific:
///
/// 1. `config.provider`: used as-is.
/// 2. `config.provider_name` (+ `config.model`).
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. `OPENAI_API_KEY` present → OpenAI.
/// 5. `ProviderFactory::from_env` auto-detection.
fn resolve_provider(config: &EngineConfig) -> Result<Arc<dyn LLMProvider>, BalloonError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| BalloonError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
