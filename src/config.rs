//! Configuration for the balloon engine.
//!
//! Every knob lives in [`EngineConfig`], built via its [`EngineConfigBuilder`].
//! Storage layout, rasterisation, job supervision, and the vision provider
//! used by the default detection pipeline are all configured here so a
//! server, a CLI run, and a test harness differ only in the config they pass.

use crate::error::BalloonError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the balloon engine.
///
/// Built via [`EngineConfig::builder()`] or using [`EngineConfig::default()`].
///
/// # Example
/// ```rust
/// use ga_balloons::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::builder()
///     .data_dir("/var/lib/ga-balloons")
///     .dpi(200)
///     .max_run_duration(Duration::from_secs(3600))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct EngineConfig {
    /// Root directory for durable state. Default: `./data`.
    ///
    /// Holds `cache/`, `checkpoints/`, `uploads/` and `pages/`. Everything a
    /// resume needs after a restart lives under this directory.
    pub data_dir: PathBuf,

    /// Rendering DPI used when rasterising each drawing page. Range: 72–400. Default: 300.
    ///
    /// Balloon numerals on A1/A0 sheets are small; 300 DPI keeps them legible.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 4000.
    pub max_rendered_pixels: u32,

    /// JPEG quality of the stored page rasters. Range: 1–100. Default: 95.
    pub jpeg_quality: u8,

    /// Largest accepted upload in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,

    /// Running jobs older than this are cancelled by the reaper. Default: 2 h.
    pub max_run_duration: Duration,

    /// Terminal jobs stay queryable for this long. Default: 1 h.
    pub status_retention: Duration,

    /// How often the reaper sweeps the job table. Default: 60 s.
    pub reap_interval: Duration,

    /// Vision model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// Vision provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Reading a numeral is transcription, not generation; detection must be
    /// deterministic per page for cached results to stay correct.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 2048.
    pub max_tokens: usize,

    /// Retry attempts on a transient provider failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in balloon prompt.
    pub system_prompt: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            dpi: 300,
            max_rendered_pixels: 4000,
            jpeg_quality: 95,
            max_upload_bytes: 50 * 1024 * 1024,
            max_run_duration: Duration::from_secs(2 * 60 * 60),
            status_retention: Duration::from_secs(60 * 60),
            reap_interval: Duration::from_secs(60),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 2048,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("data_dir", &self.data_dir)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("max_run_duration", &self.max_run_duration)
            .field("status_retention", &self.status_retention)
            .field("reap_interval", &self.reap_interval)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl EngineConfig {
    /// Create a new builder for `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn max_run_duration(mut self, d: Duration) -> Self {
        self.config.max_run_duration = d;
        self
    }

    pub fn status_retention(mut self, d: Duration) -> Self {
        self.config.status_retention = d;
        self
    }

    pub fn reap_interval(mut self, d: Duration) -> Self {
        self.config.reap_interval = d;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EngineConfig, BalloonError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(BalloonError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_upload_bytes == 0 {
            return Err(BalloonError::InvalidConfig(
                "Upload limit must be ≥ 1 byte".into(),
            ));
        }
        if c.reap_interval.is_zero() {
            return Err(BalloonError::InvalidConfig(
                "Reap interval must be non-zero".into(),
            ));
        }
        if c.data_dir.as_os_str().is_empty() {
            return Err(BalloonError::InvalidConfig(
                "Data directory must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = EngineConfig::default();
        assert_eq!(c.dpi, 300);
        assert_eq!(c.jpeg_quality, 95);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.temperature, 0.0);
        assert_eq!(c.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let c = EngineConfig::builder()
            .dpi(1000)
            .jpeg_quality(0)
            .temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 400);
        assert_eq!(c.jpeg_quality, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn zero_upload_limit_is_rejected() {
        let err = EngineConfig::builder().max_upload_bytes(0).build().unwrap_err();
        assert!(err.to_string().contains("Upload limit"));
    }

    #[test]
    fn zero_reap_interval_is_rejected() {
        let err = EngineConfig::builder()
            .reap_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, BalloonError::InvalidConfig(_)));
    }

    #[test]
    fn debug_hides_provider() {
        let c = EngineConfig::default();
        let s = format!("{c:?}");
        assert!(s.contains("EngineConfig"));
        assert!(s.contains("provider: None"));
    }
}
