//! Configuration types for extraction normalisation and notes generation.
//!
//! All pipeline behaviour is controlled through [`NotesConfig`], built via
//! [`NotesConfigBuilder`]. Model clients are either injected here directly
//! (tests, embedding applications) or resolved once by
//! [`crate::pipeline::llm::ModelSet::resolve`]; nothing below the
//! orchestrator reads the environment.

use crate::error::NotesError;
use crate::pipeline::llm::NotesModel;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one notes pipeline.
///
/// # Example
/// ```rust
/// use edgequake_pdfnotes::{GenerationMode, NotesConfig};
///
/// let config = NotesConfig::builder()
///     .mode(GenerationMode::Incremental)
///     .batch_size(5)
///     .primary_model("gemini-2.5-pro")
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 5);
/// ```
#[derive(Clone)]
pub struct NotesConfig {
    /// Generation strategy used by the orchestrator. Default: single pass.
    pub mode: GenerationMode,

    /// Character budget for the single-pass prompt. Default: 10 000.
    ///
    /// Hard cutoff on `char` boundaries, applied before the prompt is built.
    pub max_input_chars: usize,

    /// Figures analysed per enrichment round in incremental mode. Default: 5.
    pub batch_size: usize,

    /// Bounding box (pixels, both axes) for figure thumbnails. Default: 300.
    pub thumbnail_max_px: u32,

    /// JPEG quality for figure thumbnails. Default: 80.
    pub jpeg_quality: u8,

    /// Route per-batch analyses through the [`crate::pipeline::queue::AnalysisQueue`]
    /// instead of calling the analyzer inline. Default: false.
    pub use_queue: bool,

    /// Worker count of the analysis queue. Default: 4.
    pub queue_workers: usize,

    /// LLM provider name (e.g. "openai", "gemini", "anthropic").
    pub provider_name: Option<String>,

    /// Primary summarisation model identifier.
    pub primary_model: Option<String>,

    /// Lower-tier model tried once when the primary fails.
    pub fallback_model: Option<String>,

    /// Vision-capable model used for figure descriptions.
    pub vision_model: Option<String>,

    /// Pre-built primary model. Takes precedence over the names above.
    pub primary: Option<Arc<dyn NotesModel>>,

    /// Pre-built fallback model.
    pub fallback: Option<Arc<dyn NotesModel>>,

    /// Pre-built vision model.
    pub vision: Option<Arc<dyn NotesModel>>,

    /// Sampling temperature for text generation. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens generated per model call. Default: 4096.
    pub max_tokens: usize,

    /// Per-call timeout applied by the provider adapter. Default: 120.
    pub api_timeout_secs: u64,

    /// Directory under which per-invocation temp dirs are created.
    /// Default: the system temp directory.
    pub temp_root: Option<PathBuf>,

    /// External extraction service settings.
    pub extraction: ExtractionServiceConfig,

    /// Receives batch and figure events during generation.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            mode: GenerationMode::default(),
            max_input_chars: 10_000,
            batch_size: 5,
            thumbnail_max_px: 300,
            jpeg_quality: 80,
            use_queue: false,
            queue_workers: 4,
            provider_name: None,
            primary_model: None,
            fallback_model: None,
            vision_model: None,
            primary: None,
            fallback: None,
            vision: None,
            temperature: 0.2,
            max_tokens: 4096,
            api_timeout_secs: 120,
            temp_root: None,
            extraction: ExtractionServiceConfig::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for NotesConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotesConfig")
            .field("mode", &self.mode)
            .field("max_input_chars", &self.max_input_chars)
            .field("batch_size", &self.batch_size)
            .field("thumbnail_max_px", &self.thumbnail_max_px)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("use_queue", &self.use_queue)
            .field("queue_workers", &self.queue_workers)
            .field("provider_name", &self.provider_name)
            .field("primary_model", &self.primary_model)
            .field("fallback_model", &self.fallback_model)
            .field("vision_model", &self.vision_model)
            .field("primary", &self.primary.as_ref().map(|m| m.name().to_string()))
            .field("fallback", &self.fallback.as_ref().map(|m| m.name().to_string()))
            .field("vision", &self.vision.as_ref().map(|m| m.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("temp_root", &self.temp_root)
            .field("extraction", &self.extraction)
            .finish()
    }
}

impl NotesConfig {
    /// Create a new builder for `NotesConfig`.
    pub fn builder() -> NotesConfigBuilder {
        NotesConfigBuilder {
            config: Self::default(),
        }
    }

    /// Root for per-invocation temp directories.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`NotesConfig`].
#[derive(Debug)]
pub struct NotesConfigBuilder {
    config: NotesConfig,
}

impl NotesConfigBuilder {
    pub fn mode(mut self, mode: GenerationMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_input_chars(mut self, n: usize) -> Self {
        self.config.max_input_chars = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn thumbnail_max_px(mut self, px: u32) -> Self {
        self.config.thumbnail_max_px = px;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q;
        self
    }

    pub fn use_queue(mut self, v: bool) -> Self {
        self.config.use_queue = v;
        self
    }

    pub fn queue_workers(mut self, n: usize) -> Self {
        self.config.queue_workers = n.max(1);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn primary_model(mut self, model: impl Into<String>) -> Self {
        self.config.primary_model = Some(model.into());
        self
    }

    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.config.fallback_model = Some(model.into());
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = Some(model.into());
        self
    }

    pub fn primary(mut self, model: Arc<dyn NotesModel>) -> Self {
        self.config.primary = Some(model);
        self
    }

    pub fn fallback(mut self, model: Arc<dyn NotesModel>) -> Self {
        self.config.fallback = Some(model);
        self
    }

    pub fn vision(mut self, model: Arc<dyn NotesModel>) -> Self {
        self.config.vision = Some(model);
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

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_root = Some(dir.into());
        self
    }

    pub fn extraction(mut self, extraction: ExtractionServiceConfig) -> Self {
        self.config.extraction = extraction;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<NotesConfig, NotesError> {
        let c = &self.config;
        if c.max_input_chars == 0 {
            return Err(NotesError::InvalidConfig(
                "max_input_chars must be ≥ 1".into(),
            ));
        }
        if c.batch_size == 0 {
            return Err(NotesError::InvalidConfig("batch_size must be ≥ 1".into()));
        }
        if c.thumbnail_max_px < 16 {
            return Err(NotesError::InvalidConfig(format!(
                "thumbnail_max_px must be ≥ 16, got {}",
                c.thumbnail_max_px
            )));
        }
        if c.jpeg_quality == 0 || c.jpeg_quality > 100 {
            return Err(NotesError::InvalidConfig(format!(
                "jpeg_quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if c.extraction.poll_interval_ms == 0 {
            return Err(NotesError::InvalidConfig(
                "extraction poll interval must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How notes are produced from the element stream.
///
/// | Mode | Model calls | Figures |
/// |------|-------------|---------|
/// | `SinglePass`  | 1 (2 on fallback) | counted only |
/// | `Incremental` | 1 + ⌈figures / batch⌉ | analysed and merged batch by batch |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Truncated text, one call, one fallback attempt. (default)
    #[default]
    SinglePass,
    /// Full text draft with `[Figure K]` placeholders, refined per batch.
    Incremental,
}

impl std::str::FromStr for GenerationMode {
    type Err = NotesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" | "single_pass" | "single-pass" => Ok(GenerationMode::SinglePass),
            "incremental" => Ok(GenerationMode::Incremental),
            other => Err(NotesError::InvalidConfig(format!(
                "unknown generation mode '{other}' (expected single or incremental)"
            ))),
        }
    }
}

/// Connection settings for the external PDF extraction service.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExtractionServiceConfig {
    /// Base URL of the service API, e.g. `https://pdf-services.example.com`.
    pub base_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Delay between job-status polls. Default: 2000 ms.
    pub poll_interval_ms: u64,
    /// Overall deadline for one extraction job. Default: 300 s.
    pub timeout_secs: u64,
}

impl Default for ExtractionServiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            client_id: None,
            client_secret: None,
            poll_interval_ms: 2000,
            timeout_secs: 300,
        }
    }
}

impl fmt::Debug for ExtractionServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionServiceConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_constants() {
        let c = NotesConfig::default();
        assert_eq!(c.max_input_chars, 10_000);
        assert_eq!(c.batch_size, 5);
        assert_eq!(c.thumbnail_max_px, 300);
        assert_eq!(c.jpeg_quality, 80);
        assert_eq!(c.mode, GenerationMode::SinglePass);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = NotesConfig::builder().batch_size(0).build().unwrap_err();
        assert!(matches!(err, NotesError::InvalidConfig(_)));
    }

    #[test]
    fn jpeg_quality_out_of_range_is_rejected() {
        assert!(NotesConfig::builder().jpeg_quality(0).build().is_err());
        assert!(NotesConfig::builder().jpeg_quality(101).build().is_err());
        assert!(NotesConfig::builder().jpeg_quality(100).build().is_ok());
    }

    #[test]
    fn mode_parses_from_cli_strings() {
        assert_eq!("single".parse::<GenerationMode>().unwrap(), GenerationMode::SinglePass);
        assert_eq!(
            "Incremental".parse::<GenerationMode>().unwrap(),
            GenerationMode::Incremental
        );
        assert!("batch".parse::<GenerationMode>().is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let cfg = ExtractionServiceConfig {
            client_secret: Some("hunter2".into()),
            ..Default::default()
        };
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("hunter2"));
    }
}
