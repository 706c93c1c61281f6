//! Configuration types for image extraction and Markdown assembly.
//!
//! All behaviour is controlled through [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config across batch workers and to diff two runs.

use crate::error::ExtractError;
use crate::extraction::locator::ColorMode;
use crate::extraction::orchestrator::Orchestrator;
use crate::extraction::relevance::{RelevanceConfig, RelevanceFilter};
use crate::extraction::strategy::{StrategyKind, StrategyRegistry};
use crate::extraction::validator::{ValidationConfig, Validator};
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for extraction and conversion.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf_extract::{ExtractionConfig, StrategyKind};
///
/// let config = ExtractionConfig::builder()
///     .min_file_size(2048)
///     .min_dimensions(64, 64)
///     .strategies(vec![StrategyKind::Standard, StrategyKind::PageRender])
///     .concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Quality thresholds applied to every candidate.
    pub validation: ValidationConfig,

    /// Relevance filter applied to accepted images. Default: off.
    pub relevance: Option<RelevanceConfig>,

    /// Strategy order. Default: standard, alternate_colorspace, processed, page_render.
    pub strategies: Vec<StrategyKind>,

    /// DPI for the whole-page render strategy. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered page edge in pixels. Default: 2000.
    ///
    /// Caps both width and height of a page render regardless of DPI, so an
    /// A0 poster cannot exhaust memory.
    pub max_rendered_pixels: u32,

    /// Documents processed at once in batch mode. Default: available parallelism.
    pub concurrency: usize,

    /// Wall-clock limit for a whole batch, in seconds. Default: none.
    ///
    /// When it passes, in-flight documents finish the image they are on and
    /// stop; documents not yet started are reported as not started.
    pub batch_timeout_secs: Option<u64>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Restructure page text into Markdown with an LLM. Default: true.
    ///
    /// When false, pages are emitted as cleaned raw text.
    pub restructure: bool,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for restructuring. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per page. Default: 4096.
    pub max_tokens: usize,

    /// Retries after a failed restructuring call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for restructuring, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Restructuring calls in flight per document. Default: 4.
    pub page_concurrency: usize,

    /// Custom system prompt. If None, uses built-in default.
    pub system_prompt: Option<String>,

    /// Page separator in assembled output. Default: None.
    pub page_separator: PageSeparator,

    /// Include YAML front-matter with document metadata. Default: false.
    pub include_metadata: bool,

    /// Write `extraction-report.{md,json}` into the asset directory. Default: true.
    pub write_report: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Progress events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            validation: ValidationConfig::default(),
            relevance: None,
            strategies: StrategyKind::DEFAULT_ORDER.to_vec(),
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: default_concurrency(),
            batch_timeout_secs: None,
            password: None,
            restructure: true,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            page_concurrency: 4,
            system_prompt: None,
            page_separator: PageSeparator::default(),
            include_metadata: false,
            write_report: true,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("validation", &self.validation)
            .field("relevance", &self.relevance)
            .field("strategies", &self.strategies)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("batch_timeout_secs", &self.batch_timeout_secs)
            .field("restructure", &self.restructure)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_retries", &self.max_retries)
            .field("page_separator", &self.page_separator)
            .field("include_metadata", &self.include_metadata)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn registry(&self) -> StrategyRegistry {
        StrategyRegistry::from_kinds(&self.strategies, self.dpi, self.max_rendered_pixels)
    }

    pub fn validator(&self) -> Validator {
        Validator::new(self.validation.clone())
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let orchestrator = Orchestrator::new(self.registry(), self.validator());
        match &self.relevance {
            Some(r) => orchestrator.with_relevance(RelevanceFilter::new(r.clone())),
            None => orchestrator,
        }
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs.map(Duration::from_secs)
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn validation(mut self, v: ValidationConfig) -> Self {
        self.config.validation = v;
        self
    }

    pub fn min_file_size(mut self, bytes: usize) -> Self {
        self.config.validation.min_file_size = bytes;
        self
    }

    pub fn min_dimensions(mut self, width: u32, height: u32) -> Self {
        self.config.validation.min_width = width;
        self.config.validation.min_height = height;
        self
    }

    pub fn allowed_modes(mut self, modes: Vec<ColorMode>) -> Self {
        self.config.validation.allowed_modes = modes;
        self
    }

    /// Turn on the relevance filter with these settings.
    pub fn relevance(mut self, r: RelevanceConfig) -> Self {
        self.config.relevance = Some(r);
        self
    }

    pub fn strategies(mut self, kinds: Vec<StrategyKind>) -> Self {
        self.config.strategies = kinds;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn batch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.batch_timeout_secs = Some(secs);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn restructure(mut self, v: bool) -> Self {
        self.config.restructure = v;
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

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn include_metadata(mut self, v: bool) -> Self {
        self.config.include_metadata = v;
        self
    }

    pub fn write_report(mut self, v: bool) -> Self {
        self.config.write_report = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(ExtractError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(ExtractError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.strategies.is_empty() {
            return Err(ExtractError::InvalidConfig(
                "At least one extraction strategy is required".into(),
            ));
        }
        if c.validation.allowed_modes.is_empty() {
            return Err(ExtractError::InvalidConfig(
                "At least one colour mode must be allowed".into(),
            ));
        }
        if c.batch_timeout_secs == Some(0) {
            return Err(ExtractError::InvalidConfig(
                "Batch timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How to separate pages in the assembled Markdown output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// No separator; pages joined with "\n\n". (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator string for the given page number (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
