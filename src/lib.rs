//! # edgequake-pdf-extract
//!
//! Pull every embedded image out of PDF documents, reliably, and turn the
//! documents into Markdown that references those images.
//!
//! ## Why this crate?
//!
//! Embedded images fail to decode for many reasons: exotic colour spaces
//! (CMYK, ICC-based, indexed), masks and filters the raw stream does not
//! apply, damaged streams. Instead of giving up on the first failure, each
//! image is driven through an ordered list of extraction strategies; every
//! candidate is validated (size, dimensions, colour mode) and every attempt
//! is recorded, so a run ends with an honest account of what was extracted,
//! what was rejected, and why. An optional relevance filter then keeps blank
//! spacers, icons and decorative banners out of the output.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Extract   strategy fallback + validation per image (spawn_blocking)
//!  ├─ 3. Assets    figures + extraction-report.{md,json}
//!  ├─ 4. Text      page text layer, optionally restructured by an LLM
//!  ├─ 5. Assemble  Markdown, front-matter, image reference check
//!  └─ 6. Output    <stem>.md + per-document / per-run reports
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf_extract::{extract_images, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder()
//!         .min_file_size(2048)
//!         .min_dimensions(64, 64)
//!         .build()?;
//!     let output = extract_images("document.pdf", "out", &config).await?;
//!     eprintln!(
//!         "{} of {} images extracted",
//!         output.report.succeeded, output.report.identified
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfx` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod extraction;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSeparator};
pub use convert::{convert, convert_batch, convert_directory, extract_images, inspect};
pub use error::{ExtractError, PageError, StrategyError};
pub use extraction::batch::{BatchCoordinator, StopSignal};
pub use extraction::document::{bind_pdfium, PdfiumDocument, SourceDocument};
pub use extraction::locator::{ColorMode, ImageCandidate, ImageLocator};
pub use extraction::orchestrator::{DocumentExtraction, Orchestrator, NO_STRATEGY};
pub use extraction::relevance::{
    ContentType, FilterReason, ImageAnalysis, RelevanceConfig, RelevanceFilter, RelevanceVerdict,
};
pub use extraction::report::{
    render_json, render_markdown, render_summary_json, render_summary_markdown, AcceptedImage,
    DocumentReport, FilterStats, FlaggedImage, ImageOutcome, RejectedImage, RunSummary, RunTotals,
};
pub use extraction::strategy::{ExtractionStrategy, StrategyKind, StrategyRegistry};
pub use extraction::tracker::{AttemptStatus, AttemptTracker, ExtractionAttempt};
pub use extraction::validator::{IssueType, ValidationConfig, ValidationIssue, Validator};
pub use output::{AssetFile, ConversionStats, DocumentMetadata, DocumentOutput, PageResult};
pub use pipeline::postprocess::ReferenceCheck;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
