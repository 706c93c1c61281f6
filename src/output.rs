//! Result types returned by the conversion entry points.

use crate::error::PageError;
use crate::extraction::report::DocumentReport;
use crate::pipeline::postprocess::ReferenceCheck;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything produced for one source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutput {
    /// Input as given (path or URL).
    pub source: String,
    /// Final Markdown, empty for image-only extraction.
    pub markdown: String,
    /// Where the Markdown was written, if it was.
    pub markdown_path: Option<PathBuf>,
    /// `<stem>-img-assets/` directory holding figures and reports.
    pub asset_dir: PathBuf,
    /// Accepted images written to `asset_dir`, in document order.
    pub assets: Vec<AssetFile>,
    /// Per-page restructuring results.
    pub pages: Vec<PageResult>,
    /// Extraction diagnostics.
    pub report: DocumentReport,
    pub metadata: DocumentMetadata,
    /// Asset / reference cross-check of the Markdown.
    pub references: ReferenceCheck,
    pub stats: ConversionStats,
}

/// One accepted image on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetFile {
    /// Figure number, 1-based, in document order.
    pub figure: usize,
    pub page: usize,
    pub index: usize,
    /// Path relative to the Markdown file, forward slashes.
    pub relative_path: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub byte_size: usize,
    /// Strategy whose candidate was accepted.
    pub strategy: String,
}

/// Result of restructuring one page's text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Cleaned Markdown for this page (raw-text fallback on failure).
    pub markdown: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    pub retries: u32,
    /// True when the text went through the restructuring service.
    pub restructured: bool,
    /// Set when the page fell back to raw text.
    pub error: Option<PageError>,
}

/// Document info dictionary plus layout counts, read without extracting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub page_count: usize,
    /// Embedded image count per page, page 1 first.
    pub images_per_page: Vec<usize>,
    pub pdf_version: String,
}

impl DocumentMetadata {
    pub fn image_count(&self) -> usize {
        self.images_per_page.iter().sum()
    }
}

/// Timing and token totals for one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_pages: usize,
    pub restructured_pages: usize,
    pub fallback_pages: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub extraction_duration_ms: u64,
    pub restructure_duration_ms: u64,
    pub total_duration_ms: u64,
}
