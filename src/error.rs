//! Error types for the edgequake-pdf-extract library.
//!
//! Three distinct error types reflect three distinct failure scopes:
//!
//! * [`ExtractError`] — **Fatal for one call**: the document cannot be
//!   processed at all (bad input file, wrong password, pdfium missing,
//!   provider not configured, output not writable). Returned as
//!   `Err(ExtractError)` from the top-level functions. In batch mode it is
//!   turned into the single error entry of that document's report and the
//!   batch carries on.
//!
//! * [`StrategyError`] — **Recoverable, one attempt**: a single extraction
//!   strategy could not produce a candidate for one image. The orchestrator
//!   records it in the attempt history and falls back to the next strategy.
//!
//! * [`PageError`] — **Non-fatal, one page**: restructuring a page's text
//!   failed after all retries. Stored in [`crate::output::PageResult`]; the
//!   page falls back to its raw text.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf-extract library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path, directory or URL.
    #[error("Invalid input '{input}': not a file path, a directory or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    // ── Restructuring errors ──────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file (markdown, asset, report).
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The diagnostic report could not be rendered.
    #[error("Failed to render extraction report for '{source_id}': {detail}")]
    ReportFailed { source_id: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install pdfium for your platform, or point PDFIUM_LIB_PATH at an existing\n\
libpdfium (file or containing directory).\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Map an `std::io::Error` raised while opening `path` onto the input variants.
    pub(crate) fn from_open_io(path: PathBuf, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ExtractError::FileNotFound { path },
            std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied { path },
            _ => ExtractError::CorruptPdf {
                path,
                detail: err.to_string(),
            },
        }
    }
}

/// Why a single extraction strategy failed to produce a candidate.
///
/// Every variant is recoverable: the orchestrator moves on to the next
/// strategy in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyError {
    /// The image is stored with a filter or colour space the engine cannot decode.
    #[error("unsupported encoding: {detail}")]
    UnsupportedEncoding { detail: String },

    /// The image stream was read but its data is damaged.
    #[error("corrupt image stream: {detail}")]
    CorruptStream { detail: String },

    /// No object exists at this cross-reference on the page.
    #[error("object {xref} not found on page {page}")]
    ObjectNotFound { page: usize, xref: u32 },

    /// The object at this cross-reference is not an image.
    #[error("object {xref} on page {page} is not an image")]
    NotAnImage { page: usize, xref: u32 },

    /// The page itself could not be loaded or rendered.
    #[error("page {page} unavailable: {detail}")]
    PageUnavailable { page: usize, detail: String },

    /// The decoded pixels could not be encoded into an output format.
    #[error("encoding failed: {detail}")]
    Encode { detail: String },
}

/// A non-fatal error for a single page of the restructuring stage.
///
/// Stored alongside [`crate::output::PageResult`] when a page fails.
/// The document is still written with the page's raw text.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page text could not be read from the document.
    #[error("Page {page}: text extraction failed: {detail}")]
    TextFailed { page: usize, detail: String },

    /// Restructuring call failed after retries.
    #[error("Page {page}: restructuring failed after {retries} retries: {detail}")]
    RestructureFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// Restructuring call timed out on the last attempt.
    #[error("Page {page}: restructuring timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}
