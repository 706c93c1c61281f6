//! Stages around the extraction core.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ [extraction] ──▶ assets ──▶ text ──▶ llm ──▶ postprocess
//! (URL/path)                 (figures,   (page    (restructure) (cleanup,
//!                             reports)    text)                  reference gate)
//! ```
//!
//! 1. [`input`]  — canonicalise the user-supplied path or URL to a local file
//! 2. [`assets`] — write accepted figures and the extraction report
//! 3. [`text`]   — read each page's text layer; raw-text fallback shaping
//! 4. [`llm`]    — restructure page text with retry/backoff; the only stage
//!    with network I/O besides downloads
//! 5. [`postprocess`] — Markdown cleanup and the image reference check

pub mod assets;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod text;
