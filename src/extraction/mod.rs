//! The image extraction core.
//!
//! ```text
//! SourceDocument ──▶ Orchestrator ──┬─▶ StrategyRegistry (ordered fallbacks)
//!                        │          ├─▶ Validator        (size, dims, mode)
//!                        │          ├─▶ AttemptTracker   (history per image)
//!                        │          └─▶ RelevanceFilter  (optional, after acceptance)
//!                        ▼
//!                  ImageOutcome* ──▶ DocumentReport ──▶ RunSummary
//!                                                          ▲
//!                                   BatchCoordinator ──────┘
//! ```
//!
//! Everything here is synchronous except [`batch`]. pdfium access goes
//! through the [`document::SourceDocument`] trait so the state machine can
//! be tested against in-memory documents.

pub mod batch;
pub mod document;
pub mod locator;
pub mod orchestrator;
pub mod relevance;
pub mod report;
pub mod strategy;
pub mod tracker;
pub mod validator;
