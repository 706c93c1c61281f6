//! Append-only audit trail of extraction attempts, keyed by locator.

use crate::extraction::locator::{ColorMode, ImageCandidate, ImageLocator};
use crate::extraction::validator::ValidationIssue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// The strategy produced a candidate (it may still have been rejected).
    Success,
    /// The strategy produced nothing.
    Failure,
}

/// One strategy run against one locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub strategy: String,
    pub status: AttemptStatus,
    pub duration_us: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ColorMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Strategy failure text, for `Failure` attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rule that rejected the candidate, for `Success` attempts that did not validate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<ValidationIssue>,
}

impl ExtractionAttempt {
    pub fn succeeded(strategy: &str, duration: Duration, candidate: &ImageCandidate) -> Self {
        Self {
            strategy: strategy.to_string(),
            status: AttemptStatus::Success,
            duration_us: duration.as_micros() as u64,
            width: Some(candidate.width),
            height: Some(candidate.height),
            mode: Some(candidate.color_mode),
            byte_size: Some(candidate.byte_size()),
            note: candidate.note.clone(),
            error: None,
            rejected_by: None,
        }
    }

    pub fn failed(strategy: &str, duration: Duration, error: impl ToString) -> Self {
        Self {
            strategy: strategy.to_string(),
            status: AttemptStatus::Failure,
            duration_us: duration.as_micros() as u64,
            width: None,
            height: None,
            mode: None,
            byte_size: None,
            note: None,
            error: Some(error.to_string()),
            rejected_by: None,
        }
    }

    pub fn rejected(mut self, issue: ValidationIssue) -> Self {
        self.rejected_by = Some(issue);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == AttemptStatus::Success
    }
}

/// Per-locator ordered attempt log. Entries can only be appended.
#[derive(Debug, Clone, Default)]
pub struct AttemptTracker {
    log: BTreeMap<ImageLocator, Vec<ExtractionAttempt>>,
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, locator: &ImageLocator, attempt: ExtractionAttempt) {
        self.log.entry(locator.clone()).or_default().push(attempt);
    }

    /// Attempts recorded so far for `locator`, oldest first.
    pub fn history(&self, locator: &ImageLocator) -> &[ExtractionAttempt] {
        self.log.get(locator).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a strategy with this name already ran on `locator`.
    pub fn has_tried(&self, locator: &ImageLocator, strategy: &str) -> bool {
        self.history(locator).iter().any(|a| a.strategy == strategy)
    }
}
