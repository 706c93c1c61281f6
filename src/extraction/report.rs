//! Terminal outcomes, per-document reports, run summaries and their
//! renderers.
//!
//! Every count in a [`DocumentReport`] is derived from the outcome list in a
//! single pass ([`DocumentReport::from_outcomes`]); nothing else writes to
//! them. The renderers are pure: the same report always renders to the same
//! text, which the golden tests below rely on.

use crate::extraction::locator::{ImageCandidate, ImageLocator};
use crate::extraction::relevance::{ContentType, FilterReason, RelevanceVerdict};
use crate::extraction::tracker::{AttemptStatus, ExtractionAttempt};
use crate::extraction::validator::{IssueType, ValidationIssue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

/// An image that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedImage {
    pub locator: ImageLocator,
    pub candidate: ImageCandidate,
    /// Name of the strategy whose candidate was accepted.
    pub strategy: String,
    pub attempts: Vec<ExtractionAttempt>,
    /// Relevance verdict, when a filter ran.
    pub relevance: Option<RelevanceVerdict>,
}

impl AcceptedImage {
    pub fn is_filtered(&self) -> bool {
        self.relevance.as_ref().is_some_and(|v| v.filtered)
    }
}

/// An image for which every strategy was exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedImage {
    pub locator: ImageLocator,
    /// Classification produced by the last attempt.
    pub issue: ValidationIssue,
    /// Full attempt history, never empty.
    pub attempts: Vec<ExtractionAttempt>,
}

/// Terminal record for one locator.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome {
    Accepted(AcceptedImage),
    Rejected(RejectedImage),
}

impl ImageOutcome {
    pub fn locator(&self) -> &ImageLocator {
        match self {
            ImageOutcome::Accepted(a) => &a.locator,
            ImageOutcome::Rejected(r) => &r.locator,
        }
    }

    pub fn attempts(&self) -> &[ExtractionAttempt] {
        match self {
            ImageOutcome::Accepted(a) => &a.attempts,
            ImageOutcome::Rejected(r) => &r.attempts,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ImageOutcome::Accepted(_))
    }
}

/// An accepted image that tripped a relevance rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedImage {
    pub locator: ImageLocator,
    pub content_type: ContentType,
    pub reasons: Vec<FilterReason>,
    /// False in diagnostic mode: the image was written anyway.
    pub filtered: bool,
}

/// Relevance filter totals. Present only when a filter ran.
///
/// Filtered images are still counted as succeeded in the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub analysed: usize,
    /// Images kept out of the asset directory.
    pub filtered: usize,
    /// Images that tripped a rule, filtered or not.
    pub flagged: usize,
    /// Flagged images by their first reason.
    pub by_reason: BTreeMap<FilterReason, usize>,
    /// Written images by content type.
    pub kept: BTreeMap<ContentType, usize>,
    pub images: Vec<FlaggedImage>,
}

impl FilterStats {
    fn add(&mut self, locator: &ImageLocator, verdict: &RelevanceVerdict) {
        self.analysed += 1;
        if verdict.filtered {
            self.filtered += 1;
        } else {
            *self.kept.entry(verdict.analysis.content_type).or_insert(0) += 1;
        }
        if let Some(&first) = verdict.reasons.first() {
            self.flagged += 1;
            *self.by_reason.entry(first).or_insert(0) += 1;
            self.images.push(FlaggedImage {
                locator: locator.clone(),
                content_type: verdict.analysis.content_type,
                reasons: verdict.reasons.clone(),
                filtered: verdict.filtered,
            });
        }
    }
}

/// Diagnostic record for one source document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub source: String,
    /// False when the document could not be opened at all.
    pub opened: bool,
    pub identified: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Rejections caused by a quality rule (everything except `other`).
    pub validation_failed: usize,
    /// Accepted images that needed more than one attempt.
    pub retry_successes: usize,
    pub issue_tally: BTreeMap<IssueType, usize>,
    pub rejected: Vec<RejectedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterStats>,
    /// Document-level errors first, then one entry per rejected image.
    pub errors: Vec<String>,
    pub total_duration_ms: u64,
}

impl DocumentReport {
    /// Derive every count from `outcomes` in one scan.
    pub fn from_outcomes(
        source: impl Into<String>,
        identified: usize,
        outcomes: &[ImageOutcome],
        errors: Vec<String>,
        elapsed: Duration,
    ) -> Self {
        let mut report = DocumentReport {
            source: source.into(),
            opened: true,
            identified,
            errors,
            total_duration_ms: elapsed.as_millis() as u64,
            ..Default::default()
        };

        for outcome in outcomes {
            report.attempted += 1;
            match outcome {
                ImageOutcome::Accepted(a) => {
                    report.succeeded += 1;
                    if a.attempts.len() > 1 {
                        report.retry_successes += 1;
                    }
                    if let Some(verdict) = &a.relevance {
                        report
                            .filter
                            .get_or_insert_with(FilterStats::default)
                            .add(&a.locator, verdict);
                    }
                }
                ImageOutcome::Rejected(r) => {
                    report.failed += 1;
                    if r.issue.issue_type.is_validation() {
                        report.validation_failed += 1;
                    }
                    *report.issue_tally.entry(r.issue.issue_type).or_insert(0) += 1;
                    let l = &r.locator;
                    report.errors.push(format!(
                        "page {}, image {} (xref {}): {}",
                        l.page, l.index, l.xref, r.issue
                    ));
                    report.rejected.push(r.clone());
                }
            }
        }

        report
    }

    /// Report for a document that could not be opened: one error entry, no counts.
    pub fn unreadable(source: impl Into<String>, error: impl ToString) -> Self {
        DocumentReport {
            source: source.into(),
            opened: false,
            errors: vec![error.to_string()],
            ..Default::default()
        }
    }
}

/// Run-level totals across all documents of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub documents: usize,
    pub unreadable: usize,
    pub identified: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub validation_failed: usize,
    pub retry_successes: usize,
    /// Accepted images the relevance filter kept out of the output.
    #[serde(default)]
    pub filtered: usize,
    pub issue_tally: BTreeMap<IssueType, usize>,
}

impl RunTotals {
    fn add(&mut self, r: &DocumentReport) {
        self.documents += 1;
        if !r.opened {
            self.unreadable += 1;
        }
        self.identified += r.identified;
        self.attempted += r.attempted;
        self.succeeded += r.succeeded;
        self.failed += r.failed;
        self.validation_failed += r.validation_failed;
        self.retry_successes += r.retry_successes;
        self.filtered += r.filter.as_ref().map_or(0, |f| f.filtered);
        for (k, v) in &r.issue_tally {
            *self.issue_tally.entry(*k).or_insert(0) += v;
        }
    }

    fn remove(&mut self, r: &DocumentReport) {
        self.documents -= 1;
        if !r.opened {
            self.unreadable -= 1;
        }
        self.identified -= r.identified;
        self.attempted -= r.attempted;
        self.succeeded -= r.succeeded;
        self.failed -= r.failed;
        self.validation_failed -= r.validation_failed;
        self.retry_successes -= r.retry_successes;
        self.filtered -= r.filter.as_ref().map_or(0, |f| f.filtered);
        for (k, v) in &r.issue_tally {
            if let Some(n) = self.issue_tally.get_mut(k) {
                *n -= v;
                if *n == 0 {
                    self.issue_tally.remove(k);
                }
            }
        }
    }
}

/// Aggregation of document reports across a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub documents: BTreeMap<String, DocumentReport>,
    pub totals: RunTotals,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one document's report. A second report for the same source
    /// replaces the first.
    pub fn merge(&mut self, report: DocumentReport) {
        self.totals.add(&report);
        if let Some(previous) = self.documents.insert(report.source.clone(), report) {
            self.totals.remove(&previous);
        }
    }

    pub fn get(&self, source: &str) -> Option<&DocumentReport> {
        self.documents.get(source)
    }
}

// ── Renderers ────────────────────────────────────────────────────────────

pub fn render_json(report: &DocumentReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

pub fn render_summary_json(summary: &RunSummary) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(summary)
}

/// Human-readable diagnostic report for one document.
pub fn render_markdown(report: &DocumentReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Extraction report: {}\n", report.source);

    if !report.opened {
        out.push_str("The document could not be opened.\n\n");
    }

    out.push_str("## Summary\n\n| Metric | Count |\n|---|---|\n");
    for (label, value) in [
        ("Identified", report.identified),
        ("Attempted", report.attempted),
        ("Succeeded", report.succeeded),
        ("Failed", report.failed),
        ("Validation failed", report.validation_failed),
        ("Retry successes", report.retry_successes),
    ] {
        let _ = writeln!(out, "| {} | {} |", label, value);
    }
    let _ = writeln!(out, "| Total time | {} ms |\n", report.total_duration_ms);

    out.push_str("## Issue breakdown\n\n");
    render_tally(&mut out, &report.issue_tally);

    if let Some(stats) = &report.filter {
        render_filter(&mut out, stats);
    }

    out.push_str("## Rejected images\n\n");
    if report.rejected.is_empty() {
        out.push_str("_None._\n\n");
    }
    for rejected in &report.rejected {
        render_rejected(&mut out, rejected);
    }

    out.push_str("## Errors\n\n");
    if report.errors.is_empty() {
        out.push_str("_None._\n");
    }
    for e in &report.errors {
        let _ = writeln!(out, "- {}", e.replace('\n', " "));
    }
    out
}

/// Human-readable summary of a whole batch.
pub fn render_summary_markdown(summary: &RunSummary) -> String {
    let t = &summary.totals;
    let mut out = String::from("# Extraction run summary\n\n");
    let _ = writeln!(
        out,
        "{} documents ({} unreadable), {} images identified, {} attempted, {} succeeded, {} failed ({} on validation), {} accepted after retry.\n",
        t.documents,
        t.unreadable,
        t.identified,
        t.attempted,
        t.succeeded,
        t.failed,
        t.validation_failed,
        t.retry_successes
    );
    if t.filtered > 0 {
        let _ = writeln!(out, "{} accepted images filtered as not relevant.\n", t.filtered);
    }

    out.push_str("## Issue breakdown\n\n");
    render_tally(&mut out, &t.issue_tally);

    out.push_str("## Documents\n\n| Document | Identified | Succeeded | Failed | Errors |\n|---|---|---|---|---|\n");
    for (source, r) in &summary.documents {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} |",
            source,
            r.identified,
            r.succeeded,
            r.failed,
            r.errors.len()
        );
    }
    out
}

fn render_tally(out: &mut String, tally: &BTreeMap<IssueType, usize>) {
    if tally.is_empty() {
        out.push_str("_No issues._\n\n");
        return;
    }
    out.push_str("| Issue type | Count |\n|---|---|\n");
    for (issue, count) in tally {
        let _ = writeln!(out, "| {} | {} |", issue, count);
    }
    out.push('\n');
}

fn render_filter(out: &mut String, stats: &FilterStats) {
    out.push_str("## Relevance filter\n\n| Metric | Count |\n|---|---|\n");
    let _ = writeln!(out, "| Analysed | {} |", stats.analysed);
    let _ = writeln!(out, "| Filtered | {} |", stats.filtered);
    let _ = writeln!(out, "| Flagged | {} |", stats.flagged);
    for (reason, n) in &stats.by_reason {
        let _ = writeln!(out, "| Flagged as {} | {} |", reason, n);
    }
    for (content, n) in &stats.kept {
        let _ = writeln!(out, "| Kept {} | {} |", content, n);
    }
    out.push('\n');
    for img in &stats.images {
        let l = &img.locator;
        let reasons: Vec<&str> = img.reasons.iter().map(|r| r.as_str()).collect();
        let _ = writeln!(
            out,
            "- Page {}, image {} (xref {}): {} {} ({})",
            l.page,
            l.index,
            l.xref,
            if img.filtered { "filtered" } else { "would filter" },
            reasons.join(", "),
            img.content_type
        );
    }
    if !stats.images.is_empty() {
        out.push('\n');
    }
}

fn render_rejected(out: &mut String, rejected: &RejectedImage) {
    let l = &rejected.locator;
    let _ = writeln!(
        out,
        "### Page {}, image {} (xref {})\n",
        l.page, l.index, l.xref
    );
    let _ = writeln!(out, "- **Issue:** {}", rejected.issue.message);
    let _ = writeln!(out, "- **Issue type:** `{}`", rejected.issue.issue_type);
    if !rejected.issue.detail.is_empty() {
        let detail = serde_json::to_string(&rejected.issue.detail).unwrap_or_default();
        let _ = writeln!(out, "- **Detail:** `{}`", detail);
    }
    out.push_str(
        "\n| # | Strategy | Status | Duration (µs) | Dimensions | Mode | Size (bytes) | Notes |\n\
         |---|---|---|---|---|---|---|---|\n",
    );
    for (i, a) in rejected.attempts.iter().enumerate() {
        let status = match a.status {
            AttemptStatus::Success => "success",
            AttemptStatus::Failure => "failure",
        };
        let dims = match (a.width, a.height) {
            (Some(w), Some(h)) => format!("{}x{}", w, h),
            _ => "-".to_string(),
        };
        let mode = a.mode.map(|m| m.to_string()).unwrap_or_else(|| "-".into());
        let size = a
            .byte_size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".into());
        let mut notes = Vec::new();
        if let Some(n) = &a.note {
            notes.push(n.clone());
        }
        if let Some(e) = &a.error {
            notes.push(e.clone());
        }
        if let Some(issue) = &a.rejected_by {
            notes.push(format!("rejected: {}", issue.issue_type));
        }
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} | {} |",
            i + 1,
            a.strategy,
            status,
            a.duration_us,
            dims,
            mode,
            size,
            notes.join("; ").replace('|', "\\|")
        );
    }
    out.push('\n');
}
