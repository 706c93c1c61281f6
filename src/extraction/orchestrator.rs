//! Per-document extraction: enumerate every image, then drive each one
//! through the strategy state machine to a terminal outcome.
//!
//! ```text
//! Pending ──▶ Attempting(i) ──ok──▶ Validating ──ok──▶ Accepted
//!                 │  ▲                   │
//!                 │  └──── i + 1 ◀───────┤ issue, strategies left
//!                 │                      │
//!                 └─ err, none left ─▶ Exhausted ◀─ issue, none left
//! ```
//!
//! Images are processed strictly one after another, in page order then
//! index order. Each strategy name is tried at most once per image, even if
//! the registry lists it twice. An image no strategy applies to gets a single
//! synthetic `none` failure so its history is never empty.
//!
//! When a [`RelevanceFilter`] is attached, accepted images are analysed once
//! more after acceptance. This never changes the outcome, only whether the
//! image is written out.

use crate::extraction::batch::StopSignal;
use crate::extraction::document::SourceDocument;
use crate::extraction::locator::{ImageCandidate, ImageLocator};
use crate::extraction::relevance::RelevanceFilter;
use crate::extraction::report::{AcceptedImage, DocumentReport, ImageOutcome, RejectedImage};
use crate::extraction::strategy::StrategyRegistry;
use crate::extraction::tracker::{AttemptTracker, ExtractionAttempt};
use crate::extraction::validator::{IssueType, ValidationIssue, Validator};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Strategy name recorded when nothing in the registry applies to an image.
pub const NO_STRATEGY: &str = "none";

/// Where one image currently is in its extraction.
#[derive(Debug)]
enum ImageState {
    Pending,
    Attempting(usize),
    Validating {
        strategy: usize,
        candidate: ImageCandidate,
        attempt: ExtractionAttempt,
    },
    Accepted {
        strategy: usize,
        candidate: ImageCandidate,
    },
    Exhausted(ValidationIssue),
}

/// Everything one document run produced.
#[derive(Debug, Clone)]
pub struct DocumentExtraction {
    pub source: String,
    pub page_count: usize,
    /// Number of images enumerated, attempted or not.
    pub identified: usize,
    /// Terminal outcomes in locator order.
    pub outcomes: Vec<ImageOutcome>,
    pub errors: Vec<String>,
    /// True when a stop signal cut the run short.
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl DocumentExtraction {
    pub fn report(&self) -> DocumentReport {
        DocumentReport::from_outcomes(
            self.source.clone(),
            self.identified,
            &self.outcomes,
            self.errors.clone(),
            self.elapsed,
        )
    }

    pub fn accepted(&self) -> impl Iterator<Item = &AcceptedImage> {
        self.outcomes.iter().filter_map(|o| match o {
            ImageOutcome::Accepted(a) => Some(a),
            ImageOutcome::Rejected(_) => None,
        })
    }

    /// Accepted images the relevance filter did not drop.
    pub fn kept(&self) -> impl Iterator<Item = &AcceptedImage> {
        self.accepted().filter(|a| !a.is_filtered())
    }
}

/// Drives the registry and validator over the images of a document.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: StrategyRegistry,
    validator: Validator,
    relevance: Option<RelevanceFilter>,
}

impl Orchestrator {
    pub fn new(registry: StrategyRegistry, validator: Validator) -> Self {
        Self {
            registry,
            validator,
            relevance: None,
        }
    }

    pub fn with_relevance(mut self, filter: RelevanceFilter) -> Self {
        self.relevance = Some(filter);
        self
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Enumerate all images of `document`, page order then index order.
    ///
    /// Pages whose image list cannot be read are skipped and noted in
    /// `errors`.
    pub fn locate(
        &self,
        document: &dyn SourceDocument,
        errors: &mut Vec<String>,
    ) -> Vec<ImageLocator> {
        let mut locators = Vec::new();
        for page in 1..=document.page_count() {
            match document.image_xrefs(page) {
                Ok(xrefs) => {
                    for (i, xref) in xrefs.into_iter().enumerate() {
                        locators.push(ImageLocator::new(document.identifier(), page, i + 1, xref));
                    }
                }
                Err(e) => {
                    warn!("{}: cannot list images on page {}: {}", document.identifier(), page, e);
                    errors.push(format!("page {}: cannot list images: {}", page, e));
                }
            }
        }
        locators
    }

    pub fn process(&self, document: &dyn SourceDocument, stop: &StopSignal) -> DocumentExtraction {
        self.process_with(document, stop, |_| {})
    }

    /// Like [`process`](Self::process), calling `on_outcome` as each image
    /// reaches its terminal state.
    pub fn process_with(
        &self,
        document: &dyn SourceDocument,
        stop: &StopSignal,
        mut on_outcome: impl FnMut(&ImageOutcome),
    ) -> DocumentExtraction {
        let started = Instant::now();
        let source = document.identifier().to_string();
        let mut errors = Vec::new();
        let locators = self.locate(document, &mut errors);
        info!("{}: {} images identified", source, locators.len());

        let mut tracker = AttemptTracker::new();
        let mut outcomes = Vec::with_capacity(locators.len());
        let mut interrupted = false;

        for (done, locator) in locators.iter().enumerate() {
            if stop.is_stopped() {
                let remaining = locators.len() - done;
                warn!("{}: stopped with {} images not attempted", source, remaining);
                errors.push(format!(
                    "run stopped before completion: {} of {} images not attempted",
                    remaining,
                    locators.len()
                ));
                interrupted = true;
                break;
            }
            let outcome = self.resolve(document, locator, &mut tracker);
            on_outcome(&outcome);
            outcomes.push(outcome);
        }

        let extraction = DocumentExtraction {
            source,
            page_count: document.page_count(),
            identified: locators.len(),
            outcomes,
            errors,
            interrupted,
            elapsed: started.elapsed(),
        };
        info!(
            "{}: {} accepted, {} rejected",
            extraction.source,
            extraction.outcomes.iter().filter(|o| o.is_accepted()).count(),
            extraction.outcomes.iter().filter(|o| !o.is_accepted()).count()
        );
        extraction
    }

    /// Run one image's state machine to termination.
    pub fn resolve(
        &self,
        document: &dyn SourceDocument,
        locator: &ImageLocator,
        tracker: &mut AttemptTracker,
    ) -> ImageOutcome {
        let mut state = ImageState::Pending;
        let mut candidate_seen = false;

        loop {
            state = match state {
                ImageState::Pending => match self.next_applicable(0, document, locator, tracker) {
                    Some(i) => ImageState::Attempting(i),
                    None => {
                        warn!("{} {}: no applicable strategy", locator.document, locator);
                        tracker.record(
                            locator,
                            ExtractionAttempt::failed(
                                NO_STRATEGY,
                                Duration::ZERO,
                                "no applicable strategy",
                            ),
                        );
                        ImageState::Exhausted(
                            ValidationIssue::new(IssueType::Other, "no strategy produced an image")
                                .with_detail("attempts", 1),
                        )
                    }
                },

                ImageState::Attempting(i) => {
                    self.attempt_step(i, document, locator, tracker, &mut candidate_seen)
                }

                ImageState::Validating {
                    strategy,
                    candidate,
                    attempt,
                } => match self.validator.validate(&candidate) {
                    Ok(()) => {
                        tracker.record(locator, attempt);
                        ImageState::Accepted {
                            strategy,
                            candidate,
                        }
                    }
                    Err(issue) => {
                        warn!(
                            "{} {}: {} candidate rejected: {}",
                            locator.document, locator, attempt.strategy, issue
                        );
                        tracker.record(locator, attempt.rejected(issue.clone()));
                        match self.next_applicable(strategy + 1, document, locator, tracker) {
                            Some(next) => ImageState::Attempting(next),
                            None => ImageState::Exhausted(issue),
                        }
                    }
                },

                ImageState::Accepted {
                    strategy,
                    candidate,
                } => {
                    let name = self
                        .registry
                        .get(strategy)
                        .map(|s| s.name().to_string())
                        .unwrap_or_default();
                    let relevance = self.relevance.as_ref().and_then(|f| {
                        let verdict = f.evaluate_encoded(&candidate.bytes)?;
                        if verdict.would_filter() {
                            debug!(
                                "{} {}: {} ({})",
                                locator.document,
                                locator,
                                if verdict.filtered { "filtered" } else { "would filter" },
                                verdict
                                    .reasons
                                    .iter()
                                    .map(|r| r.as_str())
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            );
                        }
                        Some(verdict)
                    });
                    return ImageOutcome::Accepted(AcceptedImage {
                        locator: locator.clone(),
                        candidate,
                        strategy: name,
                        attempts: tracker.history(locator).to_vec(),
                        relevance,
                    });
                }

                ImageState::Exhausted(issue) => {
                    let attempts = tracker.history(locator).to_vec();
                    return ImageOutcome::Rejected(RejectedImage {
                        locator: locator.clone(),
                        issue,
                        attempts,
                    });
                }
            };
        }
    }

    /// First strategy at or after `from` that applies to `locator` and has
    /// not already been tried on it.
    fn next_applicable(
        &self,
        from: usize,
        document: &dyn SourceDocument,
        locator: &ImageLocator,
        tracker: &AttemptTracker,
    ) -> Option<usize> {
        (from..self.registry.len()).find(|&i| {
            self.registry.get(i).is_some_and(|s| {
                !tracker.has_tried(locator, s.name()) && s.applies_to(document, locator)
            })
        })
    }

    /// Run strategy `i` once and pick the next state.
    fn attempt_step(
        &self,
        i: usize,
        document: &dyn SourceDocument,
        locator: &ImageLocator,
        tracker: &mut AttemptTracker,
        candidate_seen: &mut bool,
    ) -> ImageState {
        let Some(strategy) = self.registry.get(i) else {
            return ImageState::Exhausted(ValidationIssue::new(
                IssueType::Other,
                "no strategy produced an image",
            ));
        };
        let name = strategy.name();
        let t0 = Instant::now();

        match strategy.attempt(document, locator) {
            Ok(candidate) => {
                debug!(
                    "{} {}: {} produced {}x{} {} ({} bytes)",
                    locator.document,
                    locator,
                    name,
                    candidate.width,
                    candidate.height,
                    candidate.color_mode,
                    candidate.byte_size()
                );
                let attempt = ExtractionAttempt::succeeded(name, t0.elapsed(), &candidate);
                *candidate_seen = true;
                ImageState::Validating {
                    strategy: i,
                    candidate,
                    attempt,
                }
            }
            Err(e) => {
                warn!(
                    "{} {}: strategy {} failed: {}",
                    locator.document, locator, name, e
                );
                tracker.record(locator, ExtractionAttempt::failed(name, t0.elapsed(), &e));
                if let Some(next) = self.next_applicable(i + 1, document, locator, tracker) {
                    return ImageState::Attempting(next);
                }
                let message = if *candidate_seen {
                    "no strategy produced an acceptable image"
                } else {
                    "no strategy produced an image"
                };
                ImageState::Exhausted(
                    ValidationIssue::new(IssueType::Other, message)
                        .with_detail("last_error", e.to_string())
                        .with_detail("attempts", tracker.history(locator).len()),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PageError, StrategyError};
    use crate::extraction::locator::ColorMode;
    use crate::extraction::relevance::{FilterReason, RelevanceConfig};
    use crate::extraction::strategy::ExtractionStrategy;
    use crate::extraction::validator::ValidationConfig;
    use image::DynamicImage;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Document with `pages[p]` images on page `p + 1`; pixels never read.
    struct ShapeDoc {
        pages: Vec<usize>,
        broken_page: Option<usize>,
    }

    impl SourceDocument for ShapeDoc {
        fn identifier(&self) -> &str {
            "shape.pdf"
        }
        fn page_count(&self) -> usize {
            self.pages.len()
        }
        fn image_xrefs(&self, page: usize) -> Result<Vec<u32>, StrategyError> {
            if Some(page) == self.broken_page {
                return Err(StrategyError::PageUnavailable {
                    page,
                    detail: "bad object stream".into(),
                });
            }
            Ok((0..self.pages[page - 1])
                .map(|i| (page * 100 + i) as u32)
                .collect())
        }
        fn raw_image(&self, _l: &ImageLocator) -> Result<DynamicImage, StrategyError> {
            Err(StrategyError::UnsupportedEncoding {
                detail: "n/a".into(),
            })
        }
        fn processed_image(&self, l: &ImageLocator) -> Result<DynamicImage, StrategyError> {
            self.raw_image(l)
        }
        fn render_page(&self, page: usize, _: u32, _: u32) -> Result<DynamicImage, StrategyError> {
            Err(StrategyError::PageUnavailable {
                page,
                detail: "n/a".into(),
            })
        }
        fn page_text(&self, _page: usize) -> Result<String, PageError> {
            Ok(String::new())
        }
    }

    enum Script {
        Fail,
        Pgm(u32, u32),
    }

    /// Strategy whose result per xref is scripted; unknown xrefs fail.
    struct Scripted {
        name: &'static str,
        results: HashMap<u32, Script>,
    }

    impl ExtractionStrategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }
        fn attempt(
            &self,
            _document: &dyn SourceDocument,
            locator: &ImageLocator,
        ) -> Result<ImageCandidate, StrategyError> {
            match self.results.get(&locator.xref) {
                Some(Script::Pgm(w, h)) => {
                    let mut bytes = format!("P5\n{} {}\n255\n", w, h).into_bytes();
                    bytes.resize(bytes.len() + (*w * *h) as usize, 200);
                    Ok(ImageCandidate {
                        bytes,
                        width: *w,
                        height: *h,
                        color_mode: ColorMode::L,
                        extension: "pgm".into(),
                        note: None,
                    })
                }
                Some(Script::Fail) | None => Err(StrategyError::CorruptStream {
                    detail: format!("{} cannot read xref {}", self.name, locator.xref),
                }),
            }
        }
    }

    fn lenient() -> Validator {
        Validator::new(ValidationConfig {
            min_file_size: 200,
            min_width: 1,
            min_height: 1,
            ..ValidationConfig::default()
        })
    }

    fn registry(first: Vec<(u32, Script)>, second: Vec<(u32, Script)>) -> StrategyRegistry {
        StrategyRegistry::new()
            .with(Arc::new(Scripted {
                name: "first",
                results: first.into_iter().collect(),
            }))
            .with(Arc::new(Scripted {
                name: "second",
                results: second.into_iter().collect(),
            }))
    }

    #[test]
    fn accepted_on_first_strategy_has_one_attempt() {
        let doc = ShapeDoc {
            pages: vec![1],
            broken_page: None,
        };
        let o = Orchestrator::new(registry(vec![(100, Script::Pgm(20, 20))], vec![]), lenient());
        let run = o.process(&doc, &StopSignal::new());
        assert_eq!(run.outcomes.len(), 1);
        let ImageOutcome::Accepted(a) = &run.outcomes[0] else {
            panic!("expected acceptance");
        };
        assert_eq!(a.strategy, "first");
        assert_eq!(a.attempts.len(), 1);
        assert!(a.attempts[0].rejected_by.is_none());
    }

    #[test]
    fn rejected_candidate_falls_through_to_next_strategy() {
        let doc = ShapeDoc {
            pages: vec![1],
            broken_page: None,
        };
        let o = Orchestrator::new(
            registry(
                vec![(100, Script::Pgm(11, 12))],
                vec![(100, Script::Pgm(20, 20))],
            ),
            lenient(),
        );
        let run = o.process(&doc, &StopSignal::new());
        let ImageOutcome::Accepted(a) = &run.outcomes[0] else {
            panic!("expected acceptance");
        };
        assert_eq!(a.strategy, "second");
        assert_eq!(a.attempts.len(), 2);
        assert_eq!(
            a.attempts[0].rejected_by.as_ref().map(|i| i.issue_type),
            Some(IssueType::SizeIssues)
        );
    }

    #[test]
    fn all_strategies_failing_is_other_issue() {
        let doc = ShapeDoc {
            pages: vec![1],
            broken_page: None,
        };
        let o = Orchestrator::new(registry(vec![], vec![]), lenient());
        let run = o.process(&doc, &StopSignal::new());
        let ImageOutcome::Rejected(r) = &run.outcomes[0] else {
            panic!("expected rejection");
        };
        assert_eq!(r.issue.issue_type, IssueType::Other);
        assert_eq!(r.issue.message, "no strategy produced an image");
        assert_eq!(r.issue.detail["attempts"], 2);
        assert_eq!(r.attempts.len(), 2);
    }

    #[test]
    fn last_failure_after_rejection_mentions_acceptable() {
        let doc = ShapeDoc {
            pages: vec![1],
            broken_page: None,
        };
        let o = Orchestrator::new(registry(vec![(100, Script::Pgm(3, 3))], vec![]), lenient());
        let run = o.process(&doc, &StopSignal::new());
        let ImageOutcome::Rejected(r) = &run.outcomes[0] else {
            panic!("expected rejection");
        };
        assert_eq!(r.issue.message, "no strategy produced an acceptable image");
    }

    #[test]
    fn empty_registry_records_one_synthetic_attempt() {
        let doc = ShapeDoc {
            pages: vec![1],
            broken_page: None,
        };
        let o = Orchestrator::new(StrategyRegistry::new(), lenient());
        let run = o.process(&doc, &StopSignal::new());
        let ImageOutcome::Rejected(r) = &run.outcomes[0] else {
            panic!("expected rejection");
        };
        assert_eq!(r.attempts.len(), 1);
        assert_eq!(r.attempts[0].strategy, NO_STRATEGY);
        assert!(!r.attempts[0].is_success());
        assert_eq!(r.attempts[0].error.as_deref(), Some("no applicable strategy"));
        assert_eq!(r.issue.issue_type, IssueType::Other);
        assert_eq!(r.issue.message, "no strategy produced an image");
    }

    #[test]
    fn strategy_registered_twice_runs_once() {
        let doc = ShapeDoc {
            pages: vec![1],
            broken_page: None,
        };
        let tiny: Arc<dyn ExtractionStrategy> = Arc::new(Scripted {
            name: "tiny",
            results: [(100, Script::Pgm(3, 3))].into_iter().collect(),
        });
        let o = Orchestrator::new(
            StrategyRegistry::new().with(tiny.clone()).with(tiny),
            lenient(),
        );
        let run = o.process(&doc, &StopSignal::new());
        let ImageOutcome::Rejected(r) = &run.outcomes[0] else {
            panic!("expected rejection");
        };
        let names: Vec<&str> = r.attempts.iter().map(|a| a.strategy.as_str()).collect();
        assert_eq!(names, vec!["tiny"]);
        assert_eq!(r.issue.issue_type, IssueType::SizeIssues);
    }

    #[test]
    fn relevance_filter_marks_but_keeps_acceptance() {
        let doc = ShapeDoc {
            pages: vec![1],
            broken_page: None,
        };
        let filter = RelevanceFilter::new(RelevanceConfig {
            min_width: 1,
            min_height: 1,
            ..RelevanceConfig::default()
        });
        let o = Orchestrator::new(registry(vec![(100, Script::Pgm(20, 20))], vec![]), lenient())
            .with_relevance(filter);
        let run = o.process(&doc, &StopSignal::new());
        let ImageOutcome::Accepted(a) = &run.outcomes[0] else {
            panic!("expected acceptance");
        };
        let verdict = a.relevance.as_ref().expect("verdict");
        assert!(verdict.filtered);
        assert_eq!(verdict.reasons[0], FilterReason::Blank);
        assert_eq!(run.accepted().count(), 1);
        assert_eq!(run.kept().count(), 0);

        let report = run.report();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.succeeded + report.failed, report.attempted);
        let stats = report.filter.expect("filter stats");
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.by_reason[&FilterReason::Blank], 1);
    }

    #[test]
    fn no_filter_means_no_verdict() {
        let doc = ShapeDoc {
            pages: vec![1],
            broken_page: None,
        };
        let o = Orchestrator::new(registry(vec![(100, Script::Pgm(20, 20))], vec![]), lenient());
        let run = o.process(&doc, &StopSignal::new());
        let ImageOutcome::Accepted(a) = &run.outcomes[0] else {
            panic!("expected acceptance");
        };
        assert!(a.relevance.is_none());
        assert!(run.report().filter.is_none());
        assert_eq!(run.kept().count(), 1);
    }

    #[test]
    fn unreadable_page_is_logged_and_skipped() {
        let doc = ShapeDoc {
            pages: vec![1, 2, 1],
            broken_page: Some(2),
        };
        let o = Orchestrator::new(
            registry(vec![(100, Script::Pgm(20, 20)), (300, Script::Pgm(20, 20))], vec![]),
            lenient(),
        );
        let run = o.process(&doc, &StopSignal::new());
        assert_eq!(run.identified, 2);
        assert_eq!(run.errors.len(), 1);
        assert!(run.errors[0].starts_with("page 2:"));
        let pages: Vec<usize> = run.outcomes.iter().map(|o| o.locator().page).collect();
        assert_eq!(pages, vec![1, 3]);
    }

    #[test]
    fn stop_signal_halts_between_images() {
        let doc = ShapeDoc {
            pages: vec![3],
            broken_page: None,
        };
        let o = Orchestrator::new(
            registry(
                vec![
                    (100, Script::Pgm(20, 20)),
                    (101, Script::Pgm(20, 20)),
                    (102, Script::Pgm(20, 20)),
                ],
                vec![],
            ),
            lenient(),
        );
        let stop = StopSignal::new();
        let mut seen = 0;
        let run = o.process_with(&doc, &stop, |_| {
            seen += 1;
            if seen == 1 {
                stop.stop();
            }
        });
        assert!(run.interrupted);
        assert_eq!(run.identified, 3);
        assert_eq!(run.outcomes.len(), 1);
        let report = run.report();
        assert_eq!(report.attempted, 1);
        assert!(report.errors[0].contains("2 of 3 images not attempted"));
    }
}
