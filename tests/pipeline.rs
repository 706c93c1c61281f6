//! Extraction core against in-memory documents and scripted strategies.
//!
//! No pdfium, no network: these run on every `cargo test`.

use edgequake_pdf_extract::{
    AttemptStatus, BatchCoordinator, ColorMode, DocumentReport, ExtractError, ExtractionStrategy,
    ImageCandidate, ImageLocator, ImageOutcome, IssueType, Orchestrator, PageError,
    SourceDocument, StopSignal, StrategyError, StrategyRegistry, ValidationConfig, Validator,
    NO_STRATEGY,
};
use image::DynamicImage;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

// ── Fixtures ─────────────────────────────────────────────────────────────

/// `pages[p]` holds the xrefs of page `p + 1`.
struct MemoryDoc {
    id: String,
    pages: Vec<Vec<u32>>,
}

impl MemoryDoc {
    fn new(id: &str, pages: Vec<Vec<u32>>) -> Self {
        Self {
            id: id.to_string(),
            pages,
        }
    }
}

impl SourceDocument for MemoryDoc {
    fn identifier(&self) -> &str {
        &self.id
    }
    fn page_count(&self) -> usize {
        self.pages.len()
    }
    fn image_xrefs(&self, page: usize) -> Result<Vec<u32>, StrategyError> {
        self.pages
            .get(page - 1)
            .cloned()
            .ok_or(StrategyError::PageUnavailable {
                page,
                detail: "no such page".into(),
            })
    }
    fn raw_image(&self, l: &ImageLocator) -> Result<DynamicImage, StrategyError> {
        Err(StrategyError::ObjectNotFound {
            page: l.page,
            xref: l.xref,
        })
    }
    fn processed_image(&self, l: &ImageLocator) -> Result<DynamicImage, StrategyError> {
        self.raw_image(l)
    }
    fn render_page(&self, page: usize, _: u32, _: u32) -> Result<DynamicImage, StrategyError> {
        Err(StrategyError::PageUnavailable {
            page,
            detail: "not renderable".into(),
        })
    }
    fn page_text(&self, _page: usize) -> Result<String, PageError> {
        Ok(String::new())
    }
}

/// Binary PGM: `P5\n{w} {h}\n255\n` followed by `w * h` grey bytes.
fn pgm(w: u32, h: u32) -> ImageCandidate {
    let mut bytes = format!("P5\n{} {}\n255\n", w, h).into_bytes();
    bytes.resize(bytes.len() + (w * h) as usize, 128);
    ImageCandidate {
        bytes,
        width: w,
        height: h,
        color_mode: ColorMode::L,
        extension: "pgm".into(),
        note: None,
    }
}

/// Per-xref scripted results. `only` restricts which xrefs it applies to.
struct Scripted {
    name: &'static str,
    results: HashMap<u32, (u32, u32)>,
    only: Option<BTreeSet<u32>>,
}

impl Scripted {
    fn new(name: &'static str, results: &[(u32, (u32, u32))]) -> Self {
        Self {
            name,
            results: results.iter().copied().collect(),
            only: None,
        }
    }

    fn only(mut self, xrefs: &[u32]) -> Self {
        self.only = Some(xrefs.iter().copied().collect());
        self
    }
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
            Some(&(w, h)) => Ok(pgm(w, h)),
            None => Err(StrategyError::UnsupportedEncoding {
                detail: format!("{}: cannot decode xref {}", self.name, locator.xref),
            }),
        }
    }

    fn applies_to(&self, _document: &dyn SourceDocument, locator: &ImageLocator) -> bool {
        self.only
            .as_ref()
            .is_none_or(|set| set.contains(&locator.xref))
    }
}

fn validator_200() -> Validator {
    Validator::new(ValidationConfig {
        min_file_size: 200,
        min_width: 1,
        min_height: 1,
        ..ValidationConfig::default()
    })
}

/// Four images on two pages:
/// 1–2 succeed on `first`; 3 is 145 bytes on `first` and nothing else
/// applies; 4 fails on `first` and succeeds on `second`.
fn scenario() -> (MemoryDoc, Orchestrator) {
    let doc = MemoryDoc::new("scenario.pdf", vec![vec![1, 2], vec![3, 4]]);
    let registry = StrategyRegistry::new()
        .with(Arc::new(Scripted::new(
            "first",
            &[(1, (20, 20)), (2, (20, 20)), (3, (11, 12))],
        )))
        .with(Arc::new(Scripted::new("second", &[(4, (20, 20))]).only(&[4])));
    (doc, Orchestrator::new(registry, validator_200()))
}

/// Drop timings so two runs can be compared.
fn without_timings(mut report: DocumentReport) -> DocumentReport {
    report.total_duration_ms = 0;
    for rejected in &mut report.rejected {
        for attempt in &mut rejected.attempts {
            attempt.duration_us = 0;
        }
    }
    report
}

fn assert_counts_consistent(report: &DocumentReport) {
    assert_eq!(report.succeeded + report.failed, report.attempted);
    assert!(report.attempted <= report.identified);
    assert_eq!(report.issue_tally.values().sum::<usize>(), report.failed);
    assert_eq!(report.rejected.len(), report.failed);
}

// ── Scenario ─────────────────────────────────────────────────────────────

#[test]
fn four_image_scenario_report() {
    let (doc, orchestrator) = scenario();
    let report = orchestrator.process(&doc, &StopSignal::new()).report();

    assert!(report.opened);
    assert_eq!(report.identified, 4);
    assert_eq!(report.attempted, 4);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.validation_failed, 1);
    assert_eq!(report.retry_successes, 1);
    assert_eq!(report.issue_tally.len(), 1);
    assert_eq!(report.issue_tally[&IssueType::SizeIssues], 1);
    assert_eq!(
        report.errors,
        vec![
            "page 2, image 1 (xref 3): size_issues: file size 145 bytes is below the minimum of 200 bytes"
                .to_string()
        ]
    );

    assert_eq!(report.rejected.len(), 1);
    let rejected = &report.rejected[0];
    assert_eq!((rejected.locator.page, rejected.locator.index), (2, 1));
    assert_eq!(rejected.locator.xref, 3);
    assert_eq!(rejected.issue.issue_type, IssueType::SizeIssues);
    assert_eq!(rejected.issue.detail["file_size"], 145);
    assert_eq!(rejected.attempts.len(), 1);
    assert_eq!(rejected.attempts[0].strategy, "first");
}

#[test]
fn scenario_outcomes_follow_document_order() {
    let (doc, orchestrator) = scenario();
    let run = orchestrator.process(&doc, &StopSignal::new());

    let summary: Vec<(u32, bool, usize)> = run
        .outcomes
        .iter()
        .map(|o| (o.locator().xref, o.is_accepted(), o.attempts().len()))
        .collect();
    assert_eq!(
        summary,
        vec![(1, true, 1), (2, true, 1), (3, false, 1), (4, true, 2)]
    );

    let ImageOutcome::Accepted(fourth) = &run.outcomes[3] else {
        panic!("image 4 should be accepted");
    };
    assert_eq!(fourth.strategy, "second");
    assert_eq!(fourth.attempts[0].status, AttemptStatus::Failure);
    assert_eq!(fourth.attempts[1].status, AttemptStatus::Success);
}

// ── Properties ───────────────────────────────────────────────────────────

#[test]
fn runs_are_deterministic() {
    let (doc, orchestrator) = scenario();
    let a = orchestrator.process(&doc, &StopSignal::new()).report();
    let b = orchestrator.process(&doc, &StopSignal::new()).report();
    assert_eq!(without_timings(a), without_timings(b));
}

#[test]
fn no_strategy_runs_twice_for_one_image() {
    let doc = MemoryDoc::new("many.pdf", vec![vec![1, 2, 3], vec![4, 5], vec![], vec![6]]);
    let registry = StrategyRegistry::new()
        .with(Arc::new(Scripted::new("a", &[(1, (3, 3)), (2, (20, 20))])))
        .with(Arc::new(Scripted::new("b", &[(1, (4, 4)), (5, (20, 20))])))
        .with(Arc::new(Scripted::new("c", &[(6, (20, 20))])));
    let run = Orchestrator::new(registry, validator_200()).process(&doc, &StopSignal::new());

    for outcome in &run.outcomes {
        let mut seen = HashSet::new();
        for attempt in outcome.attempts() {
            assert!(
                seen.insert(attempt.strategy.clone()),
                "{} tried twice for {}",
                attempt.strategy,
                outcome.locator()
            );
        }
    }
    assert_counts_consistent(&run.report());
}

#[test]
fn rejected_history_ends_with_the_final_issue() {
    let doc = MemoryDoc::new("mixed.pdf", vec![vec![1, 2, 3]]);
    let registry = StrategyRegistry::new()
        .with(Arc::new(Scripted::new("a", &[(1, (3, 3)), (2, (5, 5))])))
        .with(Arc::new(Scripted::new("b", &[(1, (4, 4))])));
    let run = Orchestrator::new(registry, validator_200()).process(&doc, &StopSignal::new());
    let report = run.report();
    assert_eq!(report.failed, 3);

    for rejected in &report.rejected {
        let last = rejected.attempts.last().expect("at least one attempt");
        if rejected.issue.issue_type.is_validation() {
            assert_eq!(last.rejected_by.as_ref(), Some(&rejected.issue));
        } else {
            assert_eq!(last.status, AttemptStatus::Failure);
            assert_eq!(rejected.issue.detail["attempts"], rejected.attempts.len());
        }
    }

    // 1: rejected twice for size; 2: rejected, then b fails; 3: both fail.
    let issues: Vec<(IssueType, &str)> = report
        .rejected
        .iter()
        .map(|r| (r.issue.issue_type, r.issue.message.as_str()))
        .collect();
    assert_eq!(issues[0].0, IssueType::SizeIssues);
    assert_eq!(
        issues[1],
        (IssueType::Other, "no strategy produced an acceptable image")
    );
    assert_eq!(issues[2], (IssueType::Other, "no strategy produced an image"));
    assert_eq!(report.validation_failed, 1);
}

#[test]
fn image_no_strategy_applies_to_still_has_a_history() {
    let doc = MemoryDoc::new("skip.pdf", vec![vec![1, 2]]);
    let registry = StrategyRegistry::new()
        .with(Arc::new(Scripted::new("narrow", &[(2, (20, 20))]).only(&[2])));
    let report = Orchestrator::new(registry, validator_200())
        .process(&doc, &StopSignal::new())
        .report();

    assert_counts_consistent(&report);
    assert_eq!((report.attempted, report.succeeded, report.failed), (2, 1, 1));
    let rejected = &report.rejected[0];
    assert_eq!(rejected.locator.xref, 1);
    assert_eq!(rejected.issue.issue_type, IssueType::Other);
    assert_eq!(rejected.attempts.len(), 1);
    assert_eq!(rejected.attempts[0].strategy, NO_STRATEGY);
    assert_eq!(rejected.attempts[0].status, AttemptStatus::Failure);
}

#[test]
fn shared_strategy_instance_is_attempted_once_per_image() {
    let doc = MemoryDoc::new("dup.pdf", vec![vec![1]]);
    let tiny: Arc<dyn ExtractionStrategy> = Arc::new(Scripted::new("tiny", &[(1, (3, 3))]));
    let mut registry = StrategyRegistry::new();
    registry.push(tiny.clone()).push(tiny);
    let report = Orchestrator::new(registry, validator_200())
        .process(&doc, &StopSignal::new())
        .report();

    let attempts = &report.rejected[0].attempts;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].strategy, "tiny");
    assert_eq!(report.issue_tally[&IssueType::SizeIssues], 1);
}

#[test]
fn size_floor_boundary_through_the_orchestrator() {
    // 11x12 PGM is exactly 145 bytes.
    let doc = MemoryDoc::new("edge.pdf", vec![vec![1]]);
    let registry =
        StrategyRegistry::new().with(Arc::new(Scripted::new("only", &[(1, (11, 12))])));
    let at_floor = Validator::new(ValidationConfig {
        min_file_size: 145,
        min_width: 1,
        min_height: 1,
        ..ValidationConfig::default()
    });
    let above_floor = Validator::new(ValidationConfig {
        min_file_size: 146,
        min_width: 1,
        min_height: 1,
        ..ValidationConfig::default()
    });

    let ok = Orchestrator::new(registry.clone(), at_floor).process(&doc, &StopSignal::new());
    assert!(ok.outcomes[0].is_accepted());

    let rejected = Orchestrator::new(registry, above_floor)
        .process(&doc, &StopSignal::new())
        .report();
    assert_eq!(rejected.issue_tally[&IssueType::SizeIssues], 1);
    assert_eq!(rejected.rejected[0].issue.detail["file_size"], 145);
}

#[test]
fn counts_stay_consistent_when_stopped_early() {
    let (doc, orchestrator) = scenario();
    let stop = StopSignal::new();
    stop.stop();
    let report = orchestrator.process(&doc, &stop).report();
    assert_eq!(report.identified, 4);
    assert_eq!(report.attempted, 0);
    assert_counts_consistent(&report);
    assert_eq!(report.errors.len(), 1);
}

// ── Batch ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unreadable_document_does_not_disturb_the_others() {
    let (_, orchestrator) = scenario();
    let expected = without_timings(
        orchestrator
            .process(&scenario().0, &StopSignal::new())
            .report(),
    );

    let sources = vec![
        "scenario.pdf".to_string(),
        "broken.pdf".to_string(),
        "other.pdf".to_string(),
    ];
    let summary = BatchCoordinator::new(2)
        .run(sources, |source, stop| {
            let orchestrator = orchestrator.clone();
            async move {
                match source.as_str() {
                    "broken.pdf" => Err(ExtractError::CorruptPdf {
                        path: PathBuf::from(&source),
                        detail: "xref table missing".into(),
                    }),
                    "scenario.pdf" => {
                        let doc = MemoryDoc::new(&source, vec![vec![1, 2], vec![3, 4]]);
                        Ok(orchestrator.process(&doc, &stop).report())
                    }
                    _ => {
                        let doc = MemoryDoc::new(&source, vec![vec![1]]);
                        Ok(orchestrator.process(&doc, &stop).report())
                    }
                }
            }
        })
        .await;

    assert_eq!(summary.documents.len(), 3);
    assert_eq!(summary.totals.documents, 3);
    assert_eq!(summary.totals.unreadable, 1);

    let broken = summary.get("broken.pdf").expect("broken report");
    assert!(!broken.opened);
    assert_eq!(broken.errors.len(), 1);
    assert_eq!(broken.identified, 0);

    let good = summary.get("scenario.pdf").expect("scenario report").clone();
    assert_eq!(without_timings(good), expected);

    let other = summary.get("other.pdf").expect("other report");
    assert_eq!((other.identified, other.succeeded), (1, 1));

    assert_eq!(summary.totals.identified, 5);
    assert_eq!(summary.totals.succeeded, 4);
    assert_eq!(summary.totals.failed, 1);
}
