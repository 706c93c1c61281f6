//! Batch coordination across many source documents.
//!
//! Each document runs in its own worker future with at most `concurrency`
//! in flight (`buffer_unordered`, the same pattern the page pipeline uses).
//! Workers own their reports; only the coordinator loop merges them into the
//! [`RunSummary`], one at a time, so no map is written from two places.
//!
//! A worker error never aborts the batch: it becomes that document's report
//! with `opened = false` and exactly one error entry.

use crate::error::ExtractError;
use crate::extraction::report::{DocumentReport, RunSummary};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Cooperative stop flag shared between the coordinator and its workers.
///
/// Workers check it between images, never mid-attempt, so a stopped document
/// still has a complete attempt history for every image it touched.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Raise the flag once `after` has elapsed. Must be called inside a
    /// Tokio runtime.
    pub fn stop_after(&self, after: Duration) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            warn!("Batch time limit of {:?} reached; finishing in-flight images", after);
            signal.stop();
        })
    }
}

/// Runs a per-document worker over many sources and aggregates the reports.
#[derive(Clone)]
pub struct BatchCoordinator {
    concurrency: usize,
    timeout: Option<Duration>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .field("progress", &self.progress.as_ref().map(|_| "<dyn callback>"))
            .finish()
    }
}

impl BatchCoordinator {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            timeout: None,
            progress: None,
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn progress(mut self, cb: Option<ProgressCallback>) -> Self {
        self.progress = cb;
        self
    }

    /// Run `worker` once per source and merge the results.
    ///
    /// Sources not yet started when the time limit passes are reported with
    /// a single "not started" error.
    pub async fn run<F, Fut>(&self, sources: Vec<String>, worker: F) -> RunSummary
    where
        F: Fn(String, StopSignal) -> Fut,
        Fut: Future<Output = Result<DocumentReport, ExtractError>>,
    {
        let total = sources.len();
        info!(
            "Batch of {} documents, concurrency {}",
            total, self.concurrency
        );
        if let Some(cb) = &self.progress {
            cb.on_batch_start(total);
        }

        let stop = StopSignal::new();
        let timer = self.timeout.map(|t| stop.stop_after(t));

        let jobs = sources.into_iter().map(|source| {
            let stop = stop.clone();
            let progress = self.progress.clone();
            let work = worker(source.clone(), stop.clone());
            async move {
                if stop.is_stopped() {
                    warn!("{}: not started, batch time limit reached", source);
                    return DocumentReport::unreadable(
                        source,
                        "not started: batch time limit reached",
                    );
                }
                if let Some(cb) = &progress {
                    cb.on_document_start(&source);
                }
                match work.await {
                    Ok(report) => {
                        if let Some(cb) = &progress {
                            cb.on_document_complete(&source, &report);
                        }
                        report
                    }
                    Err(e) => {
                        error!("{}: {}", source, e);
                        if let Some(cb) = &progress {
                            cb.on_document_failed(&source, &e.to_string());
                        }
                        DocumentReport::unreadable(source, e)
                    }
                }
            }
        });

        let mut summary = RunSummary::new();
        let mut reports = stream::iter(jobs).buffer_unordered(self.concurrency);
        while let Some(report) = reports.next().await {
            summary.merge(report);
        }

        if let Some(handle) = timer {
            handle.abort();
        }

        info!(
            "Batch complete: {} documents, {} succeeded / {} failed images",
            summary.totals.documents, summary.totals.succeeded, summary.totals.failed
        );
        if let Some(cb) = &self.progress {
            cb.on_batch_complete(&summary);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    fn ok_report(source: &str, n: usize) -> DocumentReport {
        DocumentReport {
            source: source.to_string(),
            opened: true,
            identified: n,
            attempted: n,
            succeeded: n,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failing_document_does_not_abort_batch() {
        let coordinator = BatchCoordinator::new(2);
        let summary = coordinator
            .run(
                vec!["a.pdf".into(), "missing.pdf".into(), "c.pdf".into()],
                |source, _stop| async move {
                    if source == "missing.pdf" {
                        Err(ExtractError::FileNotFound {
                            path: PathBuf::from(&source),
                        })
                    } else {
                        Ok(ok_report(&source, 2))
                    }
                },
            )
            .await;

        assert_eq!(summary.totals.documents, 3);
        assert_eq!(summary.totals.unreadable, 1);
        assert_eq!(summary.totals.succeeded, 4);
        let missing = summary.get("missing.pdf").unwrap();
        assert!(!missing.opened);
        assert_eq!(missing.errors.len(), 1);
        assert_eq!(summary.get("a.pdf").unwrap(), &ok_report("a.pdf", 2));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let coordinator = BatchCoordinator::new(2);
        let sources: Vec<String> = (0..6).map(|i| format!("{i}.pdf")).collect();

        let summary = coordinator
            .run(sources, |source, _stop| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(ok_report(&source, 1))
                }
            })
            .await;

        assert_eq!(summary.totals.documents, 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn documents_after_deadline_are_not_started() {
        let coordinator = BatchCoordinator::new(1).timeout(Some(Duration::from_millis(20)));
        let summary = coordinator
            .run(
                vec!["slow.pdf".into(), "late.pdf".into()],
                |source, stop| async move {
                    if source == "slow.pdf" {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        assert!(stop.is_stopped());
                    }
                    Ok(ok_report(&source, 1))
                },
            )
            .await;

        assert!(summary.get("slow.pdf").unwrap().opened);
        let late = summary.get("late.pdf").unwrap();
        assert!(!late.opened);
        assert!(late.errors[0].starts_with("not started"));
    }

    #[test]
    fn stop_signal_is_shared_between_clones() {
        let a = StopSignal::new();
        let b = a.clone();
        assert!(!b.is_stopped());
        a.stop();
        assert!(b.is_stopped());
    }
}
