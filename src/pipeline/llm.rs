//! Text restructuring: turn a page's raw text layer into Markdown.
//!
//! The pipeline only sees the [`Restructure`] trait, so tests can drive the
//! retry logic with scripted failures. [`LlmRestructurer`] is the production
//! implementation over an `edgequake-llm` provider.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient under concurrent load. Exponential
//! backoff (`retry_backoff_ms * 2^(attempt-1)`) spreads retries out: with a
//! 500 ms base and 3 retries the waits are 500 ms → 1 s → 2 s. The sleep is
//! async, so other pages and documents keep moving while one page waits.

use crate::config::ExtractionConfig;
use crate::error::PageError;
use crate::output::PageResult;
use crate::pipeline::postprocess;
use crate::prompts::{page_context_message, DEFAULT_SYSTEM_PROMPT};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// What the restructuring service is told about a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestructureContext {
    pub title: Option<String>,
    pub page_num: usize,
    pub total_pages: usize,
    /// Figure files on this page, as paths relative to the Markdown file.
    pub figures: Vec<String>,
}

/// Markdown plus token usage for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Restructured {
    pub markdown: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RestructureError {
    #[error("{0}")]
    Provider(String),
    #[error("empty response")]
    Empty,
}

/// An opaque text-to-Markdown service.
pub trait Restructure: Send + Sync {
    fn restructure<'a>(
        &'a self,
        text: &'a str,
        context: &'a RestructureContext,
    ) -> BoxFuture<'a, Result<Restructured, RestructureError>>;
}

/// [`Restructure`] backed by an LLM chat completion.
pub struct LlmRestructurer {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
}

impl LlmRestructurer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
        }
    }
}

impl Restructure for LlmRestructurer {
    fn restructure<'a>(
        &'a self,
        text: &'a str,
        context: &'a RestructureContext,
    ) -> BoxFuture<'a, Result<Restructured, RestructureError>> {
        Box::pin(async move {
            let messages = vec![
                ChatMessage::system(self.system_prompt.as_str()),
                ChatMessage::system(page_context_message(context)),
                ChatMessage::user(text),
            ];
            let response = self
                .provider
                .chat(&messages, Some(&self.options))
                .await
                .map_err(|e| RestructureError::Provider(e.to_string()))?;
            if response.content.trim().is_empty() {
                return Err(RestructureError::Empty);
            }
            Ok(Restructured {
                markdown: response.content,
                input_tokens: response.prompt_tokens,
                output_tokens: response.completion_tokens,
            })
        })
    }
}

/// Retry knobs for [`restructure_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << (attempt - 1).min(16)))
    }
}

/// Restructure one page with retries.
///
/// Always returns a `PageResult`: when every attempt fails the page carries
/// its cleaned raw text (`fallback`) and a [`PageError`].
pub async fn restructure_page(
    service: &dyn Restructure,
    text: &str,
    context: &RestructureContext,
    policy: RetryPolicy,
    fallback: impl FnOnce() -> String,
) -> PageResult {
    let start = Instant::now();
    let page_num = context.page_num;
    let mut last_err = String::from("unknown error");
    let mut timed_out = false;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num,
                attempt,
                policy.max_retries,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        let call = service.restructure(text, context);
        match timeout(Duration::from_secs(policy.timeout_secs), call).await {
            Ok(Ok(out)) => {
                debug!(
                    "Page {}: {} input tokens, {} output tokens, {:?}",
                    page_num,
                    out.input_tokens,
                    out.output_tokens,
                    start.elapsed()
                );
                return PageResult {
                    page_num,
                    markdown: postprocess::clean_markdown(&out.markdown),
                    input_tokens: out.input_tokens,
                    output_tokens: out.output_tokens,
                    duration_ms: start.elapsed().as_millis() as u64,
                    retries: attempt,
                    restructured: true,
                    error: None,
                };
            }
            Ok(Err(e)) => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                last_err = e.to_string();
                timed_out = false;
            }
            Err(_) => {
                warn!(
                    "Page {}: attempt {} timed out after {}s",
                    page_num,
                    attempt + 1,
                    policy.timeout_secs
                );
                last_err = format!("timed out after {}s", policy.timeout_secs);
                timed_out = true;
            }
        }
    }

    let error = if timed_out {
        PageError::Timeout {
            page: page_num,
            secs: policy.timeout_secs,
        }
    } else {
        PageError::RestructureFailed {
            page: page_num,
            retries: policy.max_retries,
            detail: last_err,
        }
    };

    PageResult {
        page_num,
        markdown: fallback(),
        input_tokens: 0,
        output_tokens: 0,
        duration_ms: start.elapsed().as_millis() as u64,
        retries: policy.max_retries,
        restructured: false,
        error: Some(error),
    }
}

/// Build `CompletionOptions` from the config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then echoes the text as a heading.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Restructure for Flaky {
        fn restructure<'a>(
            &'a self,
            text: &'a str,
            _context: &'a RestructureContext,
        ) -> BoxFuture<'a, Result<Restructured, RestructureError>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    Err(RestructureError::Provider("HTTP 503".into()))
                } else {
                    Ok(Restructured {
                        markdown: format!("```markdown\n# {}\n```", text),
                        input_tokens: 10,
                        output_tokens: 5,
                    })
                }
            })
        }
    }

    struct Hangs;

    impl Restructure for Hangs {
        fn restructure<'a>(
            &'a self,
            _text: &'a str,
            _context: &'a RestructureContext,
        ) -> BoxFuture<'a, Result<Restructured, RestructureError>> {
            Box::pin(async {
                sleep(Duration::from_secs(3600)).await;
                Err(RestructureError::Empty)
            })
        }
    }

    fn ctx() -> RestructureContext {
        RestructureContext {
            page_num: 2,
            total_pages: 3,
            ..Default::default()
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_ms: 1,
            timeout_secs: 1,
        }
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&ExtractionConfig::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 3,
            backoff_ms: 500,
            timeout_secs: 60,
        };
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let svc = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let r = restructure_page(&svc, "Intro", &ctx(), policy(3), || "raw".into()).await;
        assert!(r.error.is_none());
        assert!(r.restructured);
        assert_eq!(r.retries, 2);
        assert_eq!(r.markdown, "# Intro\n");
        assert_eq!(svc.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back_to_raw_text() {
        let svc = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let r = restructure_page(&svc, "Intro", &ctx(), policy(2), || "raw text".into()).await;
        assert!(!r.restructured);
        assert_eq!(r.markdown, "raw text");
        assert_eq!(svc.calls.load(Ordering::SeqCst), 3);
        match r.error {
            Some(PageError::RestructureFailed { page, retries, detail }) => {
                assert_eq!((page, retries), (2, 2));
                assert_eq!(detail, "HTTP 503");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn hung_call_times_out() {
        let r = restructure_page(&Hangs, "x", &ctx(), policy(0), String::new).await;
        assert!(matches!(r.error, Some(PageError::Timeout { page: 2, secs: 1 })));
    }
}
