//! Public entry points: single-document extraction / conversion, batch and
//! directory modes, and metadata inspection.
//!
//! ## Flow for one document
//!
//! ```text
//! input ─▶ resolve ─▶ [blocking] open + extract images + page text
//!                          │
//!        figures + report ◀┘
//!              │
//!              ├─ restructure page text (async, retries)
//!              ├─ assemble Markdown (+ front-matter)
//!              ├─ reference gate (assets vs. image links)
//!              └─ write <stem>.md
//! ```
//!
//! All pdfium work happens inside `spawn_blocking`: the engine is not
//! async-safe and CPU-bound decoding would stall Tokio worker threads.

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, PageError};
use crate::extraction::batch::{BatchCoordinator, StopSignal};
use crate::extraction::document::{bind_pdfium, PdfiumDocument, SourceDocument};
use crate::extraction::orchestrator::DocumentExtraction;
use crate::extraction::report::RunSummary;
use crate::output::{AssetFile, ConversionStats, DocumentMetadata, DocumentOutput, PageResult};
use crate::pipeline::llm::{
    restructure_page, LlmRestructurer, Restructure, RestructureContext, RetryPolicy,
};
use crate::pipeline::{assets, input, postprocess, text};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract and validate every embedded image of one document, writing the
/// figures and the diagnostic report. No Markdown, no LLM.
///
/// # Errors
/// Returns `Err(ExtractError)` only when the document cannot be processed
/// at all (not found, not a PDF, wrong password, pdfium missing). Per-image
/// failures are in `output.report`.
pub async fn extract_images(
    input_str: impl AsRef<str>,
    output_dir: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<DocumentOutput, ExtractError> {
    let input_str = input_str.as_ref();
    run_document(
        input_str,
        output_dir.as_ref(),
        &input::document_stem(input_str),
        config,
        StopSignal::new(),
        Stage::ExtractOnly,
    )
    .await
}

/// Full pipeline for one document: images, report, restructured Markdown.
///
/// When `config.restructure` is false the Markdown is built from the raw
/// text layer and no provider is needed.
pub async fn convert(
    input_str: impl AsRef<str>,
    output_dir: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<DocumentOutput, ExtractError> {
    let restructurer = build_restructurer(config).await?;
    let input_str = input_str.as_ref();
    run_document(
        input_str,
        output_dir.as_ref(),
        &input::document_stem(input_str),
        config,
        StopSignal::new(),
        Stage::Markdown(restructurer),
    )
    .await
}

/// Run the pipeline over many inputs, all writing into `output_dir`.
///
/// One document failing never stops the others: it shows up in the summary
/// as an unopened document with a single error entry. Inputs whose file
/// stems collide are written as `<stem>-2`, `<stem>-3`, ... so no document
/// overwrites another's files.
pub async fn convert_batch(
    inputs: Vec<String>,
    output_dir: impl AsRef<Path>,
    config: &ExtractionConfig,
    extract_only: bool,
) -> Result<RunSummary, ExtractError> {
    let out = output_dir.as_ref().to_path_buf();
    let jobs = inputs.into_iter().map(|i| (i, out.clone())).collect();
    run_batch(jobs, config, extract_only).await
}

/// Discover `*.pdf` under `dir` recursively and run the batch, mirroring
/// the relative directory layout under `output_dir`.
pub async fn convert_directory(
    dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &ExtractionConfig,
    extract_only: bool,
) -> Result<RunSummary, ExtractError> {
    let dir = dir.as_ref();
    let output_dir = output_dir.as_ref();
    let jobs = input::discover_documents(dir)?
        .into_iter()
        .map(|path| {
            let rel_parent = path
                .strip_prefix(dir)
                .ok()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .unwrap_or_default();
            (path.display().to_string(), output_dir.join(rel_parent))
        })
        .collect();
    run_batch(jobs, config, extract_only).await
}

/// Read page count, per-page image counts and the info dictionary.
///
/// Does not extract anything and needs no provider.
pub async fn inspect(
    input_str: impl AsRef<str>,
    password: Option<&str>,
) -> Result<DocumentMetadata, ExtractError> {
    let input_str = input_str.as_ref().to_string();
    let resolved = input::resolve_input(&input_str, 120).await?;
    let path = resolved.path().to_path_buf();
    let password = password.map(str::to_string);

    let metadata = tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = PdfiumDocument::open(&pdfium, &path, password.as_deref())?
            .identified_as(input_str);
        Ok::<_, ExtractError>(document.metadata())
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Inspect task panicked: {}", e)))??;

    drop(resolved);
    Ok(metadata)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// How far one document goes after image extraction.
#[derive(Clone)]
enum Stage {
    ExtractOnly,
    /// Build Markdown; restructure page text when a service is present.
    Markdown(Option<Arc<dyn Restructure>>),
}

async fn run_batch(
    jobs: Vec<(String, PathBuf)>,
    config: &ExtractionConfig,
    extract_only: bool,
) -> Result<RunSummary, ExtractError> {
    let stage = if extract_only {
        Stage::ExtractOnly
    } else {
        Stage::Markdown(build_restructurer(config).await?)
    };

    let mut seen = HashSet::new();
    let jobs: Vec<(String, PathBuf)> = jobs
        .into_iter()
        .filter(|(source, _)| {
            let first = seen.insert(source.clone());
            if !first {
                warn!("{}: listed more than once, processing it once", source);
            }
            first
        })
        .collect();
    let stems = input::unique_stems(&jobs);
    let targets: HashMap<String, (PathBuf, String)> = jobs
        .iter()
        .zip(stems)
        .map(|((source, dir), stem)| (source.clone(), (dir.clone(), stem)))
        .collect();
    let sources: Vec<String> = jobs.into_iter().map(|(s, _)| s).collect();

    let coordinator = BatchCoordinator::new(config.concurrency)
        .timeout(config.batch_timeout())
        .progress(config.progress_callback.clone());

    let summary = coordinator
        .run(sources, |source, stop| {
            let (out_dir, stem) = targets
                .get(&source)
                .cloned()
                .unwrap_or_else(|| (PathBuf::new(), input::document_stem(&source)));
            let stage = stage.clone();
            async move {
                run_document(&source, &out_dir, &stem, config, stop, stage)
                    .await
                    .map(|o| o.report)
            }
        })
        .await;

    Ok(summary)
}

/// Instantiate a restructuring service when `config.restructure` is on.
async fn build_restructurer(
    config: &ExtractionConfig,
) -> Result<Option<Arc<dyn Restructure>>, ExtractError> {
    if !config.restructure {
        return Ok(None);
    }
    let provider = resolve_provider(config).await?;
    debug!("Restructuring page text with {:?}", config.model);
    Ok(Some(Arc::new(LlmRestructurer::new(provider, config))))
}

/// Everything read from the document in the blocking section.
struct Scan {
    extraction: DocumentExtraction,
    metadata: DocumentMetadata,
    texts: Vec<Result<String, PageError>>,
}

async fn run_document(
    input_str: &str,
    output_dir: &Path,
    stem: &str,
    config: &ExtractionConfig,
    stop: StopSignal,
    stage: Stage,
) -> Result<DocumentOutput, ExtractError> {
    let total_start = Instant::now();
    info!("Starting: {}", input_str);

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;

    // ── Step 2: Extract images (+ text) in the blocking pool ─────────────
    let want_text = matches!(stage, Stage::Markdown(_));
    let scan = scan_document(resolved.path(), input_str, config, stop, want_text).await?;
    drop(resolved);
    let extraction_ms = scan.extraction.elapsed.as_millis() as u64;
    let mut report = scan.extraction.report();

    // ── Step 3: Figures + diagnostic report ──────────────────────────────
    let asset_dir = assets::asset_dir_for(output_dir, stem);
    let written = match assets::write_figures(&scan.extraction, &asset_dir).await {
        Ok(a) => a,
        Err(e) => {
            warn!("{}: {}", input_str, e);
            report.errors.push(e.to_string());
            Vec::new()
        }
    };
    if config.write_report {
        if let Err(e) = assets::write_reports(&report, &asset_dir).await {
            warn!("{}: {}", input_str, e);
            report.errors.push(e.to_string());
        }
    }

    let mut output = DocumentOutput {
        source: input_str.to_string(),
        markdown: String::new(),
        markdown_path: None,
        asset_dir: asset_dir.clone(),
        assets: written,
        pages: Vec::new(),
        report,
        metadata: scan.metadata,
        references: Default::default(),
        stats: ConversionStats {
            total_pages: scan.extraction.page_count,
            extraction_duration_ms: extraction_ms,
            ..Default::default()
        },
    };

    let Stage::Markdown(restructurer) = stage else {
        output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        return Ok(output);
    };

    // ── Step 4: Page Markdown ────────────────────────────────────────────
    let restructure_start = Instant::now();
    output.pages =
        build_pages(&scan.texts, &output.assets, &output.metadata, config, restructurer).await;
    output.stats.restructure_duration_ms = restructure_start.elapsed().as_millis() as u64;

    // ── Step 5: Assemble + reference gate ────────────────────────────────
    let markdown = assemble_document(&output, config);
    let on_disk = assets::list_asset_images(&asset_dir).await;
    let check = postprocess::check_image_references(&markdown, &on_disk);
    if !check.is_consistent() {
        warn!(
            "{}: {} unreferenced assets, {} missing image targets",
            input_str,
            check.unreferenced.len(),
            check.missing.len()
        );
    }
    output.markdown = postprocess::append_reference_warning(&markdown, &check);
    output.references = check;

    // ── Step 6: Write Markdown ───────────────────────────────────────────
    let md_path = output_dir.join(format!("{}.md", stem));
    assets::write_atomic(&md_path, output.markdown.as_bytes()).await?;
    output.markdown_path = Some(md_path);

    output.stats.restructured_pages = output.pages.iter().filter(|p| p.restructured).count();
    output.stats.fallback_pages = output.pages.iter().filter(|p| p.error.is_some()).count();
    output.stats.total_input_tokens = output.pages.iter().map(|p| p.input_tokens as u64).sum();
    output.stats.total_output_tokens = output.pages.iter().map(|p| p.output_tokens as u64).sum();
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Done: {} ({} figures, {} rejected, {}ms)",
        input_str,
        output.assets.len(),
        output.report.failed,
        output.stats.total_duration_ms
    );
    Ok(output)
}

/// Open the PDF and run the orchestrator inside `spawn_blocking`.
async fn scan_document(
    path: &Path,
    source: &str,
    config: &ExtractionConfig,
    stop: StopSignal,
    want_text: bool,
) -> Result<Scan, ExtractError> {
    let path = path.to_path_buf();
    let source = source.to_string();
    let password = config.password.clone();
    let orchestrator = config.orchestrator();
    let progress = config.progress_callback.clone();

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document =
            PdfiumDocument::open(&pdfium, &path, password.as_deref())?.identified_as(source);

        let extraction = orchestrator.process_with(&document, &stop, |outcome| {
            if let Some(cb) = &progress {
                cb.on_image_resolved(outcome.locator(), outcome.is_accepted());
            }
        });
        let metadata = document.metadata();
        let texts = if want_text {
            text::extract_page_texts(&document)
        } else {
            Vec::new()
        };
        debug!("{}: scan finished", document.identifier());

        Ok(Scan {
            extraction,
            metadata,
            texts,
        })
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Extraction task panicked: {}", e)))?
}

/// Produce one `PageResult` per page, restructuring in parallel (bounded,
/// order preserved) when a service is configured.
async fn build_pages(
    texts: &[Result<String, PageError>],
    assets: &[AssetFile],
    metadata: &DocumentMetadata,
    config: &ExtractionConfig,
    restructurer: Option<Arc<dyn Restructure>>,
) -> Vec<PageResult> {
    let total_pages = texts.len();
    let policy = RetryPolicy::from_config(config);
    let progress = config.progress_callback.clone();

    stream::iter(texts.iter().enumerate().map(|(i, page_text)| {
        let page_num = i + 1;
        let figures: Vec<String> = assets
            .iter()
            .filter(|a| a.page == page_num)
            .map(|a| a.relative_path.clone())
            .collect();
        let restructurer = restructurer.clone();
        let progress = progress.clone();

        async move {
            let result = match (page_text, restructurer) {
                (Err(e), _) => PageResult {
                    page_num,
                    markdown: text::figure_links(&figures),
                    input_tokens: 0,
                    output_tokens: 0,
                    duration_ms: 0,
                    retries: 0,
                    restructured: false,
                    error: Some(e.clone()),
                },
                (Ok(raw), Some(service)) if !raw.trim().is_empty() => {
                    let context = RestructureContext {
                        title: metadata.title.clone(),
                        page_num,
                        total_pages,
                        figures: figures.clone(),
                    };
                    restructure_page(service.as_ref(), raw, &context, policy, || {
                        raw_page_markdown(raw, &figures)
                    })
                    .await
                }
                (Ok(raw), _) => PageResult {
                    page_num,
                    markdown: raw_page_markdown(raw, &figures),
                    input_tokens: 0,
                    output_tokens: 0,
                    duration_ms: 0,
                    retries: 0,
                    restructured: false,
                    error: None,
                },
            };
            if let Some(cb) = &progress {
                cb.on_page_restructured(page_num, total_pages, result.error.is_none());
            }
            result
        }
    }))
    .buffered(config.page_concurrency)
    .collect()
    .await
}

/// Raw text shaped into paragraphs, followed by the page's figure links.
fn raw_page_markdown(raw: &str, figures: &[String]) -> String {
    let body = text::raw_text_to_markdown(raw);
    let links = text::figure_links(figures);
    let joined = match (body.is_empty(), links.is_empty()) {
        (false, false) => format!("{}\n\n{}", body, links),
        (false, true) => body,
        (true, _) => links,
    };
    postprocess::clean_markdown(&joined)
}

/// Join page Markdown with the configured separator, front-matter first.
fn assemble_document(output: &DocumentOutput, config: &ExtractionConfig) -> String {
    let mut parts: Vec<String> = Vec::new();
    if config.include_metadata {
        parts.push(format_yaml_front_matter(output));
    }

    let pages: Vec<&PageResult> = output
        .pages
        .iter()
        .filter(|p| !p.markdown.trim().is_empty())
        .collect();
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            parts.push(config.page_separator.render(page.page_num));
        }
        parts.push(page.markdown.trim_end().to_string());
    }

    let mut doc = parts.join("");
    doc.push('\n');
    doc
}

fn yaml_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// YAML front-matter: title, source, page and image counts.
fn format_yaml_front_matter(output: &DocumentOutput) -> String {
    let meta = &output.metadata;
    let mut yaml = String::from("---\n");
    if let Some(t) = &meta.title {
        yaml.push_str(&format!("title: {}\n", yaml_quote(t)));
    }
    if let Some(a) = &meta.author {
        yaml.push_str(&format!("author: {}\n", yaml_quote(a)));
    }
    yaml.push_str(&format!("source: {}\n", yaml_quote(&output.source)));
    yaml.push_str(&format!("pages: {}\n", meta.page_count));
    yaml.push_str(&format!("images: {}\n", output.assets.len()));
    yaml.push_str(&format!("rejected_images: {}\n", output.report.failed));
    yaml.push_str("---\n\n");
    yaml
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. pre-built provider (`config.provider`)
/// 2. named provider + model (`config.provider_name`)
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, both set
/// 4. `OPENAI_API_KEY` present → OpenAI
/// 5. `ProviderFactory::from_env` auto-detection
async fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    if let Some(provider) = &config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(name) = &config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY or ANTHROPIC_API_KEY, or pass --no-restructure.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
