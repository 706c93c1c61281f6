//! CLI binary for edgequake-pdf-extract.
//!
//! Maps flags to `ExtractionConfig`, picks single-document, batch or
//! directory mode from the inputs, and prints the outcome.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf_extract::{
    convert, convert_batch, convert_directory, extract_images, inspect, render_summary_markdown,
    ColorMode, DocumentOutput, DocumentReport, ExtractionConfig, ExtractionProgressCallback,
    ImageLocator, PageSeparator, ProgressCallback, RelevanceConfig, RunSummary, StrategyKind,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while a single document is processed; becomes a bar over
/// documents once a batch announces its size.
struct CliProgressCallback {
    bar: ProgressBar,
    accepted: AtomicUsize,
    rejected: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Extracting");
        bar.set_message("opening…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            accepted: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        })
    }

    fn counts_message(&self) -> String {
        format!(
            "{} images accepted, {} rejected",
            self.accepted.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed)
        )
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} documents  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_documents as u64);
        self.bar.reset_eta();
    }

    fn on_image_resolved(&self, _locator: &ImageLocator, accepted: bool) {
        if accepted {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        self.bar.set_message(self.counts_message());
    }

    fn on_page_restructured(&self, page_num: usize, total_pages: usize, _ok: bool) {
        self.bar.set_prefix("Restructuring");
        self.bar
            .set_message(format!("page {page_num}/{total_pages}"));
    }

    fn on_document_complete(&self, source: &str, report: &DocumentReport) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            source,
            dim(&format!("{}/{} images", report.succeeded, report.identified)),
        ));
        self.bar.inc(1);
    }

    fn on_document_failed(&self, source: &str, error: &str) {
        self.bar
            .println(format!("  {} {}  {}", red("✗"), source, red(error)));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract and validate images, write figures + extraction report
  pdfx --extract-only paper.pdf -o out/

  # Full conversion: figures + restructured Markdown
  pdfx paper.pdf -o out/

  # Markdown from the raw text layer, no LLM needed
  pdfx --no-restructure paper.pdf -o out/

  # Whole directory tree, 8 documents at a time, 10 minute budget
  pdfx ./library -o out/ --concurrency 8 --batch-timeout 600

  # Stricter validation and a custom strategy order
  pdfx --min-file-size 4096 --min-width 100 --min-height 100 \
       --allowed-modes L,RGB --strategies processed,page_render doc.pdf

  # Keep decorative images out, or only report what would be dropped
  pdfx --filter paper.pdf -o out/
  pdfx --filter-diagnostic paper.pdf -o out/

  # Inspect page / image counts (no extraction)
  pdfx --inspect-only doc.pdf

OUTPUT LAYOUT:
  out/<stem>.md
  out/<stem>-img-assets/fig{n}-page{p}-img{i}.png
  out/<stem>-img-assets/extraction-report.md
  out/<stem>-img-assets/extraction-report.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  PDFX_*                  Any flag below, e.g. PDFX_MIN_FILE_SIZE=2048
"#;

/// Extract validated images and Markdown from PDF documents.
#[derive(Parser, Debug)]
#[command(
    name = "pdfx",
    version,
    about = "Extract validated images and Markdown from PDF documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files, HTTP/HTTPS URLs, or a single directory to scan recursively.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Output directory for Markdown, figures and reports.
    #[arg(short, long, env = "PDFX_OUTPUT", default_value = ".")]
    output: PathBuf,

    /// Only extract images and write reports; no Markdown.
    #[arg(long, env = "PDFX_EXTRACT_ONLY")]
    extract_only: bool,

    /// Build Markdown from the raw text layer instead of calling an LLM.
    #[arg(long, env = "PDFX_NO_RESTRUCTURE")]
    no_restructure: bool,

    /// Print page / image counts and metadata only.
    #[arg(long)]
    inspect_only: bool,

    /// Minimum accepted image size in bytes.
    #[arg(long, env = "PDFX_MIN_FILE_SIZE", default_value_t = 1024)]
    min_file_size: usize,

    /// Minimum accepted image width in pixels.
    #[arg(long, env = "PDFX_MIN_WIDTH", default_value_t = 50)]
    min_width: u32,

    /// Minimum accepted image height in pixels.
    #[arg(long, env = "PDFX_MIN_HEIGHT", default_value_t = 50)]
    min_height: u32,

    /// Drop blank spacers, icons and decorative banners from the figures.
    #[arg(long, env = "PDFX_FILTER")]
    filter: bool,

    /// Analyse every figure and report what the filter would drop, keeping all.
    #[arg(long, env = "PDFX_FILTER_DIAGNOSTIC")]
    filter_diagnostic: bool,

    /// Accepted colour modes, comma separated (L, LA, RGB, RGBA, …).
    #[arg(long, env = "PDFX_ALLOWED_MODES", value_delimiter = ',', default_value = "L,RGB,RGBA")]
    allowed_modes: Vec<ColorMode>,

    /// Strategy order, comma separated
    /// (standard, alternate_colorspace, processed, page_render).
    #[arg(
        long,
        env = "PDFX_STRATEGIES",
        value_delimiter = ',',
        default_value = "standard,alternate_colorspace,processed,page_render"
    )]
    strategies: Vec<StrategyKind>,

    /// Page-render fallback DPI (72–400).
    #[arg(long, env = "PDFX_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Longest edge of a page render, in pixels.
    #[arg(long, env = "PDFX_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Documents processed at the same time.
    #[arg(short, long, env = "PDFX_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Stop starting new work after this many seconds.
    #[arg(long, env = "PDFX_BATCH_TIMEOUT")]
    batch_timeout: Option<u64>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFX_PASSWORD")]
    password: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-nano).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDFX_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PDFX_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Retries per page on LLM failure.
    #[arg(long, env = "PDFX_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, env = "PDFX_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDFX_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "PDFX_SEPARATOR", default_value = "none")]
    separator: String,

    /// Prepend YAML front-matter with document metadata.
    #[arg(long, env = "PDFX_METADATA")]
    metadata: bool,

    /// Skip writing extraction-report.{md,json}.
    #[arg(long, env = "PDFX_NO_REPORT")]
    no_report: bool,

    /// Print the result (document output or run summary) as JSON.
    #[arg(long, env = "PDFX_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFX_NO_PROGRESS")]
    no_progress: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDFX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFX_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        for input in &cli.inputs {
            let meta = inspect(input, cli.password.as_deref())
                .await
                .with_context(|| format!("Failed to inspect {}", input))?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&meta).context("Failed to serialise metadata")?
                );
                continue;
            }
            println!("File:         {}", input);
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            println!("Pages:        {}", meta.page_count);
            println!("Images:       {}", meta.image_count());
            println!("PDF Version:  {}", meta.pdf_version);
            for (i, n) in meta.images_per_page.iter().enumerate().filter(|(_, n)| **n > 0) {
                println!("  page {:>4}: {} images", i + 1, n);
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress.clone().map(|p| p as ProgressCallback),
    )
    .await?;

    // ── Run ──────────────────────────────────────────────────────────────
    let single_dir = cli.inputs.len() == 1 && Path::new(&cli.inputs[0]).is_dir();
    let result = if single_dir {
        convert_directory(&cli.inputs[0], &cli.output, &config, cli.extract_only)
            .await
            .map(Outcome::Batch)
    } else if cli.inputs.len() == 1 {
        let input = &cli.inputs[0];
        let output = if cli.extract_only {
            extract_images(input, &cli.output, &config).await
        } else {
            convert(input, &cli.output, &config).await
        };
        output.map(|o| Outcome::Single(Box::new(o)))
    } else {
        convert_batch(cli.inputs.clone(), &cli.output, &config, cli.extract_only)
            .await
            .map(Outcome::Batch)
    };

    if let Some(p) = &progress {
        p.finish();
    }
    let outcome = result.context("Extraction failed")?;

    match outcome {
        Outcome::Single(output) => print_document(&cli, &output)?,
        Outcome::Batch(summary) => {
            print_summary(&cli, &summary)?;
            if summary.totals.unreadable > 0 {
                anyhow::bail!(
                    "{} of {} documents could not be processed",
                    summary.totals.unreadable,
                    summary.totals.documents
                );
            }
        }
    }

    Ok(())
}

enum Outcome {
    Single(Box<DocumentOutput>),
    Batch(RunSummary),
}

fn print_document(cli: &Cli, output: &DocumentOutput) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    let report = &output.report;
    let mark = if report.failed == 0 { green("✔") } else { red("⚠") };
    eprintln!(
        "{}  {}/{} images extracted  {} rejected  {}ms",
        mark,
        report.succeeded,
        report.identified,
        report.failed,
        output.stats.total_duration_ms,
    );
    eprintln!("   figures  →  {}", bold(&output.asset_dir.display().to_string()));
    if let Some(stats) = &report.filter {
        eprintln!(
            "   {} figures filtered, {} flagged as not relevant",
            stats.filtered, stats.flagged
        );
    }
    if let Some(md) = &output.markdown_path {
        eprintln!("   markdown →  {}", bold(&md.display().to_string()));
    }
    if output.stats.fallback_pages > 0 {
        eprintln!(
            "   {} pages fell back to raw text",
            red(&output.stats.fallback_pages.to_string())
        );
    }
    if !output.references.is_consistent() {
        eprintln!(
            "   {} image references inconsistent (see warning in markdown)",
            red("⚠")
        );
    }
    for e in &report.errors {
        eprintln!("   {}", dim(e));
    }
    Ok(())
}

fn print_summary(cli: &Cli, summary: &RunSummary) -> Result<()> {
    if cli.json {
        let json =
            serde_json::to_string_pretty(summary).context("Failed to serialise run summary")?;
        println!("{json}");
    } else if !cli.quiet {
        println!("{}", render_summary_markdown(summary));
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ExtractionConfig::builder()
        .min_file_size(cli.min_file_size)
        .min_dimensions(cli.min_width, cli.min_height)
        .allowed_modes(cli.allowed_modes.clone())
        .strategies(cli.strategies.clone())
        .dpi(cli.dpi)
        .max_rendered_pixels(cli.max_pixels)
        .restructure(!cli.no_restructure)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .page_separator(parse_separator(&cli.separator))
        .include_metadata(cli.metadata)
        .write_report(!cli.no_report)
        .download_timeout_secs(cli.download_timeout);

    if cli.filter || cli.filter_diagnostic {
        builder = builder.relevance(RelevanceConfig {
            diagnostic: cli.filter_diagnostic,
            ..RelevanceConfig::default()
        });
    }
    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(secs) = cli.batch_timeout {
        builder = builder.batch_timeout_secs(secs);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["pdfx"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_library_defaults() {
        let cli = parse(&["doc.pdf"]);
        assert_eq!(cli.inputs, vec!["doc.pdf".to_string()]);
        assert_eq!(cli.min_file_size, 1024);
        assert_eq!((cli.min_width, cli.min_height), (50, 50));
        assert_eq!(
            cli.allowed_modes,
            vec![ColorMode::L, ColorMode::RGB, ColorMode::RGBA]
        );
        assert_eq!(cli.strategies, StrategyKind::DEFAULT_ORDER.to_vec());
        assert_eq!(cli.dpi, 150);
    }

    #[test]
    fn lists_are_comma_separated() {
        let cli = parse(&[
            "--allowed-modes",
            "rgb,la",
            "--strategies",
            "render,standard",
            "a.pdf",
            "b.pdf",
        ]);
        assert_eq!(cli.allowed_modes, vec![ColorMode::RGB, ColorMode::LA]);
        assert_eq!(
            cli.strategies,
            vec![StrategyKind::PageRender, StrategyKind::Standard]
        );
        assert_eq!(cli.inputs.len(), 2);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(Cli::try_parse_from(["pdfx", "--strategies", "magic", "a.pdf"]).is_err());
    }

    #[test]
    fn dpi_out_of_range_is_rejected() {
        assert!(Cli::try_parse_from(["pdfx", "--dpi", "20", "a.pdf"]).is_err());
    }

    #[test]
    fn separators() {
        assert!(matches!(parse_separator("HR"), PageSeparator::HorizontalRule));
        assert!(matches!(parse_separator("comment"), PageSeparator::Comment));
        assert!(matches!(parse_separator("none"), PageSeparator::None));
        match parse_separator("<hr/>") {
            PageSeparator::Custom(s) => assert_eq!(s, "<hr/>"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn config_from_flags() {
        let cli = parse(&[
            "--min-file-size",
            "200",
            "--no-restructure",
            "--batch-timeout",
            "30",
            "--concurrency",
            "2",
            "doc.pdf",
        ]);
        let config = build_config(&cli, None).await.unwrap();
        assert_eq!(config.validation.min_file_size, 200);
        assert!(!config.restructure);
        assert_eq!(config.batch_timeout_secs, Some(30));
        assert_eq!(config.concurrency, 2);
        assert!(config.relevance.is_none());
    }

    #[tokio::test]
    async fn diagnostic_filter_implies_filter() {
        let cli = parse(&["--filter-diagnostic", "doc.pdf"]);
        let config = build_config(&cli, None).await.unwrap();
        assert_eq!(config.relevance.map(|r| r.diagnostic), Some(true));
    }
}
