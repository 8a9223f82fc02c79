//! CLI binary for edgequake-pdfbatch.
//!
//! A thin shim over [`BatchOrchestrator`]: maps flags and a JSON config file
//! to `DocumentConfig` + `BatchOptions`, renders progress, prints the summary
//! and turns the outcome into an exit code.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdfbatch::{
    BatchError, BatchOptions, BatchOrchestrator, BatchProgressCallback, DocumentConfig,
    ImageExportMode, OcrEngineKind, OutputTarget, PageSeparator, Partitioning, PdfBackend,
    ProcessingResult, TableMode,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the whole batch plus a ✓/✗ line per document.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Discovering");
        bar.set_message("Scanning input directory…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn truncate(msg: &str, max: usize) -> String {
    if msg.chars().count() > max {
        let head: String = msg.chars().take(max - 1).collect();
        format!("{head}\u{2026}")
    } else {
        msg.to_string()
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize, workers: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>4}/{len} docs  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_documents as u64);
        self.bar.set_prefix("Processing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "{total_documents} documents across {workers} workers"
            ))
        ));
    }

    fn on_document_start(&self, worker: usize, path: &Path) {
        self.bar.set_message(format!(
            "w{worker} {}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
    }

    fn on_document_complete(&self, result: &ProcessingResult) {
        let meta = result.metadata();
        if result.success() {
            self.bar.println(format!(
                "  {} {:<40}  {}",
                green("✓"),
                truncate(&file_name(result.file_path()), 40),
                dim(&format!(
                    "{:>3} pages  {:>7} chars",
                    meta.num_pages,
                    result.content().len()
                )),
            ));
        } else {
            self.bar.println(format!(
                "  {} {:<40}  {}",
                red("✗"),
                truncate(&file_name(result.file_path()), 40),
                red(&truncate(result.error_message().unwrap_or("failed"), 80)),
            ));
        }
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total: usize, _succeeded: usize, _failed: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every PDF in a directory (Markdown, JSON and metadata per file)
  pdfbatch --input-dir corpus/ --output-dir out/

  # Recurse into sub-directories with 8 workers, round-robin partitions
  pdfbatch -i corpus/ -o out/ --recursive --workers 8 --partitioning round-robin

  # Only the aggregated JSONL report
  pdfbatch -i corpus/ --output-file results.jsonl

  # OCR scanned pages with tesseract (German + English)
  pdfbatch -i scans/ -o out/ --ocr --ocr-languages deu+eng

  # Settings from a JSON file, with per-run overrides
  pdfbatch -i corpus/ -o out/ --config pdfbatch.json --set max_pages=20 --set table_mode=fast

  # Stop dispatching after an hour; unfinished documents are reported as abandoned
  pdfbatch -i corpus/ -o out/ --deadline 3600

OUTPUT (directory mode):
  out/results.jsonl              one ProcessingResult per line, sorted by path
  out/summary.json               counters and failure list
  out/<rel>/<stem>.md            Markdown
  out/<rel>/<stem>.json          structured JSON
  out/<rel>/<stem>_metadata.json metadata
  out/<rel>/<stem>_artifacts/    pictures (image_export_mode = referenced)

EXIT CODES:
  0  batch finished (individual documents may have failed; see the report)
  1  output could not be written
  2  invalid configuration or unreadable input directory
  3  a worker died; the partial report lists abandoned documents

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH     Path to an existing libpdfium
  TESSERACT_CMD       tesseract binary (default: tesseract on PATH)
  OPENAI_API_KEY      API key for the vlm OCR engine and picture descriptions
  RUST_LOG            Override the log filter (e.g. edgequake_pdfbatch=debug)
"#;

/// Convert directories of PDF documents to Markdown and JSON.
#[derive(Parser, Debug)]
#[command(
    name = "pdfbatch",
    version,
    about = "Convert directories of PDF documents to Markdown and JSON",
    long_about = "Convert every PDF in a directory to Markdown, structured JSON and metadata. \
Documents are split across parallel workers; each one runs with its own time budget and \
failures are recorded in the report instead of stopping the batch.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory containing the PDF files.
    #[arg(short, long, env = "PDFBATCH_INPUT_DIR")]
    input_dir: PathBuf,

    /// Write per-document files, results.jsonl and summary.json here.
    #[arg(short, long, env = "PDFBATCH_OUTPUT_DIR", conflicts_with = "output_file")]
    output_dir: Option<PathBuf>,

    /// Write only the aggregated JSONL report to this file.
    #[arg(long, env = "PDFBATCH_OUTPUT_FILE")]
    output_file: Option<PathBuf>,

    /// JSON file with document settings (unknown keys are rejected).
    #[arg(short, long, env = "PDFBATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Override one document setting: key=value. Repeatable; applied last.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Descend into sub-directories.
    #[arg(short, long, env = "PDFBATCH_RECURSIVE")]
    recursive: bool,

    /// Number of workers (default: num_threads from the config).
    #[arg(short, long, env = "PDFBATCH_WORKERS",
          value_parser = clap::value_parser!(u64).range(1..=1024))]
    workers: Option<u64>,

    /// Partitioning policy: contiguous or round-robin.
    #[arg(long, env = "PDFBATCH_PARTITIONING", default_value = "contiguous")]
    partitioning: Partitioning,

    /// Batch deadline in seconds.
    #[arg(long, env = "PDFBATCH_DEADLINE")]
    deadline: Option<u64>,

    /// Skip per-document .md/.json/_metadata.json files in directory mode.
    #[arg(long, env = "PDFBATCH_NO_SIDE_FILES")]
    no_side_files: bool,

    /// Enable OCR for image-only pages.
    #[arg(long, env = "PDFBATCH_OCR")]
    ocr: bool,

    /// OCR every page, ignoring the text layer.
    #[arg(long, env = "PDFBATCH_FORCE_OCR")]
    force_ocr: bool,

    /// OCR engine: tesseract or vlm.
    #[arg(long, env = "PDFBATCH_OCR_ENGINE")]
    ocr_engine: Option<OcrEngineKind>,

    /// Tesseract language codes joined by '+'.
    #[arg(long, env = "PDFBATCH_OCR_LANGUAGES")]
    ocr_languages: Option<String>,

    /// PDF backend: pdfium or pdfium_text.
    #[arg(long, env = "PDFBATCH_PDF_BACKEND")]
    pdf_backend: Option<PdfBackend>,

    /// Process at most this many pages per document.
    #[arg(long, env = "PDFBATCH_MAX_PAGES")]
    max_pages: Option<usize>,

    /// Pictures: embedded, placeholder or referenced.
    #[arg(long, env = "PDFBATCH_IMAGE_MODE")]
    image_mode: Option<ImageExportMode>,

    /// Table detection: accurate or fast.
    #[arg(long, env = "PDFBATCH_TABLE_MODE")]
    table_mode: Option<TableMode>,

    /// Per-document timeout in seconds.
    #[arg(long, env = "PDFBATCH_TIMEOUT")]
    timeout: Option<u64>,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "PDFBATCH_SEPARATOR")]
    separator: Option<String>,

    /// Password tried on encrypted documents.
    #[arg(long, env = "PDFBATCH_PASSWORD")]
    password: Option<String>,

    /// Disable the progress bar.
    #[arg(long, env = "PDFBATCH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFBATCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFBATCH_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
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

    match run(&cli, show_progress).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", red("error:"), e);
            ExitCode::from(exit_code(e.downcast_ref::<BatchError>()))
        }
    }
}

async fn run(cli: &Cli, show_progress: bool) -> Result<ExitCode> {
    let config = build_config(cli).await?;
    let options = build_options(cli)?;

    let mut orchestrator = BatchOrchestrator::new(config, options);
    if show_progress {
        orchestrator = orchestrator.with_progress(CliProgressCallback::new());
    }

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let report = orchestrator.run_until(shutdown).await?;
    let summary = report.summary();

    if !cli.quiet {
        let mark = if summary.failed == 0 {
            green("✔")
        } else if summary.succeeded == 0 && summary.total > 0 {
            red("✘")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{}  {}/{} documents  {}ms  →  {}",
            mark,
            summary.succeeded,
            summary.total,
            summary.duration_ms,
            bold(&summary.report),
        );
        if summary.failed > 0 {
            eprintln!(
                "   {} failed ({} abandoned)",
                red(&summary.failed.to_string()),
                dim(&summary.abandoned.to_string()),
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn exit_code(error: Option<&BatchError>) -> u8 {
    match error {
        Some(BatchError::Config(_))
        | Some(BatchError::InputDirMissing { .. })
        | Some(BatchError::InputDirUnreadable { .. }) => 2,
        Some(BatchError::WorkerFatal { .. }) => 3,
        // Config files and overrides fail before the batch exists.
        None => 2,
        Some(BatchError::OutputWriteFailed { .. }) => 1,
    }
}

/// Config file first, then flags, then `--set` overrides.
async fn build_config(cli: &Cli) -> Result<DocumentConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            DocumentConfig::from_json_str(&text)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => DocumentConfig::default(),
    };

    if cli.ocr || cli.force_ocr {
        config.ocr_enabled = true;
    }
    if cli.force_ocr {
        config.force_ocr = true;
    }
    if let Some(engine) = cli.ocr_engine {
        config.ocr_engine = Some(engine);
    }
    if let Some(ref langs) = cli.ocr_languages {
        config.ocr_languages = langs.clone();
    }
    if let Some(backend) = cli.pdf_backend {
        config.pdf_backend = backend;
    }
    if cli.max_pages.is_some() {
        config.max_pages = cli.max_pages;
    }
    if let Some(mode) = cli.image_mode {
        config.image_export_mode = mode;
    }
    if let Some(mode) = cli.table_mode {
        config.table_mode = mode;
    }
    if let Some(secs) = cli.timeout {
        config.timeout_per_document = secs;
    }
    if let Some(ref sep) = cli.separator {
        config.page_separator = parse_separator(sep);
    }
    if cli.password.is_some() {
        config.password = cli.password.clone();
    }

    let overrides = cli
        .overrides
        .iter()
        .map(|kv| {
            kv.split_once('=')
                .with_context(|| format!("Override '{kv}' is not of the form key=value"))
        })
        .collect::<Result<Vec<_>>>()?;
    let config = config
        .with_overrides(overrides)
        .context("Invalid configuration")?;
    Ok(config)
}

fn build_options(cli: &Cli) -> Result<BatchOptions> {
    let output = match (&cli.output_dir, &cli.output_file) {
        (Some(dir), None) => OutputTarget::Directory(dir.clone()),
        (None, Some(file)) => OutputTarget::File(file.clone()),
        (None, None) => anyhow::bail!("One of --output-dir or --output-file is required"),
        (Some(_), Some(_)) => anyhow::bail!("--output-dir and --output-file are exclusive"),
    };

    let mut options = BatchOptions::new(&cli.input_dir, output)
        .recursive(cli.recursive)
        .partitioning(cli.partitioning)
        .write_side_files(!cli.no_side_files);
    if let Some(n) = cli.workers {
        options = options.workers(n as usize);
    }
    if let Some(secs) = cli.deadline {
        options = options.batch_deadline(Duration::from_secs(secs));
    }
    Ok(options)
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
