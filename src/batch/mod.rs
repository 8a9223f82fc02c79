//! BatchOrchestrator: discovery, partitioning, dispatch and aggregation.
//!
//! ```text
//!  discover ──▶ partition ──▶ build one processor per partition
//!                                    │
//!        ┌───────────────┬───────────┴───────────┐
//!     worker 0        worker 1     …          worker N-1   (tokio tasks,
//!        │               │                        │         sequential within)
//!        └──── mpsc ─────┴────────────────────────┘
//!                        │
//!                  orchestrator ──▶ ReportWriter (single writer)
//! ```
//!
//! Workers share nothing but the read-only config and their slice of the
//! file listing. Each owns its processor and sends finished results over a
//! channel; the orchestrator alone writes the report.
//!
//! Every discovered file ends up in the report exactly once. Documents the
//! batch never finished (deadline, external cancellation, a dead worker) are
//! recorded as failed `abandoned` entries.

pub mod report;

pub use report::{BatchReport, BatchSummary, FailureSummary, ReportWriter, SideFileNames};

use crate::config::DocumentConfig;
use crate::error::{BatchError, ProcessError};
use crate::factory::ProcessorFactory;
use crate::output::{ProcessingResult, ResultMetadata};
use crate::pipeline::input::has_pdf_extension;
use crate::processor::DocumentProcessor;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReadDirStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

// ── Options ──────────────────────────────────────────────────────────────

/// Where the aggregated output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// `results.jsonl`, side files and `summary.json` under this directory.
    Directory(PathBuf),
    /// The JSONL report only, at this path.
    File(PathBuf),
}

/// How discovered files are split across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Partitioning {
    /// Consecutive runs of the sorted listing.
    #[default]
    Contiguous,
    /// File `i` goes to worker `i % workers`.
    RoundRobin,
}

impl Partitioning {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partitioning::Contiguous => "contiguous",
            Partitioning::RoundRobin => "round_robin",
        }
    }
}

impl fmt::Display for Partitioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partitioning {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "contiguous" => Ok(Partitioning::Contiguous),
            "round_robin" => Ok(Partitioning::RoundRobin),
            other => Err(format!(
                "unknown partitioning '{other}' (expected contiguous or round_robin)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input_dir: PathBuf,
    pub output: OutputTarget,
    /// Descend into sub-directories. Default: false.
    pub recursive: bool,
    /// Worker count. `None` uses the config's `num_threads`.
    pub workers: Option<usize>,
    pub partitioning: Partitioning,
    /// Stop dispatching and abandon unfinished documents after this long.
    pub batch_deadline: Option<Duration>,
    /// Write `<stem>.md`, `<stem>.json` and `<stem>_metadata.json` next to the
    /// report (directory output only). Default: true.
    pub write_side_files: bool,
}

impl BatchOptions {
    pub fn new(input_dir: impl Into<PathBuf>, output: OutputTarget) -> Self {
        Self {
            input_dir: input_dir.into(),
            output,
            recursive: false,
            workers: None,
            partitioning: Partitioning::default(),
            batch_deadline: None,
            write_side_files: true,
        }
    }

    pub fn recursive(mut self, v: bool) -> Self {
        self.recursive = v;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = Some(n);
        self
    }

    pub fn partitioning(mut self, p: Partitioning) -> Self {
        self.partitioning = p;
        self
    }

    pub fn batch_deadline(mut self, d: Duration) -> Self {
        self.batch_deadline = Some(d);
        self
    }

    pub fn write_side_files(mut self, v: bool) -> Self {
        self.write_side_files = v;
        self
    }
}

// ── Discovery & partitioning ─────────────────────────────────────────────

/// List the `.pdf` files under `input_dir`, sorted by path.
pub async fn discover(input_dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, BatchError> {
    let is_dir = tokio::fs::metadata(input_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(BatchError::InputDirMissing {
            path: input_dir.to_path_buf(),
        });
    }

    let unreadable = |path: &Path, source| BatchError::InputDirUnreadable {
        path: path.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    let mut pending = vec![input_dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| unreadable(&dir, e))?;
        let mut entries = ReadDirStream::new(read_dir);
        while let Some(entry) = entries.next().await {
            let entry = entry.map_err(|e| unreadable(&dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(|e| unreadable(&path, e))?;
            if file_type.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else if has_pdf_extension(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    debug!("Discovered {} PDFs under {}", files.len(), input_dir.display());
    Ok(files)
}

/// Split `files` into at most `workers` non-empty partitions.
///
/// Pure: the same listing always yields the same partitions, so an external
/// scheduler re-running partition `k` reprocesses the same files.
pub fn partition(files: &[PathBuf], workers: usize, policy: Partitioning) -> Vec<Vec<PathBuf>> {
    if files.is_empty() {
        return Vec::new();
    }
    let workers = workers.clamp(1, files.len());
    match policy {
        Partitioning::Contiguous => files
            .chunks(files.len().div_ceil(workers))
            .map(<[PathBuf]>::to_vec)
            .collect(),
        Partitioning::RoundRobin => {
            let mut parts = vec![Vec::new(); workers];
            for (i, f) in files.iter().enumerate() {
                parts[i % workers].push(f.clone());
            }
            parts
        }
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────

enum WorkerEvent {
    Started { worker: usize, path: PathBuf },
    Finished { result: Box<ProcessingResult> },
}

/// Why dispatch stopped early.
enum Interrupt {
    Deadline,
    Cancelled,
}

impl Interrupt {
    fn reason(&self) -> &'static str {
        match self {
            Interrupt::Deadline => "batch deadline reached",
            Interrupt::Cancelled => "batch cancelled",
        }
    }
}

pub struct BatchOrchestrator {
    config: DocumentConfig,
    options: BatchOptions,
    factory: ProcessorFactory,
    progress: ProgressCallback,
}

impl BatchOrchestrator {
    pub fn new(config: DocumentConfig, options: BatchOptions) -> Self {
        Self {
            config,
            options,
            factory: ProcessorFactory::new(),
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Build worker processors with this factory (injected backends).
    pub fn with_factory(mut self, factory: ProcessorFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Run the batch to completion (or to its deadline).
    pub async fn run(&self) -> Result<BatchReport, BatchError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run the batch, abandoning unfinished documents when `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<BatchReport, BatchError>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        self.config.validate()?;

        let files = discover(&self.options.input_dir, self.options.recursive).await?;
        let workers = self
            .options
            .workers
            .unwrap_or(self.config.num_threads)
            .max(1);
        let partitions = partition(&files, workers, self.options.partitioning);

        // Every processor is built before the first document is dispatched.
        // An empty batch still builds one so backend problems surface.
        let mut processors = Vec::with_capacity(partitions.len().max(1));
        for _ in 0..partitions.len().max(1) {
            processors.push(self.factory.create(&self.config)?);
        }
        if partitions.is_empty() {
            processors.clear();
        }

        let reserved: &[&str] = match self.options.output {
            OutputTarget::Directory(_) => &[report::SUMMARY_FILE_NAME],
            OutputTarget::File(_) => &[],
        };
        let names = Arc::new(SideFileNames::plan(&files, &self.options.input_dir, reserved));

        let mut writer =
            ReportWriter::create(&self.options.output, &self.options.input_dir, self.options.write_side_files)
                .await?
                .with_side_file_names(SideFileNames::clone(&names));
        let mut report = BatchReport::new(partitions.len(), writer.report_path().to_path_buf());

        info!(
            "Batch start: {} documents, {} workers ({}), input {}",
            files.len(),
            partitions.len(),
            self.options.partitioning,
            self.options.input_dir.display()
        );
        self.progress.on_batch_start(files.len(), partitions.len());

        let (tx, mut rx) = mpsc::channel::<WorkerEvent>(partitions.len().max(1) * 2);
        let handles: Vec<JoinHandle<()>> = processors
            .into_iter()
            .zip(partitions)
            .enumerate()
            .map(|(worker, (processor, files))| {
                tokio::spawn(run_worker(worker, processor, files, Arc::clone(&names), tx.clone()))
            })
            .collect();
        drop(tx);

        let deadline = self.options.batch_deadline;
        let deadline_timer = async move {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_timer);
        tokio::pin!(shutdown);

        let interrupt = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break Some(Interrupt::Cancelled),
                _ = &mut deadline_timer => break Some(Interrupt::Deadline),
                event = rx.recv() => match event {
                    Some(WorkerEvent::Started { worker, path }) => {
                        self.progress.on_document_start(worker, &path);
                    }
                    Some(WorkerEvent::Finished { result }) => {
                        writer.append(&result).await?;
                        self.progress.on_document_complete(&result);
                        report.insert(*result);
                    }
                    None => break None,
                },
            }
        };

        if let Some(interrupt) = &interrupt {
            warn!(
                "{}: abandoning {} unfinished documents",
                interrupt.reason(),
                files.len() - report.len()
            );
            for handle in &handles {
                handle.abort();
            }
        }

        // Results already queued when dispatch stopped still count.
        while let Ok(event) = rx.try_recv() {
            if let WorkerEvent::Finished { result } = event {
                writer.append(&result).await?;
                self.progress.on_document_complete(&result);
                report.insert(*result);
            }
        }

        // A worker that ended without finishing its partition died.
        let mut fatal: Option<(usize, String)> = None;
        for (worker, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    let detail = panic_detail(e);
                    error!("Worker {} died: {}", worker, detail);
                    fatal.get_or_insert((worker, detail));
                }
            }
        }

        let reason = match (&interrupt, &fatal) {
            (Some(i), _) => i.reason().to_string(),
            (None, Some((worker, _))) => format!("worker {worker} died"),
            (None, None) => "batch ended before the document was processed".to_string(),
        };
        self.abandon_missing(&files, &reason, &mut writer, &mut report)
            .await?;

        report.set_elapsed(started.elapsed());
        writer.finish(&report).await?;

        info!(
            "Batch complete: {} documents, {} succeeded, {} failed ({} abandoned) in {}ms",
            report.len(),
            report.succeeded(),
            report.failed(),
            report.abandoned(),
            started.elapsed().as_millis()
        );
        self.progress
            .on_batch_complete(report.len(), report.succeeded(), report.failed());

        match fatal {
            Some((worker, detail)) => Err(BatchError::WorkerFatal {
                worker,
                detail,
                report: report.report_path().to_path_buf(),
            }),
            None => Ok(report),
        }
    }

    async fn abandon_missing(
        &self,
        files: &[PathBuf],
        reason: &str,
        writer: &mut ReportWriter,
        report: &mut BatchReport,
    ) -> Result<(), BatchError> {
        let missing: Vec<&PathBuf> = files.iter().filter(|f| !report.contains(f)).collect();
        if missing.is_empty() {
            return Ok(());
        }
        let error = ProcessError::Abandoned {
            reason: reason.to_string(),
        };
        for path in missing {
            let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
            let result = ProcessingResult::failed(path, &error, ResultMetadata::for_file(path, size));
            writer.append(&result).await?;
            self.progress.on_document_complete(&result);
            report.insert_abandoned(result);
        }
        Ok(())
    }
}

async fn run_worker(
    worker: usize,
    processor: DocumentProcessor,
    files: Vec<PathBuf>,
    names: Arc<SideFileNames>,
    tx: mpsc::Sender<WorkerEvent>,
) {
    debug!("Worker {} starting with {} documents", worker, files.len());
    for path in files {
        let started = WorkerEvent::Started {
            worker,
            path: path.clone(),
        };
        if tx.send(started).await.is_err() {
            return;
        }
        #[cfg(test)]
        if path.file_name().is_some_and(|n| n == tests::KILLS_WORKER) {
            panic!("worker killed by fixture");
        }
        let result = match names.stem_for(&path) {
            Some(stem) => processor.process_with_stem(&path, stem).await,
            None => processor.process(&path).await,
        };
        let finished = WorkerEvent::Finished {
            result: Box::new(result),
        };
        if tx.send(finished).await.is_err() {
            return;
        }
    }
    debug!("Worker {} finished", worker);
}

fn panic_detail(e: tokio::task::JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let panic = e.into_panic();
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CancelFlag, PageText, ParseOptions, PdfParser, RawDocument, RawPage};
    use crate::document::PdfInfo;
    use crate::error::ExtractionError;
    use image::DynamicImage;
    use tempfile::TempDir;

    /// A worker panics outside the document pipeline when it reaches this file.
    pub(super) const KILLS_WORKER: &str = "kills-worker.pdf";

    /// The file body between the PDF envelope lines is one page of text.
    struct OnePageParser;

    impl PdfParser for OnePageParser {
        fn name(&self) -> &str {
            "one_page"
        }

        fn parse(
            &self,
            path: &Path,
            _options: &ParseOptions,
            _cancel: &CancelFlag,
        ) -> Result<RawDocument, ExtractionError> {
            let body = std::fs::read_to_string(path).map_err(|e| ExtractionError::Io {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
            let text: Vec<&str> = body.lines().filter(|l| !l.starts_with('%')).collect();
            Ok(RawDocument {
                total_pages: 1,
                info: PdfInfo::default(),
                pages: vec![RawPage {
                    index: 0,
                    width: 612.0,
                    height: 792.0,
                    text: PageText::Plain(text.join("\n")),
                    images: vec![],
                    warnings: vec![],
                }],
            })
        }

        fn rasterise(
            &self,
            _path: &Path,
            _pages: &[usize],
            _max_pixels: u32,
            _password: Option<&str>,
        ) -> Result<Vec<(usize, DynamicImage)>, ExtractionError> {
            Ok(vec![])
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn contiguous_chunks_keep_order() {
        let files = paths(&["a", "b", "c", "d", "e"]);
        let parts = partition(&files, 2, Partitioning::Contiguous);
        assert_eq!(parts, vec![paths(&["a", "b", "c"]), paths(&["d", "e"])]);
    }

    #[test]
    fn round_robin_interleaves() {
        let files = paths(&["a", "b", "c", "d", "e"]);
        let parts = partition(&files, 2, Partitioning::RoundRobin);
        assert_eq!(parts, vec![paths(&["a", "c", "e"]), paths(&["b", "d"])]);
    }

    #[test]
    fn partitions_are_never_empty() {
        let files = paths(&["a", "b"]);
        assert_eq!(partition(&files, 8, Partitioning::RoundRobin).len(), 2);
        assert_eq!(partition(&files, 8, Partitioning::Contiguous).len(), 2);
        assert!(partition(&[], 4, Partitioning::Contiguous).is_empty());
        assert_eq!(partition(&files, 0, Partitioning::Contiguous), vec![files.clone()]);
    }

    #[test]
    fn partitioning_is_deterministic() {
        let files: Vec<PathBuf> = (0..17).map(|i| PathBuf::from(format!("{i:02}.pdf"))).collect();
        for policy in [Partitioning::Contiguous, Partitioning::RoundRobin] {
            let a = partition(&files, 4, policy);
            assert_eq!(a, partition(&files, 4, policy));
            let total: usize = a.iter().map(Vec::len).sum();
            assert_eq!(total, files.len());
        }
    }

    #[test]
    fn partitioning_names() {
        assert_eq!("round-robin".parse::<Partitioning>(), Ok(Partitioning::RoundRobin));
        assert_eq!("Contiguous".parse::<Partitioning>(), Ok(Partitioning::Contiguous));
        assert!("random".parse::<Partitioning>().is_err());
    }

    #[tokio::test]
    async fn discovery_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.pdf", "a.PDF", "notes.txt", "c.pdf.bak"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/d.pdf"), b"x").unwrap();

        let flat = discover(dir.path(), false).await.unwrap();
        assert_eq!(flat, vec![dir.path().join("a.PDF"), dir.path().join("b.pdf")]);

        let deep = discover(dir.path(), true).await.unwrap();
        assert_eq!(deep.len(), 3);
        assert_eq!(deep[2], dir.path().join("sub/d.pdf"));
    }

    #[tokio::test]
    async fn missing_input_dir() {
        let err = discover(Path::new("/nonexistent/input"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::InputDirMissing { .. }));
    }

    #[tokio::test]
    async fn dead_worker_leaves_a_complete_report() {
        let input = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        for name in ["a.pdf", KILLS_WORKER, "m.pdf", "z.pdf"] {
            std::fs::write(input.path().join(name), "%PDF-1.7\nText.\n%%EOF\n").unwrap();
        }

        let options = BatchOptions::new(input.path(), OutputTarget::Directory(out.path().into()))
            .workers(2)
            .partitioning(Partitioning::Contiguous);
        let err = BatchOrchestrator::new(DocumentConfig::default(), options)
            .with_factory(ProcessorFactory::new().with_parser(Arc::new(OnePageParser)))
            .run()
            .await
            .unwrap_err();

        let report_path = out.path().join(report::REPORT_FILE_NAME);
        match &err {
            BatchError::WorkerFatal {
                worker,
                detail,
                report,
            } => {
                assert_eq!(*worker, 0);
                assert!(detail.contains("worker killed by fixture"), "got: {detail}");
                assert_eq!(report, &report_path);
            }
            other => panic!("expected WorkerFatal, got {other:?}"),
        }

        let lines: Vec<serde_json::Value> = std::fs::read_to_string(&report_path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        let status = |name: &str| {
            lines
                .iter()
                .find(|v| v["file_path"].as_str().unwrap().ends_with(name))
                .map(|v| (v["success"].as_bool().unwrap(), v["error_message"].clone()))
                .unwrap()
        };
        // Worker 0 had [a, kills-worker]; worker 1 had [m, z].
        assert!(status("/a.pdf").0);
        assert!(status("/m.pdf").0);
        assert!(status("/z.pdf").0);
        let (ok, error) = status(KILLS_WORKER);
        assert!(!ok);
        assert_eq!(error, "abandoned: worker 0 died");
        assert!(!out.path().join("results.jsonl.partial").exists());
    }
}
