//! DocumentProcessor: the per-document state machine and isolation boundary.
//!
//! ```text
//! Idle ─▶ Loading ─▶ Extracting ─▶ Enriching ─▶ Serializing ─▶ Done
//!            │           │                          │
//!            └───────────┴──────────────────────────┴──▶ Failed
//! ```
//!
//! [`DocumentProcessor::process`] never returns an error and never panics on
//! a document's behalf. Every failure, including the wall-clock timeout and
//! panics inside the pipeline, ends up in a failed [`ProcessingResult`]. The
//! batch layer relies on this.
//!
//! Enrichment cannot move the machine to `Failed`: stages degrade to
//! warnings inside [`EnrichmentChain::run`].

use crate::backend::{BackendHandle, CancelFlag};
use crate::config::DocumentConfig;
use crate::enrich::EnrichmentChain;
use crate::error::{ConfigError, ProcessError};
use crate::factory::ProcessorFactory;
use crate::output::{ProcessingResult, ResultMetadata};
use crate::pipeline::extract::PageExtractor;
use crate::pipeline::input;
use crate::serialize::{Rendered, Serializer};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProcessorState {
    Idle = 0,
    Loading = 1,
    Extracting = 2,
    Enriching = 3,
    Serializing = 4,
    Done = 5,
    Failed = 6,
}

impl ProcessorState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Loading,
            2 => Self::Extracting,
            3 => Self::Enriching,
            4 => Self::Serializing,
            5 => Self::Done,
            6 => Self::Failed,
            _ => Self::Idle,
        }
    }

    /// Gerund used in error messages (`timed out after 5s while extracting`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Extracting => "extracting",
            Self::Enriching => "enriching",
            Self::Serializing => "serializing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Converts documents with one fixed configuration and one set of backends.
///
/// Built by [`ProcessorFactory`]. A batch worker owns one processor and feeds
/// it its partition one document at a time; [`Self::state`] reports the
/// stage of the current (or last) document.
pub struct DocumentProcessor {
    config: DocumentConfig,
    handle: BackendHandle,
    extractor: PageExtractor,
    enrichment: EnrichmentChain,
    serializer: Serializer,
    state: AtomicU8,
}

impl DocumentProcessor {
    pub(crate) fn from_parts(
        config: DocumentConfig,
        handle: BackendHandle,
        extractor: PageExtractor,
        enrichment: EnrichmentChain,
        serializer: Serializer,
    ) -> Self {
        Self {
            config,
            handle,
            extractor,
            enrichment,
            serializer,
            state: AtomicU8::new(ProcessorState::Idle as u8),
        }
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.handle
    }

    /// Names of the enabled enrichment stages, in run order.
    pub fn enrichment_stages(&self) -> Vec<String> {
        self.enrichment.names()
    }

    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn enter(&self, next: ProcessorState, path: &Path) {
        let prev = self.state();
        self.state.store(next as u8, Ordering::SeqCst);
        debug!("{}: {} → {}", path.display(), prev.as_str(), next.as_str());
    }

    /// Convert one PDF. Never fails: errors are captured in the result.
    pub async fn process(&self, path: impl AsRef<Path>) -> ProcessingResult {
        let path = path.as_ref();
        self.process_as(path, path, None).await
    }

    /// Convert one PDF, naming its image artifacts after `output_stem`
    /// instead of the file stem. A batch uses this when two inputs in one
    /// directory would otherwise write the same side files.
    pub async fn process_with_stem(
        &self,
        path: impl AsRef<Path>,
        output_stem: &str,
    ) -> ProcessingResult {
        let path = path.as_ref();
        self.process_as(path, path, Some(output_stem)).await
    }

    /// Convert PDF bytes held in memory.
    ///
    /// The bytes go to a managed temporary directory under `name` (only its
    /// final component is used) and are removed on return. The result reports
    /// `name` as the file path.
    pub async fn process_bytes(&self, bytes: &[u8], name: &str) -> ProcessingResult {
        let file_name = Path::new(name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "document.pdf".into());
        let reported = PathBuf::from(name);

        let staged = async {
            let dir = tempfile::Builder::new().prefix("pdfbatch-").tempdir()?;
            let path = dir.path().join(&file_name);
            tokio::fs::write(&path, bytes).await?;
            Ok::<_, std::io::Error>((dir, path))
        }
        .await;

        match staged {
            // `_dir` is deleted when this arm ends.
            Ok((_dir, path)) => self.process_as(&path, &reported, None).await,
            Err(e) => {
                let err = ProcessError::Loading(crate::error::ExtractionError::Io {
                    path: reported.clone(),
                    detail: format!("could not stage bytes: {e}"),
                });
                self.enter(ProcessorState::Failed, &reported);
                warn!("✗ {}: {}", reported.display(), err);
                ProcessingResult::failed(
                    &reported,
                    &err,
                    ResultMetadata::for_file(&reported, bytes.len() as u64),
                )
            }
        }
    }

    /// Cheap pre-flight: would loading accept this file?
    pub async fn validate_file(&self, path: impl AsRef<Path>) -> bool {
        input::load_source(path.as_ref()).await.is_ok()
    }

    async fn process_as(
        &self,
        path: &Path,
        reported: &Path,
        output_stem: Option<&str>,
    ) -> ProcessingResult {
        let started = Instant::now();
        let cancel = CancelFlag::new();
        // Dropped with this future, whether it completes or its task is aborted.
        let _stop_blocking = cancel.cancel_on_drop();
        self.enter(ProcessorState::Idle, path);

        let pipeline = AssertUnwindSafe(self.run(path, output_stem, &cancel)).catch_unwind();
        let outcome = match tokio::time::timeout(self.config.timeout(), pipeline).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ProcessError::Panicked {
                stage: self.state().as_str().to_string(),
                detail: panic_message(panic.as_ref()),
            }),
            Err(_elapsed) => {
                // Stops the blocking parser at its next page boundary; the
                // dropped future has already killed any OCR child process.
                cancel.cancel();
                Err(ProcessError::Timeout {
                    secs: self.config.timeout_per_document,
                    stage: self.state().as_str().to_string(),
                })
            }
        };

        match outcome {
            Ok(mut rendered) => {
                self.enter(ProcessorState::Done, path);
                if reported != path {
                    rendered.metadata.file_path = reported.display().to_string();
                }
                info!(
                    "✓ {} ({} pages, {}ms)",
                    reported.display(),
                    rendered.metadata.num_pages,
                    started.elapsed().as_millis()
                );
                ProcessingResult::succeeded(reported, rendered)
            }
            Err(err) => {
                self.enter(ProcessorState::Failed, path);
                warn!("✗ {}: {}", reported.display(), err);
                let size = tokio::fs::metadata(path)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                ProcessingResult::failed(reported, &err, ResultMetadata::for_file(reported, size))
            }
        }
    }

    async fn run(
        &self,
        path: &Path,
        output_stem: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<Rendered, ProcessError> {
        self.enter(ProcessorState::Loading, path);
        let mut source = input::load_source(path)
            .await
            .map_err(ProcessError::Loading)?;
        if let Some(stem) = output_stem {
            source.output_stem = stem.to_string();
        }

        self.enter(ProcessorState::Extracting, path);
        let tree = self
            .extractor
            .extract(source, cancel)
            .await
            .map_err(ProcessError::Extraction)?;

        self.enter(ProcessorState::Enriching, path);
        let tree = self.enrichment.run(tree).await;

        self.enter(ProcessorState::Serializing, path);
        self.serializer
            .render(&tree)
            .map_err(|e| ProcessError::Serialization(e.to_string()))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Convert one PDF with a default [`ProcessorFactory`].
///
/// Backends are brought up for this call only; reuse a processor from
/// [`ProcessorFactory::create`] for more than one document.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdfbatch::{process_document, DocumentConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let result = process_document("report.pdf", &DocumentConfig::default()).await?;
/// if result.success() {
///     println!("{}", result.content());
/// } else {
///     eprintln!("{}", result.error_message().unwrap_or_default());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn process_document(
    path: impl AsRef<Path>,
    config: &DocumentConfig,
) -> Result<ProcessingResult, ConfigError> {
    let processor = ProcessorFactory::new().create(config)?;
    Ok(processor.process(path).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PageText, ParseOptions, PdfParser, RawDocument, RawPage};
    use crate::document::PdfInfo;
    use crate::error::ExtractionError;
    use image::DynamicImage;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// One page of plain text per `\f`-separated chunk of the file body.
    struct PlainParser {
        delay_ms: u64,
        panic: bool,
    }

    impl PdfParser for PlainParser {
        fn name(&self) -> &str {
            "plain"
        }

        fn parse(
            &self,
            path: &Path,
            options: &ParseOptions,
            cancel: &CancelFlag,
        ) -> Result<RawDocument, ExtractionError> {
            if self.panic {
                panic!("parser bug");
            }
            std::thread::sleep(std::time::Duration::from_millis(self.delay_ms));
            cancel.check()?;
            let body = std::fs::read_to_string(path).map_err(|e| ExtractionError::Io {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
            let body = body
                .lines()
                .filter(|l| !l.starts_with('%'))
                .collect::<Vec<_>>()
                .join("\n");
            let chunks: Vec<&str> = body.split('\u{c}').collect();
            let total = chunks.len();
            let pages = chunks
                .iter()
                .take(options.max_pages.unwrap_or(usize::MAX))
                .enumerate()
                .map(|(index, text)| RawPage {
                    index,
                    width: 612.0,
                    height: 792.0,
                    text: PageText::Plain(text.to_string()),
                    images: vec![],
                    warnings: vec![],
                })
                .collect();
            Ok(RawDocument {
                total_pages: total,
                info: PdfInfo::default(),
                pages,
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

    fn processor(config: DocumentConfig, parser: PlainParser) -> DocumentProcessor {
        ProcessorFactory::new()
            .with_parser(Arc::new(parser))
            .create(&config)
            .unwrap()
    }

    fn write_pdf(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("%PDF-1.7\n{body}\n%%EOF\n")).unwrap();
        path
    }

    fn plain() -> PlainParser {
        PlainParser {
            delay_ms: 0,
            panic: false,
        }
    }

    #[tokio::test]
    async fn successful_document() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(&dir, "a.pdf", "Hello world.");
        let p = processor(DocumentConfig::default(), plain());
        assert_eq!(p.state(), ProcessorState::Idle);

        let r = p.process(&path).await;
        assert!(r.success(), "{:?}", r.error_message());
        assert_eq!(r.content(), "Hello world.\n");
        assert!(r.error_message().is_none());
        assert_eq!(r.metadata().num_pages, 1);
        assert_eq!(r.metadata().confidence_score, 1.0);
        assert_eq!(p.state(), ProcessorState::Done);
    }

    #[tokio::test]
    async fn loading_failure_is_captured() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, "<html></html>").unwrap();
        let p = processor(DocumentConfig::default(), plain());

        let r = p.process(&path).await;
        assert!(!r.success());
        assert!(r.content().is_empty());
        let msg = r.error_message().unwrap();
        assert!(msg.starts_with("loading failed"), "got: {msg}");
        assert_eq!(r.metadata().file_name, "fake.pdf");
        assert_eq!(r.metadata().file_size, 13);
        assert_eq!(p.state(), ProcessorState::Failed);
    }

    #[tokio::test]
    async fn timeout_names_the_stage() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(&dir, "slow.pdf", "text");
        let config = DocumentConfig::builder()
            .timeout_per_document(1)
            .build()
            .unwrap();
        let p = processor(
            config,
            PlainParser {
                delay_ms: 1500,
                panic: false,
            },
        );

        let r = p.process(&path).await;
        assert!(!r.success());
        assert_eq!(
            r.error_message(),
            Some("timed out after 1s while extracting")
        );
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let dir = TempDir::new().unwrap();
        let path = write_pdf(&dir, "bug.pdf", "text");
        let p = processor(
            DocumentConfig::default(),
            PlainParser {
                delay_ms: 0,
                panic: true,
            },
        );

        let r = p.process(&path).await;
        assert!(!r.success());
        let msg = r.error_message().unwrap();
        assert!(msg.contains("internal error while extracting"), "got: {msg}");
        assert!(msg.contains("parser bug"));
        assert_eq!(p.state(), ProcessorState::Failed);
    }

    #[tokio::test]
    async fn bytes_are_reported_under_their_name() {
        let p = processor(DocumentConfig::default(), plain());
        let r = p
            .process_bytes(b"%PDF-1.4\nFrom memory.\n%%EOF\n", "uploads/memo.pdf")
            .await;
        assert!(r.success(), "{:?}", r.error_message());
        assert_eq!(r.file_path(), "uploads/memo.pdf");
        assert_eq!(r.metadata().file_path, "uploads/memo.pdf");
        assert_eq!(r.metadata().file_name, "memo.pdf");
    }

    #[tokio::test]
    async fn validate_file_runs_loading_checks() {
        let dir = TempDir::new().unwrap();
        let p = processor(DocumentConfig::default(), plain());
        assert!(p.validate_file(write_pdf(&dir, "good.pdf", "x")).await);
        assert!(!p.validate_file(dir.path().join("missing.pdf")).await);
    }

    #[test]
    fn state_names() {
        assert_eq!(ProcessorState::Serializing.as_str(), "serializing");
        assert!(ProcessorState::Failed.is_terminal());
        assert!(!ProcessorState::Enriching.is_terminal());
        assert_eq!(ProcessorState::from_u8(ProcessorState::Done as u8), ProcessorState::Done);
    }
}
