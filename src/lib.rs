//! # edgequake-pdfbatch
//!
//! Convert directories of PDF documents to Markdown, JSON and metadata, one
//! isolated pipeline per document.
//!
//! ## Why this crate?
//!
//! Corpus conversion jobs die in boring ways: one truncated download, one
//! encrypted contract or one scanned fax that takes ten minutes to OCR, and
//! the whole run is lost or stuck. Here every document runs inside its own
//! state machine with a wall-clock budget, every failure becomes a result
//! instead of an error, and one writer aggregates the results so a partial
//! batch is still a valid report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir
//!  │
//!  ├─ discover   sorted *.pdf listing
//!  ├─ partition  contiguous or round-robin, one tokio worker per partition
//!  │
//!  │   per document (DocumentProcessor, bounded by timeout_per_document)
//!  │   ├─ 1. Load       existence, magic bytes, version, %%EOF
//!  │   ├─ 2. Extract    pdfium text/geometry/images (spawn_blocking)
//!  │   │                + OCR for image-only pages (tesseract or VLM)
//!  │   │                + layout → headings, paragraphs, lists, tables
//!  │   ├─ 3. Enrich     code, formulas, picture classes/descriptions
//!  │   └─ 4. Serialize  Markdown + JSON + metadata
//!  │
//!  └─ aggregate  results.jsonl (+ side files, summary.json)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfbatch::{BatchOptions, BatchOrchestrator, DocumentConfig, OutputTarget};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DocumentConfig::builder().max_pages(Some(50)).build()?;
//!     let options = BatchOptions::new("corpus/", OutputTarget::Directory("out/".into()));
//!     let report = BatchOrchestrator::new(config, options).run().await?;
//!     eprintln!("{} ok, {} failed", report.succeeded(), report.failed());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfbatch` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdfbatch = { version = "0.1", default-features = false }
//! ```
//!
//! ## Runtime requirements
//!
//! | Backend | Needs |
//! |---------|-------|
//! | `pdfium`, `pdfium_text` | libpdfium on the library path, or `PDFIUM_LIB_PATH` |
//! | OCR `tesseract` | the `tesseract` binary, or `TESSERACT_CMD` |
//! | OCR `vlm`, picture descriptions | an API key (`OPENAI_API_KEY`, …) or `vlm_provider` |
//!
//! Missing requirements are configuration errors reported before any
//! document is processed.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod batch;
pub mod config;
pub mod document;
pub mod enrich;
pub mod error;
pub mod factory;
pub mod output;
pub mod pipeline;
pub mod processor;
pub mod progress;
pub mod prompts;
pub mod serialize;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{BackendHandle, BackendSelector, OcrEngine, OcrScope, PdfParser};
pub use batch::{
    BatchOptions, BatchOrchestrator, BatchReport, BatchSummary, OutputTarget, Partitioning,
};
pub use config::{
    AcceleratorDevice, DocumentConfig, DocumentConfigBuilder, ImageExportMode, OcrEngineKind,
    PageSeparator, PdfBackend, TableMode,
};
pub use document::DocumentTree;
pub use enrich::{Enricher, EnrichmentChain};
pub use error::{BatchError, ConfigError, EnrichmentError, ExtractionError, OcrError, ProcessError};
pub use factory::ProcessorFactory;
pub use output::{ProcessingResult, ResultMetadata};
pub use processor::{process_document, DocumentProcessor, ProcessorState};
pub use progress::{BatchProgressCallback, NoopProgressCallback};
pub use serialize::Serializer;
