//! Backend selection and the two seams every backend implements.
//!
//! ```text
//!  DocumentConfig ──select──▶ BackendHandle ──ProcessorFactory──▶ Arc<dyn PdfParser>
//!                                                               + Arc<dyn OcrEngine>
//! ```
//!
//! [`BackendSelector::select`] is a pure function of the config: the same
//! config always yields the same [`BackendHandle`], so a partition that is
//! re-executed behaves exactly like the first run. The handle is a closed,
//! enumerated description; the factory turns it into owned backend objects
//! once per processor.
//!
//! * [`PdfParser`] is blocking. The pipeline calls it from `spawn_blocking`.
//! * [`OcrEngine`] is async. Engines either shell out (`tesseract`) or call a
//!   remote model (`vlm`), both of which are I/O-bound.

pub mod pdfium;
pub mod tesseract;
pub mod vlm;

use crate::config::{AcceleratorDevice, DocumentConfig, OcrEngineKind, PdfBackend};
use crate::document::{BBox, PdfInfo};
use crate::error::{ExtractionError, OcrError};
use futures::future::BoxFuture;
use image::DynamicImage;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which pages go through OCR when an engine is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrScope {
    /// Only pages whose text layer is empty.
    PagesWithoutText,
    /// Every page; the native text layer is replaced.
    AllPages,
}

/// Closed description of the backend combination for a config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendHandle {
    pub parser: PdfBackend,
    pub ocr: Option<OcrEngineKind>,
    pub ocr_scope: OcrScope,
    /// Device the backends will actually run on.
    pub device: AcceleratorDevice,
}

pub struct BackendSelector;

impl BackendSelector {
    /// Map a config to its backend combination.
    pub fn select(config: &DocumentConfig) -> BackendHandle {
        let ocr_scope = if config.force_ocr {
            OcrScope::AllPages
        } else {
            OcrScope::PagesWithoutText
        };
        BackendHandle {
            parser: config.pdf_backend,
            ocr: config.effective_ocr_engine(),
            ocr_scope,
            // Every bundled backend is a CPU backend.
            device: AcceleratorDevice::Cpu,
        }
    }
}

/// A run of text on a page in PDF points.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub bbox: BBox,
}

/// The text content of one page, in whichever shape the source produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PageText {
    /// Positioned runs: layout analysis applies.
    Runs(Vec<TextRun>),
    /// Unpositioned text; paragraphs are separated by blank lines.
    Plain(String),
    /// Markdown produced by a vision model.
    Markdown(String),
}

impl PageText {
    pub fn is_blank(&self) -> bool {
        match self {
            PageText::Runs(runs) => runs.iter().all(|r| r.text.trim().is_empty()),
            PageText::Plain(s) | PageText::Markdown(s) => s.trim().is_empty(),
        }
    }
}

/// An image object extracted from a page, already PNG-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub png: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    /// 0-indexed.
    pub index: usize,
    pub width: f32,
    pub height: f32,
    pub text: PageText,
    pub images: Vec<RawImage>,
    /// Problems confined to this page (an undecodable image, …).
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub total_pages: usize,
    pub info: PdfInfo,
    /// At most `max_pages` pages, in page order.
    pub pages: Vec<RawPage>,
}

#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub max_pages: Option<usize>,
    pub extract_images: bool,
    pub password: Option<String>,
}

/// Shared flag the processor raises when a document runs out of time or its
/// batch stops waiting for it. Blocking backends poll it between pages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is raised.
    pub fn check(&self) -> Result<(), ExtractionError> {
        if self.is_cancelled() {
            Err(ExtractionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Raise the flag when the returned guard is dropped.
    ///
    /// Held across a document's pipeline so that dropping the pipeline
    /// future (an aborted worker task) also stops work already handed to
    /// the blocking pool.
    pub fn cancel_on_drop(&self) -> CancelGuard {
        CancelGuard(self.clone())
    }
}

#[derive(Debug)]
pub struct CancelGuard(CancelFlag);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// A PDF parsing backend. Implementations are blocking.
pub trait PdfParser: Send + Sync {
    fn name(&self) -> &str;

    /// Read document info and up to `options.max_pages` pages.
    fn parse(
        &self,
        path: &Path,
        options: &ParseOptions,
        cancel: &CancelFlag,
    ) -> Result<RawDocument, ExtractionError>;

    /// Rasterise the given 0-indexed pages with the longest edge capped at
    /// `max_pixels`.
    fn rasterise(
        &self,
        path: &Path,
        pages: &[usize],
        max_pixels: u32,
        password: Option<&str>,
    ) -> Result<Vec<(usize, DynamicImage)>, ExtractionError>;
}

/// A line recognised by OCR, in raster pixels with the origin at the top-left.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrLine {
    pub text: String,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OcrContent {
    Lines(Vec<OcrLine>),
    Markdown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrPage {
    pub content: OcrContent,
    /// Mean recognition confidence in `[0, 1]`, when the engine reports one.
    pub confidence: Option<f32>,
}

/// An optical character recognition engine.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Recognise one rasterised page (`page_no` is 1-indexed, for diagnostics).
    fn recognize<'a>(
        &'a self,
        page_no: usize,
        image: &'a DynamicImage,
    ) -> BoxFuture<'a, Result<OcrPage, OcrError>>;
}
