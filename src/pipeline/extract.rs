//! PageExtractor: parse, OCR and layout for one document.
//!
//! ```text
//! parse (blocking) ──▶ pick OCR pages ──▶ rasterise (blocking) ──▶ OCR ×N
//!        │                                                          │
//!        └──────────────── native text ◀── fallback on failure ─────┘
//!                               │
//!                          layout ──▶ DocumentTree
//! ```
//!
//! Sub-document failures (one page's OCR, one image object, rasterisation)
//! become warnings on the tree; only a failure to parse the document at all
//! is an [`ExtractionError`].

use super::layout::{self, LayoutOptions};
use super::run_blocking;
use crate::backend::{
    BackendHandle, CancelFlag, OcrContent, OcrEngine, OcrPage, OcrScope, PageText, ParseOptions,
    PdfParser, RawPage, TextRun,
};
use crate::config::DocumentConfig;
use crate::document::{
    BBox, Block, BlockKind, DocumentTree, PageInfo, Picture, SourceFile, TextSource,
};
use crate::error::{ExtractionError, OcrError};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PageExtractor {
    parser: Arc<dyn PdfParser>,
    ocr: Option<Arc<dyn OcrEngine>>,
    ocr_scope: OcrScope,
    layout: LayoutOptions,
    parse_options: ParseOptions,
    ocr_max_pixels: u32,
    ocr_concurrency: usize,
}

struct Recognised {
    page: OcrPage,
    raster_width: u32,
    raster_height: u32,
}

impl PageExtractor {
    pub fn new(
        parser: Arc<dyn PdfParser>,
        ocr: Option<Arc<dyn OcrEngine>>,
        handle: &BackendHandle,
        config: &DocumentConfig,
    ) -> Self {
        Self {
            parser,
            ocr,
            ocr_scope: handle.ocr_scope,
            layout: LayoutOptions {
                detect_tables: config.extract_tables,
                table_mode: config.table_mode,
            },
            parse_options: ParseOptions {
                max_pages: config.max_pages,
                extract_images: config.extract_images,
                password: config.password.clone(),
            },
            ocr_max_pixels: config.ocr_max_pixels,
            ocr_concurrency: config.num_threads.max(1),
        }
    }

    /// Build the document tree for `source`.
    pub async fn extract(
        &self,
        source: SourceFile,
        cancel: &CancelFlag,
    ) -> Result<DocumentTree, ExtractionError> {
        let mut raw = {
            let parser = Arc::clone(&self.parser);
            let path = source.path.clone();
            let options = self.parse_options.clone();
            let cancel = cancel.clone();
            run_blocking(move || parser.parse(&path, &options, &cancel)).await??
        };
        cancel.check()?;

        // The parser is only asked to stop early; the limit holds either way.
        if let Some(max) = self.parse_options.max_pages {
            let before = raw.pages.len();
            raw.pages.retain(|p| p.index < max);
            if raw.pages.len() < before {
                debug!(
                    "{} returned {} pages past max_pages = {}; dropped",
                    self.parser.name(),
                    before - raw.pages.len(),
                    max
                );
            }
        }

        let mut warnings: Vec<String> = Vec::new();
        let recognised = match &self.ocr {
            Some(engine) => {
                self.recognise(engine, &source, &raw.pages, cancel, &mut warnings)
                    .await?
            }
            None => HashMap::new(),
        };

        let mut pages = Vec::with_capacity(raw.pages.len());
        let mut blocks = Vec::new();
        let mut ordinal = 0usize;

        for raw_page in raw.pages {
            let page_no = raw_page.index + 1;
            warnings.extend(raw_page.warnings.iter().cloned());

            let (text_source, confidence, page_blocks) = match recognised.get(&raw_page.index) {
                Some(rec) => (
                    TextSource::Ocr {
                        engine: self.ocr.as_ref().map(|e| e.name().to_string()).unwrap_or_default(),
                    },
                    rec.page.confidence,
                    self.ocr_blocks(&raw_page, rec),
                ),
                None if raw_page.text.is_blank() => (TextSource::None, None, Vec::new()),
                None => (
                    TextSource::TextLayer,
                    Some(1.0),
                    self.native_blocks(page_no, &raw_page.text),
                ),
            };
            blocks.extend(page_blocks);

            for image in raw_page.images {
                ordinal += 1;
                blocks.push(Block::new(
                    page_no,
                    None,
                    BlockKind::Picture(Picture {
                        ordinal,
                        png: image.png,
                        width: image.width,
                        height: image.height,
                        classification: None,
                        description: None,
                    }),
                ));
            }

            pages.push(PageInfo {
                page_no,
                width: raw_page.width,
                height: raw_page.height,
                text_source,
                confidence,
            });
        }

        info!(
            "Extracted {} of {} pages, {} blocks, {} warnings ({})",
            pages.len(),
            raw.total_pages,
            blocks.len(),
            warnings.len(),
            source.file_name
        );

        Ok(DocumentTree {
            source,
            info: raw.info,
            total_pages: raw.total_pages,
            pages,
            blocks,
            warnings,
        })
    }

    fn native_blocks(&self, page_no: usize, text: &PageText) -> Vec<Block> {
        match text {
            PageText::Runs(runs) => layout::analyse_runs(page_no, runs, &self.layout),
            PageText::Plain(s) => layout::analyse_plain(page_no, s),
            PageText::Markdown(s) => layout::analyse_markdown(page_no, s),
        }
    }

    fn ocr_blocks(&self, raw_page: &RawPage, rec: &Recognised) -> Vec<Block> {
        let page_no = raw_page.index + 1;
        match &rec.page.content {
            OcrContent::Markdown(md) => layout::analyse_markdown(page_no, md),
            OcrContent::Lines(lines) => {
                let sx = raw_page.width / rec.raster_width.max(1) as f32;
                let sy = raw_page.height / rec.raster_height.max(1) as f32;
                let runs: Vec<TextRun> = lines
                    .iter()
                    .map(|l| TextRun {
                        text: l.text.clone(),
                        bbox: BBox::new(
                            l.left as f32 * sx,
                            raw_page.height - l.top.saturating_add(l.height) as f32 * sy,
                            l.left.saturating_add(l.width) as f32 * sx,
                            raw_page.height - l.top as f32 * sy,
                        ),
                    })
                    .collect();
                layout::analyse_runs(page_no, &runs, &self.layout)
            }
        }
    }

    /// OCR the pages the scope selects. Failures are downgraded to warnings.
    async fn recognise(
        &self,
        engine: &Arc<dyn OcrEngine>,
        source: &SourceFile,
        pages: &[RawPage],
        cancel: &CancelFlag,
        warnings: &mut Vec<String>,
    ) -> Result<HashMap<usize, Recognised>, ExtractionError> {
        let targets: Vec<usize> = pages
            .iter()
            .filter(|p| self.ocr_scope == OcrScope::AllPages || p.text.is_blank())
            .map(|p| p.index)
            .collect();
        if targets.is_empty() {
            return Ok(HashMap::new());
        }
        debug!("OCR targets: {:?} ({})", targets, engine.name());

        let rasters = {
            let parser = Arc::clone(&self.parser);
            let path = source.path.clone();
            let password = self.parse_options.password.clone();
            let max_pixels = self.ocr_max_pixels;
            let targets = targets.clone();
            run_blocking(move || {
                parser.rasterise(&path, &targets, max_pixels, password.as_deref())
            })
            .await?
        };
        let rasters = match rasters {
            Ok(r) => r,
            Err(e) => {
                warn!("OCR skipped for {}: {}", source.file_name, e);
                warnings.push(format!("OCR skipped: rasterisation failed: {e}"));
                return Ok(HashMap::new());
            }
        };
        cancel.check()?;

        let outcomes: Vec<(usize, u32, u32, Result<OcrPage, OcrError>)> =
            stream::iter(rasters.into_iter().map(|(idx, image)| {
                let engine = Arc::clone(engine);
                async move {
                    let outcome = engine.recognize(idx + 1, &image).await;
                    (idx, image.width(), image.height(), outcome)
                }
            }))
            .buffer_unordered(self.ocr_concurrency)
            .collect()
            .await;

        let mut recognised = HashMap::new();
        for (idx, raster_width, raster_height, outcome) in outcomes {
            match outcome {
                Ok(page) => {
                    recognised.insert(
                        idx,
                        Recognised {
                            page,
                            raster_width,
                            raster_height,
                        },
                    );
                }
                Err(e) => {
                    warn!("{}: {}", source.file_name, e);
                    warnings.push(e.to_string());
                }
            }
        }
        // buffer_unordered completes out of order; keep warnings stable.
        warnings.sort();
        Ok(recognised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendSelector, RawDocument};
    use crate::document::PdfInfo;
    use image::DynamicImage;
    use std::path::Path;

    /// Returns every page regardless of `ParseOptions::max_pages`.
    struct EveryPageParser {
        pages: usize,
    }

    impl PdfParser for EveryPageParser {
        fn name(&self) -> &str {
            "every_page"
        }

        fn parse(
            &self,
            _path: &Path,
            _options: &ParseOptions,
            _cancel: &CancelFlag,
        ) -> Result<RawDocument, ExtractionError> {
            let pages = (0..self.pages)
                .map(|index| RawPage {
                    index,
                    width: 612.0,
                    height: 792.0,
                    text: PageText::Plain(format!("Page {}", index + 1)),
                    images: vec![],
                    warnings: vec![],
                })
                .collect();
            Ok(RawDocument {
                total_pages: self.pages,
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

    fn source() -> SourceFile {
        SourceFile {
            path: "ten.pdf".into(),
            file_name: "ten.pdf".into(),
            extension: ".pdf".into(),
            stem: "ten".into(),
            output_stem: "ten".into(),
            size: 0,
        }
    }

    fn extractor(config: &DocumentConfig) -> PageExtractor {
        let handle = BackendSelector::select(config);
        PageExtractor::new(Arc::new(EveryPageParser { pages: 10 }), None, &handle, config)
    }

    #[tokio::test]
    async fn max_pages_holds_when_the_parser_ignores_it() {
        let config = DocumentConfig::builder().max_pages(Some(1)).build().unwrap();
        let tree = extractor(&config)
            .extract(source(), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(tree.pages.len(), 1);
        assert_eq!(tree.total_pages, 10);
        assert!(tree.blocks.iter().all(|b| b.page == 1));
    }

    #[tokio::test]
    async fn no_limit_keeps_every_page() {
        let tree = extractor(&DocumentConfig::default())
            .extract(source(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(tree.pages.len(), 10);
    }

    #[tokio::test]
    async fn raised_flag_stops_extraction() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = extractor(&DocumentConfig::default())
            .extract(source(), &cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExtractionError::Cancelled));
    }
}
