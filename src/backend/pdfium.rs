//! pdfium-backed [`PdfParser`].
//!
//! pdfium is a C++ library with internal global state; `pdfium-render` is
//! built with `thread_safe`, which serialises calls into the library. All
//! functions here are blocking and are driven from `spawn_blocking` by the
//! extraction stage.
//!
//! The library is located once, when the parser is built: `PDFIUM_LIB_PATH`
//! (a library file or the directory holding it) or the system library. A
//! failed probe is a configuration error, raised before any document runs.

use super::{CancelFlag, PageText, ParseOptions, PdfParser, RawDocument, RawImage, RawPage, TextRun};
use crate::document::{BBox, PdfInfo};
use crate::error::{ConfigError, ExtractionError};
use crate::pipeline::encode;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where to load libpdfium from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfiumLibrary {
    /// The platform's default library search path.
    System,
    /// An explicit library file, or a directory containing the platform library.
    Path(PathBuf),
}

impl PdfiumLibrary {
    /// `PDFIUM_LIB_PATH` when set, otherwise the system library.
    pub fn from_env() -> Self {
        match std::env::var_os("PDFIUM_LIB_PATH") {
            Some(p) if !p.is_empty() => PdfiumLibrary::Path(PathBuf::from(p)),
            _ => PdfiumLibrary::System,
        }
    }

    fn bind(&self) -> Result<Pdfium, PdfiumError> {
        let bindings = match self {
            PdfiumLibrary::System => Pdfium::bind_to_system_library()?,
            PdfiumLibrary::Path(p) => {
                let lib = if p.is_dir() {
                    Pdfium::pdfium_platform_library_name_at_path(p)
                } else {
                    p.clone()
                };
                Pdfium::bind_to_library(&lib)?
            }
        };
        Ok(Pdfium::new(bindings))
    }
}

pub struct PdfiumParser {
    library: PdfiumLibrary,
    text_only: bool,
}

impl PdfiumParser {
    /// Probe the library and build a parser. `text_only` selects the
    /// `pdfium_text` variant.
    pub fn new(library: PdfiumLibrary, text_only: bool) -> Result<Self, ConfigError> {
        library
            .bind()
            .map_err(|e| ConfigError::BackendUnavailable {
                backend: "pdfium".to_string(),
                hint: format!(
                    "{e:?}. Install libpdfium or set PDFIUM_LIB_PATH to the library file or its directory."
                ),
            })?;
        debug!("pdfium bound from {:?}", library);
        Ok(Self { library, text_only })
    }

    fn backend_error(&self, detail: impl Into<String>) -> ExtractionError {
        ExtractionError::Backend {
            backend: self.name().to_string(),
            detail: detail.into(),
        }
    }
}

impl PdfParser for PdfiumParser {
    fn name(&self) -> &str {
        if self.text_only {
            "pdfium_text"
        } else {
            "pdfium"
        }
    }

    fn parse(
        &self,
        path: &Path,
        options: &ParseOptions,
        cancel: &CancelFlag,
    ) -> Result<RawDocument, ExtractionError> {
        let pdfium = self
            .library
            .bind()
            .map_err(|e| self.backend_error(format!("{e:?}")))?;
        let document = open_document(&pdfium, path, options.password.as_deref())?;

        let info = read_info(&document);
        let pages = document.pages();
        let total_pages = pages.len() as usize;
        let limit = options
            .max_pages
            .map_or(total_pages, |max| max.min(total_pages));
        info!(
            "PDF loaded: {} pages, reading {} ({})",
            total_pages,
            limit,
            path.display()
        );

        let mut raw_pages = Vec::with_capacity(limit);
        for idx in 0..limit {
            cancel.check()?;

            let page = pages
                .get(idx as u16)
                .map_err(|e| self.backend_error(format!("page {}: {:?}", idx + 1, e)))?;
            let mut warnings = Vec::new();

            let text = match page.text() {
                Ok(text) if self.text_only => PageText::Plain(text.all()),
                Ok(text) => PageText::Runs(text_runs(&text)),
                Err(e) => {
                    warnings.push(format!("page {}: text layer unreadable: {:?}", idx + 1, e));
                    PageText::Runs(Vec::new())
                }
            };

            let images = if options.extract_images && !self.text_only {
                page_images(&page, idx, &mut warnings)
            } else {
                Vec::new()
            };

            raw_pages.push(RawPage {
                index: idx,
                width: page.width().value,
                height: page.height().value,
                text,
                images,
                warnings,
            });
        }

        Ok(RawDocument {
            total_pages,
            info,
            pages: raw_pages,
        })
    }

    fn rasterise(
        &self,
        path: &Path,
        page_indices: &[usize],
        max_pixels: u32,
        password: Option<&str>,
    ) -> Result<Vec<(usize, DynamicImage)>, ExtractionError> {
        let pdfium = self
            .library
            .bind()
            .map_err(|e| self.backend_error(format!("{e:?}")))?;
        let document = open_document(&pdfium, path, password)?;
        let pages = document.pages();
        let total_pages = pages.len() as usize;

        let render_config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut results = Vec::with_capacity(page_indices.len());
        for &idx in page_indices {
            if idx >= total_pages {
                warn!("Skipping page {} (out of range, total={})", idx + 1, total_pages);
                continue;
            }
            let page = pages
                .get(idx as u16)
                .map_err(|e| self.backend_error(format!("page {}: {:?}", idx + 1, e)))?;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| self.backend_error(format!("rasterising page {}: {:?}", idx + 1, e)))?;
            let image = bitmap.as_image();
            debug!(
                "Rasterised page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            results.push((idx, image));
        }
        Ok(results)
    }
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, ExtractionError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let detail = format!("{:?}", e);
        if detail.to_lowercase().contains("password") {
            if password.is_some() {
                ExtractionError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                ExtractionError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            ExtractionError::CorruptPdf {
                path: path.to_path_buf(),
                detail,
            }
        }
    })
}

fn text_runs(text: &PdfPageText) -> Vec<TextRun> {
    text.segments()
        .iter()
        .filter_map(|segment| {
            let content = segment.text();
            if content.trim().is_empty() {
                return None;
            }
            let b = segment.bounds();
            Some(TextRun {
                text: content,
                bbox: BBox::new(
                    b.left().value,
                    b.bottom().value,
                    b.right().value,
                    b.top().value,
                ),
            })
        })
        .collect()
}

fn page_images(page: &PdfPage<'_>, idx: usize, warnings: &mut Vec<String>) -> Vec<RawImage> {
    let mut images = Vec::new();
    for (n, object) in page.objects().iter().enumerate() {
        let Some(image_object) = object.as_image_object() else {
            continue;
        };
        let decoded = image_object
            .get_raw_image()
            .map_err(|e| format!("{e:?}"))
            .and_then(|img| {
                encode::encode_png(&img)
                    .map(|png| (img.width(), img.height(), png))
                    .map_err(|e| e.to_string())
            });
        match decoded {
            Ok((width, height, png)) => images.push(RawImage {
                png: png.into(),
                width,
                height,
            }),
            Err(detail) => {
                warn!("Page {}: image object {} skipped: {}", idx + 1, n, detail);
                warnings.push(format!(
                    "page {}: image object {} skipped: {}",
                    idx + 1,
                    n,
                    detail
                ));
            }
        }
    }
    images
}

fn read_info(document: &PdfDocument<'_>) -> PdfInfo {
    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    PdfInfo {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
        modification_date: get_meta(PdfDocumentMetadataTagType::ModificationDate),
        pdf_version: version_label(&format!("{:?}", document.version())),
    }
}

/// `Pdf1_7` → `1.7`; anything else is kept verbatim.
fn version_label(debug_name: &str) -> String {
    match debug_name.strip_prefix("Pdf") {
        Some(rest) if rest.chars().next().is_some_and(|c| c.is_ascii_digit()) => {
            rest.replace('_', ".")
        }
        _ => debug_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_labels() {
        assert_eq!(version_label("Pdf1_7"), "1.7");
        assert_eq!(version_label("Pdf2_0"), "2.0");
        assert_eq!(version_label("Unset"), "Unset");
        assert_eq!(version_label("Other(18)"), "Other(18)");
    }

    #[test]
    fn library_from_env_defaults_to_system() {
        // Only meaningful when the variable is absent in the test environment.
        if std::env::var_os("PDFIUM_LIB_PATH").is_none() {
            assert_eq!(PdfiumLibrary::from_env(), PdfiumLibrary::System);
        }
    }
}
