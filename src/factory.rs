//! ProcessorFactory: turns a validated config into a ready processor.
//!
//! Backend bring-up (binding pdfium, probing tesseract, resolving an LLM
//! provider) happens here, once per processor, so a batch worker pays for it
//! once per partition. Nothing is cached between `create` calls: two workers
//! never share backend state.
//!
//! A backend that cannot be brought up is a [`ConfigError`]. The batch
//! orchestrator builds every worker's processor before dispatch, so a missing
//! OCR engine stops the batch before any document runs instead of degrading
//! documents one by one.

use crate::backend::pdfium::{PdfiumLibrary, PdfiumParser};
use crate::backend::tesseract::TesseractOcr;
use crate::backend::vlm::{resolve_provider, VisionClient, VlmOcr};
use crate::backend::{BackendSelector, OcrEngine, PdfParser};
use crate::config::{AcceleratorDevice, DocumentConfig, OcrEngineKind, PdfBackend};
use crate::enrich::{Enricher, EnrichmentChain};
use crate::error::ConfigError;
use crate::pipeline::extract::PageExtractor;
use crate::processor::DocumentProcessor;
use crate::serialize::Serializer;
use edgequake_llm::LLMProvider;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds [`DocumentProcessor`]s.
///
/// The `with_*` methods inject pre-built backends; anything not injected is
/// created from the config and the environment.
#[derive(Clone, Default)]
pub struct ProcessorFactory {
    parser: Option<Arc<dyn PdfParser>>,
    ocr_engine: Option<Arc<dyn OcrEngine>>,
    vision_provider: Option<Arc<dyn LLMProvider>>,
    extra_enrichers: Vec<Arc<dyn Enricher>>,
}

impl ProcessorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this parser instead of the one `pdf_backend` names.
    pub fn with_parser(mut self, parser: Arc<dyn PdfParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Use this engine whenever the config enables OCR.
    pub fn with_ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr_engine = Some(engine);
        self
    }

    /// Use a pre-configured provider for the `vlm` engine and picture
    /// descriptions (custom middleware, caching, tests).
    pub fn with_vision_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.vision_provider = Some(provider);
        self
    }

    /// Append an enrichment stage after the built-in ones.
    pub fn with_enricher(mut self, stage: Arc<dyn Enricher>) -> Self {
        self.extra_enrichers.push(stage);
        self
    }

    /// Build a processor bound to `config`.
    pub fn create(&self, config: &DocumentConfig) -> Result<DocumentProcessor, ConfigError> {
        config.validate()?;
        let handle = BackendSelector::select(config);
        if config.accelerator_device == AcceleratorDevice::Gpu {
            warn!("accelerator_device = gpu requested, but all backends run on the CPU");
        }

        let vision = if config.needs_vision_provider() {
            Some(self.vision_client(config)?)
        } else {
            None
        };

        let parser: Arc<dyn PdfParser> = match &self.parser {
            Some(p) => Arc::clone(p),
            None => Arc::new(PdfiumParser::new(
                PdfiumLibrary::from_env(),
                handle.parser == PdfBackend::PdfiumText,
            )?),
        };

        let ocr: Option<Arc<dyn OcrEngine>> = match (handle.ocr, &self.ocr_engine) {
            (None, _) => None,
            (Some(_), Some(engine)) => Some(Arc::clone(engine)),
            (Some(OcrEngineKind::Tesseract), None) => {
                Some(Arc::new(TesseractOcr::from_env(&config.ocr_languages)?))
            }
            (Some(OcrEngineKind::Vlm), None) => {
                let client = vision.clone().ok_or_else(|| ConfigError::BackendUnavailable {
                    backend: "vlm".into(),
                    hint: "no vision provider resolved".into(),
                })?;
                Some(Arc::new(VlmOcr::new(client)))
            }
        };

        let mut enrichment = EnrichmentChain::from_config(config, vision.as_ref());
        for stage in &self.extra_enrichers {
            enrichment.push(Arc::clone(stage));
        }

        debug!(
            "Processor: parser={} ocr={:?} scope={:?} enrich={:?}",
            parser.name(),
            ocr.as_ref().map(|e| e.name().to_string()),
            handle.ocr_scope,
            enrichment.names()
        );

        let extractor = PageExtractor::new(parser, ocr, &handle, config);
        Ok(DocumentProcessor::from_parts(
            config.clone(),
            handle,
            extractor,
            enrichment,
            Serializer::from_config(config),
        ))
    }

    /// Build a processor from [`DocumentConfig::baseline`].
    pub fn create_with_defaults(&self) -> Result<DocumentProcessor, ConfigError> {
        self.create(&DocumentConfig::baseline())
    }

    fn vision_client(&self, config: &DocumentConfig) -> Result<VisionClient, ConfigError> {
        let (provider, label) = match &self.vision_provider {
            Some(p) => (Arc::clone(p), "custom".to_string()),
            None => (
                resolve_provider(config.vlm_provider.as_deref(), config.vlm_model.as_deref())?,
                config.vlm_provider.clone().unwrap_or_else(|| "auto".into()),
            ),
        };
        Ok(VisionClient::new(provider, label, config.vlm_max_retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CancelFlag, OcrContent, OcrPage, ParseOptions, RawDocument};
    use crate::error::{ExtractionError, OcrError};
    use futures::future::BoxFuture;
    use image::DynamicImage;
    use std::path::Path;

    struct NullParser;
    impl PdfParser for NullParser {
        fn name(&self) -> &str {
            "null"
        }
        fn parse(
            &self,
            _path: &Path,
            _options: &ParseOptions,
            _cancel: &CancelFlag,
        ) -> Result<RawDocument, ExtractionError> {
            Ok(RawDocument {
                total_pages: 0,
                info: Default::default(),
                pages: vec![],
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

    struct NullOcr;
    impl OcrEngine for NullOcr {
        fn name(&self) -> &str {
            "null_ocr"
        }
        fn recognize<'a>(
            &'a self,
            _page_no: usize,
            _image: &'a DynamicImage,
        ) -> BoxFuture<'a, Result<OcrPage, OcrError>> {
            Box::pin(async {
                Ok(OcrPage {
                    content: OcrContent::Markdown(String::new()),
                    confidence: None,
                })
            })
        }
    }

    fn factory() -> ProcessorFactory {
        ProcessorFactory::new().with_parser(Arc::new(NullParser))
    }

    #[test]
    fn invalid_config_is_rejected_before_backends() {
        let config = DocumentConfig {
            num_threads: 0,
            ..DocumentConfig::default()
        };
        // Would fail to bind pdfium if validation did not come first.
        let err = ProcessorFactory::new().create(&config).err().unwrap();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "num_threads"));
    }

    #[test]
    fn defaults_build_a_processor() {
        let processor = factory().create_with_defaults().unwrap();
        assert_eq!(processor.config(), &DocumentConfig::baseline());
        assert_eq!(processor.backend().ocr, None);
        assert!(processor.enrichment_stages().is_empty());
    }

    #[test]
    fn injected_ocr_engine_is_used_for_any_kind() {
        let config = DocumentConfig::builder()
            .ocr_enabled(true)
            .force_ocr(true)
            .enrich_code(true)
            .accelerator_device(AcceleratorDevice::Gpu)
            .build()
            .unwrap();
        let processor = factory()
            .with_ocr_engine(Arc::new(NullOcr))
            .create(&config)
            .unwrap();
        assert_eq!(processor.backend().ocr, Some(OcrEngineKind::Tesseract));
        assert_eq!(processor.backend().device, AcceleratorDevice::Cpu);
        assert_eq!(processor.enrichment_stages(), vec!["code"]);
    }

    #[test]
    fn extra_enrichers_run_last() {
        struct Tag;
        impl Enricher for Tag {
            fn name(&self) -> &str {
                "tag"
            }
            fn enrich<'a>(
                &'a self,
                _doc: &'a mut crate::document::DocumentTree,
            ) -> BoxFuture<'a, Result<usize, crate::error::EnrichmentError>> {
                Box::pin(async { Ok(0) })
            }
        }
        let config = DocumentConfig::builder().enrich_formula(true).build().unwrap();
        let processor = factory().with_enricher(Arc::new(Tag)).create(&config).unwrap();
        assert_eq!(processor.enrichment_stages(), vec!["formula", "tag"]);
    }
}
