//! Per-document processing configuration.
//!
//! Every knob lives in [`DocumentConfig`]. It can be produced three ways, all
//! of which end in [`DocumentConfig::validate`]:
//!
//! * the builder ([`DocumentConfig::builder`]) for library callers,
//! * a JSON document ([`DocumentConfig::from_json_str`]),
//! * `key=value` overrides ([`DocumentConfig::with_overrides`]) for the CLI.
//!
//! The option set is closed. Unknown keys and unrecognised enumeration names
//! are [`ConfigError`]s, detected before any document is dispatched.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Declares a closed, string-named option enum with `FromStr`/`Display`
/// names matching its serde representation.
macro_rules! option_enum {
    (
        $(#[$meta:meta])*
        $name:ident, field = $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every recognised name, in declaration order.
            pub const NAMES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $( $text => Ok(Self::$variant), )+
                    other => Err(ConfigError::invalid(
                        $field,
                        format!(
                            "unrecognized value '{}' (expected one of: {})",
                            other,
                            Self::NAMES.join(", ")
                        ),
                    )),
                }
            }
        }
    };
}

option_enum! {
    /// OCR engine used for image-only pages (or every page with `force_ocr`).
    OcrEngineKind, field = "ocr_engine" {
        /// The `tesseract` command-line tool (TSV output with word confidences).
        #[default]
        Tesseract => "tesseract",
        /// A vision language model reached through `edgequake-llm`.
        Vlm => "vlm",
    }
}

option_enum! {
    /// PDF parsing backend.
    PdfBackend, field = "pdf_backend" {
        /// pdfium with text geometry, image objects and document info.
        #[default]
        Pdfium => "pdfium",
        /// pdfium text layer only. No layout geometry, tables or images.
        PdfiumText => "pdfium_text",
    }
}

option_enum! {
    /// How pictures appear in the rendered outputs.
    ImageExportMode, field = "image_export_mode" {
        /// Base64 data URI inlined into Markdown and JSON.
        #[default]
        Embedded => "embedded",
        /// A fixed `<!-- image -->` marker.
        Placeholder => "placeholder",
        /// A relative path; the PNG bytes are returned as side artifacts.
        Referenced => "referenced",
    }
}

option_enum! {
    /// Table detection fidelity.
    TableMode, field = "table_mode" {
        /// Column anchors clustered across rows; tolerates sparse cells.
        #[default]
        Accurate => "accurate",
        /// Rows must split into the same number of cells.
        Fast => "fast",
    }
}

option_enum! {
    /// Preferred compute device.
    AcceleratorDevice, field = "accelerator_device" {
        Auto => "auto",
        #[default]
        Cpu => "cpu",
        Gpu => "gpu",
    }
}

/// Configuration for converting one PDF document.
///
/// # Example
/// ```rust
/// use edgequake_pdfbatch::{DocumentConfig, ImageExportMode};
///
/// let config = DocumentConfig::builder()
///     .ocr_enabled(true)
///     .max_pages(Some(10))
///     .image_export_mode(ImageExportMode::Placeholder)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, Some(10));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentConfig {
    /// Detect tables from aligned text rows. Default: true.
    pub extract_tables: bool,

    /// Extract embedded image objects as pictures. Default: true.
    pub extract_images: bool,

    /// Run OCR on pages without a text layer. Default: false.
    pub ocr_enabled: bool,

    /// OCR engine. `None` selects [`OcrEngineKind::Tesseract`] when OCR is on.
    /// Setting it while `ocr_enabled` is false is a configuration error.
    pub ocr_engine: Option<OcrEngineKind>,

    /// OCR every page, replacing the native text layer. Requires `ocr_enabled`.
    pub force_ocr: bool,

    /// Tesseract language string, e.g. `eng` or `eng+deu`. Default: `eng`.
    pub ocr_languages: String,

    /// Longest edge, in pixels, of the page raster handed to OCR. Default: 2000.
    ///
    /// Bounds memory independently of the physical page size.
    pub ocr_max_pixels: u32,

    /// Stop after this many pages. The rest of the document is ignored, not failed.
    pub max_pages: Option<usize>,

    pub pdf_backend: PdfBackend,

    pub image_export_mode: ImageExportMode,

    pub table_mode: TableMode,

    /// Parallelism hint: batch workers and per-document OCR concurrency. Default: 4.
    pub num_threads: usize,

    /// Wall-clock budget per document, in seconds. Default: 300.
    pub timeout_per_document: u64,

    pub enrich_code: bool,
    pub enrich_formula: bool,
    pub enrich_picture_classes: bool,
    pub enrich_picture_description: bool,

    pub accelerator_device: AcceleratorDevice,

    /// User password for encrypted PDFs.
    pub password: Option<String>,

    /// Separator between pages in the rendered Markdown. Default: none.
    pub page_separator: PageSeparator,

    /// LLM provider for the `vlm` engine and picture descriptions
    /// (e.g. `openai`, `anthropic`, `ollama`). Auto-detected when unset.
    pub vlm_provider: Option<String>,

    /// LLM model identifier. Provider default when unset.
    pub vlm_model: Option<String>,

    /// Retries per VLM call on transient failure. Default: 3.
    pub vlm_max_retries: u32,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            extract_tables: true,
            extract_images: true,
            ocr_enabled: false,
            ocr_engine: None,
            force_ocr: false,
            ocr_languages: "eng".to_string(),
            ocr_max_pixels: 2000,
            max_pages: None,
            pdf_backend: PdfBackend::default(),
            image_export_mode: ImageExportMode::default(),
            table_mode: TableMode::default(),
            num_threads: 4,
            timeout_per_document: 300,
            enrich_code: false,
            enrich_formula: false,
            enrich_picture_classes: false,
            enrich_picture_description: false,
            accelerator_device: AcceleratorDevice::default(),
            password: None,
            page_separator: PageSeparator::default(),
            vlm_provider: None,
            vlm_model: None,
            vlm_max_retries: 3,
        }
    }
}

impl fmt::Debug for DocumentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentConfig")
            .field("extract_tables", &self.extract_tables)
            .field("extract_images", &self.extract_images)
            .field("ocr_enabled", &self.ocr_enabled)
            .field("ocr_engine", &self.ocr_engine)
            .field("force_ocr", &self.force_ocr)
            .field("max_pages", &self.max_pages)
            .field("pdf_backend", &self.pdf_backend)
            .field("image_export_mode", &self.image_export_mode)
            .field("table_mode", &self.table_mode)
            .field("num_threads", &self.num_threads)
            .field("timeout_per_document", &self.timeout_per_document)
            .field("accelerator_device", &self.accelerator_device)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("vlm_provider", &self.vlm_provider)
            .field("vlm_model", &self.vlm_model)
            .finish()
    }
}

impl DocumentConfig {
    /// Create a new builder starting from [`DocumentConfig::default`].
    pub fn builder() -> DocumentConfigBuilder {
        DocumentConfigBuilder {
            config: Self::default(),
        }
    }

    /// The baseline used by `ProcessorFactory::create_with_defaults`:
    /// lightweight (no OCR) with automatic device selection.
    pub fn baseline() -> Self {
        Self {
            accelerator_device: AcceleratorDevice::Auto,
            ..Self::default()
        }
    }

    /// Check ranges and cross-field constraints.
    ///
    /// Pure: calling it any number of times on the same value yields the same
    /// outcome.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pages == Some(0) {
            return Err(ConfigError::invalid(
                "max_pages",
                "must be a positive integer or unset",
            ));
        }
        if self.num_threads == 0 {
            return Err(ConfigError::invalid("num_threads", "must be at least 1"));
        }
        if self.timeout_per_document == 0 {
            return Err(ConfigError::invalid(
                "timeout_per_document",
                "must be at least 1 second",
            ));
        }
        if self.ocr_max_pixels < 100 {
            return Err(ConfigError::invalid(
                "ocr_max_pixels",
                format!("must be at least 100, got {}", self.ocr_max_pixels),
            ));
        }
        if self.ocr_languages.trim().is_empty() {
            return Err(ConfigError::invalid("ocr_languages", "must not be empty"));
        }

        if !self.ocr_enabled {
            if let Some(engine) = self.ocr_engine {
                return Err(ConfigError::conflict(
                    "ocr_engine",
                    format!("engine '{engine}' selected but ocr_enabled is false"),
                ));
            }
            if self.force_ocr {
                return Err(ConfigError::conflict(
                    "force_ocr",
                    "force_ocr requires ocr_enabled = true",
                ));
            }
        }

        if self.pdf_backend == PdfBackend::PdfiumText {
            if self.extract_tables {
                return Err(ConfigError::conflict(
                    "extract_tables",
                    "the pdfium_text backend has no layout geometry; disable extract_tables or use pdfium",
                ));
            }
            if self.extract_images {
                return Err(ConfigError::conflict(
                    "extract_images",
                    "the pdfium_text backend cannot read image objects; disable extract_images or use pdfium",
                ));
            }
        }

        if !self.extract_images {
            if self.enrich_picture_classes {
                return Err(ConfigError::conflict(
                    "enrich_picture_classes",
                    "picture enrichment requires extract_images = true",
                ));
            }
            if self.enrich_picture_description {
                return Err(ConfigError::conflict(
                    "enrich_picture_description",
                    "picture enrichment requires extract_images = true",
                ));
            }
        }

        for (field, value) in [
            ("vlm_provider", &self.vlm_provider),
            ("vlm_model", &self.vlm_model),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ConfigError::invalid(field, "must not be empty when set"));
            }
        }

        Ok(())
    }

    /// The OCR engine that will actually run, if any.
    pub fn effective_ocr_engine(&self) -> Option<OcrEngineKind> {
        self.ocr_enabled
            .then(|| self.ocr_engine.unwrap_or_default())
    }

    /// True when some stage needs a vision LLM provider.
    pub fn needs_vision_provider(&self) -> bool {
        self.effective_ocr_engine() == Some(OcrEngineKind::Vlm) || self.enrich_picture_description
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_per_document)
    }

    /// Parse a JSON configuration document. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        let Value::Object(supplied) = value else {
            return Err(ConfigError::Malformed(
                "configuration must be a JSON object".into(),
            ));
        };

        let known = Self::default().to_map()?;
        if let Some(key) = supplied.keys().find(|k| !known.contains_key(k.as_str())) {
            return Err(ConfigError::UnknownOption { key: key.clone() });
        }

        let config: Self = serde_json::from_value(Value::Object(supplied))
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `key=value` overrides on top of `self`.
    ///
    /// Values are read as JSON when they parse as JSON (`true`, `12`, `null`,
    /// `"text"`) and as bare strings otherwise, so `ocr_engine=vlm` and
    /// `max_pages=3` both work. Each override is applied separately so the
    /// error names the offending key.
    pub fn with_overrides<I, K, V>(&self, overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut current = self.clone();
        for (key, raw) in overrides {
            let key = key.as_ref().trim();
            let mut map = current.to_map()?;
            if !map.contains_key(key) {
                return Err(ConfigError::UnknownOption {
                    key: key.to_string(),
                });
            }
            map.insert(key.to_string(), parse_override_value(raw.as_ref()));
            current = serde_json::from_value(Value::Object(map))
                .map_err(|e| ConfigError::invalid(key, e.to_string()))?;
        }
        current.validate()?;
        Ok(current)
    }

    fn to_map(&self) -> Result<Map<String, Value>, ConfigError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ConfigError::Malformed(
                "configuration did not serialise to an object".into(),
            )),
            Err(e) => Err(ConfigError::Malformed(e.to_string())),
        }
    }
}

fn parse_override_value(raw: &str) -> Value {
    let raw = raw.trim();
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => v,
        Err(_) => Value::String(raw.to_string()),
    }
}

/// Builder for [`DocumentConfig`].
#[derive(Debug)]
pub struct DocumentConfigBuilder {
    config: DocumentConfig,
}

impl DocumentConfigBuilder {
    pub fn extract_tables(mut self, v: bool) -> Self {
        self.config.extract_tables = v;
        self
    }

    pub fn extract_images(mut self, v: bool) -> Self {
        self.config.extract_images = v;
        self
    }

    pub fn ocr_enabled(mut self, v: bool) -> Self {
        self.config.ocr_enabled = v;
        self
    }

    pub fn ocr_engine(mut self, engine: OcrEngineKind) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn force_ocr(mut self, v: bool) -> Self {
        self.config.force_ocr = v;
        self
    }

    pub fn ocr_languages(mut self, languages: impl Into<String>) -> Self {
        self.config.ocr_languages = languages.into();
        self
    }

    pub fn ocr_max_pixels(mut self, px: u32) -> Self {
        self.config.ocr_max_pixels = px;
        self
    }

    pub fn max_pages(mut self, pages: Option<usize>) -> Self {
        self.config.max_pages = pages;
        self
    }

    pub fn pdf_backend(mut self, backend: PdfBackend) -> Self {
        self.config.pdf_backend = backend;
        self
    }

    pub fn image_export_mode(mut self, mode: ImageExportMode) -> Self {
        self.config.image_export_mode = mode;
        self
    }

    pub fn table_mode(mut self, mode: TableMode) -> Self {
        self.config.table_mode = mode;
        self
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = n;
        self
    }

    pub fn timeout_per_document(mut self, secs: u64) -> Self {
        self.config.timeout_per_document = secs;
        self
    }

    pub fn enrich_code(mut self, v: bool) -> Self {
        self.config.enrich_code = v;
        self
    }

    pub fn enrich_formula(mut self, v: bool) -> Self {
        self.config.enrich_formula = v;
        self
    }

    pub fn enrich_picture_classes(mut self, v: bool) -> Self {
        self.config.enrich_picture_classes = v;
        self
    }

    pub fn enrich_picture_description(mut self, v: bool) -> Self {
        self.config.enrich_picture_description = v;
        self
    }

    pub fn accelerator_device(mut self, device: AcceleratorDevice) -> Self {
        self.config.accelerator_device = device;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn vlm_provider(mut self, name: impl Into<String>) -> Self {
        self.config.vlm_provider = Some(name.into());
        self
    }

    pub fn vlm_model(mut self, model: impl Into<String>) -> Self {
        self.config.vlm_model = Some(model.into());
        self
    }

    pub fn vlm_max_retries(mut self, n: u32) -> Self {
        self.config.vlm_max_retries = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DocumentConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// How to separate pages in the rendered Markdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSeparator {
    /// Blocks of consecutive pages are joined like any other blocks. (default)
    #[default]
    None,
    /// Horizontal rule: `---`
    #[serde(alias = "hr")]
    HorizontalRule,
    /// HTML comment with the page number: `<!-- page N -->`
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// The separator placed before the blocks of `page_num` (1-indexed).
    /// `None` when pages are not separated.
    pub fn render(&self, page_num: usize) -> Option<String> {
        match self {
            PageSeparator::None => None,
            PageSeparator::HorizontalRule => Some("---".to_string()),
            PageSeparator::Comment => Some(format!("<!-- page {page_num} -->")),
            PageSeparator::Custom(s) => Some(s.clone()),
        }
    }
}
