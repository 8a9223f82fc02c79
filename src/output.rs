//! Per-document result types.

use crate::document::PdfInfo;
use crate::error::ProcessError;
use crate::serialize::{ImageArtifact, Rendered};
use serde::Serialize;
use std::path::Path;

/// Reported when no page carries a confidence score.
pub const CONFIDENCE_SENTINEL: f32 = 0.0;

/// The `metadata` object of a [`ProcessingResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMetadata {
    pub file_name: String,
    pub file_size: u64,
    /// Including the leading dot.
    pub file_extension: String,
    pub file_path: String,
    /// Pages actually processed (bounded by `max_pages`).
    pub num_pages: usize,
    /// Pages in the file.
    pub total_pages: usize,
    /// Mean backend-reported confidence in `[0, 1]`, or [`CONFIDENCE_SENTINEL`].
    pub confidence_score: f32,
    pub document_metadata: PdfInfo,
    /// Sub-document problems and omitted enrichment stages.
    pub warnings: Vec<String>,
}

impl ResultMetadata {
    /// File facts only, for documents that failed before a tree existed.
    pub fn for_file(path: &Path, file_size: u64) -> Self {
        Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_size,
            file_extension: path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default(),
            file_path: path.display().to_string(),
            num_pages: 0,
            total_pages: 0,
            confidence_score: CONFIDENCE_SENTINEL,
            document_metadata: PdfInfo::default(),
            warnings: Vec::new(),
        }
    }
}

/// Outcome of converting one document.
///
/// Built once by the processor and never mutated. The two constructors keep
/// the success invariant: a successful result has content and no error
/// message; a failed one has an error message and no content.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    success: bool,
    content: String,
    json_content: String,
    metadata: ResultMetadata,
    error_message: Option<String>,
    file_path: String,
    #[serde(skip)]
    artifacts: Vec<ImageArtifact>,
}

impl ProcessingResult {
    pub(crate) fn succeeded(file_path: &Path, rendered: Rendered) -> Self {
        Self {
            success: true,
            content: rendered.markdown,
            json_content: rendered.json,
            metadata: rendered.metadata,
            error_message: None,
            file_path: file_path.display().to_string(),
            artifacts: rendered.artifacts,
        }
    }

    pub(crate) fn failed(file_path: &Path, error: &ProcessError, metadata: ResultMetadata) -> Self {
        Self {
            success: false,
            content: String::new(),
            json_content: String::new(),
            metadata,
            error_message: Some(error.to_string()),
            file_path: file_path.display().to_string(),
            artifacts: Vec::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// Rendered Markdown. Empty on failure.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Rendered JSON document. Empty on failure.
    pub fn json_content(&self) -> &str {
        &self.json_content
    }

    pub fn metadata(&self) -> &ResultMetadata {
        &self.metadata
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Image files to write next to the Markdown (referenced mode only).
    pub fn artifacts(&self) -> &[ImageArtifact] {
        &self.artifacts
    }

    /// One JSON line for the aggregated report.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn failed_result_has_message_and_no_content() {
        let path = PathBuf::from("/in/broken.pdf");
        let err = ProcessError::Serialization("bad float".into());
        let r = ProcessingResult::failed(&path, &err, ResultMetadata::for_file(&path, 12));
        assert!(!r.success());
        assert!(r.content().is_empty());
        assert!(r.json_content().is_empty());
        assert_eq!(r.error_message(), Some("serializing failed: bad float"));
        assert_eq!(r.metadata().file_extension, ".pdf");
        assert_eq!(r.metadata().file_size, 12);
        assert_eq!(r.metadata().confidence_score, CONFIDENCE_SENTINEL);
    }

    #[test]
    fn json_line_has_report_fields() {
        let path = PathBuf::from("/in/a.pdf");
        let err = ProcessError::Abandoned {
            reason: "batch deadline reached".into(),
        };
        let r = ProcessingResult::failed(&path, &err, ResultMetadata::for_file(&path, 0));
        let v: serde_json::Value = serde_json::from_str(&r.to_json_line().unwrap()).unwrap();
        for key in [
            "success",
            "content",
            "json_content",
            "metadata",
            "error_message",
            "file_path",
        ] {
            assert!(v.get(key).is_some(), "missing {key}");
        }
        assert!(v.get("artifacts").is_none());
        assert_eq!(v["metadata"]["file_name"], "a.pdf");
        assert_eq!(v["file_path"], "/in/a.pdf");
    }
}
