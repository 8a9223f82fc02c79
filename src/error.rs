//! Error types for the edgequake-pdfbatch library.
//!
//! The taxonomy follows the blast radius of each failure:
//!
//! * [`ConfigError`]: **Fatal before dispatch.** The batch never starts.
//!   Raised by [`crate::config::DocumentConfig::validate`], by override
//!   parsing and by the [`crate::factory::ProcessorFactory`] when a backend
//!   cannot be brought up.
//!
//! * [`ExtractionError`] / [`ProcessError`]: **Per document.** Captured inside
//!   a failed [`crate::output::ProcessingResult`]; they never escape
//!   [`crate::processor::DocumentProcessor::process`].
//!
//! * [`OcrError`] / [`EnrichmentError`]: **Degraded.** A single page or a
//!   single enrichment stage is skipped and the document still succeeds.
//!
//! * [`BatchError`]: **Batch level.** Returned by the orchestrator when the
//!   batch cannot start or a worker dies outside the per-document boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unsatisfiable processing configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range or enumeration.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Two or more options contradict each other.
    #[error("Conflicting option '{field}': {reason}")]
    Conflict { field: String, reason: String },

    /// An override or config file named an option that does not exist.
    #[error("Unknown configuration option '{key}'")]
    UnknownOption { key: String },

    /// A configuration document could not be parsed.
    #[error("Malformed configuration: {0}")]
    Malformed(String),

    /// The selected backend or OCR engine cannot be used on this host.
    #[error("Backend '{backend}' is unavailable: {hint}")]
    BackendUnavailable { backend: String, hint: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn conflict(field: &str, reason: impl Into<String>) -> Self {
        Self::Conflict {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure to load or parse a single document.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// Path exists but is a directory, socket, etc.
    #[error("'{path}' is not a regular file")]
    NotAFile { path: PathBuf },

    #[error("'{path}' does not have a .pdf extension")]
    UnsupportedExtension { path: PathBuf },

    /// The file was read but does not start with `%PDF-`.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: Vec<u8> },

    #[error("Unsupported PDF version {version} in '{path}'")]
    UnsupportedVersion { path: PathBuf, version: String },

    /// No `%%EOF` marker near the end of the file.
    #[error("PDF '{path}' is truncated: no end-of-file marker found")]
    Truncated { path: PathBuf },

    /// Header, xref or object streams are unreadable.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    #[error("PDF '{path}' is encrypted and requires a password")]
    PasswordRequired { path: PathBuf },

    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The parsing backend reported an internal failure.
    #[error("Backend '{backend}' failed: {detail}")]
    Backend { backend: String, detail: String },

    #[error("I/O error on '{path}': {detail}")]
    Io { path: PathBuf, detail: String },

    /// Extraction observed the cancellation flag and stopped.
    #[error("Extraction cancelled")]
    Cancelled,
}

/// A single page could not be recognised. The page keeps its native text.
#[derive(Debug, Clone, Error)]
pub enum OcrError {
    #[error("page {page}: OCR engine '{engine}' failed: {detail}")]
    EngineFailed {
        page: usize,
        engine: String,
        detail: String,
    },

    #[error("page {page}: OCR output could not be parsed: {detail}")]
    BadOutput { page: usize, detail: String },
}

/// An enrichment stage failed. The stage's output is omitted.
#[derive(Debug, Clone, Error)]
#[error("{stage} omitted: {detail}")]
pub struct EnrichmentError {
    pub stage: String,
    pub detail: String,
}

impl EnrichmentError {
    pub fn new(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            detail: detail.into(),
        }
    }
}

/// Document-level failure captured into a failed result.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    #[error("loading failed: {0}")]
    Loading(ExtractionError),

    #[error("extracting failed: {0}")]
    Extraction(ExtractionError),

    #[error("serializing failed: {0}")]
    Serialization(String),

    /// The per-document wall-clock budget elapsed.
    #[error("timed out after {secs}s while {stage}")]
    Timeout { secs: u64, stage: String },

    /// A bug inside the pipeline panicked; caught at the processor boundary.
    #[error("internal error while {stage}: {detail}")]
    Panicked { stage: String, detail: String },

    /// The batch stopped (deadline or cancellation) before this document finished.
    #[error("abandoned: {reason}")]
    Abandoned { reason: String },
}

impl ProcessError {
    /// Short machine-readable label for logs and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::Loading(_) => "loading",
            ProcessError::Extraction(_) => "extraction",
            ProcessError::Serialization(_) => "serialization",
            ProcessError::Timeout { .. } => "timeout",
            ProcessError::Panicked { .. } => "internal",
            ProcessError::Abandoned { .. } => "abandoned",
        }
    }
}

/// Errors that stop a batch run.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Input directory '{path}' does not exist or is not a directory")]
    InputDirMissing { path: PathBuf },

    #[error("Failed to read input directory '{path}': {source}")]
    InputDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A worker died outside the per-document isolation boundary. The external
    /// scheduler should re-execute the partition.
    #[error("Worker {worker} died: {detail} (partial report at '{report}')")]
    WorkerFatal {
        worker: usize,
        detail: String,
        report: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_field() {
        let e = ConfigError::invalid("max_pages", "must be at least 1");
        let msg = e.to_string();
        assert!(msg.contains("max_pages"), "got: {msg}");
        assert!(msg.contains("at least 1"));
    }

    #[test]
    fn timeout_display_mentions_kind_and_stage() {
        let e = ProcessError::Timeout {
            secs: 5,
            stage: "extracting".into(),
        };
        let msg = e.to_string();
        assert!(msg.starts_with("timed out"), "got: {msg}");
        assert!(msg.contains("5s"));
        assert!(msg.contains("extracting"));
        assert_eq!(e.kind(), "timeout");
    }

    #[test]
    fn loading_error_is_prefixed() {
        let e = ProcessError::Loading(ExtractionError::Truncated {
            path: PathBuf::from("/tmp/a.pdf"),
        });
        assert!(e.to_string().starts_with("loading failed"));
        assert!(e.to_string().contains("truncated"));
    }

    #[test]
    fn enrichment_error_reads_as_omitted() {
        let e = EnrichmentError::new("picture_description", "provider offline");
        assert_eq!(e.to_string(), "picture_description omitted: provider offline");
    }

    #[test]
    fn worker_fatal_points_at_report() {
        let e = BatchError::WorkerFatal {
            worker: 2,
            detail: "panicked".into(),
            report: PathBuf::from("out/results.jsonl"),
        };
        let msg = e.to_string();
        assert!(msg.contains("Worker 2"));
        assert!(msg.contains("results.jsonl"));
    }
}
