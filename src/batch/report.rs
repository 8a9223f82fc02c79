//! BatchReport aggregation and the single report writer.
//!
//! Only the orchestrator task touches a [`ReportWriter`]. While the batch
//! runs, each result is appended to `<report>.partial` as one complete JSON
//! line, so a crash leaves a readable partial report. [`ReportWriter::finish`]
//! writes the final report sorted by file path through a temporary file and
//! renames it into place.

use super::OutputTarget;
use crate::error::BatchError;
use crate::output::ProcessingResult;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const REPORT_FILE_NAME: &str = "results.jsonl";
pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// Every result of one batch run, keyed by file path.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    entries: BTreeMap<String, ProcessingResult>,
    abandoned: usize,
    workers: usize,
    elapsed: Duration,
    report_path: PathBuf,
}

impl BatchReport {
    pub(crate) fn new(workers: usize, report_path: PathBuf) -> Self {
        Self {
            workers,
            report_path,
            ..Self::default()
        }
    }

    /// Record a result. A second result for the same path replaces the first.
    pub(crate) fn insert(&mut self, result: ProcessingResult) {
        self.entries.insert(result.file_path().to_string(), result);
    }

    pub(crate) fn insert_abandoned(&mut self, result: ProcessingResult) {
        self.abandoned += 1;
        self.insert(result);
    }

    pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(&path.display().to_string())
    }

    pub fn get(&self, path: &Path) -> Option<&ProcessingResult> {
        self.entries.get(&path.display().to_string())
    }

    /// Results in file-path order.
    pub fn iter(&self) -> impl Iterator<Item = &ProcessingResult> {
        self.entries.values()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.values().filter(|r| r.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned
    }

    /// Where the aggregated JSONL report was written.
    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.len(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            abandoned: self.abandoned,
            workers: self.workers,
            duration_ms: self.elapsed.as_millis() as u64,
            report: self.report_path.display().to_string(),
            failures: self
                .iter()
                .filter(|r| !r.success())
                .map(|r| FailureSummary {
                    file_path: r.file_path().to_string(),
                    error: r.error_message().unwrap_or_default().to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureSummary {
    pub file_path: String,
    pub error: String,
}

/// Counters written to `summary.json` and printed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub workers: usize,
    pub duration_ms: u64,
    pub report: String,
    pub failures: Vec<FailureSummary>,
}

/// Base names for each document's side files, planned before dispatch.
///
/// Discovery is case-insensitive and side files add suffixes to the stem, so
/// `a.pdf` and `a.PDF`, or `x.pdf` and `x_metadata.pdf`, would otherwise
/// write the same files in one directory. Names are compared
/// case-insensitively. Files are taken in path order: the first keeps its
/// stem, later ones get the first free `<stem>-N` with N from 2.
#[derive(Debug, Clone, Default)]
pub struct SideFileNames {
    stems: HashMap<PathBuf, String>,
}

impl SideFileNames {
    /// Plan names for `files`. `reserved` are file names already used in the
    /// output root (e.g. `summary.json`).
    pub fn plan(files: &[PathBuf], input_root: &Path, reserved: &[&str]) -> Self {
        let mut taken: HashSet<(PathBuf, String)> = reserved
            .iter()
            .map(|name| (PathBuf::new(), name.to_lowercase()))
            .collect();
        let mut sorted: Vec<&PathBuf> = files.iter().collect();
        sorted.sort();

        let mut stems = HashMap::with_capacity(files.len());
        for path in sorted {
            let dir = relative_dir(path, input_root);
            let stem = file_stem(path);
            let mut candidate = stem.clone();
            let mut n = 2;
            while side_file_names(&candidate)
                .iter()
                .any(|name| taken.contains(&(dir.clone(), name.to_lowercase())))
            {
                candidate = format!("{stem}-{n}");
                n += 1;
            }
            if candidate != stem {
                warn!(
                    "{}: side files would clash with another document; writing them as {}.*",
                    path.display(),
                    candidate
                );
            }
            for name in side_file_names(&candidate) {
                taken.insert((dir.clone(), name.to_lowercase()));
            }
            stems.insert(path.clone(), candidate);
        }
        Self { stems }
    }

    pub fn stem_for(&self, path: &Path) -> Option<&str> {
        self.stems.get(path).map(String::as_str)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".into())
}

/// Directory of `path` relative to `input_root`; empty outside it.
fn relative_dir(path: &Path, input_root: &Path) -> PathBuf {
    path.parent()
        .and_then(|p| p.strip_prefix(input_root).ok())
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// Every name a document writes next to the report.
fn side_file_names(stem: &str) -> [String; 4] {
    [
        format!("{stem}.md"),
        format!("{stem}.json"),
        format!("{stem}_metadata.json"),
        format!("{stem}_artifacts"),
    ]
}

/// Sole writer of the batch output.
pub struct ReportWriter {
    target: OutputTarget,
    input_root: PathBuf,
    write_side_files: bool,
    names: SideFileNames,
    report_path: PathBuf,
    partial_path: PathBuf,
    partial: tokio::fs::File,
}

fn write_failed(path: &Path, source: std::io::Error) -> BatchError {
    BatchError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), BatchError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| write_failed(parent, e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| write_failed(path, e))
}

impl ReportWriter {
    /// Create the output location and open the partial report.
    ///
    /// `input_root` is the discovery root; side files mirror each document's
    /// directory relative to it.
    pub async fn create(
        target: &OutputTarget,
        input_root: &Path,
        write_side_files: bool,
    ) -> Result<Self, BatchError> {
        let report_path = match target {
            OutputTarget::Directory(dir) => {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| write_failed(dir, e))?;
                dir.join(REPORT_FILE_NAME)
            }
            OutputTarget::File(file) => {
                if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| write_failed(parent, e))?;
                }
                file.clone()
            }
        };
        let partial_path = with_suffix(&report_path, ".partial");
        let partial = tokio::fs::File::create(&partial_path)
            .await
            .map_err(|e| write_failed(&partial_path, e))?;
        debug!("Writing partial report to {}", partial_path.display());

        Ok(Self {
            target: target.clone(),
            input_root: input_root.to_path_buf(),
            write_side_files,
            names: SideFileNames::default(),
            report_path,
            partial_path,
            partial,
        })
    }

    /// Use these planned side-file names. Unplanned documents fall back to
    /// their file stem.
    pub fn with_side_file_names(mut self, names: SideFileNames) -> Self {
        self.names = names;
        self
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    /// Append `result` to the partial report and write its side files.
    pub async fn append(&mut self, result: &ProcessingResult) -> Result<(), BatchError> {
        let mut line = result
            .to_json_line()
            .map_err(|e| write_failed(&self.partial_path, std::io::Error::other(e)))?;
        line.push('\n');
        self.partial
            .write_all(line.as_bytes())
            .await
            .map_err(|e| write_failed(&self.partial_path, e))?;
        self.partial
            .flush()
            .await
            .map_err(|e| write_failed(&self.partial_path, e))?;

        if result.success() && self.write_side_files {
            if let OutputTarget::Directory(out) = &self.target {
                self.write_side_files(out, result).await?;
            }
        }
        Ok(())
    }

    async fn write_side_files(&self, out: &Path, result: &ProcessingResult) -> Result<(), BatchError> {
        let source = Path::new(result.file_path());
        let stem = self
            .names
            .stem_for(source)
            .map(str::to_string)
            .unwrap_or_else(|| file_stem(source));
        let dir = out.join(relative_dir(source, &self.input_root));

        let metadata = serde_json::to_vec_pretty(result.metadata())
            .map_err(|e| write_failed(&dir, std::io::Error::other(e)))?;

        write_file(&dir.join(format!("{stem}.md")), result.content().as_bytes()).await?;
        write_file(&dir.join(format!("{stem}.json")), result.json_content().as_bytes()).await?;
        write_file(&dir.join(format!("{stem}_metadata.json")), &metadata).await?;
        for artifact in result.artifacts() {
            write_file(&dir.join(&artifact.relative_path), &artifact.bytes).await?;
        }
        Ok(())
    }

    /// Persist the complete report in path order and drop the partial file.
    pub async fn finish(mut self, report: &BatchReport) -> Result<(), BatchError> {
        self.partial
            .flush()
            .await
            .map_err(|e| write_failed(&self.partial_path, e))?;
        drop(self.partial);

        let mut body = String::new();
        for result in report.iter() {
            let line = result
                .to_json_line()
                .map_err(|e| write_failed(&self.report_path, std::io::Error::other(e)))?;
            body.push_str(&line);
            body.push('\n');
        }

        let tmp = with_suffix(&self.report_path, ".tmp");
        write_file(&tmp, body.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.report_path)
            .await
            .map_err(|e| write_failed(&self.report_path, e))?;
        tokio::fs::remove_file(&self.partial_path)
            .await
            .map_err(|e| write_failed(&self.partial_path, e))?;

        if let OutputTarget::Directory(out) = &self.target {
            let summary = serde_json::to_vec_pretty(&report.summary())
                .map_err(|e| write_failed(out, std::io::Error::other(e)))?;
            write_file(&out.join(SUMMARY_FILE_NAME), &summary).await?;
        }

        info!(
            "Report written to {} ({} entries)",
            self.report_path.display(),
            report.len()
        );
        Ok(())
    }
}
