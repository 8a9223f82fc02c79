//! OCR through the `tesseract` command-line tool.
//!
//! Each page raster is written to a temporary PNG and recognised with
//! `tesseract <png> stdout -l <langs> tsv`. The TSV rows at level 5 are
//! words; they are grouped into lines by `(block, paragraph, line)` and the
//! mean word confidence becomes the page confidence.

use super::{OcrContent, OcrEngine, OcrLine, OcrPage};
use crate::error::{ConfigError, OcrError};
use crate::pipeline::encode;
use futures::future::BoxFuture;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Environment variable naming the tesseract binary. Default: `tesseract` on `PATH`.
pub const TESSERACT_CMD_ENV: &str = "TESSERACT_CMD";

pub struct TesseractOcr {
    binary: PathBuf,
    languages: String,
}

impl TesseractOcr {
    /// Locate the binary (`TESSERACT_CMD` or `tesseract`) and check it runs.
    pub fn from_env(languages: &str) -> Result<Self, ConfigError> {
        let binary = std::env::var_os(TESSERACT_CMD_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("tesseract"));
        Self::probe(&binary)?;
        Ok(Self {
            binary,
            languages: languages.to_string(),
        })
    }

    /// `tesseract --version` must exit successfully.
    pub fn probe(binary: &Path) -> Result<(), ConfigError> {
        let unavailable = |hint: String| ConfigError::BackendUnavailable {
            backend: "tesseract".to_string(),
            hint,
        };
        let output = std::process::Command::new(binary)
            .arg("--version")
            .output()
            .map_err(|e| {
                unavailable(format!(
                    "could not run '{}': {e}. Install tesseract or set {TESSERACT_CMD_ENV}.",
                    binary.display()
                ))
            })?;
        if !output.status.success() {
            return Err(unavailable(format!(
                "'{} --version' exited with {}",
                binary.display(),
                output.status
            )));
        }
        Ok(())
    }

    fn failed(&self, page: usize, detail: impl Into<String>) -> OcrError {
        OcrError::EngineFailed {
            page,
            engine: "tesseract".to_string(),
            detail: detail.into(),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize<'a>(
        &'a self,
        page_no: usize,
        image: &'a DynamicImage,
    ) -> BoxFuture<'a, Result<OcrPage, OcrError>> {
        Box::pin(async move {
            let png = encode::encode_png(image)
                .map_err(|e| self.failed(page_no, format!("image encoding failed: {e}")))?;
            let raster = tempfile::Builder::new()
                .prefix("pdfbatch-ocr-")
                .suffix(".png")
                .tempfile()
                .map_err(|e| self.failed(page_no, format!("temp file: {e}")))?;
            tokio::fs::write(raster.path(), &png)
                .await
                .map_err(|e| self.failed(page_no, format!("temp file: {e}")))?;

            let output = Command::new(&self.binary)
                .arg(raster.path())
                .arg("stdout")
                .args(["-l", &self.languages, "tsv"])
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| self.failed(page_no, e.to_string()))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(self.failed(
                    page_no,
                    format!("exited with {}: {}", output.status, stderr.trim()),
                ));
            }

            let tsv = String::from_utf8_lossy(&output.stdout);
            let page = parse_tsv(page_no, &tsv)?;
            debug!(
                "Page {}: tesseract confidence {:?}",
                page_no, page.confidence
            );
            Ok(page)
        })
    }
}

#[derive(Debug)]
struct LineAcc {
    key: (u32, u32, u32),
    words: Vec<String>,
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

/// Parse tesseract TSV output into lines plus a mean confidence in `[0, 1]`.
pub fn parse_tsv(page_no: usize, tsv: &str) -> Result<OcrPage, OcrError> {
    let bad = |row: usize, detail: String| OcrError::BadOutput {
        page: page_no,
        detail: format!("row {row}: {detail}"),
    };

    let mut lines: Vec<LineAcc> = Vec::new();
    let mut confidences: Vec<f32> = Vec::new();

    for (n, row) in tsv.lines().enumerate() {
        if row.trim().is_empty() || row.starts_with("level") {
            continue;
        }
        let cols: Vec<&str> = row.splitn(12, '\t').collect();
        if cols.len() < 11 {
            return Err(bad(n + 1, format!("expected 12 columns, got {}", cols.len())));
        }
        let int = |i: usize| -> Result<i64, OcrError> {
            cols[i]
                .trim()
                .parse::<i64>()
                .map_err(|e| bad(n + 1, format!("column {}: {e}", i + 1)))
        };

        if int(0)? != 5 {
            continue;
        }
        let text = cols.get(11).map(|t| t.trim()).unwrap_or("");
        if text.is_empty() {
            continue;
        }

        let conf: f32 = cols[10]
            .trim()
            .parse()
            .map_err(|e| bad(n + 1, format!("confidence: {e}")))?;
        if conf >= 0.0 {
            confidences.push(conf);
        }

        // Pixel columns, clamped into u32 so malformed boxes cannot overflow.
        let px = |i: usize| -> Result<u32, OcrError> {
            Ok(u32::try_from(int(i)?.max(0)).unwrap_or(u32::MAX))
        };
        let key = (px(2)?, px(3)?, px(4)?);
        let left = px(6)?;
        let top = px(7)?;
        let right = left.saturating_add(px(8)?);
        let bottom = top.saturating_add(px(9)?);

        match lines.last_mut() {
            Some(line) if line.key == key => {
                line.words.push(text.to_string());
                line.left = line.left.min(left);
                line.top = line.top.min(top);
                line.right = line.right.max(right);
                line.bottom = line.bottom.max(bottom);
            }
            _ => lines.push(LineAcc {
                key,
                words: vec![text.to_string()],
                left,
                top,
                right,
                bottom,
            }),
        }
    }

    let confidence = if confidences.is_empty() {
        None
    } else {
        let mean = confidences.iter().sum::<f32>() / confidences.len() as f32;
        Some((mean / 100.0).clamp(0.0, 1.0))
    };

    Ok(OcrPage {
        content: OcrContent::Lines(
            lines
                .into_iter()
                .map(|l| OcrLine {
                    text: l.words.join(" "),
                    left: l.left,
                    top: l.top,
                    width: l.right - l.left,
                    height: l.bottom - l.top,
                })
                .collect(),
        ),
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut s = String::from(HEADER);
        for r in rows {
            s.push('\n');
            s.push_str(r);
        }
        s
    }

    #[test]
    fn groups_words_into_lines() {
        let input = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t1000\t1400\t-1\t",
            "4\t1\t1\t1\t1\t0\t100\t100\t300\t30\t-1\t",
            "5\t1\t1\t1\t1\t1\t100\t100\t120\t30\t90\tHello",
            "5\t1\t1\t1\t1\t2\t230\t102\t170\t28\t80\tworld",
            "5\t1\t1\t1\t2\t1\t100\t150\t200\t30\t70\tSecond",
        ]);
        let page = parse_tsv(1, &input).unwrap();
        let OcrContent::Lines(lines) = page.content else {
            panic!("expected lines");
        };
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Hello world");
        assert_eq!(lines[0].left, 100);
        assert_eq!(lines[0].width, 300);
        assert_eq!(lines[0].height, 30);
        assert_eq!(lines[1].text, "Second");
        let conf = page.confidence.unwrap();
        assert!((conf - 0.8).abs() < 1e-6, "got {conf}");
    }

    #[test]
    fn empty_output_has_no_confidence() {
        let page = parse_tsv(3, HEADER).unwrap();
        assert_eq!(page.confidence, None);
        assert_eq!(page.content, OcrContent::Lines(vec![]));
    }

    #[test]
    fn oversized_boxes_saturate() {
        let input = tsv(&["5\t1\t1\t1\t1\t1\t4294967000\t10\t99999999999\t30\t90\tWide"]);
        let page = parse_tsv(1, &input).unwrap();
        let OcrContent::Lines(lines) = page.content else {
            panic!("expected lines");
        };
        assert_eq!(lines[0].left, 4_294_967_000);
        assert_eq!(lines[0].width, u32::MAX - 4_294_967_000);
        assert_eq!(lines[0].height, 30);
    }

    #[test]
    fn malformed_row_is_bad_output() {
        let err = parse_tsv(2, &tsv(&["5\t1\tx"])).unwrap_err();
        assert!(matches!(err, OcrError::BadOutput { page: 2, .. }));
    }

    #[test]
    fn probe_reports_missing_binary() {
        let err = TesseractOcr::probe(Path::new("/nonexistent/tesseract-binary")).unwrap_err();
        assert!(matches!(err, ConfigError::BackendUnavailable { .. }));
    }
}
