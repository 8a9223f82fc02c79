//! The in-memory document tree built by extraction and consumed by the
//! enrichment chain and the serializer.
//!
//! A [`DocumentTree`] is owned by exactly one pipeline invocation and dropped
//! once serialized. Picture bytes sit behind `Arc<[u8]>` so the enrichment
//! chain can take cheap working copies.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Axis-aligned rectangle in PDF points, origin bottom-left, y growing upward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

impl BBox {
    pub fn new(left: f32, bottom: f32, right: f32, top: f32) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    pub fn width(&self) -> f32 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.top - self.bottom).max(0.0)
    }

    pub fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            left: self.left.min(other.left),
            bottom: self.bottom.min(other.bottom),
            right: self.right.max(other.right),
            top: self.top.max(other.top),
        }
    }
}

/// The input file as seen by the loading stage.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_name: String,
    /// Extension including the leading dot, e.g. `.pdf`.
    pub extension: String,
    pub stem: String,
    /// Base name of the files written for this document (`<output_stem>.md`,
    /// `<output_stem>_artifacts/`). Equal to `stem` unless a batch renamed it
    /// to avoid a clash with another document.
    pub output_stem: String,
    pub size: u64,
}

/// Document information dictionary plus the header version.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PdfInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<String>,
    pub pdf_version: String,
}

/// Where a page's text came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TextSource {
    /// The PDF's own text layer.
    TextLayer,
    /// An OCR engine.
    Ocr { engine: String },
    /// No text at all (image-only page without OCR).
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageInfo {
    /// 1-indexed.
    pub page_no: usize,
    pub width: f32,
    pub height: f32,
    pub text_source: TextSource,
    /// Backend-reported extraction confidence in `[0, 1]`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    /// Row-major cells. The first `header_rows` rows are headers.
    pub rows: Vec<Vec<String>>,
    pub header_rows: usize,
}

impl Table {
    pub fn num_cols(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PictureClass {
    pub label: String,
    pub confidence: f32,
}

/// An image extracted from a page, stored as PNG.
#[derive(Debug, Clone, PartialEq)]
pub struct Picture {
    /// Stable 1-based ordinal within the document.
    pub ordinal: usize,
    pub png: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub classification: Option<PictureClass>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Heading { level: u8, text: String },
    /// Lines are kept separate so enrichers can see line structure.
    Paragraph { lines: Vec<String> },
    ListItem { text: String, ordered: bool },
    Table(Table),
    Picture(Picture),
    Code { text: String, language: Option<String> },
    Formula { text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// 1-indexed page the block belongs to.
    pub page: usize,
    pub bbox: Option<BBox>,
    pub kind: BlockKind,
}

impl Block {
    pub fn new(page: usize, bbox: Option<BBox>, kind: BlockKind) -> Self {
        Self { page, bbox, kind }
    }
}

/// Join paragraph lines into display text, undoing end-of-line hyphenation.
pub fn join_lines(lines: &[String]) -> String {
    let mut out = String::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if out.is_empty() {
            out.push_str(line);
        } else if out.ends_with('-')
            && !out.ends_with(" -")
            && line.chars().next().is_some_and(char::is_lowercase)
        {
            out.pop();
            out.push_str(line);
        } else {
            out.push(' ');
            out.push_str(line);
        }
    }
    out
}

/// Parsed representation of one PDF.
#[derive(Debug, Clone)]
pub struct DocumentTree {
    pub source: SourceFile,
    pub info: PdfInfo,
    /// Pages in the file, regardless of `max_pages`.
    pub total_pages: usize,
    /// Processed pages only.
    pub pages: Vec<PageInfo>,
    /// Content in reading order.
    pub blocks: Vec<Block>,
    /// Sub-document problems (an unreadable image, a failed OCR page, an
    /// omitted enrichment). None of them fail the document.
    pub warnings: Vec<String>,
}

impl DocumentTree {
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn pictures(&self) -> impl Iterator<Item = &Picture> {
        self.blocks.iter().filter_map(|b| match &b.kind {
            BlockKind::Picture(p) => Some(p),
            _ => None,
        })
    }

    pub fn pictures_mut(&mut self) -> impl Iterator<Item = &mut Picture> {
        self.blocks.iter_mut().filter_map(|b| match &mut b.kind {
            BlockKind::Picture(p) => Some(p),
            _ => None,
        })
    }

    /// Mean of the page confidences that were reported, or `None`.
    pub fn mean_confidence(&self) -> Option<f32> {
        let scores: Vec<f32> = self.pages.iter().filter_map(|p| p.confidence).collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f32>() / scores.len() as f32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn join_lines_repairs_hyphenation() {
        assert_eq!(
            join_lines(&lines(&["The conver-", "sion pipeline"])),
            "The conversion pipeline"
        );
    }

    #[test]
    fn join_lines_keeps_real_dashes() {
        assert_eq!(
            join_lines(&lines(&["Pages 1 -", "and more"])),
            "Pages 1 - and more"
        );
        assert_eq!(
            join_lines(&lines(&["state-of-the-", "Art"])),
            "state-of-the- Art"
        );
    }

    #[test]
    fn bbox_union_and_size() {
        let a = BBox::new(10.0, 10.0, 20.0, 30.0);
        let b = BBox::new(5.0, 15.0, 25.0, 20.0);
        let u = a.union(&b);
        assert_eq!(u, BBox::new(5.0, 10.0, 25.0, 30.0));
        assert_eq!(u.width(), 20.0);
        assert_eq!(u.height(), 20.0);
    }

    #[test]
    fn mean_confidence_ignores_unreported_pages() {
        let page = |no, confidence| PageInfo {
            page_no: no,
            width: 612.0,
            height: 792.0,
            text_source: TextSource::TextLayer,
            confidence,
        };
        let tree = DocumentTree {
            source: SourceFile {
                path: PathBuf::from("a.pdf"),
                file_name: "a.pdf".into(),
                extension: ".pdf".into(),
                stem: "a".into(),
                output_stem: "a".into(),
                size: 1,
            },
            info: PdfInfo::default(),
            total_pages: 3,
            pages: vec![page(1, Some(1.0)), page(2, None), page(3, Some(0.5))],
            blocks: vec![],
            warnings: vec![],
        };
        assert_eq!(tree.mean_confidence(), Some(0.75));
    }
}
