//! Serializer: document tree → Markdown, JSON and metadata.
//!
//! Rendering is a pure function of the tree and the two output options, so
//! two runs over the same tree produce byte-identical strings. JSON objects
//! come from `serde_json`'s sorted map, which keeps key order stable too.

use crate::config::{DocumentConfig, ImageExportMode, PageSeparator};
use crate::document::{join_lines, Block, BlockKind, DocumentTree, Picture, Table};
use crate::output::{ResultMetadata, CONFIDENCE_SENTINEL};
use crate::pipeline::encode::png_data_uri;
use serde_json::{json, Value};
use std::sync::Arc;

/// Rendered in place of an empty body so successful content is never empty.
pub const EMPTY_DOCUMENT_MARKER: &str = "<!-- no extractable text -->";

/// Markdown for a picture in placeholder mode.
pub const IMAGE_PLACEHOLDER: &str = "<!-- image -->";

pub const JSON_SCHEMA: &str = "edgequake-pdfbatch/document";
pub const JSON_VERSION: &str = "1.0";

/// A picture to persist beside the Markdown (referenced mode).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageArtifact {
    /// Relative to the Markdown file, e.g. `report_artifacts/image_0001.png`.
    pub relative_path: String,
    pub bytes: Arc<[u8]>,
}

/// The three outputs for one document plus any side artifacts.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub markdown: String,
    pub json: String,
    pub metadata: ResultMetadata,
    pub artifacts: Vec<ImageArtifact>,
}

#[derive(Debug, Clone)]
pub struct Serializer {
    mode: ImageExportMode,
    page_separator: PageSeparator,
}

impl Serializer {
    pub fn new(mode: ImageExportMode, page_separator: PageSeparator) -> Self {
        Self {
            mode,
            page_separator,
        }
    }

    pub fn from_config(config: &DocumentConfig) -> Self {
        Self::new(config.image_export_mode, config.page_separator.clone())
    }

    pub fn render(&self, doc: &DocumentTree) -> Result<Rendered, serde_json::Error> {
        let artifacts = self.artifacts(doc);
        Ok(Rendered {
            markdown: self.markdown(doc),
            json: self.json(doc)?,
            metadata: metadata(doc),
            artifacts,
        })
    }

    // ── Markdown ─────────────────────────────────────────────────────────

    pub fn markdown(&self, doc: &DocumentTree) -> String {
        if doc.blocks.is_empty() {
            return format!("{EMPTY_DOCUMENT_MARKER}\n");
        }

        let mut out = String::new();
        let mut prev: Option<&Block> = None;
        let mut list_no = 0usize;

        for block in &doc.blocks {
            let page_changed = prev.is_some_and(|p| p.page != block.page);
            if page_changed {
                if let Some(sep) = self.page_separator.render(block.page) {
                    out.push_str("\n\n");
                    out.push_str(&sep);
                    prev = None;
                }
            }

            let continues_list = matches!(
                (prev.map(|p| &p.kind), &block.kind),
                (
                    Some(BlockKind::ListItem { ordered: a, .. }),
                    BlockKind::ListItem { ordered: b, .. }
                ) if a == b
            );
            list_no = if continues_list { list_no + 1 } else { 1 };

            if !out.is_empty() {
                out.push_str(if continues_list { "\n" } else { "\n\n" });
            }
            out.push_str(&self.block_markdown(doc, block, list_no));
            prev = Some(block);
        }
        out.push('\n');
        out
    }

    fn block_markdown(&self, doc: &DocumentTree, block: &Block, list_no: usize) -> String {
        match &block.kind {
            BlockKind::Heading { level, text } => {
                format!("{} {}", "#".repeat((*level).clamp(1, 6) as usize), text)
            }
            BlockKind::Paragraph { lines } => join_lines(lines),
            BlockKind::ListItem { text, ordered: true } => format!("{list_no}. {text}"),
            BlockKind::ListItem { text, ordered: false } => format!("- {text}"),
            BlockKind::Table(table) => table_markdown(table),
            BlockKind::Picture(picture) => {
                let image = match self.mode {
                    ImageExportMode::Embedded => format!("![Image]({})", png_data_uri(&picture.png)),
                    ImageExportMode::Placeholder => IMAGE_PLACEHOLDER.to_string(),
                    ImageExportMode::Referenced => {
                        format!("![Image]({})", artifact_path(doc, picture))
                    }
                };
                match &picture.description {
                    Some(d) => format!("{image}\n\n*{d}*"),
                    None => image,
                }
            }
            BlockKind::Code { text, language } => {
                format!("```{}\n{}\n```", language.as_deref().unwrap_or(""), text)
            }
            BlockKind::Formula { text } => format!("$$\n{text}\n$$"),
        }
    }

    // ── JSON ─────────────────────────────────────────────────────────────

    pub fn json(&self, doc: &DocumentTree) -> Result<String, serde_json::Error> {
        let body: Vec<Value> = doc
            .blocks
            .iter()
            .map(|b| self.block_json(doc, b))
            .collect();
        let value = json!({
            "schema": JSON_SCHEMA,
            "version": JSON_VERSION,
            "name": doc.source.stem,
            "origin": {
                "filename": doc.source.file_name,
                "mimetype": "application/pdf",
                "size": doc.source.size,
            },
            "num_pages": doc.num_pages(),
            "total_pages": doc.total_pages,
            "pages": doc.pages,
            "body": body,
        });
        serde_json::to_string_pretty(&value)
    }

    fn block_json(&self, doc: &DocumentTree, block: &Block) -> Value {
        let mut value = match &block.kind {
            BlockKind::Heading { level, text } => {
                json!({ "type": "heading", "level": level, "text": text })
            }
            BlockKind::Paragraph { lines } => {
                json!({ "type": "paragraph", "text": join_lines(lines) })
            }
            BlockKind::ListItem { text, ordered } => {
                json!({ "type": "list_item", "ordered": ordered, "text": text })
            }
            BlockKind::Table(table) => json!({
                "type": "table",
                "header_rows": table.header_rows,
                "num_cols": table.num_cols(),
                "rows": table.rows,
            }),
            BlockKind::Picture(picture) => {
                let image = match self.mode {
                    ImageExportMode::Embedded => {
                        json!({ "mode": "embedded", "uri": png_data_uri(&picture.png) })
                    }
                    ImageExportMode::Placeholder => json!({ "mode": "placeholder" }),
                    ImageExportMode::Referenced => {
                        json!({ "mode": "referenced", "path": artifact_path(doc, picture) })
                    }
                };
                json!({
                    "type": "picture",
                    "ordinal": picture.ordinal,
                    "width": picture.width,
                    "height": picture.height,
                    "image": image,
                    "classification": picture.classification,
                    "description": picture.description,
                })
            }
            BlockKind::Code { text, language } => {
                json!({ "type": "code", "language": language, "text": text })
            }
            BlockKind::Formula { text } => json!({ "type": "formula", "text": text }),
        };
        if let Value::Object(map) = &mut value {
            map.insert("page".into(), json!(block.page));
            if let Some(bbox) = &block.bbox {
                map.insert("bbox".into(), json!(bbox));
            }
        }
        value
    }

    fn artifacts(&self, doc: &DocumentTree) -> Vec<ImageArtifact> {
        if self.mode != ImageExportMode::Referenced {
            return Vec::new();
        }
        doc.pictures()
            .map(|p| ImageArtifact {
                relative_path: artifact_path(doc, p),
                bytes: Arc::clone(&p.png),
            })
            .collect()
    }
}

fn artifact_path(doc: &DocumentTree, picture: &Picture) -> String {
    format!(
        "{}_artifacts/image_{:04}.png",
        doc.source.output_stem, picture.ordinal
    )
}

fn escape_cell(cell: &str) -> String {
    cell.replace('|', "\\|").replace(['\n', '\r'], " ").trim().to_string()
}

fn table_markdown(table: &Table) -> String {
    let cols = table.num_cols().max(1);
    let row_line = |row: &[String]| {
        let cells: Vec<String> = (0..cols)
            .map(|i| row.get(i).map(|c| escape_cell(c)).unwrap_or_default())
            .collect();
        format!("| {} |", cells.join(" | "))
    };

    // GFM always needs a header row; headerless tables get an empty one.
    let (header, body): (Vec<String>, &[Vec<String>]) = match table.header_rows {
        0 => (vec![String::new(); cols], &table.rows[..]),
        _ => match table.rows.split_first() {
            Some((first, rest)) => (first.clone(), rest),
            None => (vec![String::new(); cols], &table.rows[..]),
        },
    };

    let mut lines = vec![row_line(&header), format!("|{}", " --- |".repeat(cols))];
    lines.extend(body.iter().map(|r| row_line(r)));
    lines.join("\n")
}

/// Metadata for a successfully extracted tree.
pub fn metadata(doc: &DocumentTree) -> ResultMetadata {
    ResultMetadata {
        file_name: doc.source.file_name.clone(),
        file_size: doc.source.size,
        file_extension: doc.source.extension.clone(),
        file_path: doc.source.path.display().to_string(),
        num_pages: doc.num_pages(),
        total_pages: doc.total_pages,
        confidence_score: doc.mean_confidence().unwrap_or(CONFIDENCE_SENTINEL),
        document_metadata: doc.info.clone(),
        warnings: doc.warnings.clone(),
    }
}
