//! Layout analysis: turn page text into [`Block`]s in reading order.
//!
//! Three inputs, one output shape:
//!
//! * positioned runs (pdfium text layer, tesseract lines) go through the
//!   geometric analysis in [`analyse_runs`];
//! * unpositioned text (`pdfium_text`) is split on blank lines by
//!   [`analyse_plain`];
//! * Markdown from a vision model is parsed by [`analyse_markdown`].
//!
//! The geometric pass assumes a single column. Lines are built from runs that
//! overlap vertically; a horizontal gap wider than the line height starts a
//! new cell, which is what table detection keys on.

use crate::backend::TextRun;
use crate::config::TableMode;
use crate::document::{join_lines, BBox, Block, BlockKind, Table};
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOptions {
    pub detect_tables: bool,
    pub table_mode: TableMode,
}

// ── Lines and cells ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Cell {
    text: String,
    left: f32,
    right: f32,
}

#[derive(Debug, Clone)]
struct Line {
    cells: Vec<Cell>,
    bbox: BBox,
}

impl Line {
    fn height(&self) -> f32 {
        self.bbox.height().max(1.0)
    }

    fn text(&self) -> String {
        self.cells
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn normalise_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn same_line(line: &BBox, run: &BBox) -> bool {
    let overlap = line.top.min(run.top) - line.bottom.max(run.bottom);
    let shorter = line.height().min(run.height());
    if shorter <= 0.0 {
        (line.center_y() - run.center_y()).abs() < 1.0
    } else {
        overlap >= 0.5 * shorter
    }
}

fn group_lines(runs: &[TextRun]) -> Vec<Line> {
    let mut sorted: Vec<&TextRun> = runs.iter().filter(|r| !r.text.trim().is_empty()).collect();
    sorted.sort_by(|a, b| {
        b.bbox
            .top
            .total_cmp(&a.bbox.top)
            .then(a.bbox.left.total_cmp(&b.bbox.left))
    });

    let mut rows: Vec<(BBox, Vec<&TextRun>)> = Vec::new();
    for run in sorted {
        match rows.last_mut() {
            Some(row) if same_line(&row.0, &run.bbox) => {
                row.0 = row.0.union(&run.bbox);
                row.1.push(run);
            }
            _ => rows.push((run.bbox, vec![run])),
        }
    }

    rows.into_iter()
        .map(|(bbox, members)| build_line(members, bbox))
        .filter(|line| !line.cells.is_empty())
        .collect()
}

fn build_line(mut members: Vec<&TextRun>, bbox: BBox) -> Line {
    members.sort_by(|a, b| a.bbox.left.total_cmp(&b.bbox.left));
    let height = bbox.height().max(1.0);

    let mut cells: Vec<Cell> = Vec::new();
    for run in members {
        let text = run.text.as_str();
        match cells.last_mut() {
            Some(cell) if run.bbox.left - cell.right <= height => {
                let gap = run.bbox.left - cell.right;
                if gap > 0.15 * height && !cell.text.ends_with(' ') && !text.starts_with(' ') {
                    cell.text.push(' ');
                }
                cell.text.push_str(text);
                cell.right = cell.right.max(run.bbox.right);
            }
            _ => cells.push(Cell {
                text: text.to_string(),
                left: run.bbox.left,
                right: run.bbox.right,
            }),
        }
    }
    for cell in &mut cells {
        cell.text = normalise_ws(&cell.text);
    }
    cells.retain(|c| !c.text.is_empty());
    Line { cells, bbox }
}

fn median(values: impl Iterator<Item = f32>) -> f32 {
    let mut v: Vec<f32> = values.collect();
    if v.is_empty() {
        return 1.0;
    }
    v.sort_by(f32::total_cmp);
    v[v.len() / 2]
}

// ── Classification ───────────────────────────────────────────────────────────

static RE_ORDERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,3})[.)]\s+(\S.*)$").unwrap());
static RE_ATX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());

const BULLETS: &[char] = &['•', '◦', '▪', '‣', '-', '*', '+', '–'];

/// `(ordered, item text)` when the line starts with a list marker.
fn list_marker(text: &str) -> Option<(bool, String)> {
    let t = text.trim_start();
    let first = t.chars().next()?;
    if BULLETS.contains(&first) {
        let rest = &t[first.len_utf8()..];
        if rest.starts_with(char::is_whitespace) && !rest.trim().is_empty() {
            return Some((false, rest.trim().to_string()));
        }
        return None;
    }
    RE_ORDERED
        .captures(t)
        .map(|caps| (true, caps[2].trim().to_string()))
}

fn heading_level(line: &Line, text: &str, body: f32) -> Option<u8> {
    let ratio = line.height() / body;
    if ratio < 1.2
        || line.cells.len() > 1
        || text.chars().count() > 120
        || !text.chars().any(char::is_alphabetic)
    {
        return None;
    }
    Some(if ratio >= 1.8 {
        1
    } else if ratio >= 1.45 {
        2
    } else {
        3
    })
}

/// `next` directly follows `prev` within the same block.
fn continues(prev: &Line, next: &Line, body: f32, factor: f32) -> bool {
    let distance = prev.bbox.center_y() - next.bbox.center_y();
    distance > 0.0 && distance <= factor * body.max(prev.height())
}

// ── Tables ───────────────────────────────────────────────────────────────────

fn column_anchors(rows: &[Line], tolerance: f32) -> Vec<f32> {
    let mut lefts: Vec<f32> = rows
        .iter()
        .flat_map(|r| r.cells.iter().map(|c| c.left))
        .collect();
    lefts.sort_by(f32::total_cmp);

    let mut anchors: Vec<f32> = Vec::new();
    let mut last = f32::NEG_INFINITY;
    for left in lefts {
        if left - last > tolerance {
            anchors.push(left);
        }
        last = left;
    }
    anchors
}

/// A table starting at `lines[0]`, with the number of lines it consumes.
fn detect_table(lines: &[Line], body: f32, mode: TableMode) -> Option<(Table, BBox, usize)> {
    let mut n = 0;
    while n < lines.len() && lines[n].cells.len() >= 2 {
        if n > 0 && !continues(&lines[n - 1], &lines[n], body, 2.5) {
            break;
        }
        n += 1;
    }
    if n < 2 {
        return None;
    }

    let (rows, used): (Vec<Vec<String>>, usize) = match mode {
        TableMode::Fast => {
            let cols = lines[0].cells.len();
            let m = lines[..n]
                .iter()
                .take_while(|l| l.cells.len() == cols)
                .count();
            if m < 2 {
                return None;
            }
            let rows = lines[..m]
                .iter()
                .map(|l| l.cells.iter().map(|c| c.text.clone()).collect())
                .collect();
            (rows, m)
        }
        TableMode::Accurate => {
            let tolerance = body.max(4.0);
            let anchors = column_anchors(&lines[..n], tolerance);
            if anchors.len() < 2 {
                return None;
            }
            let rows = lines[..n]
                .iter()
                .map(|line| {
                    let mut row = vec![String::new(); anchors.len()];
                    for cell in &line.cells {
                        let col = anchors
                            .iter()
                            .rposition(|a| *a <= cell.left + tolerance)
                            .unwrap_or(0);
                        if !row[col].is_empty() {
                            row[col].push(' ');
                        }
                        row[col].push_str(&cell.text);
                    }
                    row
                })
                .collect();
            (rows, n)
        }
    };

    let bbox = lines[1..used]
        .iter()
        .fold(lines[0].bbox, |acc, l| acc.union(&l.bbox));
    Some((
        Table {
            rows,
            header_rows: 1,
        },
        bbox,
        used,
    ))
}

// ── Entry points ─────────────────────────────────────────────────────────────

/// Geometric analysis of positioned runs on one page (1-indexed `page`).
pub fn analyse_runs(page: usize, runs: &[TextRun], options: &LayoutOptions) -> Vec<Block> {
    let lines = group_lines(runs);
    let body = median(lines.iter().map(Line::height));
    let table_at = |at: usize| {
        if options.detect_tables {
            detect_table(&lines[at..], body, options.table_mode)
        } else {
            None
        }
    };

    let mut blocks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if let Some((table, bbox, used)) = table_at(i) {
            blocks.push(Block::new(page, Some(bbox), BlockKind::Table(table)));
            i += used;
            continue;
        }

        let line = &lines[i];
        let text = line.text();

        if let Some(level) = heading_level(line, &text, body) {
            blocks.push(Block::new(
                page,
                Some(line.bbox),
                BlockKind::Heading { level, text },
            ));
            i += 1;
            continue;
        }

        if let Some((ordered, item)) = list_marker(&text) {
            let mut item_lines = vec![item];
            let mut bbox = line.bbox;
            let mut j = i + 1;
            while j < lines.len() && continues(&lines[j - 1], &lines[j], body, 1.6) {
                let next = &lines[j];
                let next_text = next.text();
                if next.bbox.left <= line.bbox.left + 2.0
                    || list_marker(&next_text).is_some()
                    || heading_level(next, &next_text, body).is_some()
                {
                    break;
                }
                item_lines.push(next_text);
                bbox = bbox.union(&next.bbox);
                j += 1;
            }
            blocks.push(Block::new(
                page,
                Some(bbox),
                BlockKind::ListItem {
                    text: join_lines(&item_lines),
                    ordered,
                },
            ));
            i = j;
            continue;
        }

        let mut para = vec![text];
        let mut bbox = line.bbox;
        let mut j = i + 1;
        while j < lines.len() && continues(&lines[j - 1], &lines[j], body, 1.6) {
            let next = &lines[j];
            let next_text = next.text();
            if heading_level(next, &next_text, body).is_some()
                || list_marker(&next_text).is_some()
                || table_at(j).is_some()
            {
                break;
            }
            para.push(next_text);
            bbox = bbox.union(&next.bbox);
            j += 1;
        }
        blocks.push(Block::new(page, Some(bbox), BlockKind::Paragraph { lines: para }));
        i = j;
    }
    blocks
}

fn flush_paragraph(page: usize, para: &mut Vec<String>, blocks: &mut Vec<Block>) {
    if !para.is_empty() {
        blocks.push(Block::new(
            page,
            None,
            BlockKind::Paragraph {
                lines: std::mem::take(para),
            },
        ));
    }
}

/// Unpositioned text: blank lines separate paragraphs; marker lines are list items.
pub fn analyse_plain(page: usize, text: &str) -> Vec<Block> {
    let normalised = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut blocks = Vec::new();
    let mut para: Vec<String> = Vec::new();

    for raw in normalised.lines() {
        let line = normalise_ws(raw);
        if line.is_empty() {
            flush_paragraph(page, &mut para, &mut blocks);
            continue;
        }
        if let Some((ordered, item)) = list_marker(&line) {
            flush_paragraph(page, &mut para, &mut blocks);
            blocks.push(Block::new(
                page,
                None,
                BlockKind::ListItem { text: item, ordered },
            ));
            continue;
        }
        para.push(line);
    }
    flush_paragraph(page, &mut para, &mut blocks);
    blocks
}

fn split_row(line: &str) -> Vec<String> {
    let t = line.trim();
    let t = t.strip_prefix('|').unwrap_or(t);
    let t = t.strip_suffix('|').unwrap_or(t);

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = t.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'|') {
            current.push('|');
            chars.next();
        } else if c == '|' {
            cells.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|c| {
            let t = c.trim();
            t.contains('-') && t.chars().all(|ch| matches!(ch, '-' | ':'))
        })
}

/// Markdown produced by a vision model.
pub fn analyse_markdown(page: usize, markdown: &str) -> Vec<Block> {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut blocks = Vec::new();
    let mut para: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let trimmed = lines[i].trim();

        if trimmed.is_empty() {
            flush_paragraph(page, &mut para, &mut blocks);
            i += 1;
            continue;
        }

        if let Some(lang) = trimmed.strip_prefix("```") {
            flush_paragraph(page, &mut para, &mut blocks);
            let language = Some(lang.trim())
                .filter(|l| !l.is_empty())
                .map(str::to_string);
            let mut body = Vec::new();
            i += 1;
            while i < lines.len() && !lines[i].trim().starts_with("```") {
                body.push(lines[i].trim_end());
                i += 1;
            }
            i += 1;
            blocks.push(Block::new(
                page,
                None,
                BlockKind::Code {
                    text: body.join("\n"),
                    language,
                },
            ));
            continue;
        }

        if let Some(after) = trimmed.strip_prefix("$$") {
            flush_paragraph(page, &mut para, &mut blocks);
            let mut body: Vec<&str> = Vec::new();
            i += 1;
            if let Some(inner) = after.strip_suffix("$$") {
                body.push(inner.trim());
            } else {
                if !after.trim().is_empty() {
                    body.push(after.trim());
                }
                while i < lines.len() {
                    let t = lines[i].trim();
                    i += 1;
                    if let Some(before) = t.strip_suffix("$$") {
                        if !before.trim().is_empty() {
                            body.push(before.trim());
                        }
                        break;
                    }
                    body.push(t);
                }
            }
            let text = body.join("\n");
            if !text.trim().is_empty() {
                blocks.push(Block::new(page, None, BlockKind::Formula { text }));
            }
            continue;
        }

        if let Some(caps) = RE_ATX.captures(trimmed) {
            flush_paragraph(page, &mut para, &mut blocks);
            let text = caps[2].trim().trim_end_matches('#').trim().to_string();
            blocks.push(Block::new(
                page,
                None,
                BlockKind::Heading {
                    level: caps[1].len() as u8,
                    text,
                },
            ));
            i += 1;
            continue;
        }

        if trimmed.starts_with('|') {
            flush_paragraph(page, &mut para, &mut blocks);
            let mut rows: Vec<Vec<String>> = Vec::new();
            let mut header_rows = 0;
            while i < lines.len() && lines[i].trim().starts_with('|') {
                let cells = split_row(lines[i]);
                if is_separator_row(&cells) {
                    if rows.len() == 1 {
                        header_rows = 1;
                    }
                } else {
                    rows.push(cells);
                }
                i += 1;
            }
            if !rows.is_empty() {
                blocks.push(Block::new(
                    page,
                    None,
                    BlockKind::Table(Table { rows, header_rows }),
                ));
            }
            continue;
        }

        if trimmed.starts_with("![") {
            // Image references from the model carry no bytes.
            i += 1;
            continue;
        }

        if let Some((ordered, item)) = list_marker(trimmed) {
            flush_paragraph(page, &mut para, &mut blocks);
            blocks.push(Block::new(
                page,
                None,
                BlockKind::ListItem { text: item, ordered },
            ));
            i += 1;
            continue;
        }

        para.push(trimmed.to_string());
        i += 1;
    }
    flush_paragraph(page, &mut para, &mut blocks);
    blocks
}
