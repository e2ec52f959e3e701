//! Geometry analysis for layout reconstruction.
//!
//! Input is a list of positioned text runs per page, as extracted from the
//! rendered PDF. Output is a [`DocxDocument`]. The analysis works bottom-up:
//!
//! ```text
//! runs ──► lines ──► segments ──► blocks
//!          (same     (split at    (paragraphs by spacing and size,
//!           baseline) wide gaps)   tables by repeated column layout)
//! ```
//!
//! Coordinates are PDF points measured from the top-left corner of the page;
//! `baseline` grows downwards.

use crate::docx::{
    Alignment, Block, DocxDocument, PageGeometry, Paragraph, ParagraphStyle, Run, TWIPS_PER_POINT,
    Table,
};

/// Gap, in ems, above which two runs on one baseline are separate cells.
const CELL_GAP_EM: f64 = 1.0;
/// Gap, in ems, above which a space is inserted between two runs.
const WORD_GAP_EM: f64 = 0.15;
/// Baseline distance, in ems, still considered the same paragraph.
const LINE_PITCH_EM: f64 = 1.6;
/// Largest spacing before a block, in twips (one inch).
const MAX_SPACING: u32 = 1440;

/// One piece of text shown at a single position.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    /// Left edge, points from the left of the page.
    pub x: f64,
    /// Baseline, points from the top of the page.
    pub baseline: f64,
    /// Advance width in points.
    pub width: f64,
    /// Effective font size in points.
    pub size: f64,
    pub text: String,
    pub bold: bool,
    pub italic: bool,
}

impl TextRun {
    fn right(&self) -> f64 {
        self.x + self.width
    }
}

/// Text content and size of one page.
#[derive(Debug, Clone, Default)]
pub struct PageText {
    pub width: f64,
    pub height: f64,
    pub runs: Vec<TextRun>,
}

#[derive(Debug, Clone)]
struct Segment {
    x0: f64,
    x1: f64,
    runs: Vec<TextRun>,
}

#[derive(Debug, Clone)]
struct Line {
    baseline: f64,
    size: f64,
    segments: Vec<Segment>,
}

impl Line {
    fn x0(&self) -> f64 {
        self.segments.first().map(|s| s.x0).unwrap_or(0.0)
    }

    fn x1(&self) -> f64 {
        self.segments.last().map(|s| s.x1).unwrap_or(0.0)
    }

    fn bold(&self) -> bool {
        self.segments
            .iter()
            .flat_map(|s| &s.runs)
            .all(|r| r.bold || r.text.trim().is_empty())
    }
}

/// Page-level frame used to judge indentation and alignment.
#[derive(Debug, Clone, Copy)]
struct Frame {
    left: f64,
    right: f64,
}

impl Frame {
    fn center(&self) -> f64 {
        (self.left + self.right) / 2.0
    }

    fn width(&self) -> f64 {
        (self.right - self.left).max(1.0)
    }
}

// ============================================================================
// Runs → lines
// ============================================================================

fn group_lines(runs: &[TextRun]) -> Vec<Line> {
    let mut sorted: Vec<&TextRun> = runs.iter().filter(|r| !r.text.is_empty()).collect();
    sorted.sort_by(|a, b| {
        a.baseline
            .total_cmp(&b.baseline)
            .then(a.x.total_cmp(&b.x))
    });

    let mut buckets: Vec<(f64, f64, Vec<TextRun>)> = Vec::new();
    for run in sorted {
        match buckets.last_mut() {
            Some((baseline, size, members))
                if (run.baseline - *baseline).abs() <= 0.4 * size.max(run.size) =>
            {
                *size = size.max(run.size);
                members.push(run.clone());
            }
            _ => buckets.push((run.baseline, run.size, vec![run.clone()])),
        }
    }

    buckets
        .into_iter()
        .filter_map(|(baseline, size, mut members)| {
            members.sort_by(|a, b| a.x.total_cmp(&b.x));
            let segments = split_segments(members, size);
            if segments.iter().all(|s| segment_text(s).trim().is_empty()) {
                return None;
            }
            Some(Line {
                baseline,
                size,
                segments,
            })
        })
        .collect()
}

fn split_segments(runs: Vec<TextRun>, size: f64) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    for run in runs {
        match segments.last_mut() {
            Some(seg) if run.x - seg.x1 <= CELL_GAP_EM * size => {
                seg.x1 = seg.x1.max(run.right());
                seg.runs.push(run);
            }
            _ => segments.push(Segment {
                x0: run.x,
                x1: run.right(),
                runs: vec![run],
            }),
        }
    }
    segments.retain(|s| !segment_text(s).trim().is_empty());
    segments
}

fn segment_text(seg: &Segment) -> String {
    seg.runs.iter().map(|r| r.text.as_str()).collect()
}

// ============================================================================
// Runs → DOCX runs
// ============================================================================

fn half_points(size: f64) -> u32 {
    (size * 2.0).round().max(2.0) as u32
}

fn push_text(out: &mut Vec<Run>, text: &str, source: &TextRun) {
    if text.is_empty() {
        return;
    }
    let size = Some(half_points(source.size));
    match out.last_mut() {
        Some(last) if last.bold == source.bold && last.italic == source.italic && last.size == size => {
            last.text.push_str(text)
        }
        _ => out.push(Run {
            text: text.to_string(),
            bold: source.bold,
            italic: source.italic,
            size,
        }),
    }
}

fn ends_with_space(runs: &[Run]) -> bool {
    runs.last()
        .and_then(|r| r.text.chars().last())
        .is_none_or(|c| c.is_whitespace() || c == '-' || c == '\u{00AD}')
}

/// Append a segment's runs, inserting spaces where the geometry implies one.
fn append_segment(out: &mut Vec<Run>, seg: &Segment) {
    let mut prev_right: Option<f64> = None;
    for run in &seg.runs {
        if let Some(right) = prev_right {
            let gap = run.x - right;
            if gap > WORD_GAP_EM * run.size
                && !ends_with_space(out)
                && !run.text.starts_with(char::is_whitespace)
            {
                push_text(out, " ", run);
            }
        }
        push_text(out, &run.text, run);
        prev_right = Some(prev_right.map_or(run.right(), |r: f64| r.max(run.right())));
    }
}

fn trim_runs(mut runs: Vec<Run>) -> Vec<Run> {
    if let Some(first) = runs.first_mut() {
        first.text = first.text.trim_start().to_string();
    }
    if let Some(last) = runs.last_mut() {
        last.text = last.text.trim_end().to_string();
    }
    runs.retain(|r| !r.text.is_empty());
    runs
}

// ============================================================================
// Lines → blocks
// ============================================================================

/// Dominant body size: the size carrying the most characters.
fn body_size(pages: &[PageText]) -> f64 {
    let mut weights: Vec<(i64, usize)> = Vec::new();
    for run in pages.iter().flat_map(|p| &p.runs) {
        let key = (run.size * 2.0).round() as i64;
        let chars = run.text.trim().chars().count();
        match weights.iter_mut().find(|(k, _)| *k == key) {
            Some((_, w)) => *w += chars,
            None => weights.push((key, chars)),
        }
    }
    weights
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(key, _)| key as f64 / 2.0)
        .filter(|s| *s > 0.0)
        .unwrap_or(12.0)
}

/// Heading level inferred from the ratio to the body size.
fn paragraph_style(size: f64, body: f64) -> ParagraphStyle {
    let ratio = size / body;
    if ratio >= 1.6 {
        ParagraphStyle::Heading(1)
    } else if ratio >= 1.3 {
        ParagraphStyle::Heading(2)
    } else if ratio >= 1.12 {
        ParagraphStyle::Heading(3)
    } else {
        ParagraphStyle::Normal
    }
}

fn to_twips(points: f64) -> u32 {
    (points * TWIPS_PER_POINT).round().max(0.0) as u32
}

fn spacing_before(gap: f64, size: f64) -> u32 {
    to_twips(gap - 0.2 * size).min(MAX_SPACING)
}

/// `true` if `line` fits the column layout started by `header`.
fn is_table_row(line: &Line, header: &Line) -> bool {
    if line.segments.len() != header.segments.len() || line.segments.len() < 2 {
        return false;
    }
    let tol = header.size.max(6.0);
    let bounds: Vec<f64> = header.segments.iter().map(|s| s.x0).collect();
    line.segments.iter().enumerate().all(|(k, seg)| {
        let starts_in_column = seg.x0 >= bounds[k] - tol;
        let ends_before_next = bounds.get(k + 1).is_none_or(|next| seg.x1 <= next + tol);
        starts_in_column && ends_before_next
    })
}

fn line_continues(prev: &Line, next: &Line, first: &Line) -> bool {
    if next.segments.len() > 1 && prev.segments.len() > 1 {
        return false;
    }
    let size_matches = (next.size - prev.size).abs() < 0.75;
    let pitch = next.baseline - prev.baseline;
    let close = pitch > 0.0 && pitch <= LINE_PITCH_EM * prev.size.max(next.size);
    let aligned = (next.x0() - first.x0()).abs() < 3.0 * next.size || next.x0() < first.x0();
    size_matches && close && aligned && prev.bold() == next.bold()
}

fn alignment_of(lines: &[&Line], frame: Frame) -> Alignment {
    let tol = (0.03 * frame.width()).max(2.0);
    let centered = lines.iter().all(|l| {
        let center = (l.x0() + l.x1()) / 2.0;
        (center - frame.center()).abs() < tol && l.x0() - frame.left > 2.0 * l.size
    });
    if centered {
        return Alignment::Center;
    }
    let right = lines.iter().all(|l| {
        (l.x1() - frame.right).abs() < 2.0 && l.x0() - frame.left > 0.3 * frame.width()
    });
    if right { Alignment::Right } else { Alignment::Left }
}

fn page_blocks(lines: &[Line], frame: Frame, body: f64) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut prev_bottom: Option<f64> = None;
    let mut i = 0;

    while i < lines.len() {
        let head = &lines[i];
        let top = head.baseline - head.size;
        let gap = prev_bottom.map(|b| top - b).unwrap_or(0.0);

        // Table: at least two consecutive rows sharing the column layout.
        let mut j = i + 1;
        while j < lines.len()
            && is_table_row(&lines[j], head)
            && lines[j].baseline - lines[j - 1].baseline <= 3.0 * head.size.max(lines[j].size)
        {
            j += 1;
        }
        if head.segments.len() >= 2 && j - i >= 2 {
            let rows = &lines[i..j];
            let table_right = rows.iter().map(Line::x1).fold(head.x1(), f64::max);
            let bounds: Vec<f64> = head.segments.iter().map(|s| s.x0).collect();
            let column_widths = bounds
                .iter()
                .enumerate()
                .map(|(k, x0)| {
                    let end = bounds.get(k + 1).copied().unwrap_or(table_right);
                    to_twips(end - x0).max(200)
                })
                .collect();
            let rows = rows
                .iter()
                .map(|line| {
                    line.segments
                        .iter()
                        .map(|seg| {
                            let mut cell = Vec::new();
                            append_segment(&mut cell, seg);
                            trim_runs(cell)
                        })
                        .collect()
                })
                .collect();

            blocks.push(Block::Table(Table {
                column_widths,
                rows,
                spacing_before: spacing_before(gap, head.size),
            }));
            let last = &lines[j - 1];
            prev_bottom = Some(last.baseline + 0.25 * last.size);
            i = j;
            continue;
        }

        // Paragraph.
        let mut members = vec![head];
        let mut j = i + 1;
        while j < lines.len() && line_continues(&lines[j - 1], &lines[j], head) {
            members.push(&lines[j]);
            j += 1;
        }

        let mut runs = Vec::new();
        for line in &members {
            if !runs.is_empty() && !ends_with_space(&runs) {
                if let Some(first) = line.segments.first().and_then(|s| s.runs.first()) {
                    push_text(&mut runs, " ", first);
                }
            }
            for (k, seg) in line.segments.iter().enumerate() {
                if k > 0 && !ends_with_space(&runs) {
                    push_text(&mut runs, " ", &seg.runs[0]);
                }
                append_segment(&mut runs, seg);
            }
        }

        let alignment = alignment_of(&members, frame);
        let indent = head.x0() - frame.left;
        let indent_left = if alignment == Alignment::Left && indent > 0.5 * head.size {
            to_twips(indent)
        } else {
            0
        };

        blocks.push(Block::Paragraph(Paragraph {
            style: paragraph_style(head.size, body),
            alignment,
            runs: trim_runs(runs),
            indent_left,
            spacing_before: spacing_before(gap, head.size),
        }));

        let last = members.last().copied().unwrap_or(head);
        prev_bottom = Some(last.baseline + 0.25 * last.size);
        i = j;
    }

    blocks
}

// ============================================================================
// Document assembly
// ============================================================================

fn geometry(pages: &[PageText], frames: &[Option<(Frame, f64, f64)>]) -> PageGeometry {
    let Some(first) = pages.first().filter(|p| p.width > 0.0 && p.height > 0.0) else {
        return PageGeometry::a4();
    };

    let mut margins: Option<(f64, f64, f64, f64)> = None;
    for (page, frame) in pages.iter().zip(frames) {
        if let Some((f, top, bottom)) = frame {
            let m = (
                top.max(0.0),
                (page.height - bottom).max(0.0),
                f.left.max(0.0),
                (page.width - f.right).max(0.0),
            );
            margins = Some(match margins {
                None => m,
                Some(cur) => (cur.0.min(m.0), cur.1.min(m.1), cur.2.min(m.2), cur.3.min(m.3)),
            });
        }
    }

    let width = to_twips(first.width);
    let height = to_twips(first.height);
    match margins {
        Some((top, bottom, left, right)) => PageGeometry {
            width,
            height,
            margin_top: to_twips(top).min(height / 3),
            margin_bottom: to_twips(bottom).min(height / 3),
            margin_left: to_twips(left).min(width / 3),
            margin_right: to_twips(right).min(width / 3),
        },
        None => PageGeometry {
            width,
            height,
            ..PageGeometry::a4()
        },
    }
}

/// Rebuild an editable document from positioned text.
pub fn build_document(pages: &[PageText]) -> DocxDocument {
    let body = body_size(pages);
    let mut blocks = Vec::new();
    let mut frames = Vec::with_capacity(pages.len());

    for (index, page) in pages.iter().enumerate() {
        let lines = group_lines(&page.runs);
        if lines.is_empty() {
            frames.push(None);
            continue;
        }

        let frame = Frame {
            left: lines.iter().map(Line::x0).fold(f64::INFINITY, f64::min),
            right: lines.iter().map(Line::x1).fold(f64::NEG_INFINITY, f64::max),
        };
        let top = lines[0].baseline - lines[0].size;
        let bottom = lines.iter().map(|l| l.baseline + 0.25 * l.size).fold(0.0, f64::max);
        frames.push(Some((frame, top, bottom)));

        if index > 0 && !blocks.is_empty() {
            blocks.push(Block::PageBreak);
        }
        blocks.extend(page_blocks(&lines, frame, body));
        log::trace!("Page {}: {} lines", index + 1, lines.len());
    }

    let title = blocks.iter().find_map(|b| match b {
        Block::Paragraph(p) if matches!(p.style, ParagraphStyle::Heading(_)) => Some(p.text()),
        _ => None,
    });

    DocxDocument {
        page: geometry(pages, &frames),
        blocks,
        title,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn run(x: f64, baseline: f64, size: f64, text: &str) -> TextRun {
        TextRun {
            x,
            baseline,
            width: text.chars().count() as f64 * size * 0.5,
            size,
            text: text.to_string(),
            bold: false,
            italic: false,
        }
    }

    fn page(runs: Vec<TextRun>) -> PageText {
        PageText {
            width: 595.0,
            height: 842.0,
            runs,
        }
    }

    fn paragraphs(doc: &DocxDocument) -> Vec<&Paragraph> {
        doc.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Paragraph(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Verifies heading inference and paragraph joining.
    #[test]
    fn test_headings_and_paragraphs() {
        let mut title = run(57.0, 80.0, 24.0, "Annual Report");
        title.bold = true;
        let doc = build_document(&[page(vec![
            title,
            run(57.0, 120.0, 12.0, "The first line of the body"),
            run(57.0, 134.0, 12.0, "continues here."),
            run(57.0, 170.0, 12.0, "A second paragraph."),
        ])]);

        let paras = paragraphs(&doc);
        assert_eq!(paras.len(), 3);
        assert_eq!(paras[0].style, ParagraphStyle::Heading(1));
        assert!(paras[0].runs[0].bold);
        assert_eq!(paras[1].style, ParagraphStyle::Normal);
        assert_eq!(paras[1].text(), "The first line of the body continues here.");
        assert_eq!(paras[2].text(), "A second paragraph.");
        assert!(paras[2].spacing_before > 0, "Paragraph gap should become spacing");
        assert_eq!(doc.title.as_deref(), Some("Annual Report"));
    }

    /// Verifies that repeated column layouts become a table.
    #[test]
    fn test_table_detection() {
        let doc = build_document(&[page(vec![
            run(57.0, 100.0, 12.0, "Intro text."),
            run(57.0, 140.0, 12.0, "Region"),
            run(257.0, 140.0, 12.0, "Total"),
            run(57.0, 156.0, 12.0, "EMEA"),
            run(257.0, 156.0, 12.0, "42"),
            run(57.0, 172.0, 12.0, "APAC"),
            run(257.0, 172.0, 12.0, "17"),
        ])]);

        let table = doc
            .blocks
            .iter()
            .find_map(|b| match b {
                Block::Table(t) => Some(t),
                _ => None,
            })
            .expect("table should be detected");

        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.column_widths.len(), 2);
        assert_eq!(table.column_widths[0], 4000);
        assert_eq!(table.rows[1][0][0].text, "EMEA");
        assert_eq!(table.rows[2][1][0].text, "17");
    }

    /// Verifies indentation and centring.
    #[test]
    fn test_indent_and_alignment() {
        let doc = build_document(&[page(vec![
            run(57.0, 100.0, 12.0, "Left aligned body text that spans the frame width."),
            run(93.0, 130.0, 12.0, "Indented quote"),
            run(186.0, 160.0, 12.0, "Centered"),
            run(57.0, 190.0, 12.0, "Closing line of text that spans the frame width"),
        ])]);

        let paras = paragraphs(&doc);
        assert_eq!(paras[1].indent_left, 720);
        assert_eq!(paras[1].alignment, Alignment::Left);
        assert_eq!(paras[2].alignment, Alignment::Center);
        assert_eq!(paras[2].indent_left, 0);
    }

    /// Verifies page breaks and page geometry.
    #[test]
    fn test_pages_and_geometry() {
        let doc = build_document(&[
            page(vec![run(57.0, 69.0, 12.0, "Page one")]),
            page(vec![]),
            page(vec![run(57.0, 69.0, 12.0, "Page three")]),
        ]);

        let breaks = doc.blocks.iter().filter(|b| **b == Block::PageBreak).count();
        assert_eq!(breaks, 1);
        assert_eq!(doc.page.width, 11900);
        assert_eq!(doc.page.height, 16840);
        assert_eq!(doc.page.margin_left, 1140);
        assert_eq!(doc.page.margin_top, 1140);
    }

    /// Verifies that split runs on one line gain a space only across gaps.
    #[test]
    fn test_word_spacing() {
        let mut bold = run(87.0, 100.0, 12.0, "bold");
        bold.bold = true;
        let doc = build_document(&[page(vec![
            run(57.0, 100.0, 12.0, "Some"),
            bold,
            run(111.0, 100.0, 12.0, "tail"),
        ])]);

        let paras = paragraphs(&doc);
        assert_eq!(paras.len(), 1);
        assert_eq!(paras[0].text(), "Some boldtail");
        assert_eq!(paras[0].runs.len(), 3);
    }

    /// Verifies that a page without text yields an empty document.
    #[test]
    fn test_empty_input() {
        let doc = build_document(&[page(vec![run(10.0, 10.0, 12.0, "   ")])]);
        assert!(!doc.has_text());
        assert_eq!(doc.page.width, 11900);
        assert_eq!(doc.page.margin_left, PageGeometry::a4().margin_left);
    }
}
