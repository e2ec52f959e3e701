//! Layout document model and `.docx` writer.
//!
//! Layout reconstruction produces a [`DocxDocument`]; [`write_docx`] builds it
//! through `docx_rs` and packs it at the destination.
//!
//! All lengths are in twips (1/20 pt), the unit WordprocessingML uses for
//! page geometry and spacing. Font sizes are in half-points.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use docx_rs::{
    AlignmentType, BreakType, Docx, LineSpacing, PageMargin, Style, StyleType, TableCell,
    TableRow, WidthType,
};

use crate::error::{ConversionError, Result, TranscodeStage};

/// Twips per PDF point.
pub const TWIPS_PER_POINT: f64 = 20.0;

// ============================================================================
// Model
// ============================================================================

/// Page size and margins of the single document section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    pub width: u32,
    pub height: u32,
    pub margin_top: u32,
    pub margin_bottom: u32,
    pub margin_left: u32,
    pub margin_right: u32,
}

impl PageGeometry {
    /// A4 portrait with 2 cm / 1.5 cm margins.
    pub fn a4() -> Self {
        Self {
            width: 11906,
            height: 16838,
            margin_top: 1134,
            margin_bottom: 1134,
            margin_left: 850,
            margin_right: 850,
        }
    }

    /// Width available to text.
    pub fn text_width(&self) -> u32 {
        self.width
            .saturating_sub(self.margin_left + self.margin_right)
            .max(1)
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::a4()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParagraphStyle {
    #[default]
    Normal,
    /// Heading level 1 to 3.
    Heading(u8),
}

impl ParagraphStyle {
    fn style_id(&self) -> &'static str {
        match self {
            ParagraphStyle::Normal => "Normal",
            ParagraphStyle::Heading(1) => "Heading1",
            ParagraphStyle::Heading(2) => "Heading2",
            ParagraphStyle::Heading(_) => "Heading3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Run {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
    /// Font size in half-points; `None` inherits from the style.
    pub size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Paragraph {
    pub style: ParagraphStyle,
    pub alignment: Alignment,
    pub runs: Vec<Run>,
    pub indent_left: u32,
    pub spacing_before: u32,
}

impl Paragraph {
    /// Concatenated run text.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    /// Column widths; the row cell count must match.
    pub column_widths: Vec<u32>,
    pub rows: Vec<Vec<Vec<Run>>>,
    pub spacing_before: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Paragraph(Paragraph),
    Table(Table),
    PageBreak,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocxDocument {
    pub page: PageGeometry,
    pub blocks: Vec<Block>,
    pub title: Option<String>,
}

impl DocxDocument {
    /// `true` if the document holds any visible text.
    pub fn has_text(&self) -> bool {
        self.blocks.iter().any(|b| match b {
            Block::Paragraph(p) => p.runs.iter().any(|r| !r.text.trim().is_empty()),
            Block::Table(t) => t
                .rows
                .iter()
                .flatten()
                .flatten()
                .any(|r| !r.text.trim().is_empty()),
            Block::PageBreak => false,
        })
    }
}

// ============================================================================
// Package writer
// ============================================================================

fn package_error(e: impl std::fmt::Display) -> ConversionError {
    ConversionError::transcode(
        TranscodeStage::LayoutReconstruct,
        format!("writing DOCX package: {}", e),
    )
}

/// Write `doc` as a `.docx` package at `destination`, replacing its contents.
pub fn write_docx(doc: &DocxDocument, destination: &Path) -> Result<()> {
    let file = File::create(destination).map_err(|e| {
        ConversionError::io(format!("creating {}", destination.display()), e)
    })?;
    let mut writer = BufWriter::new(file);

    build_docx(doc).build().pack(&mut writer).map_err(package_error)?;
    writer
        .flush()
        .map_err(|e| ConversionError::io(format!("flushing {}", destination.display()), e))?;

    log::debug!(
        "📝 Wrote DOCX package with {} blocks to {}",
        doc.blocks.len(),
        destination.display()
    );
    Ok(())
}

/// Drop characters that XML 1.0 forbids.
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            matches!(c, '\t' | '\n' | '\r')
                || !((c as u32) < 0x20 || c == '\u{FFFE}' || c == '\u{FFFF}')
        })
        .collect()
}

fn heading_style(id: &str, name: &str, size: usize) -> Style {
    Style::new(id, StyleType::Paragraph).name(name).size(size).bold()
}

fn build_docx(doc: &DocxDocument) -> Docx {
    let page = &doc.page;
    let mut docx = Docx::new()
        .add_style(heading_style("Heading1", "Heading 1", 36))
        .add_style(heading_style("Heading2", "Heading 2", 30))
        .add_style(heading_style("Heading3", "Heading 3", 26))
        .page_size(page.width, page.height)
        .page_margin(
            PageMargin::new()
                .top(page.margin_top as i32)
                .bottom(page.margin_bottom as i32)
                .left(page.margin_left as i32)
                .right(page.margin_right as i32),
        );

    if let Some(title) = &doc.title {
        docx = docx.custom_property("title", strip_control_chars(title));
    }

    for block in &doc.blocks {
        docx = match block {
            Block::Paragraph(p) => docx.add_paragraph(paragraph(p)),
            Block::Table(t) => {
                if t.spacing_before > 0 {
                    docx = docx.add_paragraph(docx_rs::Paragraph::new().line_spacing(
                        LineSpacing::new().before(t.spacing_before).after(0),
                    ));
                }
                docx.add_table(table(t))
            }
            Block::PageBreak => docx.add_paragraph(
                docx_rs::Paragraph::new().add_run(docx_rs::Run::new().add_break(BreakType::Page)),
            ),
        };
    }
    docx
}

fn paragraph(p: &Paragraph) -> docx_rs::Paragraph {
    let mut para = docx_rs::Paragraph::new().style(p.style.style_id());
    if p.spacing_before > 0 {
        para = para.line_spacing(LineSpacing::new().before(p.spacing_before));
    }
    if p.indent_left > 0 {
        para = para.indent(Some(p.indent_left as i32), None, None, None);
    }
    match p.alignment {
        Alignment::Left => {}
        Alignment::Center => para = para.align(AlignmentType::Center),
        Alignment::Right => para = para.align(AlignmentType::Right),
    }
    p.runs.iter().fold(para, |para, r| para.add_run(run(r)))
}

fn run(r: &Run) -> docx_rs::Run {
    let mut run = docx_rs::Run::new().add_text(strip_control_chars(&r.text));
    if r.bold {
        run = run.bold();
    }
    if r.italic {
        run = run.italic();
    }
    if let Some(size) = r.size {
        run = run.size(size as usize);
    }
    run
}

fn table(t: &Table) -> docx_rs::Table {
    let rows = t
        .rows
        .iter()
        .map(|row| {
            let cells = row
                .iter()
                .enumerate()
                .map(|(i, runs)| {
                    let width = t.column_widths.get(i).copied().unwrap_or(0);
                    let para = runs
                        .iter()
                        .fold(docx_rs::Paragraph::new(), |para, r| para.add_run(run(r)));
                    TableCell::new()
                        .add_paragraph(para)
                        .width(width as usize, WidthType::Dxa)
                })
                .collect();
            TableRow::new(cells)
        })
        .collect();

    docx_rs::Table::new(rows).set_grid(t.column_widths.iter().map(|&w| w as usize).collect())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn read_part(path: &Path, part: &str) -> String {
        let file = File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut entry = archive.by_name(part).unwrap();
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        body
    }

    fn sample() -> DocxDocument {
        DocxDocument {
            page: PageGeometry::a4(),
            title: Some("Q3 <Report>".to_string()),
            blocks: vec![
                Block::Paragraph(Paragraph {
                    style: ParagraphStyle::Heading(1),
                    runs: vec![Run {
                        text: "Results & Outlook".to_string(),
                        bold: true,
                        ..Run::default()
                    }],
                    ..Paragraph::default()
                }),
                Block::Paragraph(Paragraph {
                    indent_left: 720,
                    spacing_before: 240,
                    runs: vec![Run {
                        text: "Revenue grew.".to_string(),
                        ..Run::default()
                    }],
                    ..Paragraph::default()
                }),
                Block::PageBreak,
                Block::Table(Table {
                    column_widths: vec![3000, 3000],
                    rows: vec![
                        vec![
                            vec![Run { text: "Region".into(), ..Run::default() }],
                            vec![Run { text: "Total".into(), ..Run::default() }],
                        ],
                        vec![
                            vec![Run { text: "EMEA".into(), ..Run::default() }],
                            vec![Run { text: "42".into(), ..Run::default() }],
                        ],
                    ],
                    spacing_before: 0,
                }),
            ],
        }
    }

    /// Verifies the package opens as a WordprocessingML document.
    #[test]
    fn test_package_parts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.docx");
        write_docx(&sample(), &path).unwrap();

        let file = File::open(&path).unwrap();
        let archive = zip::ZipArchive::new(file).unwrap();
        let names: Vec<&str> = archive.file_names().collect();

        for part in ["[Content_Types].xml", "word/document.xml", "word/styles.xml"] {
            assert!(names.contains(&part), "Missing part {}", part);
        }
    }

    /// Verifies the body markup for styles, indents, breaks and tables.
    #[test]
    fn test_document_markup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.docx");
        write_docx(&sample(), &path).unwrap();

        let body = read_part(&path, "word/document.xml");
        assert!(body.contains(r#"w:val="Heading1""#));
        assert!(body.contains("Results &amp; Outlook"));
        assert!(body.contains(r#"="720""#));
        assert!(body.contains(r#"w:before="240""#));
        assert!(body.contains(r#"w:type="page""#));
        assert!(body.contains(r#"w:w="3000""#));
        assert_eq!(body.matches("</w:tr>").count(), 2);
        assert!(body.contains(r#"w:w="11906""#));
        assert!(body.contains(r#"w:h="16838""#));

        let styles = read_part(&path, "word/styles.xml");
        assert!(styles.contains(r#"w:styleId="Heading1""#));
    }

    /// Verifies characters XML forbids are dropped.
    #[test]
    fn test_strip_control_chars() {
        assert_eq!(strip_control_chars("bell\u{7}tab\t"), "belltab\t");
        assert_eq!(strip_control_chars("a<b>&"), "a<b>&");
    }

    /// Verifies visible-text detection.
    #[test]
    fn test_has_text() {
        assert!(sample().has_text());

        let blank = DocxDocument {
            blocks: vec![Block::PageBreak],
            ..DocxDocument::default()
        };
        assert!(!blank.has_text());
    }
}
