//! Mock renderer and PDF fixtures for testing without Chrome.
//!
//! [`MockRenderer`] implements [`PdfRenderer`] by turning the HTML into a
//! small but genuine PDF through [`PdfFixture`]. The fixture lays text out
//! the way a browser would (headings in bold at larger sizes, table cells
//! in columns), so the layout-reconstruction strategy can be exercised end
//! to end.
//!
//! # Feature Flag
//!
//! This module is only available when:
//! - The `test-utils` feature is enabled, OR
//! - During testing (`#[cfg(test)]`)
//!
//! # Example
//!
//! ```rust,ignore
//! use html2doc_pipeline::render::mock::{MockBehavior, MockRenderer};
//!
//! // Succeeds after 50 ms
//! let renderer = MockRenderer::new().with_delay(Duration::from_millis(50));
//!
//! // Never settles, fails once the render budget is spent
//! let renderer = MockRenderer::new()
//!     .with_behavior(MockBehavior::Hang)
//!     .with_render_timeout(Duration::from_millis(200));
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, StringFormat, dictionary};
use tokio_util::sync::CancellationToken;

use super::PdfRenderer;
use crate::config::{PageSettings, SessionPoolConfig};
use crate::error::{ConversionError, RenderStage, Result, SessionError};
use crate::factory::mock::{MockSession, MockSessionFactory};
use crate::pool::SessionPool;
use crate::stats::PoolStats;

// ============================================================================
// MockRenderer
// ============================================================================

/// What a [`MockRenderer`] does with each request.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Write a fixture PDF built from the HTML.
    Succeed,
    /// Fail immediately at `stage`, writing nothing.
    Fail(RenderStage, String),
    /// Write a truncated PDF, then block until the render timeout or
    /// cancellation and fail at `load`.
    Hang,
}

/// Chrome-free [`PdfRenderer`].
///
/// Tracks how many renders run at once so tests can check concurrency
/// limits, and optionally checks sessions out of a real [`SessionPool`] of
/// [`MockSession`]s.
pub struct MockRenderer {
    behavior: MockBehavior,
    encoding: FixtureEncoding,
    delay: Duration,
    render_timeout: Duration,
    pool: Option<SessionPool<MockSession>>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self {
            behavior: MockBehavior::Succeed,
            encoding: FixtureEncoding::Standard,
            delay: Duration::ZERO,
            render_timeout: Duration::from_secs(30),
            pool: None,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Renderer whose every call fails at `stage` with `detail`.
    pub fn failing(stage: RenderStage, detail: impl Into<String>) -> Self {
        Self::new().with_behavior(MockBehavior::Fail(stage, detail.into()))
    }

    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Text encoding of the PDFs written by successful calls.
    pub fn with_fixture_encoding(mut self, encoding: FixtureEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Simulated render time for successful calls.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    /// Check a [`MockSession`] out of a pool built from `config` for every
    /// render.
    ///
    /// # Errors
    ///
    /// [`SessionError::Configuration`] for inconsistent limits.
    pub fn with_pool(mut self, config: SessionPoolConfig) -> std::result::Result<Self, SessionError> {
        let pool = SessionPool::builder()
            .config(config)
            .factory(Box::new(MockSessionFactory::new()))
            .build()?;
        self.pool = Some(pool);
        Ok(self)
    }

    /// Renders attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared call counter.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Highest number of renders observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Shared peak counter.
    pub fn peak_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak)
    }

    fn pause(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        let until = Instant::now() + duration;
        while Instant::now() < until {
            if cancel.is_cancelled() {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5).min(duration));
        }
        !cancel.is_cancelled()
    }

    fn render(&self, html: &str, destination: &Path, cancel: &CancellationToken) -> Result<()> {
        match &self.behavior {
            MockBehavior::Fail(stage, detail) => {
                Err(ConversionError::render(*stage, detail.clone()))
            }
            MockBehavior::Hang => {
                std::fs::write(destination, b"%PDF-1.5\n% truncated")
                    .map_err(|e| ConversionError::io("writing rendered PDF", e))?;
                if self.pause(self.render_timeout, cancel) {
                    Err(ConversionError::render(
                        RenderStage::Load,
                        "page did not settle in time (timed out)",
                    ))
                } else {
                    Err(ConversionError::render(
                        RenderStage::Load,
                        "cancelled while waiting for the page to settle",
                    ))
                }
            }
            MockBehavior::Succeed => {
                if !self.pause(self.delay, cancel) {
                    return Err(ConversionError::render(
                        RenderStage::Load,
                        "cancelled while waiting for the page to settle",
                    ));
                }
                let bytes = PdfFixture::from_html(html)
                    .encoding(self.encoding)
                    .to_bytes()
                    .map_err(|e| ConversionError::render(RenderStage::Print, e.to_string()))?;
                std::fs::write(destination, bytes)
                    .map_err(|e| ConversionError::io("writing rendered PDF", e))
            }
        }
    }
}

impl Default for MockRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfRenderer for MockRenderer {
    fn render_to_pdf(
        &self,
        html: &str,
        destination: &Path,
        _page: &PageSettings,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut session = match &self.pool {
            Some(pool) => Some(pool.checkout(cancel)?),
            None => None,
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.render(html, destination, cancel);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let (Err(ConversionError::Render { .. }), Some(session)) = (&result, session.as_mut()) {
            session.poison();
        }
        result
    }

    fn stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(SessionPool::stats)
    }

    fn is_ready(&self) -> bool {
        self.pool.as_ref().is_none_or(SessionPool::is_ready)
    }

    fn warmup(&self) -> std::result::Result<usize, SessionError> {
        self.pool.as_ref().map_or(Ok(0), SessionPool::warmup)
    }

    fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }
}

// ============================================================================
// PdfFixture
// ============================================================================

const PAGE_WIDTH: f64 = 595.0;
const PAGE_HEIGHT: f64 = 842.0;
/// 2 cm in points.
const MARGIN_Y: f64 = 57.0;
/// 2 cm in points.
const MARGIN_X: f64 = 57.0;
const BODY_SIZE: f64 = 12.0;
const COLUMN_WIDTH: f64 = 200.0;
const WRAP_CHARS: usize = 80;

#[derive(Debug, Clone)]
enum FixtureBlock {
    Heading(u8, String),
    Paragraph(String),
    Table(Vec<Vec<String>>),
    PageBreak,
}

/// How a [`PdfFixture`] encodes its text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FixtureEncoding {
    /// Standard Helvetica fonts, `WinAnsiEncoding` strings, plain content
    /// streams in PDF's y-up space.
    #[default]
    Standard,
    /// The shape Chrome's PDF backend produces: subset `Type0` fonts with
    /// `Identity-H` glyph ids and a `ToUnicode` CMap, Flate-compressed
    /// content, and a page matrix that flips y so text is placed top-down.
    Chrome,
}

/// One string placed on a page, baseline in PDF user space.
#[derive(Debug, Clone)]
struct PlacedText {
    x: f64,
    y: f64,
    size: f64,
    bold: bool,
    text: String,
}

/// Builder for small text PDFs with browser-like layout.
///
/// Text uses Helvetica and Helvetica-Bold. Headings are 24, 18 and 14 pt;
/// body text is 12 pt and wraps at 80 characters; table cells sit in
/// 200 pt columns.
///
/// ```rust,ignore
/// let bytes = PdfFixture::new()
///     .heading("Report")
///     .paragraph("Body text.")
///     .table(&[&["Name", "Qty"], &["Bolts", "12"]])
///     .encoding(FixtureEncoding::Chrome)
///     .to_bytes()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct PdfFixture {
    blocks: Vec<FixtureBlock>,
    encoding: FixtureEncoding,
}

impl PdfFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Level 1 heading.
    pub fn heading(self, text: &str) -> Self {
        self.heading_level(1, text)
    }

    /// Heading of `level` 1–3.
    pub fn heading_level(mut self, level: u8, text: &str) -> Self {
        self.blocks
            .push(FixtureBlock::Heading(level.clamp(1, 3), text.to_string()));
        self
    }

    pub fn paragraph(mut self, text: &str) -> Self {
        self.blocks.push(FixtureBlock::Paragraph(text.to_string()));
        self
    }

    pub fn table(mut self, rows: &[&[&str]]) -> Self {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect();
        self.blocks.push(FixtureBlock::Table(rows));
        self
    }

    pub fn page_break(mut self) -> Self {
        self.blocks.push(FixtureBlock::PageBreak);
        self
    }

    pub fn encoding(mut self, encoding: FixtureEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Fixture approximating how a browser would lay out `html`.
    ///
    /// Understands `h1`–`h6`, `p`, `li`, `div`, `pre`, `blockquote`, tables,
    /// and any tag mentioning `page-break`. Scripts and styles are skipped.
    pub fn from_html(html: &str) -> Self {
        HtmlScan::default().run(html)
    }

    /// Serialize to PDF bytes. An empty fixture yields one blank page.
    ///
    /// # Errors
    ///
    /// Propagates `lopdf` encoding errors.
    pub fn to_bytes(&self) -> lopdf::Result<Vec<u8>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let pages = self.layout();

        let glyphs = GlyphTable::collect(&pages);
        let (regular, bold) = match self.encoding {
            FixtureEncoding::Standard => (
                doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                    "Encoding" => "WinAnsiEncoding",
                }),
                doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica-Bold",
                    "Encoding" => "WinAnsiEncoding",
                }),
            ),
            FixtureEncoding::Chrome => {
                let mut cmap = Stream::new(dictionary! {}, glyphs.to_unicode_cmap());
                cmap.compress()?;
                let to_unicode = doc.add_object(cmap);
                (
                    glyphs.add_type0_font(&mut doc, "AAAAAA+Helvetica", false, to_unicode),
                    glyphs.add_type0_font(&mut doc, "AAAAAB+Helvetica-Bold", true, to_unicode),
                )
            }
        };
        let resources = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular,
                "F2" => bold,
            },
        });

        let mut kids: Vec<Object> = Vec::new();
        for texts in &pages {
            let operations = match self.encoding {
                FixtureEncoding::Standard => standard_operations(texts),
                FixtureEncoding::Chrome => chrome_operations(texts, &glyphs),
            };
            let mut stream = Stream::new(dictionary! {}, Content { operations }.encode()?);
            if self.encoding == FixtureEncoding::Chrome {
                stream.compress()?;
            }
            let content_id = doc.add_object(stream);
            let page_id: ObjectId = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources,
                "MediaBox" => Object::Array(vec![
                    0.into(),
                    0.into(),
                    (PAGE_WIDTH as i64).into(),
                    (PAGE_HEIGHT as i64).into(),
                ]),
            }),
        );

        let catalog = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Write the PDF to `path`.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let bytes = self.to_bytes().map_err(std::io::Error::other)?;
        std::fs::write(path, bytes)
    }

    /// Placed strings per page.
    fn layout(&self) -> Vec<Vec<PlacedText>> {
        let mut pages = vec![Vec::new()];
        let top = PAGE_HEIGHT - MARGIN_Y;
        let mut y = top;

        for block in &self.blocks {
            let lines: Vec<(f64, Vec<(f64, String)>, bool, f64)> = match block {
                FixtureBlock::PageBreak => {
                    pages.push(Vec::new());
                    y = top;
                    continue;
                }
                FixtureBlock::Heading(level, text) => {
                    let size = match level {
                        1 => 24.0,
                        2 => 18.0,
                        _ => 14.0,
                    };
                    vec![(size, vec![(MARGIN_X, text.clone())], true, size * 1.2)]
                }
                FixtureBlock::Paragraph(text) => wrap(text, WRAP_CHARS)
                    .into_iter()
                    .map(|line| (BODY_SIZE, vec![(MARGIN_X, line)], false, BODY_SIZE * 1.4))
                    .collect(),
                FixtureBlock::Table(rows) => rows
                    .iter()
                    .map(|row| {
                        let cells = row
                            .iter()
                            .enumerate()
                            .filter(|(_, cell)| !cell.trim().is_empty())
                            .map(|(i, cell)| (MARGIN_X + COLUMN_WIDTH * i as f64, cell.clone()))
                            .collect();
                        (BODY_SIZE, cells, false, BODY_SIZE * 1.5)
                    })
                    .collect(),
            };

            for (size, cells, bold, pitch) in lines {
                if y - size < MARGIN_Y {
                    pages.push(Vec::new());
                    y = top;
                }
                y -= size;
                if let Some(page) = pages.last_mut() {
                    page.extend(cells.into_iter().map(|(x, text)| PlacedText {
                        x,
                        y,
                        size,
                        bold,
                        text,
                    }));
                }
                y -= pitch - size;
            }
            // Paragraph spacing.
            y -= BODY_SIZE;
        }

        pages
    }
}

fn font_key(bold: bool) -> &'static str {
    if bold { "F2" } else { "F1" }
}

fn standard_operations(texts: &[PlacedText]) -> Vec<Operation> {
    let mut ops = Vec::new();
    for placed in texts {
        let bytes: Vec<u8> = placed
            .text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect();

        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new(
            "Tf",
            vec![font_key(placed.bold).into(), Object::Real(placed.size as f32)],
        ));
        ops.push(Operation::new(
            "Td",
            vec![Object::Real(placed.x as f32), Object::Real(placed.y as f32)],
        ));
        ops.push(Operation::new("Tj", vec![Object::string_literal(bytes)]));
        ops.push(Operation::new("ET", vec![]));
    }
    ops
}

/// Top-down page space with a white background, each string placed by a
/// y-flipped `Tm`.
fn chrome_operations(texts: &[PlacedText], glyphs: &GlyphTable) -> Vec<Operation> {
    let real = |v: f64| Object::Real(v as f32);
    let mut ops = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![1.into(), 0.into(), 0.into(), (-1).into(), 0.into(), real(PAGE_HEIGHT)],
        ),
        Operation::new("rg", vec![1.into(), 1.into(), 1.into()]),
        Operation::new(
            "re",
            vec![0.into(), 0.into(), real(PAGE_WIDTH), real(PAGE_HEIGHT)],
        ),
        Operation::new("f", vec![]),
        Operation::new("rg", vec![0.into(), 0.into(), 0.into()]),
    ];

    for placed in texts {
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new(
            "Tf",
            vec![font_key(placed.bold).into(), real(placed.size)],
        ));
        ops.push(Operation::new(
            "Tm",
            vec![
                1.into(),
                0.into(),
                0.into(),
                (-1).into(),
                real(placed.x),
                real(PAGE_HEIGHT - placed.y),
            ],
        ));
        ops.push(Operation::new(
            "Tj",
            vec![Object::String(glyphs.encode(&placed.text), StringFormat::Hexadecimal)],
        ));
        ops.push(Operation::new("ET", vec![]));
    }

    ops.push(Operation::new("Q", vec![]));
    ops
}

/// Glyph ids for a subset font, assigned from 1 in order of first use.
#[derive(Debug, Default)]
struct GlyphTable {
    ids: BTreeMap<char, u16>,
}

impl GlyphTable {
    fn collect(pages: &[Vec<PlacedText>]) -> Self {
        let mut table = Self::default();
        for c in pages.iter().flatten().flat_map(|placed| placed.text.chars()) {
            let next = table.ids.len() as u16 + 1;
            table.ids.entry(c).or_insert(next);
        }
        table
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        text.chars()
            .flat_map(|c| self.ids.get(&c).copied().unwrap_or(0).to_be_bytes())
            .collect()
    }

    /// Helvetica-like advances: narrow spaces and punctuation.
    fn width(c: char) -> i64 {
        match c {
            ' ' | '.' | ',' | ':' | ';' | '!' | 'i' | 'l' | 'I' => 278,
            c if c.is_ascii_uppercase() => 667,
            _ => 556,
        }
    }

    fn to_unicode_cmap(&self) -> Vec<u8> {
        let mut cmap = String::from(
            "/CIDInit /ProcSet findresource begin\n\
             12 dict begin\n\
             begincmap\n\
             /CIDSystemInfo <<\n/Registry (Adobe)\n/Ordering (UCS)\n/Supplement 0\n>> def\n\
             /CMapName /Adobe-Identity-UCS def\n\
             /CMapType 2 def\n\
             1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
        );

        let mut entries: Vec<(u16, char)> = self.ids.iter().map(|(c, id)| (*id, *c)).collect();
        entries.sort_unstable();
        for chunk in entries.chunks(100) {
            cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
            for (id, c) in chunk {
                let mut units = [0u16; 2];
                let target: String = c
                    .encode_utf16(&mut units)
                    .iter()
                    .map(|u| format!("{:04X}", u))
                    .collect();
                cmap.push_str(&format!("<{:04X}> <{}>\n", id, target));
            }
            cmap.push_str("endbfchar\n");
        }

        cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
        cmap.into_bytes()
    }

    fn add_type0_font(
        &self,
        doc: &mut Document,
        base_font: &str,
        bold: bool,
        to_unicode: ObjectId,
    ) -> ObjectId {
        let descriptor = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => base_font,
            "Flags" => 32,
            "FontWeight" => if bold { 700 } else { 400 },
            "ItalicAngle" => 0,
            "Ascent" => 905,
            "Descent" => -212,
            "CapHeight" => 716,
            "StemV" => 80,
            "FontBBox" => Object::Array(vec![
                (-665).into(),
                (-325).into(),
                2000.into(),
                1006.into(),
            ]),
        });

        let mut by_id: Vec<(u16, char)> = self.ids.iter().map(|(c, id)| (*id, *c)).collect();
        by_id.sort_unstable();
        let widths: Vec<Object> = by_id.iter().map(|(_, c)| Self::width(*c).into()).collect();

        let descendant = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => base_font,
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor,
            "CIDToGIDMap" => "Identity",
            "DW" => 0,
            "W" => Object::Array(vec![1.into(), Object::Array(widths)]),
        });

        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => base_font,
            "Encoding" => "Identity-H",
            "DescendantFonts" => Object::Array(vec![descendant.into()]),
            "ToUnicode" => to_unicode,
        })
    }
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

// ============================================================================
// HTML scan
// ============================================================================

#[derive(Default)]
struct HtmlScan {
    fixture: PdfFixture,
    text: String,
    heading: Option<u8>,
    skip_depth: usize,
    rows: Vec<Vec<String>>,
    row: Option<Vec<String>>,
    in_table: bool,
}

impl HtmlScan {
    fn run(mut self, html: &str) -> PdfFixture {
        let mut rest = html;
        while let Some(open) = rest.find('<') {
            self.push_text(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('>') else {
                rest = "";
                break;
            };
            self.tag(&after[..close]);
            rest = &after[close + 1..];
        }
        self.push_text(rest);
        self.flush();
        if self.in_table {
            self.end_table();
        }
        self.fixture
    }

    fn push_text(&mut self, raw: &str) {
        if self.skip_depth > 0 {
            return;
        }
        let decoded = raw
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&");
        for word in decoded.split_whitespace() {
            if !self.text.is_empty() {
                self.text.push(' ');
            }
            self.text.push_str(word);
        }
    }

    fn flush(&mut self) {
        let text = std::mem::take(&mut self.text);
        if text.is_empty() {
            return;
        }
        if let Some(row) = self.row.as_mut() {
            row.push(text);
            return;
        }
        let fixture = std::mem::take(&mut self.fixture);
        self.fixture = match self.heading {
            Some(level) => fixture.heading_level(level, &text),
            None => fixture.paragraph(&text),
        };
    }

    fn end_table(&mut self) {
        self.flush_row();
        self.in_table = false;
        let rows = std::mem::take(&mut self.rows);
        if !rows.is_empty() {
            self.fixture.blocks.push(FixtureBlock::Table(rows));
        }
    }

    fn flush_row(&mut self) {
        if let Some(row) = self.row.take() {
            if !row.is_empty() {
                self.rows.push(row);
            }
        }
    }

    fn tag(&mut self, tag: &str) {
        let closing = tag.starts_with('/');
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        if matches!(name.as_str(), "script" | "style" | "head" | "title") {
            if closing {
                self.skip_depth = self.skip_depth.saturating_sub(1);
            } else if !tag.ends_with('/') {
                self.skip_depth += 1;
            }
            return;
        }
        if self.skip_depth > 0 {
            return;
        }

        if tag.contains("page-break") && !closing {
            self.flush();
            self.fixture.blocks.push(FixtureBlock::PageBreak);
        }

        match name.as_str() {
            "table" if !closing => {
                self.flush();
                self.in_table = true;
            }
            "table" => self.end_table(),
            "tr" => {
                self.flush();
                self.flush_row();
                if !closing {
                    self.row = Some(Vec::new());
                }
            }
            "td" | "th" => self.flush(),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.flush();
                self.heading = if closing {
                    None
                } else {
                    name[1..].parse::<u8>().ok()
                };
            }
            "p" | "li" | "div" | "pre" | "blockquote" | "br" | "section" | "article" | "ul"
            | "ol" | "body" => {
                if self.row.is_none() {
                    self.flush();
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(fixture: &PdfFixture) -> Vec<String> {
        fixture
            .blocks
            .iter()
            .map(|b| match b {
                FixtureBlock::Heading(level, text) => format!("h{}:{}", level, text),
                FixtureBlock::Paragraph(text) => format!("p:{}", text),
                FixtureBlock::Table(rows) => format!("table:{:?}", rows),
                FixtureBlock::PageBreak => "break".to_string(),
            })
            .collect()
    }

    /// Verifies the HTML scan.
    #[test]
    fn test_from_html() {
        let fixture = PdfFixture::from_html(
            r#"<html><head><title>Ignored</title><style>p { color: red }</style></head>
            <body>
              <h1>Annual &amp; Final</h1>
              <p>First   paragraph.</p>
              <table><tr><th>Name</th><th>Qty</th></tr><tr><td>Bolts</td><td>12</td></tr></table>
              <div style="page-break-before: always"></div>
              <h2>Notes</h2>
              <script>document.write("nope")</script>
              trailing text
            </body></html>"#,
        );

        assert_eq!(
            blocks(&fixture),
            [
                "h1:Annual & Final",
                "p:First paragraph.",
                r#"table:[["Name", "Qty"], ["Bolts", "12"]]"#,
                "break",
                "h2:Notes",
                "p:trailing text",
            ]
        );
    }

    /// Verifies the serialized PDF parses and has one page per break.
    #[test]
    fn test_to_bytes_pages() {
        let bytes = PdfFixture::new()
            .heading("One")
            .page_break()
            .paragraph("Two")
            .to_bytes()
            .unwrap();

        assert!(bytes.starts_with(b"%PDF-1.5"));
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 2);

        let blank = Document::load_mem(&PdfFixture::new().to_bytes().unwrap()).unwrap();
        assert_eq!(blank.get_pages().len(), 1);
    }

    /// Verifies word wrapping.
    #[test]
    fn test_wrap() {
        assert_eq!(wrap("a bb ccc", 4), ["a bb", "ccc"]);
        assert_eq!(wrap("  ", 10), Vec::<String>::new());
    }

    /// Verifies the hang behaviour writes a partial file and times out.
    #[test]
    fn test_hang_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.pdf");
        let renderer = MockRenderer::new()
            .with_behavior(MockBehavior::Hang)
            .with_render_timeout(Duration::from_millis(50));

        let err = renderer
            .render_to_pdf("<p>x</p>", &out, &PageSettings::a4(), &CancellationToken::new())
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(out.exists(), "Partial output is left for the caller to clean up");
    }

    /// Verifies that failed renders poison the pooled session.
    #[test]
    fn test_failure_poisons_session() {
        let renderer = MockRenderer::failing(RenderStage::Print, "printer on fire")
            .with_pool(SessionPoolConfig::default())
            .unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = renderer
            .render_to_pdf(
                "<p>x</p>",
                &dir.path().join("out.pdf"),
                &PageSettings::a4(),
                &CancellationToken::new(),
            )
            .unwrap_err();

        assert_eq!(err.to_string(), "Render failed during print: printer on fire");
        let stats = renderer.stats().unwrap();
        assert_eq!(stats.total, 0, "Poisoned session must not be kept");
        assert_eq!(renderer.calls(), 1);
    }
}
