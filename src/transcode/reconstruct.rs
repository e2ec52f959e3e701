//! PDF → DOCX layout reconstruction.
//!
//! [`extract_pages`] walks each page's content stream with `lopdf` and
//! replays the text-related operators to recover where every piece of text
//! sits and how large it is:
//!
//! | Operators | State |
//! |-----------|-------|
//! | `q` `Q` `cm` | Current transformation matrix stack |
//! | `BT` `ET` `Tm` `Td` `TD` `T*` | Text and line matrices |
//! | `Tf` `Tc` `Tw` `Tz` `TL` `Ts` `Tr` | Text state |
//! | `Tj` `TJ` `'` `"` | Text showing |
//! | `Do` | Form XObjects (recursively) |
//!
//! Strings are decoded with the font's `lopdf` [`Encoding`]: the `ToUnicode`
//! CMap that browsers embed for their `Identity-H` subset fonts, or the
//! named base encoding of a simple font. Glyph advances come from `Widths`
//! or the descendant font's `W` array.
//!
//! The positioned runs are handed to [`build_document`] and the result is
//! packaged by [`write_docx`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId};
use tokio_util::sync::CancellationToken;

use super::layout::{PageText, TextRun, build_document};
use super::{DocxSource, DocxStrategy};
use crate::config::DocxStrategyKind;
use crate::docx::write_docx;
use crate::error::{ConversionError, Result, TranscodeStage};

/// Nesting limit for form XObjects.
const MAX_FORM_DEPTH: usize = 8;
/// Nesting limit for the page tree.
const MAX_TREE_DEPTH: usize = 32;
/// `TJ` adjustment, in thousandths of an em, treated as a word gap.
const TJ_SPACE_THRESHOLD: f64 = 250.0;

fn reconstruct_error(detail: impl Into<String>) -> ConversionError {
    ConversionError::transcode(TranscodeStage::LayoutReconstruct, detail)
}

// ============================================================================
// LayoutReconstructStrategy
// ============================================================================

/// DOCX strategy that rebuilds the document from the rendered PDF.
///
/// No external process is involved, so the time budget is enforced
/// between pages.
#[derive(Debug, Clone)]
pub struct LayoutReconstructStrategy {
    timeout: Duration,
}

impl LayoutReconstructStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for LayoutReconstructStrategy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl DocxStrategy for LayoutReconstructStrategy {
    fn kind(&self) -> DocxStrategyKind {
        DocxStrategyKind::LayoutReconstruct
    }

    fn transcode(
        &self,
        source: DocxSource<'_>,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let pdf = match source {
            DocxSource::RenderedPdf(path) => path,
            other => {
                return Err(reconstruct_error(format!(
                    "expected a rendered PDF, got {}",
                    other.describe()
                )));
            }
        };

        let start = Instant::now();
        let deadline = start + self.timeout;
        log::debug!("📐 Reconstructing layout from {}", pdf.display());

        let pages = extract_pages(pdf, deadline, cancel)?;
        let document = build_document(&pages);

        if !document.has_text() {
            return Err(reconstruct_error("no extractable text in rendered PDF"));
        }

        write_docx(&document, destination)?;

        log::info!(
            "✅ Layout reconstructed: {} pages → {} blocks in {:?}",
            pages.len(),
            document.blocks.len(),
            start.elapsed()
        );
        Ok(())
    }
}

// ============================================================================
// Page extraction
// ============================================================================

/// Extract positioned text from every page of the PDF at `path`.
///
/// # Errors
///
/// A layout-reconstruct transcode error if the file cannot be parsed, the
/// deadline passes, or `cancel` fires.
pub fn extract_pages(
    path: &Path,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<Vec<PageText>> {
    let doc = Document::load(path).map_err(|e| {
        reconstruct_error(format!("cannot parse PDF {}: {}", path.display(), e))
    })?;

    let mut pages = Vec::new();
    for (number, page_id) in doc.get_pages() {
        if cancel.is_cancelled() {
            return Err(reconstruct_error("cancelled"));
        }
        if Instant::now() >= deadline {
            return Err(reconstruct_error(format!(
                "timed out before page {}",
                number
            )));
        }

        let page = extract_page(&doc, page_id)
            .map_err(|e| reconstruct_error(format!("page {}: {}", number, e)))?;
        log::trace!("Page {}: {} text runs", number, page.runs.len());
        pages.push(page);
    }

    if pages.is_empty() {
        return Err(reconstruct_error("PDF has no pages"));
    }
    Ok(pages)
}

fn extract_page(doc: &Document, page_id: ObjectId) -> std::result::Result<PageText, String> {
    let page = doc.get_dictionary(page_id).map_err(|e| e.to_string())?;
    let [x0, y0, x1, y1] = media_box(doc, page).unwrap_or([0.0, 0.0, 595.0, 842.0]);

    let content = doc
        .get_page_content(page_id)
        .map_err(|e| format!("cannot read content: {}", e))?;
    let scope = Scope {
        fonts: doc.get_page_fonts(page_id).map_err(|e| e.to_string())?,
        xobjects: page_xobjects(doc, page_id),
    };

    let mut interpreter = Interpreter {
        doc,
        runs: Vec::new(),
        fonts: HashMap::new(),
        x_origin: x0,
        y_top: y1,
    };
    interpreter.run(&content, &scope, Matrix::IDENTITY, 0)?;

    Ok(PageText {
        width: (x1 - x0).abs(),
        height: (y1 - y0).abs(),
        runs: interpreter.runs,
    })
}

// ============================================================================
// Object helpers
// ============================================================================

fn number(object: &Object) -> Option<f64> {
    object.as_float().ok().map(f64::from)
}

fn number_in(doc: &Document, object: &Object) -> Option<f64> {
    doc.dereference(object).ok().and_then(|(_, o)| number(o))
}

fn numbers(doc: &Document, object: &Object) -> Option<Vec<f64>> {
    doc.dereference(object)
        .and_then(|(_, o)| o.as_array())
        .ok()?
        .iter()
        .map(|o| number_in(doc, o))
        .collect()
}

fn resolved<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    doc.dereference(object).map(|(_, o)| o).unwrap_or(&Object::Null)
}

fn dict_in<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    dict.get_deref(key, doc).and_then(Object::as_dict).ok()
}

/// `MediaBox`, inherited through `Parent` when the page has none.
fn media_box(doc: &Document, page: &Dictionary) -> Option<[f64; 4]> {
    let mut node = page;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(b"MediaBox") {
            return numbers(doc, value)?.try_into().ok();
        }
        node = dict_in(doc, node, b"Parent")?;
    }
    None
}

fn page_xobjects(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let (own, inherited) = doc.get_page_resources(page_id).ok()?;
    own.into_iter()
        .chain(inherited.into_iter().filter_map(|id| doc.get_dictionary(id).ok()))
        .find_map(|resources| dict_in(doc, resources, b"XObject"))
}

/// Fonts and XObjects visible to a content stream.
#[derive(Clone, Default)]
struct Scope<'a> {
    fonts: BTreeMap<Vec<u8>, &'a Dictionary>,
    xobjects: Option<&'a Dictionary>,
}

impl<'a> Scope<'a> {
    /// Scope of a form XObject: its own resources shadow the caller's.
    fn nested(&self, doc: &'a Document, resources: Option<&'a Dictionary>) -> Scope<'a> {
        let Some(resources) = resources else {
            return self.clone();
        };

        let mut fonts = self.fonts.clone();
        if let Some(own) = dict_in(doc, resources, b"Font") {
            for (key, value) in own.iter() {
                if let Ok((_, Object::Dictionary(font))) = doc.dereference(value) {
                    fonts.insert(key.clone(), font);
                }
            }
        }

        Scope {
            fonts,
            xobjects: dict_in(doc, resources, b"XObject").or(self.xobjects),
        }
    }
}

// ============================================================================
// Matrices
// ============================================================================

/// Affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f64; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f64, ty: f64) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    fn from_operands(operands: &[f64]) -> Option<Self> {
        match operands {
            [a, b, c, d, e, f] => Some(Matrix([*a, *b, *c, *d, *e, *f])),
            _ => None,
        }
    }

    /// `self` applied first, then `other`.
    fn then(&self, other: &Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    /// Length of the transformed unit y vector.
    fn vertical_scale(&self) -> f64 {
        self.0[2].hypot(self.0[3])
    }
}

// ============================================================================
// Fonts
// ============================================================================

/// Text decoding and glyph metrics for one font resource.
#[derive(Debug, Default)]
struct FontInfo<'a> {
    encoding: Option<Encoding<'a>>,
    two_byte: bool,
    first_char: u32,
    widths: Vec<f64>,
    cid_widths: HashMap<u32, f64>,
    default_width: f64,
    bold: bool,
    italic: bool,
}

impl<'a> FontInfo<'a> {
    fn load(doc: &'a Document, dict: &'a Dictionary) -> Self {
        let subtype = dict.get(b"Subtype").and_then(Object::as_name).unwrap_or_default();
        let base_font = dict
            .get(b"BaseFont")
            .and_then(Object::as_name)
            .map(|n| String::from_utf8_lossy(n).to_ascii_lowercase())
            .unwrap_or_default();
        let two_byte = subtype == b"Type0";

        let encoding = if dict.type_is(b"Font") {
            dict.get_font_encoding(doc)
                .map_err(|e| log::debug!("No usable encoding for font {}: {}", base_font, e))
                .ok()
        } else {
            None
        };

        let mut info = FontInfo {
            encoding,
            two_byte,
            default_width: if two_byte { 1000.0 } else { 500.0 },
            ..FontInfo::default()
        };

        let mut descriptor = dict_in(doc, dict, b"FontDescriptor");

        if two_byte {
            let descendant = dict
                .get_deref(b"DescendantFonts", doc)
                .and_then(Object::as_array)
                .ok()
                .and_then(|fonts| fonts.first())
                .and_then(|f| doc.dereference(f).and_then(|(_, o)| o.as_dict()).ok());
            if let Some(cid_font) = descendant {
                if let Some(dw) = cid_font.get(b"DW").ok().and_then(|o| number_in(doc, o)) {
                    info.default_width = dw;
                }
                if let Ok(w) = cid_font.get(b"W") {
                    info.cid_widths = parse_cid_widths(doc, w);
                }
                descriptor = descriptor.or_else(|| dict_in(doc, cid_font, b"FontDescriptor"));
            }
        } else {
            info.first_char = dict
                .get(b"FirstChar")
                .ok()
                .and_then(|o| number_in(doc, o))
                .unwrap_or(0.0) as u32;
            info.widths = dict
                .get(b"Widths")
                .ok()
                .and_then(|o| numbers(doc, o))
                .unwrap_or_default();
        }

        let weight = descriptor
            .and_then(|d| d.get(b"FontWeight").ok())
            .and_then(|o| number_in(doc, o))
            .unwrap_or(0.0);
        let flags = descriptor
            .and_then(|d| d.get(b"Flags").ok())
            .and_then(|o| number_in(doc, o))
            .unwrap_or(0.0) as i64;

        info.bold = weight >= 600.0
            || (flags & (1 << 18)) != 0
            || ["bold", "black", "heavy", "semibold", "demi"]
                .iter()
                .any(|w| base_font.contains(w));
        info.italic = (flags & (1 << 6)) != 0
            || base_font.contains("italic")
            || base_font.contains("oblique");
        info
    }

    fn code_len(&self) -> usize {
        if self.two_byte { 2 } else { 1 }
    }

    /// Unicode text of a shown string. Unmapped codes are dropped.
    fn decode(&self, bytes: &[u8]) -> String {
        let Some(encoding) = self.encoding.as_ref() else {
            return String::new();
        };

        // ToUnicode maps are keyed by 16-bit codes, one-byte fonts included.
        let decoded = match encoding {
            Encoding::UnicodeMapEncoding(_) if !self.two_byte => {
                let widened: Vec<u8> = bytes.iter().flat_map(|b| [0, *b]).collect();
                Document::decode_text(encoding, &widened)
            }
            _ => Document::decode_text(encoding, bytes),
        };

        decoded
            .map(|text| text.replace(char::REPLACEMENT_CHARACTER, ""))
            .unwrap_or_default()
    }

    /// Advance width, in thousandths of an em, of each code in `bytes`, and
    /// whether it is the single-byte space that word spacing applies to.
    fn advances<'b>(&'b self, bytes: &'b [u8]) -> impl Iterator<Item = (f64, bool)> + 'b {
        bytes.chunks(self.code_len()).map(move |chunk| {
            let code = chunk.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
            let width = if self.two_byte {
                self.cid_widths.get(&code).copied().unwrap_or(self.default_width)
            } else {
                code.checked_sub(self.first_char)
                    .and_then(|i| self.widths.get(i as usize))
                    .copied()
                    .filter(|w| *w > 0.0)
                    .unwrap_or(self.default_width)
            };
            (width, !self.two_byte && code == 32)
        })
    }
}

/// Parse a CID font `W` array: `c [w1 w2 ...]` and `c_first c_last w`.
fn parse_cid_widths(doc: &Document, w: &Object) -> HashMap<u32, f64> {
    let mut widths = HashMap::new();
    let Ok((_, Object::Array(items))) = doc.dereference(w) else {
        return widths;
    };

    let mut i = 0;
    while i < items.len() {
        let Some(first) = number(resolved(doc, &items[i])) else {
            break;
        };
        match items.get(i + 1).map(|o| resolved(doc, o)) {
            Some(Object::Array(list)) => {
                for (offset, value) in list.iter().enumerate() {
                    if let Some(width) = number(resolved(doc, value)) {
                        widths.insert(first as u32 + offset as u32, width);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (Some(last), Some(width)) = (
                    number(last),
                    items.get(i + 2).and_then(|o| number(resolved(doc, o))),
                ) else {
                    break;
                };
                let (lo, hi) = (first as u32, last as u32);
                if hi >= lo && hi - lo <= 0xFFFF {
                    for cid in lo..=hi {
                        widths.insert(cid, width);
                    }
                }
                i += 3;
            }
            None => break,
        }
    }
    widths
}

// ============================================================================
// Content interpreter
// ============================================================================

#[derive(Debug, Clone)]
struct GraphicsState<'a> {
    ctm: Matrix,
    font: Option<Rc<FontInfo<'a>>>,
    font_size: f64,
    char_spacing: f64,
    word_spacing: f64,
    horizontal_scale: f64,
    leading: f64,
    rise: f64,
    render_mode: i64,
}

impl GraphicsState<'_> {
    fn new(ctm: Matrix) -> Self {
        Self {
            ctm,
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: 0,
        }
    }
}

struct Interpreter<'a> {
    doc: &'a Document,
    runs: Vec<TextRun>,
    /// Keyed by font dictionary address.
    fonts: HashMap<usize, Rc<FontInfo<'a>>>,
    x_origin: f64,
    y_top: f64,
}

impl<'a> Interpreter<'a> {
    fn run(
        &mut self,
        content: &[u8],
        scope: &Scope<'a>,
        ctm: Matrix,
        depth: usize,
    ) -> std::result::Result<(), String> {
        let content = Content::decode(content).map_err(|e| format!("bad content stream: {}", e))?;

        let mut state = GraphicsState::new(ctm);
        let mut stack: Vec<GraphicsState<'a>> = Vec::new();
        let mut tm = Matrix::IDENTITY;
        let mut tlm = Matrix::IDENTITY;

        for op in &content.operations {
            let nums: Vec<f64> = op.operands.iter().filter_map(number).collect();
            match op.operator.as_str() {
                "q" => stack.push(state.clone()),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        state = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(&nums) {
                        state.ctm = m.then(&state.ctm);
                    }
                }
                "BT" => {
                    tm = Matrix::IDENTITY;
                    tlm = Matrix::IDENTITY;
                }
                "ET" => {}
                "Tf" => {
                    if let (Some(key), Some(size)) =
                        (op.operands.first().and_then(|o| o.as_name().ok()), nums.first())
                    {
                        state.font = self.font(scope, key);
                        state.font_size = *size;
                    }
                }
                "Tc" => state.char_spacing = nums.first().copied().unwrap_or(0.0),
                "Tw" => state.word_spacing = nums.first().copied().unwrap_or(0.0),
                "Tz" => state.horizontal_scale = nums.first().copied().unwrap_or(100.0) / 100.0,
                "TL" => state.leading = nums.first().copied().unwrap_or(0.0),
                "Ts" => state.rise = nums.first().copied().unwrap_or(0.0),
                "Tr" => state.render_mode = nums.first().copied().unwrap_or(0.0) as i64,
                "Td" | "TD" => {
                    if let [tx, ty] = nums[..] {
                        if op.operator == "TD" {
                            state.leading = -ty;
                        }
                        tlm = Matrix::translate(tx, ty).then(&tlm);
                        tm = tlm;
                    }
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(&nums) {
                        tlm = m;
                        tm = m;
                    }
                }
                "T*" => {
                    tlm = Matrix::translate(0.0, -state.leading).then(&tlm);
                    tm = tlm;
                }
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = op.operands.first() {
                        self.show(&state, &mut tm, &[TjItem::Text(bytes)]);
                    }
                }
                "'" | "\"" => {
                    if op.operator == "\"" {
                        if let [aw, ac, ..] = nums[..] {
                            state.word_spacing = aw;
                            state.char_spacing = ac;
                        }
                    }
                    tlm = Matrix::translate(0.0, -state.leading).then(&tlm);
                    tm = tlm;
                    if let Some(Object::String(bytes, _)) = op.operands.last() {
                        self.show(&state, &mut tm, &[TjItem::Text(bytes)]);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = op.operands.first() {
                        let items: Vec<TjItem<'_>> = items
                            .iter()
                            .filter_map(|item| match item {
                                Object::String(bytes, _) => Some(TjItem::Text(bytes)),
                                other => number(other).map(TjItem::Adjust),
                            })
                            .collect();
                        self.show(&state, &mut tm, &items);
                    }
                }
                "Do" => {
                    if depth < MAX_FORM_DEPTH {
                        if let Some(key) = op.operands.first().and_then(|o| o.as_name().ok()) {
                            self.form(scope, key, &state, depth)?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn font(&mut self, scope: &Scope<'a>, key: &[u8]) -> Option<Rc<FontInfo<'a>>> {
        let dict = *scope.fonts.get(key)?;
        let cache_key = dict as *const Dictionary as usize;
        if let Some(font) = self.fonts.get(&cache_key) {
            return Some(Rc::clone(font));
        }

        let info = Rc::new(FontInfo::load(self.doc, dict));
        self.fonts.insert(cache_key, Rc::clone(&info));
        Some(info)
    }

    fn form(
        &mut self,
        scope: &Scope<'a>,
        key: &[u8],
        state: &GraphicsState<'a>,
        depth: usize,
    ) -> std::result::Result<(), String> {
        let doc = self.doc;
        let Some(stream) = scope
            .xobjects
            .and_then(|x| x.get_deref(key, doc).and_then(Object::as_stream).ok())
        else {
            return Ok(());
        };

        if stream.dict.get(b"Subtype").and_then(Object::as_name).ok() != Some(b"Form".as_slice()) {
            return Ok(());
        }

        let matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|o| numbers(doc, o))
            .and_then(|m| Matrix::from_operands(&m))
            .unwrap_or(Matrix::IDENTITY);
        let nested = scope.nested(doc, dict_in(doc, &stream.dict, b"Resources"));
        let content = stream
            .get_plain_content()
            .map_err(|e| format!("cannot read form content: {}", e))?;

        self.run(&content, &nested, matrix.then(&state.ctm), depth + 1)
    }

    fn show(&mut self, state: &GraphicsState<'a>, tm: &mut Matrix, items: &[TjItem<'_>]) {
        let Some(font) = state.font.as_ref() else {
            return;
        };
        let size = state.font_size;
        let scale = state.horizontal_scale;

        let rendering = Matrix::translate(0.0, state.rise).then(tm).then(&state.ctm);
        let (start_x, start_y) = rendering.apply(0.0, 0.0);
        let effective_size = size.abs() * tm.then(&state.ctm).vertical_scale();

        let mut text = String::new();
        for item in items {
            match item {
                TjItem::Text(bytes) => {
                    text.push_str(&font.decode(bytes));
                    for (width, is_space) in font.advances(bytes) {
                        let mut advance = width / 1000.0 * size + state.char_spacing;
                        if is_space {
                            advance += state.word_spacing;
                        }
                        *tm = Matrix::translate(advance * scale, 0.0).then(tm);
                    }
                }
                TjItem::Adjust(amount) => {
                    if *amount <= -TJ_SPACE_THRESHOLD && !text.ends_with(char::is_whitespace) {
                        text.push(' ');
                    }
                    *tm = Matrix::translate(-amount / 1000.0 * size * scale, 0.0).then(tm);
                }
            }
        }

        // Invisible text (clipping-only or OCR layers) carries no layout.
        if state.render_mode == 3 || state.render_mode == 7 || text.trim().is_empty() {
            return;
        }

        let end = Matrix::translate(0.0, state.rise).then(tm).then(&state.ctm);
        let (end_x, _) = end.apply(0.0, 0.0);

        self.runs.push(TextRun {
            x: start_x.min(end_x) - self.x_origin,
            baseline: self.y_top - start_y,
            width: (end_x - start_x).abs(),
            size: effective_size,
            text,
            bold: font.bold,
            italic: font.italic,
        });
    }
}

enum TjItem<'b> {
    Text(&'b [u8]),
    Adjust(f64),
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::mock::{FixtureEncoding, PdfFixture};
    use lopdf::dictionary;

    fn far_future() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn write_fixture(dir: &Path, fixture: &PdfFixture) -> std::path::PathBuf {
        let path = dir.join("fixture.pdf");
        std::fs::write(&path, fixture.to_bytes().unwrap()).unwrap();
        path
    }

    /// Verifies matrix composition order.
    #[test]
    fn test_matrix_then() {
        let scale = Matrix([2.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
        let shift = Matrix::translate(10.0, 5.0);

        assert_eq!(scale.then(&shift).apply(1.0, 1.0), (12.0, 7.0));
        assert_eq!(shift.then(&scale).apply(1.0, 1.0), (22.0, 12.0));
    }

    /// Verifies extraction of positions, sizes and font styles.
    #[test]
    fn test_extract_positions() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = PdfFixture::new()
            .heading("Quarterly Summary")
            .paragraph("Revenue grew in every region.");
        let path = write_fixture(dir.path(), &fixture);

        let pages = extract_pages(&path, far_future(), &CancellationToken::new()).unwrap();
        assert_eq!(pages.len(), 1);

        let page = &pages[0];
        assert_eq!(page.width, 595.0);
        assert_eq!(page.height, 842.0);

        let heading = &page.runs[0];
        assert_eq!(heading.text, "Quarterly Summary");
        assert!(heading.bold);
        assert_eq!(heading.size, 24.0);
        assert_eq!(heading.x, 57.0);

        let body = &page.runs[1];
        assert_eq!(body.text, "Revenue grew in every region.");
        assert!(!body.bold);
        assert!(body.baseline > heading.baseline, "Body sits below the heading");
        assert!(body.width > 0.0);
    }

    /// Verifies extraction from browser-shaped output: Identity-H glyph ids
    /// behind a ToUnicode CMap, compressed content and a y-flipped page
    /// matrix.
    #[test]
    fn test_extract_chrome_shaped_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = PdfFixture::new()
            .encoding(FixtureEncoding::Chrome)
            .heading("HI H")
            .paragraph(
                "Shipments left the warehouse on time and arrived intact, \
                 with the remaining orders scheduled for the following week.",
            );
        let path = write_fixture(dir.path(), &fixture);

        let doc = Document::load(&path).unwrap();
        let page_id = doc.get_pages()[&1];
        let fonts = doc.get_page_fonts(page_id).unwrap();
        assert_eq!(fonts[b"F2".as_slice()].get(b"Subtype").unwrap().as_name().unwrap(), b"Type0");
        let content_id = doc.get_page_contents(page_id)[0];
        let content = doc.get_object(content_id).unwrap().as_stream().unwrap();
        assert_eq!(content.filters().unwrap(), ["FlateDecode"]);

        let pages = extract_pages(&path, far_future(), &CancellationToken::new()).unwrap();
        let runs = &pages[0].runs;

        assert_eq!(runs[0].text, "HI H");
        assert_eq!(runs[0].x, 57.0);
        assert_eq!(runs[0].baseline, 81.0);
        assert_eq!(runs[0].size, 24.0);
        assert!(runs[0].bold);

        assert!(runs[1].text.starts_with("Shipments left the warehouse"), "{}", runs[1].text);
        assert_eq!(runs[1].size, 12.0);
        assert!(!runs[1].bold);
        assert!(runs[1].baseline > runs[0].baseline, "Body sits below the heading");
        assert!(runs[1].width > 100.0, "Widths come from the W array");
    }

    /// Verifies that simple fonts decode the full WinAnsi range.
    #[test]
    fn test_win_ansi_decoding() {
        let doc = Document::with_version("1.5");
        let dict = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        };
        let font = FontInfo::load(&doc, &dict);

        assert_eq!(font.decode(&[0x99, 0x8A, 0x9C]), "™Šœ");
        assert_eq!(font.decode(b"Caf\xe9 \x80"), "Café €");
        assert!(!font.bold);
        assert_eq!(font.advances(b"ab c").filter(|(_, space)| *space).count(), 1);
    }

    fn document_xml(path: &Path) -> String {
        let file = std::fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut xml = String::new();
        std::io::Read::read_to_string(&mut archive.by_name("word/document.xml").unwrap(), &mut xml)
            .unwrap();
        xml
    }

    /// Verifies the strategy end to end on browser-shaped output.
    #[test]
    fn test_strategy_on_chrome_shaped_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = PdfFixture::new()
            .encoding(FixtureEncoding::Chrome)
            .heading("Inventory")
            .paragraph("Counts as of Monday.")
            .table(&[&["Item", "Count"], &["Bolts", "120"], &["Nuts", "75"]]);
        let pdf = write_fixture(dir.path(), &fixture);
        let out = dir.path().join("out.docx");

        LayoutReconstructStrategy::default()
            .transcode(DocxSource::RenderedPdf(&pdf), &out, &CancellationToken::new())
            .unwrap();

        let xml = document_xml(&out);
        assert!(xml.contains("Inventory"));
        assert!(xml.contains("Counts as of Monday."));
        assert!(xml.contains("</w:tbl>"));
        assert!(xml.contains("Bolts"));
    }

    /// Verifies the strategy end to end on a fixture PDF.
    #[test]
    fn test_strategy_writes_docx() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = PdfFixture::new()
            .heading("Inventory")
            .paragraph("Counts as of Monday.")
            .table(&[&["Item", "Count"], &["Bolts", "120"], &["Nuts", "75"]])
            .page_break()
            .paragraph("Appendix");
        let pdf = write_fixture(dir.path(), &fixture);
        let out = dir.path().join("out.docx");

        LayoutReconstructStrategy::default()
            .transcode(DocxSource::RenderedPdf(&pdf), &out, &CancellationToken::new())
            .unwrap();

        let xml = document_xml(&out);
        assert!(xml.contains(r#"w:pStyle w:val="Heading1""#));
        assert!(xml.contains("Inventory"));
        assert!(xml.contains("</w:tbl>"));
        assert!(xml.contains("Bolts"));
        assert!(xml.contains(r#"w:type="page""#));
        assert!(xml.contains("Appendix"));
    }

    /// Verifies the failure modes.
    #[test]
    fn test_strategy_failures() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = LayoutReconstructStrategy::default();
        let out = dir.path().join("out.docx");
        let cancel = CancellationToken::new();

        let garbage = dir.path().join("garbage.pdf");
        std::fs::write(&garbage, b"this is not a pdf").unwrap();
        let err = strategy
            .transcode(DocxSource::RenderedPdf(&garbage), &out, &cancel)
            .unwrap_err();
        assert!(matches!(
            err,
            ConversionError::Transcode {
                stage: TranscodeStage::LayoutReconstruct,
                ..
            }
        ));

        let blank = write_fixture(dir.path(), &PdfFixture::new());
        let err = strategy
            .transcode(DocxSource::RenderedPdf(&blank), &out, &cancel)
            .unwrap_err();
        assert!(err.to_string().contains("no extractable text"), "{}", err);

        let err = strategy
            .transcode(DocxSource::Html("<p>x</p>"), &out, &cancel)
            .unwrap_err();
        assert!(err.to_string().contains("expected a rendered PDF"));

        assert!(!out.exists(), "No output on failure");
    }

    /// Verifies that a cancelled token stops extraction.
    #[test]
    fn test_cancelled_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_fixture(dir.path(), &PdfFixture::new().paragraph("x"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = extract_pages(&pdf, far_future(), &cancel).unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    /// Verifies W array parsing in both forms.
    #[test]
    fn test_parse_cid_widths() {
        let doc = Document::with_version("1.5");
        let w = Object::Array(vec![
            1.into(),
            Object::Array(vec![500.into(), 600.into()]),
            10.into(),
            12.into(),
            250.into(),
        ]);

        let widths = parse_cid_widths(&doc, &w);
        assert_eq!(widths.get(&1), Some(&500.0));
        assert_eq!(widths.get(&2), Some(&600.0));
        assert_eq!(widths.get(&11), Some(&250.0));
        assert_eq!(widths.get(&13), None);
    }
}
