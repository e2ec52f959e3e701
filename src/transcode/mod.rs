//! DOCX transcoding strategies.
//!
//! Two interchangeable implementations of [`DocxStrategy`] exist; one of them
//! is chosen at deploy time through
//! [`ConverterConfig::docx_strategy`](crate::ConverterConfig::docx_strategy):
//!
//! | Strategy | Input | Fidelity |
//! |----------|-------|----------|
//! | [`PandocStrategy`] | HTML | Semantic structure (headings, lists, tables), pandoc styling |
//! | [`LayoutReconstructStrategy`] | PDF rendered from the HTML | Visual layout (sizes, indents, spacing, page breaks) |
//!
//! ```text
//!            ┌──────────────┐
//!  HTML ────►│ PandocStrategy│────────────────────────► .docx
//!            └──────────────┘
//!            ┌──────────┐   PDF   ┌───────────────────────────┐
//!  HTML ────►│ renderer │────────►│ LayoutReconstructStrategy │──► .docx
//!            └──────────┘         └───────────────────────────┘
//! ```
//!
//! Both honour a cancellation token and their own time budget, and both
//! leave nothing behind but the destination file.

mod layout;
mod pandoc;
mod reconstruct;

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::config::DocxStrategyKind;
use crate::error::Result;

pub use layout::{PageText, TextRun, build_document};
pub use pandoc::PandocStrategy;
pub use reconstruct::{LayoutReconstructStrategy, extract_pages};

/// Input handed to a [`DocxStrategy`].
#[derive(Debug, Clone, Copy)]
pub enum DocxSource<'a> {
    /// The original HTML document.
    Html(&'a str),
    /// A PDF rendered from the same HTML.
    RenderedPdf(&'a Path),
}

impl DocxSource<'_> {
    fn describe(&self) -> &'static str {
        match self {
            DocxSource::Html(_) => "HTML",
            DocxSource::RenderedPdf(_) => "rendered PDF",
        }
    }
}

/// Converts a document into a DOCX file at `destination`.
///
/// Implementations are blocking and must be safe to call from several
/// threads at once.
///
/// # Example
///
/// ```rust,ignore
/// use html2doc_pipeline::transcode::{DocxSource, DocxStrategy, PandocStrategy};
/// use tokio_util::sync::CancellationToken;
///
/// let strategy = PandocStrategy::new("pandoc");
/// strategy.transcode(
///     DocxSource::Html("<h1>Hello</h1>"),
///     std::path::Path::new("hello.docx"),
///     &CancellationToken::new(),
/// )?;
/// ```
pub trait DocxStrategy: Send + Sync {
    /// Which deployed strategy this is.
    fn kind(&self) -> DocxStrategyKind;

    /// Produce the DOCX.
    ///
    /// # Errors
    ///
    /// [`ConversionError::Transcode`](crate::ConversionError::Transcode)
    /// tagged with the strategy's stage, or an I/O error for scratch files.
    fn transcode(
        &self,
        source: DocxSource<'_>,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
