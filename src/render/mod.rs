//! HTML → PDF rendering.
//!
//! [`PdfRenderer`] is the seam between the orchestrator and the browser:
//!
//! | Renderer | Backend | Availability |
//! |----------|---------|--------------|
//! | [`ChromeRenderer`] | Headless Chrome over CDP, pooled processes | Always |
//! | [`mock::MockRenderer`] | `lopdf` fixtures, no browser | `test-utils` feature |
//!
//! Renderers are blocking. The orchestrator calls them from
//! `tokio::task::spawn_blocking`.

mod chrome;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::config::PageSettings;
use crate::error::{Result, SessionError};
use crate::stats::PoolStats;

pub use chrome::ChromeRenderer;

/// Renders an HTML document into a PDF file.
///
/// Implementations must not leak state between calls: two documents
/// rendered one after the other must not see each other's cookies,
/// storage, or viewport.
///
/// # Errors
///
/// [`ConversionError::Render`](crate::ConversionError::Render) tagged
/// `acquire`, `load` or `print`; [`ConversionError::Io`](crate::ConversionError::Io)
/// if the PDF cannot be written to `destination`.
pub trait PdfRenderer: Send + Sync {
    /// Render `html` with the given page policy and write the PDF to
    /// `destination`.
    fn render_to_pdf(
        &self,
        html: &str,
        destination: &Path,
        page: &PageSettings,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Session pool statistics, if the renderer pools sessions.
    fn stats(&self) -> Option<PoolStats> {
        None
    }

    /// Whether the renderer can accept work.
    fn is_ready(&self) -> bool {
        true
    }

    /// Pre-launch sessions. Blocking; returns the number of idle sessions.
    fn warmup(&self) -> std::result::Result<usize, SessionError> {
        Ok(0)
    }

    /// Release every pooled resource. Idempotent.
    fn shutdown(&self) {}
}
