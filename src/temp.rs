//! Scoped scratch files.
//!
//! Every intermediate file the pipeline creates (the HTML handed to pandoc,
//! the PDF handed to layout reconstruction) goes through this module, so it
//! is deleted on every exit path: success, error, or unwinding.
//!
//! | Item | Use |
//! |------|-----|
//! | [`with_temp`] | File only needed for the duration of a closure |
//! | [`TransientArtifact`] | File that has to outlive a single call |
//!
//! A failed deletion is logged at `warn` and otherwise ignored. It never
//! replaces the error or result of the work that used the file.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;

use crate::error::{ConversionError, Result};

const PREFIX: &str = "h2d-";

/// A uniquely named scratch file, deleted when dropped.
///
/// ```rust
/// use html2doc_pipeline::TransientArtifact;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = {
///     let artifact = TransientArtifact::create(dir.path(), ".pdf").unwrap();
///     std::fs::write(artifact.path(), b"%PDF-1.7").unwrap();
///     artifact.path().to_path_buf()
/// };
/// assert!(!path.exists());
/// ```
#[derive(Debug)]
pub struct TransientArtifact {
    path: Option<TempPath>,
}

impl TransientArtifact {
    /// Create an empty file with the given suffix inside `dir`.
    pub fn create(dir: &Path, suffix: &str) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(PREFIX)
            .suffix(suffix)
            .tempfile_in(dir)
            .map_err(|e| {
                ConversionError::io(format!("creating scratch file in {}", dir.display()), e)
            })?;

        let path = file.into_temp_path();
        log::trace!("Created transient artifact {}", path.display());

        Ok(Self { path: Some(path) })
    }

    pub fn path(&self) -> &Path {
        match &self.path {
            Some(path) => path,
            None => Path::new(""),
        }
    }

    /// Delete now instead of at drop, reporting the outcome.
    pub fn close(mut self) -> io::Result<()> {
        match self.path.take() {
            Some(path) => remove(path),
            None => Ok(()),
        }
    }
}

impl Drop for TransientArtifact {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let shown: PathBuf = path.to_path_buf();
            if let Err(e) = remove(path) {
                log::warn!(
                    "⚠️ Failed to delete transient file {} (ignored): {}",
                    shown.display(),
                    e
                );
            }
        }
    }
}

fn remove(path: TempPath) -> io::Result<()> {
    let shown = path.to_path_buf();
    match path.close() {
        Ok(()) => {
            log::trace!("Deleted transient artifact {}", shown.display());
            Ok(())
        }
        // Someone else already removed it; the goal is met.
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Run `body` with a fresh scratch file and delete it afterwards.
///
/// The file exists and is empty when `body` starts. Whatever `body`
/// returns is returned unchanged.
///
/// ```rust
/// use html2doc_pipeline::with_temp;
///
/// let dir = tempfile::tempdir().unwrap();
/// let seen = with_temp(dir.path(), ".html", |path| {
///     std::fs::write(path, "<p>hi</p>").unwrap();
///     Ok(path.to_path_buf())
/// })
/// .unwrap();
///
/// assert!(!seen.exists());
/// ```
pub fn with_temp<T, F>(dir: &Path, suffix: &str, body: F) -> Result<T>
where
    F: FnOnce(&Path) -> Result<T>,
{
    let artifact = TransientArtifact::create(dir, suffix)?;
    let outcome = body(artifact.path());
    drop(artifact);
    outcome
}

// ============================================================================
// Unit Tests
// ============================================================================
