//! Flat output store for final artifacts.
//!
//! Artifacts are never written in place. Each request stages its output in a
//! hidden `.partial-*` file next to the final location and renames it over
//! the final name only after the size check passes:
//!
//! ```text
//! output/
//! ├── .partial-h2d-x81Kq.docx   ← being written by the strategy
//! ├── report.pdf                ← committed by an earlier request
//! └── invoice.docx
//! ```
//!
//! Because the staging file lives in the same directory, the commit is a
//! single `rename` on the same filesystem. A reader of `output/` sees either
//! the previous artifact or the complete new one, never a truncated file.
//! Dropping an uncommitted [`StagedArtifact`] deletes it. Staging files left
//! by a crashed process are swept when the store is opened.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempPath;

use crate::error::{ConversionError, Result};
use crate::sanitize::{SafeArtifactName, is_safe_name};

const STAGING_PREFIX: &str = ".partial-";

/// Staging files older than this belong to no live request.
const STALE_STAGING_AGE: Duration = Duration::from_secs(15 * 60);

/// Directory that receives final artifacts.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    /// Open the store, creating the directory (and parents) if missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            ConversionError::io(format!("creating output directory {}", root.display()), e)
        })?;
        let swept = sweep_stale_staging(&root, SystemTime::now());
        if swept > 0 {
            log::info!("🧹 Removed {} stale staging files from {}", swept, root.display());
        }
        log::debug!("📁 Output store ready at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the artifact with this name lives once committed.
    pub fn final_path(&self, name: &SafeArtifactName) -> PathBuf {
        self.root.join(name.as_str())
    }

    /// Reserve a staging file for `name`.
    pub fn stage(&self, name: &SafeArtifactName) -> Result<StagedArtifact> {
        let suffix = format!(".{}", name.format().extension());
        let file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(&suffix)
            .tempfile_in(&self.root)
            .map_err(|e| {
                ConversionError::io(format!("staging {} in {}", name, self.root.display()), e)
            })?;

        let staged = StagedArtifact {
            temp: Some(file.into_temp_path()),
            destination: self.final_path(name),
        };
        log::trace!(
            "Staged {} at {}",
            staged.destination.display(),
            staged.path().display()
        );
        Ok(staged)
    }

    /// Delete a committed artifact.
    ///
    /// `name` must be a flat name as produced by
    /// [`sanitize`](crate::sanitize::sanitize); anything else is rejected
    /// with [`io::ErrorKind::InvalidInput`]. A missing file yields
    /// [`io::ErrorKind::NotFound`].
    pub fn remove(&self, name: &str) -> Result<()> {
        if !is_safe_name(name) {
            return Err(ConversionError::io(
                format!("removing artifact {:?}", name),
                io::Error::new(io::ErrorKind::InvalidInput, "not a valid artifact name"),
            ));
        }

        let path = self.root.join(name);
        std::fs::remove_file(&path)
            .map_err(|e| ConversionError::io(format!("removing artifact {}", name), e))?;
        log::info!("🗑️ Removed artifact {}", path.display());
        Ok(())
    }
}

/// Delete `.partial-*` files under `root` last modified before
/// `now - STALE_STAGING_AGE`. Returns how many were removed.
fn sweep_stale_staging(root: &Path, now: SystemTime) -> usize {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("⚠️ Cannot scan {} for stale staging files: {}", root.display(), e);
            return 0;
        }
    };

    let mut swept = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
            continue;
        }
        let stale = entry
            .metadata()
            .ok()
            .filter(|m| m.is_file())
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age >= STALE_STAGING_AGE);
        if !stale {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => swept += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "⚠️ Failed to remove stale staging file {}: {}",
                entry.path().display(),
                e
            ),
        }
    }
    swept
}

/// An artifact under construction.
///
/// Writers fill [`path()`](Self::path); [`commit()`](Self::commit) publishes
/// the file under its final name.
#[derive(Debug)]
pub struct StagedArtifact {
    temp: Option<TempPath>,
    destination: PathBuf,
}

impl StagedArtifact {
    /// Staging file to write into.
    pub fn path(&self) -> &Path {
        match &self.temp {
            Some(temp) => temp,
            None => &self.destination,
        }
    }

    /// Final location after commit.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Size of the staged file.
    ///
    /// A missing file or a zero-byte file is an I/O failure: a writer that
    /// reported success without producing output.
    pub fn size(&self) -> Result<u64> {
        let metadata = std::fs::metadata(self.path())
            .map_err(|e| ConversionError::io("sizing artifact", e))?;

        match metadata.len() {
            0 => Err(ConversionError::io(
                "sizing artifact",
                io::Error::new(io::ErrorKind::InvalidData, "artifact is empty"),
            )),
            len => Ok(len),
        }
    }

    /// Atomically move the staged file to its final name, replacing any
    /// earlier artifact with the same name.
    pub fn commit(mut self) -> Result<PathBuf> {
        let temp = match self.temp.take() {
            Some(temp) => temp,
            None => return Ok(self.destination.clone()),
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Staging files are created owner-only; artifacts are meant to be served.
            if let Err(e) = std::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o644))
            {
                log::warn!("⚠️ Could not relax permissions on {}: {}", temp.display(), e);
            }
        }

        temp.persist(&self.destination).map_err(|e| {
            ConversionError::io(
                format!("committing artifact {}", self.destination.display()),
                e.error,
            )
        })?;

        log::debug!("✅ Committed artifact {}", self.destination.display());
        Ok(self.destination.clone())
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            let shown = temp.to_path_buf();
            match temp.close() {
                Ok(()) => log::debug!("🧹 Discarded uncommitted artifact {}", shown.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!(
                    "⚠️ Failed to delete staged artifact {} (ignored): {}",
                    shown.display(),
                    e
                ),
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::sanitize;
    use crate::service::OutputFormat;

    fn visible_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Verifies that the store creates nested directories.
    #[test]
    fn test_open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("static").join("output");

        let store = OutputStore::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(store.root(), root.as_path());
    }

    /// Verifies that leftovers of a crashed run are swept on open while
    /// fresh staging files and artifacts stay.
    #[test]
    fn test_open_sweeps_stale_staging() {
        let dir = tempfile::tempdir().unwrap();
        let old = SystemTime::now() - Duration::from_secs(2 * 60 * 60);

        for name in [".partial-h2d-crash1.pdf", "kept.pdf"] {
            let file = std::fs::File::create(dir.path().join(name)).unwrap();
            file.set_modified(old).unwrap();
        }
        std::fs::write(dir.path().join(".partial-h2d-live.docx"), b"x").unwrap();

        OutputStore::open(dir.path()).unwrap();

        assert_eq!(
            visible_entries(dir.path()),
            vec![".partial-h2d-live.docx".to_string(), "kept.pdf".to_string()]
        );
    }

    /// Verifies stage, size, commit.
    #[test]
    fn test_stage_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::open(dir.path()).unwrap();
        let name = sanitize("report", OutputFormat::Pdf);

        let staged = store.stage(&name).unwrap();
        assert!(
            staged
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(STAGING_PREFIX)
        );
        assert!(!store.final_path(&name).exists(), "Nothing at final path before commit");

        std::fs::write(staged.path(), b"%PDF-1.7 body").unwrap();
        assert_eq!(staged.size().unwrap(), 13);

        let path = staged.commit().unwrap();
        assert_eq!(path, dir.path().join("report.pdf"));
        assert_eq!(visible_entries(dir.path()), vec!["report.pdf".to_string()]);
    }

    /// Verifies that an empty staged file fails the size check and is
    /// removed on drop.
    #[test]
    fn test_empty_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::open(dir.path()).unwrap();
        let name = sanitize("empty", OutputFormat::Docx);

        {
            let staged = store.stage(&name).unwrap();
            let err = staged.size().unwrap_err();
            assert_eq!(err.stage(), crate::error::FailureStage::Io);
        }

        assert!(visible_entries(dir.path()).is_empty());
    }

    /// Verifies last-writer-wins replacement.
    #[test]
    fn test_commit_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::open(dir.path()).unwrap();
        let name = sanitize("same", OutputFormat::Pdf);

        for body in [&b"first"[..], &b"second"[..]] {
            let staged = store.stage(&name).unwrap();
            std::fs::write(staged.path(), body).unwrap();
            staged.commit().unwrap();
        }

        assert_eq!(std::fs::read(store.final_path(&name)).unwrap(), b"second");
    }

    /// Verifies artifact removal and its guards.
    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("old.pdf"), b"x").unwrap();

        store.remove("old.pdf").unwrap();
        assert!(!dir.path().join("old.pdf").exists());

        match store.remove("old.pdf") {
            Err(ConversionError::Io { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound)
            }
            other => panic!("Expected NotFound, got {:?}", other),
        }

        match store.remove("../secret.pdf") {
            Err(ConversionError::Io { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidInput)
            }
            other => panic!("Expected InvalidInput, got {:?}", other),
        }
    }
}
