//! Filename sanitizer for output artifacts.
//!
//! [`sanitize`] turns a caller-supplied filename into a [`SafeArtifactName`]:
//! a flat file name that cannot escape the output directory and always
//! carries the extension of the requested format.
//!
//! # Rules
//!
//! 1. Keep only `[A-Za-z0-9_.-]`; path separators and everything else vanish.
//! 2. Collapse runs of dots and trim dots from both ends, so no `..`
//!    segment and no hidden-file name survive.
//! 3. If the name already ends with `.<ext>` (any case) keep it; otherwise
//!    strip the last extension, if any.
//! 4. An empty stem becomes `document`; long stems are cut to 200 bytes.
//! 5. Append the lowercase extension.
//!
//! # Example
//!
//! ```rust
//! use html2doc_pipeline::{OutputFormat, sanitize};
//!
//! assert_eq!(sanitize("test", OutputFormat::Pdf).as_str(), "test.pdf");
//! assert_eq!(sanitize("report.PDF", OutputFormat::Pdf).as_str(), "report.pdf");
//! assert_eq!(sanitize("notes.txt", OutputFormat::Docx).as_str(), "notes.docx");
//! assert_eq!(
//!     sanitize("../../etc/passwd.docx", OutputFormat::Docx).as_str(),
//!     "etcpasswd.docx"
//! );
//! ```

use std::fmt;
use std::path::Path;

use crate::service::OutputFormat;

/// Stem used when nothing usable is left of the requested name.
pub const FALLBACK_STEM: &str = "document";

/// Longest stem kept, in bytes. The name stays well under the 255-byte
/// limit of common filesystems once the extension is added.
pub const MAX_STEM_LEN: usize = 200;

/// A flat, extension-correct artifact file name.
///
/// Only produced by [`sanitize`], so holding one is proof the name matches
/// `[A-Za-z0-9_.-]+\.(pdf|docx)` and contains no `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeArtifactName {
    name: String,
    format: OutputFormat,
}

impl SafeArtifactName {
    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Name without the trailing extension.
    pub fn stem(&self) -> &str {
        let ext_len = self.format.extension().len() + 1;
        &self.name[..self.name.len() - ext_len]
    }

    pub fn into_string(self) -> String {
        self.name
    }
}

impl fmt::Display for SafeArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl AsRef<Path> for SafeArtifactName {
    fn as_ref(&self) -> &Path {
        Path::new(&self.name)
    }
}

impl AsRef<str> for SafeArtifactName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

/// Sanitize a requested filename for the given output format.
///
/// Pure and total: every input, including the empty string, yields a valid
/// name.
pub fn sanitize(requested: &str, format: OutputFormat) -> SafeArtifactName {
    let ext = format.extension();

    let filtered: String = requested
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();

    let mut collapsed = String::with_capacity(filtered.len());
    for c in filtered.chars() {
        if c == '.' && collapsed.ends_with('.') {
            continue;
        }
        collapsed.push(c);
    }
    let trimmed = collapsed.trim_end_matches('.');

    let wanted_suffix = format!(".{}", ext);
    let stem = if trimmed.to_ascii_lowercase().ends_with(&wanted_suffix) {
        &trimmed[..trimmed.len() - wanted_suffix.len()]
    } else {
        match trimmed.rfind('.') {
            // A leading dot marks a hidden name, not an extension.
            Some(dot) if dot > 0 => &trimmed[..dot],
            _ => trimmed,
        }
    };

    let stem = stem.trim_matches('.');
    // All remaining characters are ASCII, so byte truncation is safe.
    let stem = &stem[..stem.len().min(MAX_STEM_LEN)];
    let stem = stem.trim_end_matches('.');
    let stem = if stem.is_empty() { FALLBACK_STEM } else { stem };

    let name = format!("{}.{}", stem, ext);
    log::trace!("Sanitized filename {:?} -> {:?}", requested, name);

    SafeArtifactName { name, format }
}

/// `true` if `name` is already a flat name [`sanitize`] could have produced.
///
/// Used to vet names coming back from callers, for example when deleting an
/// artifact.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

// ============================================================================
// Unit Tests
// ============================================================================
