//! Error types for the conversion pipeline.
//!
//! Every failure a caller can observe is a [`ConversionError`], tagged with
//! the pipeline stage that produced it:
//!
//! | Variant | Stage | Typical cause |
//! |---------|-------|---------------|
//! | [`ConversionError::Render`] | `render` | No session, load timeout, print failure |
//! | [`ConversionError::Transcode`] | `transcode` | pandoc exit status, unreadable PDF |
//! | [`ConversionError::Io`] | `io` | Output directory, scratch files, empty artifact |
//!
//! Two narrower error types feed into it:
//!
//! - [`SessionError`] for the rendering session pool
//! - [`ConfigError`] for configuration validation and optional assets
//!
//! # Example
//!
//! ```rust
//! use html2doc_pipeline::{ConversionError, FailureStage, RenderStage};
//!
//! let error = ConversionError::render(RenderStage::Load, "page load exceeded 30000ms");
//! assert_eq!(error.stage(), FailureStage::Render);
//! assert_eq!(
//!     error.to_string(),
//!     "Render failed during load: page load exceeded 30000ms"
//! );
//! ```

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

// ============================================================================
// Stage tags
// ============================================================================

/// Coarse pipeline stage a failure is attributed to.
///
/// Serialized lowercase (`"render"`, `"transcode"`, `"io"`) so it can be
/// handed to an HTTP layer unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// Browser layout and printing.
    Render,
    /// PDF or HTML to DOCX conversion.
    Transcode,
    /// Filesystem work around the conversion.
    Io,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureStage::Render => "render",
            FailureStage::Transcode => "transcode",
            FailureStage::Io => "io",
        })
    }
}

/// Step inside the render engine adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderStage {
    /// Checking a browser session out of the pool.
    Acquire,
    /// Loading the document and waiting for the network to settle.
    Load,
    /// Printing the laid-out page to PDF.
    Print,
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RenderStage::Acquire => "acquire",
            RenderStage::Load => "load",
            RenderStage::Print => "print",
        })
    }
}

/// Which DOCX strategy failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranscodeStage {
    /// External structural converter.
    Pandoc,
    /// PDF layout reconstruction.
    LayoutReconstruct,
}

impl fmt::Display for TranscodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TranscodeStage::Pandoc => "pandoc",
            TranscodeStage::LayoutReconstruct => "layout-reconstruct",
        })
    }
}

// ============================================================================
// ConversionError
// ============================================================================

/// Errors surfaced by a conversion request.
///
/// The pipeline never retries; by the time one of these reaches the caller
/// every transient file and staged artifact of the request has already been
/// removed.
///
/// # Example
///
/// ```rust
/// use html2doc_pipeline::{ConversionError, TranscodeStage};
///
/// fn describe(error: &ConversionError) -> String {
///     match error {
///         ConversionError::Render { stage, .. } => format!("renderer ({stage})"),
///         ConversionError::Transcode { stage: TranscodeStage::Pandoc, detail } => {
///             format!("pandoc said: {detail}")
///         }
///         ConversionError::Transcode { .. } => "layout reconstruction".to_string(),
///         ConversionError::Io { context, .. } => format!("filesystem: {context}"),
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// The render engine could not produce a PDF.
    #[error("Render failed during {stage}: {detail}")]
    Render {
        /// Step that failed.
        stage: RenderStage,
        /// Engine-provided message.
        detail: String,
    },

    /// A DOCX strategy could not produce a document.
    ///
    /// For [`TranscodeStage::Pandoc`] the detail carries the converter's
    /// stderr verbatim.
    #[error("Transcode failed in {stage}: {detail}")]
    Transcode {
        /// Strategy that failed.
        stage: TranscodeStage,
        /// Diagnostic output.
        detail: String,
    },

    /// Filesystem failure, including a missing or zero-byte artifact.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What the pipeline was doing.
        context: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

impl ConversionError {
    /// Shorthand for a [`ConversionError::Render`].
    pub fn render(stage: RenderStage, detail: impl Into<String>) -> Self {
        ConversionError::Render {
            stage,
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`ConversionError::Transcode`].
    pub fn transcode(stage: TranscodeStage, detail: impl Into<String>) -> Self {
        ConversionError::Transcode {
            stage,
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`ConversionError::Io`].
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ConversionError::Io {
            context: context.into(),
            source,
        }
    }

    /// Stage the failure belongs to.
    pub fn stage(&self) -> FailureStage {
        match self {
            ConversionError::Render { .. } => FailureStage::Render,
            ConversionError::Transcode { .. } => FailureStage::Transcode,
            ConversionError::Io { .. } => FailureStage::Io,
        }
    }

    /// `true` if the request ran out of time rather than failing outright.
    pub fn is_timeout(&self) -> bool {
        match self {
            ConversionError::Io { source, .. } => source.kind() == std::io::ErrorKind::TimedOut,
            ConversionError::Render { detail, .. } | ConversionError::Transcode { detail, .. } => {
                detail.contains("timed out")
            }
        }
    }
}

/// Result type alias using [`ConversionError`].
pub type Result<T> = std::result::Result<T, ConversionError>;

// ============================================================================
// SessionError
// ============================================================================

/// Errors raised by the rendering session pool.
///
/// Callers of the pipeline see these wrapped as
/// `ConversionError::Render { stage: RenderStage::Acquire, .. }`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Launching a new browser process failed.
    ///
    /// Usually a missing Chrome binary or an unsupported launch flag.
    #[error("Failed to create rendering session: {0}")]
    Creation(String),

    /// An idle session did not answer its health check.
    #[error("Session health check failed: {0}")]
    HealthCheckFailed(String),

    /// The pool is shutting down and hands out nothing.
    #[error("Session pool is shutting down")]
    ShuttingDown,

    /// Every session stayed busy until the acquire deadline.
    #[error("Timed out after {0}ms waiting for a rendering session")]
    AcquireTimeout(u128),

    /// The request was cancelled while waiting for a session.
    #[error("Cancelled while waiting for a rendering session")]
    Cancelled,

    /// The pool was built with an unusable configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<SessionError> for ConversionError {
    fn from(error: SessionError) -> Self {
        let detail = match &error {
            SessionError::AcquireTimeout(_) => format!("{} (timed out)", error),
            _ => error.to_string(),
        };
        ConversionError::render(RenderStage::Acquire, detail)
    }
}

// ============================================================================
// ConfigError
// ============================================================================

/// Configuration problems.
///
/// [`ConfigError::MissingReferenceDoc`] is the one non-fatal case: the
/// structural strategy logs it and carries on with pandoc's built-in styles.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// A reference template was configured but does not exist.
    #[error("Reference document not found: {}", .0.display())]
    MissingReferenceDoc(PathBuf),
}

impl From<String> for ConfigError {
    fn from(msg: String) -> Self {
        ConfigError::Invalid(msg)
    }
}

impl From<&str> for ConfigError {
    fn from(msg: &str) -> Self {
        ConfigError::Invalid(msg.to_string())
    }
}

// ============================================================================
// ConversionFailure
// ============================================================================

/// Plain, serializable view of a failed conversion.
///
/// ```rust
/// use html2doc_pipeline::{ConversionError, ConversionFailure, TranscodeStage};
///
/// let error = ConversionError::transcode(TranscodeStage::Pandoc, "Unknown reader: htm");
/// let failure = ConversionFailure::from(&error);
///
/// assert_eq!(
///     serde_json::to_string(&failure).unwrap(),
///     r#"{"stage":"transcode","cause":"Transcode failed in pandoc: Unknown reader: htm"}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionFailure {
    /// Stage the failure belongs to.
    pub stage: FailureStage,
    /// Human-readable cause, including the engine's own message.
    pub cause: String,
}

impl From<&ConversionError> for ConversionFailure {
    fn from(error: &ConversionError) -> Self {
        Self {
            stage: error.stage(),
            cause: error.to_string(),
        }
    }
}

impl From<ConversionError> for ConversionFailure {
    fn from(error: ConversionError) -> Self {
        Self::from(&error)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
