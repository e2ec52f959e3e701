//! # html2doc-pipeline
//!
//! HTML → PDF and HTML → DOCX conversion backed by a bounded pool of headless
//! Chrome sessions.
//!
//! Callers hand over a complete HTML document, a requested file name and an
//! output format. The pipeline sanitizes the name, renders the document in an
//! isolated browser context, optionally transcodes it to DOCX, and publishes
//! the artifact into a flat output directory.
//!
//! ## Features
//!
//! - **Bounded rendering**: Browser processes are pooled; requests beyond the
//!   limit queue instead of launching more
//! - **Isolation**: Every render runs in a fresh incognito context
//! - **Two DOCX strategies**: Structural (pandoc) or layout reconstruction
//!   from the rendered PDF, selected at deploy time
//! - **No partial artifacts**: Output is staged and renamed into place only
//!   once complete
//! - **Cleanup on every path**: Transient files and sessions are released on
//!   success, failure, timeout and cancellation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │      Your Application (HTTP, CLI, queue)    │
//! └─────────────────┬───────────────────────────┘
//!                   │ ConversionRequest
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │                Converter                    │
//! │  sanitize ─► render ─► transcode ─► commit  │
//! └───────┬──────────────┬─────────────┬────────┘
//!         │              │             │
//!         ▼              ▼             ▼
//! ┌──────────────┐ ┌─────────────┐ ┌─────────────┐
//! │ SessionPool  │ │DocxStrategy │ │ OutputStore │
//! │ (Chrome)     │ │pandoc/layout│ │ (flat dir)  │
//! └──────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use html2doc_pipeline::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ConverterConfigBuilder::new()
//!         .output_dir("static/output")
//!         .docx_strategy(DocxStrategyKind::Structural)
//!         .build()?;
//!
//!     let converter = Converter::from_config(config)?;
//!     converter.warmup().await?;
//!
//!     let result = converter
//!         .convert(ConversionRequest::new(
//!             "<html><body><h1>Hi</h1></body></html>",
//!             "test",
//!             OutputFormat::Pdf,
//!         ))
//!         .await?;
//!
//!     println!("{} -> {}", result.path, converter.artifact_url(&result));
//!     converter.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Configuration
//!
//! With the `env-config` feature (enabled by default):
//!
//! ```rust,ignore
//! use html2doc_pipeline::init_converter;
//!
//! let converter = init_converter().await?;
//! ```
//!
//! See [`config::env`] for the variables read from `app.env` and the process
//! environment.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `env-config` | Environment-based configuration |
//! | `test-utils` | Mock renderer, mock session factory and PDF fixtures |
//!
//! ## Error Handling
//!
//! Conversions return [`Result<T>`](Result), whose error is a stage-tagged
//! [`ConversionError`]:
//!
//! ```rust,ignore
//! match converter.convert(request).await {
//!     Ok(result) => serve(result),
//!     Err(ConversionError::Render { stage, detail }) => {
//!         eprintln!("render failed at {}: {}", stage, detail);
//!     }
//!     Err(e) => {
//!         let failure = ConversionFailure::from(&e);
//!         eprintln!("{}: {}", failure.stage, failure.cause);
//!     }
//! }
//! ```
//!
//! ## Testing
//!
//! For testing without Chrome, enable the `test-utils` feature and use
//! [`MockRenderer`](render::mock::MockRenderer):
//!
//! ```rust,ignore
//! use html2doc_pipeline::render::mock::MockRenderer;
//!
//! let converter = Converter::builder()
//!     .config(config)
//!     .renderer(Box::new(MockRenderer::new()))
//!     .build()?;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod docx;
pub mod error;
pub mod factory;
pub mod handle;
pub mod output;
pub mod pool;
pub mod prelude;
pub mod render;
pub mod sanitize;
pub mod service;
pub mod stats;
pub mod temp;
pub mod traits;
pub mod transcode;

// Internal modules (not publicly exposed)
pub(crate) mod tracked;

// ============================================================================
// Re-exports (Public API)
// ============================================================================

// Conversion service
pub use service::{ConversionRequest, ConversionResult, Converter, ConverterBuilder, OutputFormat};

// Configuration
pub use config::{
    ConverterConfig, ConverterConfigBuilder, DocxStrategyKind, Margins, PageSettings,
    SessionPoolConfig, SessionPoolConfigBuilder,
};

// Errors
pub use error::{
    ConfigError, ConversionError, ConversionFailure, FailureStage, RenderStage, Result,
    SessionError, TranscodeStage,
};

// Rendering and sessions
pub use factory::{ChromeSessionFactory, SessionFactory, create_chrome_options};
pub use handle::SessionHandle;
pub use pool::{SessionPool, SessionPoolBuilder};
pub use render::{ChromeRenderer, PdfRenderer};
pub use stats::PoolStats;
pub use traits::Healthcheck;

// Transcoding
pub use transcode::{DocxSource, DocxStrategy, LayoutReconstructStrategy, PandocStrategy};

// Files
pub use output::{OutputStore, StagedArtifact};
pub use sanitize::{SafeArtifactName, sanitize};
pub use temp::{TransientArtifact, with_temp};

// Feature-gated re-exports
#[cfg(feature = "env-config")]
pub use config::env::from_env;

#[cfg(feature = "env-config")]
pub use service::init_converter;
