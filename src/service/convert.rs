//! Conversion orchestrator.
//!
//! [`Converter`] drives one request through the pipeline:
//!
//! ```text
//!  Start ──► Sanitized ──► Rendered? ──► Transcoded? ──► Sized ──► Done
//!                │             │              │             │
//!                └─────────────┴──────┬───────┴─────────────┘
//!                                     ▼
//!                               Failed(stage)
//! ```
//!
//! | Output | Strategy | Rendered | Transcoded |
//! |--------|----------|----------|------------|
//! | PDF | any | into the staged artifact | skipped |
//! | DOCX | structural | skipped | HTML → staged artifact |
//! | DOCX | layout-reconstruct | into a transient PDF | PDF → staged artifact |
//!
//! The artifact is written to a hidden staging file in the output directory
//! and only renamed to its final name once it has been sized. A failed or
//! cancelled request therefore never leaves a partial artifact, and any
//! earlier artifact with the same name is left as it was.
//!
//! # Blocking vs. async
//!
//! [`Converter::convert_blocking`] is the synchronous core. In an async
//! context use [`Converter::convert`], which runs it on the blocking thread
//! pool under the whole-request timeout:
//!
//! ```rust,ignore
//! let converter = Converter::from_config(config)?;
//! converter.warmup().await?;
//!
//! let result = converter
//!     .convert(ConversionRequest::new(html, "report", OutputFormat::Pdf))
//!     .await?;
//! println!("{}", converter.artifact_url(&result));
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use tokio_util::sync::CancellationToken;

use super::types::{ConversionRequest, ConversionResult, OutputFormat};
use crate::config::{ConverterConfig, DocxStrategyKind};
use crate::error::{ConversionError, RenderStage, Result, SessionError};
use crate::output::{OutputStore, StagedArtifact};
use crate::render::{ChromeRenderer, PdfRenderer};
use crate::sanitize::{SafeArtifactName, sanitize};
use crate::stats::PoolStats;
use crate::temp::TransientArtifact;
use crate::transcode::{DocxSource, DocxStrategy, LayoutReconstructStrategy, PandocStrategy};

// ============================================================================
// Converter
// ============================================================================

/// HTML → PDF/DOCX conversion service.
///
/// Cheap to clone; clones share the renderer, its session pool and the
/// output store.
///
/// # Thread Safety
///
/// Any number of conversions may run at once. Concurrency against the
/// browser is bounded by the session pool; requests beyond the bound queue
/// until a session frees up or the acquire timeout elapses.
#[derive(Clone)]
pub struct Converter {
    inner: Arc<ConverterInner>,
}

struct ConverterInner {
    config: ConverterConfig,
    store: OutputStore,
    scratch_dir: PathBuf,
    renderer: Box<dyn PdfRenderer>,
    docx: Box<dyn DocxStrategy>,
}

impl Converter {
    /// Create a builder.
    pub fn builder() -> ConverterBuilder {
        ConverterBuilder::new()
    }

    /// Converter with a Chrome renderer and the DOCX strategy selected by
    /// `config`.
    ///
    /// No browser is launched until the first render or
    /// [`warmup`](Self::warmup).
    pub fn from_config(config: ConverterConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.inner.config
    }

    /// Directory holding committed artifacts.
    pub fn output_dir(&self) -> &Path {
        self.inner.store.root()
    }

    /// The deployed DOCX strategy.
    pub fn docx_strategy(&self) -> DocxStrategyKind {
        self.inner.docx.kind()
    }

    /// Run one conversion on the current thread.
    ///
    /// Blocks for as long as the render and transcode take. Cancelling
    /// `cancel` aborts the in-flight stage; cleanup still runs before this
    /// returns.
    ///
    /// # Errors
    ///
    /// A stage-tagged [`ConversionError`]. By the time it is returned no
    /// transient file or staged artifact of this request remains.
    pub fn convert_blocking(
        &self,
        request: &ConversionRequest,
        cancel: &CancellationToken,
    ) -> Result<ConversionResult> {
        self.inner.convert(request, cancel)
    }

    /// Run one conversion on the blocking thread pool.
    ///
    /// Bounded by [`ConverterConfig::effective_request_timeout`]. On timeout
    /// the request is cancelled and this waits for its teardown before
    /// returning. Dropping the future also cancels the request; teardown then
    /// finishes in the background.
    ///
    /// # Errors
    ///
    /// As [`convert_blocking`](Self::convert_blocking), plus an
    /// [`ConversionError::Io`] of kind [`io::ErrorKind::TimedOut`] when the
    /// whole-request budget runs out.
    pub async fn convert(&self, request: ConversionRequest) -> Result<ConversionResult> {
        let budget = self.inner.config.effective_request_timeout();
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();

        let mut task = tokio::task::spawn_blocking({
            let inner = Arc::clone(&self.inner);
            let cancel = cancel.clone();
            move || inner.convert(&request, &cancel)
        });

        let outcome = match tokio::time::timeout(budget, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                log::error!("❌ Conversion task failed to complete: {}", e);
                Err(ConversionError::io(
                    "running conversion task",
                    io::Error::other(e.to_string()),
                ))
            }
            Err(_) => {
                log::error!(
                    "⏰ Conversion exceeded {}ms, cancelling",
                    budget.as_millis()
                );
                cancel.cancel();
                if let Err(e) = task.await {
                    log::warn!("⚠️ Conversion task ended abnormally during teardown: {}", e);
                }
                Err(ConversionError::io(
                    "converting",
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("request timed out after {}ms", budget.as_millis()),
                    ),
                ))
            }
        };

        guard.disarm();
        outcome
    }

    /// Delete a committed artifact by its flat file name.
    ///
    /// # Errors
    ///
    /// [`ConversionError::Io`] of kind [`io::ErrorKind::InvalidInput`] for a
    /// name [`sanitize`] could not have produced, [`io::ErrorKind::NotFound`]
    /// if there is no such artifact.
    pub fn remove_artifact(&self, name: &str) -> Result<()> {
        self.inner.store.remove(name)
    }

    /// Public URL of an artifact under the configured base URL.
    pub fn artifact_url(&self, result: &ConversionResult) -> String {
        result.url(&self.inner.config.public_base_url)
    }

    /// Rendering session statistics.
    ///
    /// Renderers without a pool report all zeros.
    pub fn stats(&self) -> PoolStats {
        self.inner.renderer.stats().unwrap_or_default()
    }

    /// Whether the converter can accept work.
    pub fn is_ready(&self) -> bool {
        self.inner.renderer.is_ready()
    }

    /// Pre-launch idle rendering sessions.
    ///
    /// Bounded by the pool's acquire timeout. Returns the number of idle
    /// sessions afterwards.
    pub async fn warmup(&self) -> std::result::Result<usize, SessionError> {
        let budget = self.inner.config.pool.acquire_timeout;
        log::info!(
            "🔥 Warming up rendering sessions (timeout: {}s)",
            budget.as_secs()
        );

        let warmup = tokio::task::spawn_blocking({
            let inner = Arc::clone(&self.inner);
            move || inner.renderer.warmup()
        });

        match tokio::time::timeout(budget, warmup).await {
            Ok(Ok(Ok(idle))) => {
                log::info!("✅ Warmup completed - {} idle session(s)", idle);
                Ok(idle)
            }
            Ok(Ok(Err(e))) => {
                log::error!("❌ Warmup failed with error: {}", e);
                Err(e)
            }
            Ok(Err(e)) => {
                log::error!("❌ Warmup task panicked: {}", e);
                Err(SessionError::Creation(format!("warmup task failed: {}", e)))
            }
            Err(_) => {
                log::error!("❌ Warmup timed out after {}s", budget.as_secs());
                Err(SessionError::Configuration(format!(
                    "Warmup timed out after {}s",
                    budget.as_secs()
                )))
            }
        }
    }

    /// Stop handing out sessions and release pooled browsers. Idempotent.
    pub fn shutdown(&self) {
        log::info!("🛑 Shutting down converter");
        self.inner.renderer.shutdown();
    }
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("output_dir", &self.inner.store.root())
            .field("docx_strategy", &self.inner.docx.kind())
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// Pipeline
// ============================================================================

impl ConverterInner {
    fn convert(
        &self,
        request: &ConversionRequest,
        cancel: &CancellationToken,
    ) -> Result<ConversionResult> {
        let started = Instant::now();
        let name = sanitize(request.filename(), request.output_format());
        log::info!(
            "📄 Converting {} ({} bytes of HTML)",
            name,
            request.html().len()
        );
        log::debug!("[{}] Start → Sanitized (requested {:?})", name, request.filename());

        let outcome = self.run(request, &name, cancel);
        match &outcome {
            Ok(result) => log::info!(
                "✅ {} done: {:.2} KB in {}ms",
                name,
                result.size_kb(),
                started.elapsed().as_millis()
            ),
            Err(e) => log::error!("❌ [{}] Failed({}): {}", name, e.stage(), e),
        }
        outcome
    }

    fn run(
        &self,
        request: &ConversionRequest,
        name: &SafeArtifactName,
        cancel: &CancellationToken,
    ) -> Result<ConversionResult> {
        if request.html().trim().is_empty() {
            return Err(ConversionError::render(
                RenderStage::Load,
                "empty HTML document",
            ));
        }

        let staged = self.store.stage(name)?;

        match request.output_format() {
            OutputFormat::Pdf => {
                self.renderer.render_to_pdf(
                    request.html(),
                    staged.path(),
                    &self.config.page,
                    cancel,
                )?;
                log::debug!("[{}] Sanitized → Rendered", name);
            }
            OutputFormat::Docx => self.produce_docx(request.html(), name, &staged, cancel)?,
        }

        if cancel.is_cancelled() {
            return Err(ConversionError::io(
                format!("committing {}", name),
                io::Error::new(io::ErrorKind::Interrupted, "request cancelled"),
            ));
        }

        let size_bytes = staged.size()?;
        log::debug!("[{}] → Sized ({} bytes)", name, size_bytes);

        let inline_payload = if request.want_inline_payload() {
            let bytes = std::fs::read(staged.path())
                .map_err(|e| ConversionError::io(format!("reading {} for inline payload", name), e))?;
            Some(base64::engine::general_purpose::STANDARD.encode(bytes))
        } else {
            None
        };

        let committed = staged.commit()?;
        log::debug!("[{}] Sized → Done ({})", name, committed.display());

        Ok(ConversionResult {
            path: name.as_str().to_string(),
            size_bytes,
            format: request.output_format(),
            inline_payload,
        })
    }

    fn produce_docx(
        &self,
        html: &str,
        name: &SafeArtifactName,
        staged: &StagedArtifact,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.docx.kind().needs_rendered_pdf() {
            let pdf = TransientArtifact::create(&self.scratch_dir, ".pdf")?;
            self.renderer
                .render_to_pdf(html, pdf.path(), &self.config.page, cancel)?;
            log::debug!("[{}] Sanitized → Rendered ({})", name, pdf.path().display());

            self.docx
                .transcode(DocxSource::RenderedPdf(pdf.path()), staged.path(), cancel)?;
        } else {
            self.docx
                .transcode(DocxSource::Html(html), staged.path(), cancel)?;
        }

        log::debug!("[{}] → Transcoded ({})", name, self.docx.kind());
        Ok(())
    }
}

// ============================================================================
// ConverterBuilder
// ============================================================================

/// Builder for [`Converter`].
///
/// The renderer and DOCX strategy default to the ones `config` describes:
/// a [`ChromeRenderer`] and the strategy named by
/// [`ConverterConfig::docx_strategy`].
///
/// ```rust,ignore
/// let converter = Converter::builder()
///     .config(config)
///     .renderer(Box::new(MockRenderer::new()))
///     .build()?;
/// ```
#[derive(Default)]
pub struct ConverterBuilder {
    config: Option<ConverterConfig>,
    renderer: Option<Box<dyn PdfRenderer>>,
    docx: Option<Box<dyn DocxStrategy>>,
}

impl ConverterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ConverterConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn renderer(mut self, renderer: Box<dyn PdfRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Override the strategy selected by the configuration.
    pub fn docx_strategy(mut self, strategy: Box<dyn DocxStrategy>) -> Self {
        self.docx = Some(strategy);
        self
    }

    /// Build the converter, creating the output and scratch directories.
    ///
    /// # Errors
    ///
    /// [`ConversionError::Io`] if a directory cannot be created;
    /// [`ConversionError::Render`] if the session pool rejects its settings.
    pub fn build(self) -> Result<Converter> {
        let config = self.config.unwrap_or_default();
        let store = OutputStore::open(&config.output_dir)?;

        let scratch_dir = config.scratch_dir();
        std::fs::create_dir_all(&scratch_dir).map_err(|e| {
            ConversionError::io(
                format!("creating scratch directory {}", scratch_dir.display()),
                e,
            )
        })?;

        let renderer = match self.renderer {
            Some(renderer) => renderer,
            None => Box::new(ChromeRenderer::from_config(&config)?),
        };
        let docx = self.docx.unwrap_or_else(|| strategy_for(&config));

        log::info!("🚀 Converter ready:");
        log::info!("   - Output directory: {}", store.root().display());
        log::info!("   - Scratch directory: {}", scratch_dir.display());
        log::info!("   - DOCX strategy: {}", docx.kind());
        log::info!("   - Render timeout: {}ms", config.render_timeout.as_millis());
        log::info!(
            "   - Request timeout: {}ms",
            config.effective_request_timeout().as_millis()
        );

        Ok(Converter {
            inner: Arc::new(ConverterInner {
                config,
                store,
                scratch_dir,
                renderer,
                docx,
            }),
        })
    }
}

/// The strategy a configuration selects.
fn strategy_for(config: &ConverterConfig) -> Box<dyn DocxStrategy> {
    match config.docx_strategy {
        DocxStrategyKind::Structural => Box::new(PandocStrategy::from_config(config)),
        DocxStrategyKind::LayoutReconstruct => {
            Box::new(LayoutReconstructStrategy::new(config.transcode_timeout))
        }
    }
}

// ============================================================================
// Environment bootstrap
// ============================================================================

/// Build a warmed-up [`Converter`] from environment variables.
///
/// Reads `app.env` and the variables listed in
/// [`config::env`](crate::config::env), then launches the idle sessions.
///
/// ```rust,ignore
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///     env_logger::init();
///     let converter = init_converter().await?;
///     // Hand `converter` to request handlers...
///     Ok(())
/// }
/// ```
#[cfg(feature = "env-config")]
pub async fn init_converter() -> std::result::Result<Converter, Box<dyn std::error::Error + Send + Sync>> {
    log::info!("Initializing converter from environment...");

    let config = crate::config::env::from_env().map_err(|e| {
        log::error!("❌ Invalid configuration: {}", e);
        e
    })?;
    let converter = Converter::from_config(config).map_err(|e| {
        log::error!("❌ Failed to create converter: {}", e);
        e
    })?;

    converter.warmup().await.map_err(|e| {
        log::error!("❌ Failed to warm up rendering sessions: {}", e);
        e
    })?;

    Ok(converter)
}

// ============================================================================
// Unit Tests
// ============================================================================
