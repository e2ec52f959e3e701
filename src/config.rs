//! Configuration for the conversion pipeline.
//!
//! This module provides [`ConverterConfig`] and [`ConverterConfigBuilder`]
//! for everything a [`Converter`](crate::Converter) needs to know at startup:
//! where artifacts go, how long each stage may take, the print page policy,
//! which DOCX strategy is deployed, and how many browser sessions may run.
//!
//! The configuration is a single immutable value. Nothing reads ambient
//! process state after the converter is built.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use html2doc_pipeline::{ConverterConfigBuilder, DocxStrategyKind};
//!
//! let config = ConverterConfigBuilder::new()
//!     .output_dir("/srv/artifacts")
//!     .docx_strategy(DocxStrategyKind::LayoutReconstruct)
//!     .render_timeout(Duration::from_secs(20))
//!     .build()
//!     .expect("Invalid configuration");
//!
//! assert_eq!(config.render_timeout, Duration::from_secs(20));
//! assert_eq!(config.pool.max_sessions, 4);
//! ```
//!
//! # Environment Configuration
//!
//! When the `env-config` feature is enabled, configuration can be loaded
//! from environment variables and an optional `app.env` file:
//!
//! ```rust,ignore
//! use html2doc_pipeline::config::env::from_env;
//!
//! let config = from_env()?;
//! ```
//!
//! See [`mod@env`] module for available environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

// ============================================================================
// Page policy
// ============================================================================

/// Page margins in centimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl Default for Margins {
    /// 2 cm top and bottom, 1.5 cm left and right.
    fn default() -> Self {
        Self {
            top: 2.0,
            bottom: 2.0,
            left: 1.5,
            right: 1.5,
        }
    }
}

/// Fixed print policy applied to every rendered document.
///
/// | Setting | Default |
/// |---------|---------|
/// | Paper | A4, 210 × 297 mm |
/// | Margins | 2 cm top/bottom, 1.5 cm left/right |
/// | Backgrounds | printed |
/// | CSS `@page` size | preferred over the paper size |
/// | Header / footer | none |
#[derive(Debug, Clone, PartialEq)]
pub struct PageSettings {
    /// Paper width in millimetres.
    pub width_mm: f64,
    /// Paper height in millimetres.
    pub height_mm: f64,
    pub margins: Margins,
    pub print_background: bool,
    pub prefer_css_page_size: bool,
}

impl PageSettings {
    /// ISO A4 paper with the default margins.
    pub fn a4() -> Self {
        Self {
            width_mm: 210.0,
            height_mm: 297.0,
            margins: Margins::default(),
            print_background: true,
            prefer_css_page_size: true,
        }
    }

    /// Paper width in inches, the unit the print engine expects.
    pub fn width_inches(&self) -> f64 {
        self.width_mm / 25.4
    }

    /// Paper height in inches.
    pub fn height_inches(&self) -> f64 {
        self.height_mm / 25.4
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.margins;
        if [m.top, m.bottom, m.left, m.right]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err("page margins must be finite and non-negative".into());
        }
        if self.width_mm <= 0.0 || self.height_mm <= 0.0 {
            return Err("paper size must be positive".into());
        }
        if (m.left + m.right) * 10.0 >= self.width_mm || (m.top + m.bottom) * 10.0 >= self.height_mm
        {
            return Err("page margins leave no printable area".into());
        }
        Ok(())
    }
}

impl Default for PageSettings {
    fn default() -> Self {
        Self::a4()
    }
}

// ============================================================================
// DOCX strategy selection
// ============================================================================

/// Deployed DOCX strategy.
///
/// | Kind | Input | Engine |
/// |------|-------|--------|
/// | `Structural` | the HTML | external `pandoc` |
/// | `LayoutReconstruct` | the PDF rendered from the HTML | built-in PDF analysis |
///
/// Parsed case-insensitively from `structural`/`pandoc` and
/// `layout`/`layout-reconstruct`/`pdf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocxStrategyKind {
    #[default]
    Structural,
    LayoutReconstruct,
}

impl DocxStrategyKind {
    /// `true` if the strategy consumes a rendered PDF instead of the HTML.
    pub fn needs_rendered_pdf(&self) -> bool {
        matches!(self, DocxStrategyKind::LayoutReconstruct)
    }
}

impl FromStr for DocxStrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structural" | "pandoc" => Ok(DocxStrategyKind::Structural),
            "layout" | "layout-reconstruct" | "layout_reconstruct" | "pdf" => {
                Ok(DocxStrategyKind::LayoutReconstruct)
            }
            other => Err(ConfigError::Invalid(format!(
                "unknown DOCX strategy '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DocxStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DocxStrategyKind::Structural => "structural",
            DocxStrategyKind::LayoutReconstruct => "layout-reconstruct",
        })
    }
}

// ============================================================================
// SessionPoolConfig
// ============================================================================

/// Limits for the rendering session pool.
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `max_sessions` | 4 | Browser processes checked out at once |
/// | `max_idle` | 2 | Processes kept warm between requests |
/// | `session_ttl` | 1 hour | Process lifetime before retirement |
/// | `acquire_timeout` | 60s | Longest wait for a free session |
///
/// Setting `max_idle` to 0 gives every request its own browser process.
#[derive(Debug, Clone)]
pub struct SessionPoolConfig {
    /// Upper bound on concurrently checked-out sessions.
    ///
    /// Requests beyond this queue until a session is returned.
    pub max_sessions: usize,

    /// Idle sessions retained for reuse. Must be ≤ `max_sessions`.
    pub max_idle: usize,

    /// Sessions older than this are discarded instead of reused.
    pub session_ttl: Duration,

    /// How long a request may wait for a session before failing.
    pub acquire_timeout: Duration,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 4,
            max_idle: 2,
            session_ttl: Duration::from_secs(3600),
            acquire_timeout: Duration::from_secs(60),
        }
    }
}

/// Builder for [`SessionPoolConfig`] with validation.
///
/// # Example
///
/// ```rust
/// use html2doc_pipeline::SessionPoolConfigBuilder;
///
/// let config = SessionPoolConfigBuilder::new()
///     .max_sessions(8)
///     .max_idle(0)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.max_sessions, 8);
///
/// assert!(SessionPoolConfigBuilder::new().max_sessions(0).build().is_err());
/// ```
#[derive(Debug, Default)]
pub struct SessionPoolConfigBuilder {
    config: SessionPoolConfig,
}

impl SessionPoolConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_sessions(mut self, count: usize) -> Self {
        self.config.max_sessions = count;
        self
    }

    pub fn max_idle(mut self, count: usize) -> Self {
        self.config.max_idle = count;
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.config.session_ttl = ttl;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// - `max_sessions` is 0
    /// - `max_idle` exceeds `max_sessions`
    /// - `acquire_timeout` is zero
    pub fn build(self) -> std::result::Result<SessionPoolConfig, String> {
        if self.config.max_sessions == 0 {
            return Err("max_sessions must be greater than 0".to_string());
        }

        if self.config.max_idle > self.config.max_sessions {
            return Err("max_idle cannot exceed max_sessions".to_string());
        }

        if self.config.acquire_timeout.is_zero() {
            return Err("acquire_timeout must be greater than 0".to_string());
        }

        Ok(self.config)
    }
}

// ============================================================================
// ConverterConfig
// ============================================================================

/// Complete pipeline configuration.
///
/// # Fields Overview
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `output_dir` | `output` | Flat directory receiving final artifacts |
/// | `scratch_dir` | system temp | Where transient files are created |
/// | `render_timeout` | 30s | Page load and settle budget |
/// | `transcode_timeout` | 60s | DOCX conversion budget |
/// | `request_timeout` | derived | Whole-request bound for async callers |
/// | `page` | A4 | Print policy |
/// | `docx_strategy` | structural | Deployed DOCX strategy |
/// | `reference_doc` | none | pandoc `--reference-doc` template |
/// | `pandoc_path` | `pandoc` | Converter binary |
/// | `chrome_path` | auto | Chrome/Chromium binary |
/// | `public_base_url` | `http://localhost:8000` | Prefix for artifact URLs |
/// | `pool` | see [`SessionPoolConfig`] | Session limits |
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub output_dir: PathBuf,
    pub scratch_dir: Option<PathBuf>,
    pub render_timeout: Duration,
    pub transcode_timeout: Duration,
    /// Explicit whole-request bound. `None` derives it from the stage budgets.
    pub request_timeout: Option<Duration>,
    pub page: PageSettings,
    pub docx_strategy: DocxStrategyKind,
    pub reference_doc: Option<PathBuf>,
    pub pandoc_path: PathBuf,
    pub chrome_path: Option<String>,
    pub public_base_url: String,
    pub pool: SessionPoolConfig,
}

impl ConverterConfig {
    /// Whole-request bound applied by [`Converter::convert`](crate::Converter::convert).
    ///
    /// Defaults to the acquire, render and transcode budgets plus ten seconds
    /// of slack for filesystem work.
    pub fn effective_request_timeout(&self) -> Duration {
        self.request_timeout.unwrap_or_else(|| {
            self.pool.acquire_timeout
                + self.render_timeout
                + self.transcode_timeout
                + Duration::from_secs(10)
        })
    }

    /// Directory for transient files.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Reference template to pass to pandoc, if configured and present.
    ///
    /// A configured but missing file yields
    /// [`ConfigError::MissingReferenceDoc`], which callers treat as a warning.
    pub fn usable_reference_doc(&self) -> Result<Option<&Path>, ConfigError> {
        match &self.reference_doc {
            Some(path) if path.is_file() => Ok(Some(path.as_path())),
            Some(path) => Err(ConfigError::MissingReferenceDoc(path.clone())),
            None => Ok(None),
        }
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            scratch_dir: None,
            render_timeout: Duration::from_millis(30_000),
            transcode_timeout: Duration::from_secs(60),
            request_timeout: None,
            page: PageSettings::a4(),
            docx_strategy: DocxStrategyKind::Structural,
            reference_doc: None,
            pandoc_path: PathBuf::from("pandoc"),
            chrome_path: None,
            public_base_url: "http://localhost:8000".to_string(),
            pool: SessionPoolConfig::default(),
        }
    }
}

/// Builder for [`ConverterConfig`] with validation.
///
/// # Validation
///
/// The [`build()`](Self::build) method rejects:
/// - zero render, transcode or request timeouts
/// - negative margins, or margins that leave no printable area
/// - an invalid [`SessionPoolConfig`]
#[derive(Debug, Default)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn render_timeout(mut self, timeout: Duration) -> Self {
        self.config.render_timeout = timeout;
        self
    }

    pub fn transcode_timeout(mut self, timeout: Duration) -> Self {
        self.config.transcode_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    pub fn page(mut self, page: PageSettings) -> Self {
        self.config.page = page;
        self
    }

    pub fn margins(mut self, margins: Margins) -> Self {
        self.config.page.margins = margins;
        self
    }

    pub fn docx_strategy(mut self, kind: DocxStrategyKind) -> Self {
        self.config.docx_strategy = kind;
        self
    }

    pub fn reference_doc(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.reference_doc = Some(path.into());
        self
    }

    pub fn pandoc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pandoc_path = path.into();
        self
    }

    pub fn chrome_path(mut self, path: impl Into<String>) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.public_base_url = url.into();
        self
    }

    pub fn pool(mut self, pool: SessionPoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<ConverterConfig, ConfigError> {
        let config = self.config;

        if config.render_timeout.is_zero() {
            return Err("render_timeout must be greater than 0".into());
        }
        if config.transcode_timeout.is_zero() {
            return Err("transcode_timeout must be greater than 0".into());
        }
        if config.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err("request_timeout must be greater than 0".into());
        }
        if config.output_dir.as_os_str().is_empty() {
            return Err("output_dir must not be empty".into());
        }

        config.page.validate()?;

        // Re-run pool validation so hand-built SessionPoolConfig values are checked too.
        let pool = SessionPoolConfigBuilder { config: config.pool.clone() }
            .build()
            .map_err(ConfigError::Invalid)?;

        Ok(ConverterConfig { pool, ..config })
    }
}

// ============================================================================
// Environment Configuration (feature-gated)
// ============================================================================

/// Environment-based configuration loading.
///
/// This module is only available when the `env-config` feature is enabled.
/// It loads an optional `app.env` file with `dotenvy`, then reads:
///
/// | Variable | Type | Default |
/// |----------|------|---------|
/// | `CONVERTER_OUTPUT_DIR` | path | `output` |
/// | `CONVERTER_SCRATCH_DIR` | path | system temp |
/// | `RENDER_TIMEOUT_MS` | u64 | 30000 |
/// | `TRANSCODE_TIMEOUT_MS` | u64 | 60000 |
/// | `REQUEST_TIMEOUT_MS` | u64 | derived |
/// | `PAGE_MARGIN_TOP_CM` / `_BOTTOM_CM` | f64 | 2.0 |
/// | `PAGE_MARGIN_LEFT_CM` / `_RIGHT_CM` | f64 | 1.5 |
/// | `DOCX_STRATEGY` | `structural` \| `layout` | `structural` |
/// | `DOCX_REFERENCE_DOC` | path | none |
/// | `PANDOC_PATH` | path | `pandoc` |
/// | `CHROME_PATH` | path | auto |
/// | `RENDER_EXTERNAL_URL` | url | `http://localhost:8000` |
/// | `RENDER_POOL_SIZE` | usize | 4 |
/// | `RENDER_POOL_IDLE` | usize | 2 |
/// | `RENDER_SESSION_TTL_SECONDS` | u64 | 3600 |
/// | `RENDER_ACQUIRE_TIMEOUT_SECONDS` | u64 | 60 |
///
/// # Example `app.env` File
///
/// ```text
/// CONVERTER_OUTPUT_DIR=/app/static/output
/// DOCX_STRATEGY=structural
/// DOCX_REFERENCE_DOC=/app/reference.docx
/// RENDER_POOL_SIZE=4
/// # CHROME_PATH=/usr/bin/chromium
/// ```
#[cfg(feature = "env-config")]
pub mod env {
    use super::*;

    /// Default environment file name.
    pub const ENV_FILE_NAME: &str = "app.env";

    /// Load environment variables from `app.env`.
    pub fn load_env_file() -> Result<PathBuf, dotenvy::Error> {
        dotenvy::from_filename(ENV_FILE_NAME)
    }

    /// Read and parse one variable, falling back to `default` when unset.
    ///
    /// Unparsable values are logged and replaced by the default.
    fn var_or<T: FromStr>(name: &str, default: T) -> T {
        match std::env::var(name) {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
                log::warn!("⚠️ Ignoring unparsable {}={:?}, using default", name, raw);
                default
            }),
            Err(_) => default,
        }
    }

    fn var_opt(name: &str) -> Option<String> {
        std::env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the resulting values fail validation.
    pub fn from_env() -> Result<ConverterConfig, ConfigError> {
        match load_env_file() {
            Ok(path) => log::info!("📄 Loaded configuration from: {:?}", path),
            Err(e) => log::debug!(
                "📄 No {} file found or failed to load: {} (using environment variables and defaults)",
                ENV_FILE_NAME,
                e
            ),
        }

        let defaults = ConverterConfig::default();
        let margin_defaults = Margins::default();

        let docx_strategy = match var_opt("DOCX_STRATEGY") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                log::warn!("⚠️ {}; using {}", e, DocxStrategyKind::default());
                DocxStrategyKind::default()
            }),
            None => DocxStrategyKind::default(),
        };

        let margins = Margins {
            top: var_or("PAGE_MARGIN_TOP_CM", margin_defaults.top),
            bottom: var_or("PAGE_MARGIN_BOTTOM_CM", margin_defaults.bottom),
            left: var_or("PAGE_MARGIN_LEFT_CM", margin_defaults.left),
            right: var_or("PAGE_MARGIN_RIGHT_CM", margin_defaults.right),
        };

        let pool = SessionPoolConfigBuilder::new()
            .max_sessions(var_or("RENDER_POOL_SIZE", defaults.pool.max_sessions))
            .max_idle(var_or("RENDER_POOL_IDLE", defaults.pool.max_idle))
            .session_ttl(Duration::from_secs(var_or(
                "RENDER_SESSION_TTL_SECONDS",
                defaults.pool.session_ttl.as_secs(),
            )))
            .acquire_timeout(Duration::from_secs(var_or(
                "RENDER_ACQUIRE_TIMEOUT_SECONDS",
                defaults.pool.acquire_timeout.as_secs(),
            )))
            .build()
            .map_err(ConfigError::Invalid)?;

        let mut builder = ConverterConfigBuilder::new()
            .output_dir(var_or("CONVERTER_OUTPUT_DIR", defaults.output_dir.clone()))
            .render_timeout(Duration::from_millis(var_or(
                "RENDER_TIMEOUT_MS",
                defaults.render_timeout.as_millis() as u64,
            )))
            .transcode_timeout(Duration::from_millis(var_or(
                "TRANSCODE_TIMEOUT_MS",
                defaults.transcode_timeout.as_millis() as u64,
            )))
            .margins(margins)
            .docx_strategy(docx_strategy)
            .pandoc_path(var_or("PANDOC_PATH", defaults.pandoc_path.clone()))
            .public_base_url(var_or("RENDER_EXTERNAL_URL", defaults.public_base_url.clone()))
            .pool(pool);

        if let Some(dir) = var_opt("CONVERTER_SCRATCH_DIR") {
            builder = builder.scratch_dir(dir);
        }
        if let Some(ms) = var_opt("REQUEST_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            builder = builder.request_timeout(Duration::from_millis(ms));
        }
        if let Some(path) = var_opt("DOCX_REFERENCE_DOC") {
            builder = builder.reference_doc(path);
        }
        if let Some(path) = var_opt("CHROME_PATH") {
            builder = builder.chrome_path(path);
        }

        let config = builder.build()?;

        log::info!("🔧 Loading converter configuration from environment:");
        log::info!("   - Output dir: {}", config.output_dir.display());
        log::info!("   - DOCX strategy: {}", config.docx_strategy);
        log::info!("   - Render timeout: {}ms", config.render_timeout.as_millis());
        log::info!(
            "   - Transcode timeout: {}ms",
            config.transcode_timeout.as_millis()
        );
        log::info!(
            "   - Sessions: max {} / idle {} (TTL {}s)",
            config.pool.max_sessions,
            config.pool.max_idle,
            config.pool.session_ttl.as_secs()
        );
        log::info!(
            "   - Chrome path: {}",
            config.chrome_path.as_deref().unwrap_or("auto-detect")
        );

        Ok(config)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
