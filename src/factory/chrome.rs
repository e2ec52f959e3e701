//! Chrome/Chromium session factory.
//!
//! Launch flags favour running inside containers: no sandbox, no `/dev/shm`,
//! no GPU, no zygote. Each process also gets an idle timeout no shorter than
//! the pool's session TTL so that sessions parked in the pool are not torn
//! down by `headless_chrome`'s own idle watchdog.

use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions};

use super::SessionFactory;
use crate::error::SessionError;

/// Factory for headless Chrome sessions.
///
/// # Example
///
/// ```rust,ignore
/// use html2doc_pipeline::ChromeSessionFactory;
///
/// // Auto-detect the binary
/// let factory = ChromeSessionFactory::with_defaults();
///
/// // Explicit binary
/// let factory = ChromeSessionFactory::with_path("/usr/bin/chromium".to_string());
/// ```
pub struct ChromeSessionFactory {
    launch_options_fn:
        Box<dyn Fn() -> Result<LaunchOptions<'static>, SessionError> + Send + Sync>,
}

impl ChromeSessionFactory {
    /// Factory with a custom launch-options generator.
    pub fn new<F>(launch_options_fn: F) -> Self
    where
        F: Fn() -> Result<LaunchOptions<'static>, SessionError> + Send + Sync + 'static,
    {
        Self {
            launch_options_fn: Box::new(launch_options_fn),
        }
    }

    /// Auto-detected binary, one hour idle timeout.
    pub fn with_defaults() -> Self {
        Self::with_options(None, Duration::from_secs(3600))
    }

    pub fn with_path(chrome_path: String) -> Self {
        Self::with_options(Some(chrome_path), Duration::from_secs(3600))
    }

    /// Optional binary path and idle timeout (normally the pool's session TTL).
    pub fn with_options(chrome_path: Option<String>, idle_timeout: Duration) -> Self {
        log::debug!(
            "🔧 Creating ChromeSessionFactory (path: {}, idle timeout: {}s)",
            chrome_path.as_deref().unwrap_or("auto-detect"),
            idle_timeout.as_secs()
        );
        Self::new(move || create_chrome_options(chrome_path.as_deref(), idle_timeout))
    }
}

impl SessionFactory<Browser> for ChromeSessionFactory {
    fn create(&self) -> Result<Browser, SessionError> {
        let options = (self.launch_options_fn)()?;

        log::debug!("🚀 Launching Chrome...");
        Browser::new(options).map_err(|e| {
            log::error!("❌ Chrome launch failed: {}", e);
            SessionError::Creation(e.to_string())
        })
    }
}

/// Launch options for a headless, container-friendly Chrome.
///
/// # Errors
///
/// [`SessionError::Configuration`] if the options cannot be built.
pub fn create_chrome_options(
    chrome_path: Option<&str>,
    idle_timeout: Duration,
) -> Result<LaunchOptions<'static>, SessionError> {
    let mut builder = LaunchOptions::default_builder();

    if let Some(path) = chrome_path {
        builder.path(Some(path.into()));
        log::trace!("Chrome path set to: {}", path);
    }

    builder
        .headless(true)
        .sandbox(false)
        .disable_default_args(true)
        .idle_browser_timeout(idle_timeout)
        .args(vec![
            // Container stability
            "--no-sandbox".as_ref(),
            "--disable-setuid-sandbox".as_ref(),
            "--disable-dev-shm-usage".as_ref(),
            "--no-zygote".as_ref(),
            "--no-first-run".as_ref(),
            "--disable-crash-reporter".as_ref(),
            // Rendering
            "--disable-gpu".as_ref(),
            "--disable-software-rasterizer".as_ref(),
            "--font-render-hinting=none".as_ref(),
            // Features a print job never needs
            "--disable-extensions".as_ref(),
            "--disable-sync".as_ref(),
            "--disable-default-apps".as_ref(),
            "--disable-background-networking".as_ref(),
            // CDP responsiveness
            "--disable-background-timer-throttling".as_ref(),
            "--disable-backgrounding-occluded-windows".as_ref(),
            "--disable-renderer-backgrounding".as_ref(),
            "--disable-hang-monitor".as_ref(),
            "--disable-ipc-flooding-protection".as_ref(),
        ])
        .build()
        .map_err(|e| {
            log::error!(
                "❌ Failed to build Chrome launch options (path: {}): {}",
                chrome_path.unwrap_or("auto-detect"),
                e
            );
            SessionError::Configuration(e.to_string())
        })
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies that option building does not need a Chrome binary.
    #[test]
    fn test_create_chrome_options() {
        let options = create_chrome_options(None, Duration::from_secs(60)).unwrap();
        assert!(options.headless);
        assert!(!options.sandbox);
        assert_eq!(options.idle_browser_timeout, Duration::from_secs(60));

        let options =
            create_chrome_options(Some("/custom/chrome/path"), Duration::from_secs(60)).unwrap();
        assert_eq!(
            options.path.as_deref(),
            Some(std::path::Path::new("/custom/chrome/path"))
        );
    }

    /// Verifies that a bad path fails at launch, not at construction.
    #[test]
    fn test_factory_bad_path() {
        let factory = ChromeSessionFactory::with_path("/nonexistent/chrome".to_string());
        assert!(matches!(factory.create(), Err(SessionError::Creation(_))));
    }
}
