//! Rendering session factories.
//!
//! A factory launches one new session (a browser process) on demand. The
//! [`SessionPool`](crate::SessionPool) calls it whenever no healthy idle
//! session is available and a slot is free.
//!
//! # Available Factories
//!
//! | Factory | Session | Description |
//! |---------|---------|-------------|
//! | [`ChromeSessionFactory`] | [`Browser`](headless_chrome::Browser) | Launches headless Chrome/Chromium |
//! | [`mock::MockSessionFactory`] | [`mock::MockSession`] | For testing (feature-gated) |
//!
//! # Example
//!
//! ```rust,ignore
//! use html2doc_pipeline::{ChromeSessionFactory, SessionFactory};
//!
//! let factory = ChromeSessionFactory::with_defaults();
//! let browser = factory.create()?;
//! ```

mod chrome;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use chrome::{ChromeSessionFactory, create_chrome_options};

use crate::error::SessionError;

/// Creates rendering sessions for the pool.
///
/// # Thread Safety
///
/// Factories are shared by every thread that checks sessions out, hence
/// `Send + Sync`.
///
/// # Implementors
///
/// - [`ChromeSessionFactory`] - launches Chrome/Chromium
/// - [`mock::MockSessionFactory`] - for testing (when `test-utils` feature enabled)
pub trait SessionFactory<S>: Send + Sync {
    /// Launch a new session.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Configuration`] for unusable launch options
    /// - [`SessionError::Creation`] if the process does not come up
    fn create(&self) -> Result<S, SessionError>;
}
