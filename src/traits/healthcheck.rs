//! Health check trait for rendering sessions.
//!
//! The pool pings an idle session before handing it out again. A session
//! that fails the ping is discarded and the checkout falls through to the
//! next idle session or to a fresh launch.
//!
//! ```text
//! checkout
//!    │
//!    ├── pop idle ──→ ping() ──→ ✓ reuse
//!    │                   │
//!    │                   └──→ ✗ discard, try next
//!    │
//!    └── none left ──→ factory.create()
//! ```

use headless_chrome::Browser;

use crate::error::SessionError;

/// Sessions that can verify they are still responsive.
///
/// # Implementation Guidelines
///
/// - **Keep it fast**: it runs on every reuse
/// - **Be idempotent**: repeated calls must be safe
pub trait Healthcheck: Send + Sync {
    /// Perform a health check.
    ///
    /// # Errors
    ///
    /// [`SessionError::HealthCheckFailed`] if the session is unresponsive.
    fn ping(&self) -> Result<(), SessionError>;
}

/// A round trip over CDP proves both the process and the socket are alive.
impl Healthcheck for Browser {
    fn ping(&self) -> Result<(), SessionError> {
        self.get_version()
            .map(|version| log::trace!("Chrome alive: {}", version.product))
            .map_err(|e| SessionError::HealthCheckFailed(e.to_string()))
    }
}
