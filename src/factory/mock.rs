//! Mock session factory for testing.
//!
//! [`MockSessionFactory`] creates [`MockSession`]s, lightweight stand-ins for
//! a browser process that can be told to fail their health check. This lets
//! the pool be exercised without Chrome installed.
//!
//! # Feature Flag
//!
//! This module is only available when:
//! - The `test-utils` feature is enabled, OR
//! - During testing (`#[cfg(test)]`)
//!
//! # Example
//!
//! ```rust,ignore
//! use html2doc_pipeline::factory::mock::MockSessionFactory;
//!
//! // Factory that always fails
//! let factory = MockSessionFactory::always_fails("Chrome not installed");
//!
//! // Factory that fails after N successful creations
//! let factory = MockSessionFactory::fail_after_n(3, "Resource exhausted");
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::SessionFactory;
use crate::error::SessionError;
use crate::traits::Healthcheck;

/// Stand-in for a browser process.
#[derive(Debug)]
pub struct MockSession {
    serial: usize,
    healthy: Arc<AtomicBool>,
}

impl MockSession {
    /// Creation order, starting at 1.
    pub fn serial(&self) -> usize {
        self.serial
    }

    /// Flag controlling [`Healthcheck::ping`]; clear it to simulate a crash.
    pub fn health_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.healthy)
    }
}

impl Healthcheck for MockSession {
    fn ping(&self) -> Result<(), SessionError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SessionError::HealthCheckFailed(format!(
                "mock session {} is dead",
                self.serial
            )))
        }
    }
}

/// Mock factory producing [`MockSession`]s.
///
/// Tracks creation attempts so tests can verify reuse.
pub struct MockSessionFactory {
    should_fail: bool,
    error_message: String,
    creation_count: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

impl MockSessionFactory {
    /// Factory whose creations always succeed.
    pub fn new() -> Self {
        Self {
            should_fail: false,
            error_message: String::new(),
            creation_count: Arc::new(AtomicUsize::new(0)),
            fail_after: None,
        }
    }

    /// Factory whose creations always fail with `message`.
    pub fn always_fails<S: Into<String>>(message: S) -> Self {
        Self {
            should_fail: true,
            error_message: message.into(),
            ..Self::new()
        }
    }

    /// Factory that succeeds `n` times and then fails with `message`.
    pub fn fail_after_n<S: Into<String>>(n: usize, message: S) -> Self {
        Self {
            error_message: message.into(),
            fail_after: Some(n),
            ..Self::new()
        }
    }

    /// Number of creation attempts so far.
    pub fn creation_count(&self) -> usize {
        self.creation_count.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) {
        self.creation_count.store(0, Ordering::SeqCst);
    }

    /// Shared counter that outlives moving the factory into a pool.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.creation_count)
    }
}

impl Default for MockSessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFactory<MockSession> for MockSessionFactory {
    fn create(&self) -> Result<MockSession, SessionError> {
        let attempt = self.creation_count.fetch_add(1, Ordering::SeqCst) + 1;

        if self.should_fail {
            log::debug!("MockSessionFactory: failing as configured");
            return Err(SessionError::Creation(self.error_message.clone()));
        }

        if let Some(limit) = self.fail_after {
            if attempt > limit {
                log::debug!(
                    "MockSessionFactory: failing after {} creations (attempt {})",
                    limit,
                    attempt
                );
                return Err(SessionError::Creation(self.error_message.clone()));
            }
        }

        Ok(MockSession {
            serial: attempt,
            healthy: Arc::new(AtomicBool::new(true)),
        })
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies always_fails factory.
    #[test]
    fn test_always_fails() {
        let factory = MockSessionFactory::always_fails("Test error");

        let err = factory.create().unwrap_err();
        assert!(err.to_string().contains("Test error"));
        assert_eq!(factory.creation_count(), 1);
    }

    /// Verifies fail_after_n and the shared counter.
    #[test]
    fn test_fail_after_n() {
        let factory = MockSessionFactory::fail_after_n(2, "Exhausted");
        let counter = factory.counter();

        assert_eq!(factory.create().unwrap().serial(), 1);
        assert_eq!(factory.create().unwrap().serial(), 2);
        assert!(factory.create().is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        factory.reset_count();
        assert_eq!(factory.creation_count(), 0);
    }

    /// Verifies the health flag drives ping.
    #[test]
    fn test_health_flag() {
        let session = MockSessionFactory::new().create().unwrap();
        assert!(session.ping().is_ok());

        session.health_flag().store(false, Ordering::SeqCst);
        assert!(matches!(
            session.ping(),
            Err(SessionError::HealthCheckFailed(_))
        ));
    }
}
