//! Pooled session with lifecycle metadata.
//!
//! Every session the pool owns is wrapped in a [`PooledSession`]:
//!
//! ```text
//! PooledSession<S>
//! ├── id: u64 (unique, for logs)
//! ├── session: S
//! ├── created_at: Instant (TTL)
//! ├── uses: u64 (checkouts served)
//! └── poisoned: bool (set after a failed load/print)
//! ```
//!
//! Users never see this type; they hold a
//! [`SessionHandle`](crate::SessionHandle), which derefs to `S`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A session plus the bookkeeping the pool needs.
///
/// # Lifecycle
///
/// ```text
/// factory.create()
///       │
///       ▼
/// PooledSession::new() ──→ checked out ──→ returned
///                               │              │
///                               │              ├──→ idle (healthy, young, not poisoned)
///                               │              │
///                               │              └──→ dropped (expired, poisoned, pool full)
///                               ▼
///                          poison() on error
/// ```
pub(crate) struct PooledSession<S> {
    id: u64,
    session: S,
    created_at: Instant,
    uses: u64,
    poisoned: bool,
}

impl<S> PooledSession<S> {
    pub(crate) fn new(session: S) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            session,
            created_at: Instant::now(),
            uses: 0,
            poisoned: false,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn session(&self) -> &S {
        &self.session
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }

    pub(crate) fn uses(&self) -> u64 {
        self.uses
    }

    pub(crate) fn mark_used(&mut self) {
        self.uses += 1;
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub(crate) fn poison(&mut self) {
        self.poisoned = true;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies that IDs are unique and increasing.
    #[test]
    fn test_unique_ids() {
        let a = PooledSession::new(());
        let b = PooledSession::new(());
        assert!(b.id() > a.id());
    }

    /// Verifies TTL expiry.
    #[test]
    fn test_expiry() {
        let session = PooledSession::new("s");
        assert!(!session.is_expired(Duration::from_secs(60)));
        assert!(session.is_expired(Duration::ZERO));
    }

    /// Verifies use counting and poisoning.
    #[test]
    fn test_uses_and_poison() {
        let mut session = PooledSession::new(7u8);
        assert_eq!(*session.session(), 7);
        assert_eq!(session.uses(), 0);

        session.mark_used();
        session.mark_used();
        assert_eq!(session.uses(), 2);

        assert!(!session.is_poisoned());
        session.poison();
        assert!(session.is_poisoned());
    }
}
