//! Pool statistics for monitoring and readiness checks.
//!
//! [`PoolStats`] is a snapshot of the session pool taken under its lock.
//!
//! ```rust,ignore
//! let stats = converter.stats();
//! println!("{}", stats); // PoolStats { available: 1, active: 2, total: 3, waiting: 0, max: 4 }
//! ```

use serde::Serialize;

/// Snapshot of pool statistics at a point in time.
///
/// | Field | Description |
/// |-------|-------------|
/// | `available` | Idle sessions ready for reuse |
/// | `active` | Sessions currently checked out |
/// | `total` | `available + active` |
/// | `waiting` | Requests queued for a slot |
/// | `max_sessions` | Checkout limit |
///
/// ```rust
/// use html2doc_pipeline::PoolStats;
///
/// let stats = PoolStats {
///     available: 1,
///     active: 4,
///     total: 5,
///     waiting: 2,
///     max_sessions: 4,
/// };
///
/// assert!(stats.is_saturated());
/// assert_eq!(stats.free_slots(), 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Idle sessions ready for checkout.
    ///
    /// Can change immediately after reading.
    pub available: usize,

    /// Sessions checked out by in-flight requests.
    pub active: usize,

    /// Live sessions owned by the pool.
    pub total: usize,

    /// Requests blocked waiting for a slot.
    pub waiting: usize,

    /// Configured checkout limit.
    pub max_sessions: usize,
}

impl PoolStats {
    /// Checkouts that would succeed without waiting.
    #[inline]
    pub fn free_slots(&self) -> usize {
        self.max_sessions.saturating_sub(self.active)
    }

    /// Every slot is taken; new requests will queue.
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.free_slots() == 0
    }

    #[inline]
    pub fn has_available(&self) -> bool {
        self.available > 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PoolStats {{ available: {}, active: {}, total: {}, waiting: {}, max: {} }}",
            self.available, self.active, self.total, self.waiting, self.max_sessions
        )
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(available: usize, active: usize, max_sessions: usize) -> PoolStats {
        PoolStats {
            available,
            active,
            total: available + active,
            waiting: 0,
            max_sessions,
        }
    }

    /// Verifies free slot arithmetic, including over-subscription.
    #[test]
    fn test_free_slots() {
        assert_eq!(stats(0, 1, 4).free_slots(), 3);
        assert_eq!(stats(0, 4, 4).free_slots(), 0);
        assert_eq!(stats(0, 5, 4).free_slots(), 0);
        assert!(stats(2, 4, 4).is_saturated());
        assert!(!stats(2, 3, 4).is_saturated());
    }

    /// Verifies emptiness and availability.
    #[test]
    fn test_empty_and_available() {
        assert!(PoolStats::default().is_empty());
        assert!(!PoolStats::default().has_available());
        assert!(stats(1, 0, 4).has_available());
        assert!(!stats(0, 1, 4).is_empty());
    }

    /// Verifies Display output.
    #[test]
    fn test_display() {
        assert_eq!(
            stats(1, 2, 4).to_string(),
            "PoolStats { available: 1, active: 2, total: 3, waiting: 0, max: 4 }"
        );
    }

    /// Verifies JSON field names.
    #[test]
    fn test_serialize() {
        let json = serde_json::to_value(stats(1, 2, 4)).unwrap();
        assert_eq!(json["available"], 1);
        assert_eq!(json["max_sessions"], 4);
    }
}
