//! RAII handle for checked-out sessions.
//!
//! [`SessionHandle`] owns a session for the duration of one conversion and
//! gives it back to the pool when dropped, whatever path the caller takes
//! out of the render:
//!
//! ```rust,ignore
//! let browser = pool.checkout(&cancel)?;
//!
//! // Deref to the session type
//! let context = browser.new_context()?;
//!
//! // On a load or print failure the process is not reused
//! browser.poison();
//! // Returned (or discarded) when `browser` goes out of scope
//! ```
//!
//! Dropping also frees the slot the handle occupied, waking one waiter.

use std::sync::Arc;
use std::time::Duration;

use crate::pool::SessionPoolInner;
use crate::tracked::PooledSession;
use crate::traits::Healthcheck;

/// Exclusive access to one pooled session.
///
/// A session is never handed to two handles at once: it leaves the idle
/// list before the handle is created and only goes back when the handle
/// drops.
pub struct SessionHandle<S: Healthcheck + 'static> {
    pooled: Option<PooledSession<S>>,
    pool: Arc<SessionPoolInner<S>>,
}

impl<S: Healthcheck + 'static> SessionHandle<S> {
    pub(crate) fn new(pooled: PooledSession<S>, pool: Arc<SessionPoolInner<S>>) -> Self {
        Self {
            pooled: Some(pooled),
            pool,
        }
    }

    /// Unique session ID (for logs).
    pub fn id(&self) -> u64 {
        self.pooled.as_ref().map(PooledSession::id).unwrap_or(0)
    }

    pub fn age(&self) -> Duration {
        self.pooled
            .as_ref()
            .map(PooledSession::age)
            .unwrap_or_default()
    }

    /// Checkouts this session has served, this one included.
    pub fn uses(&self) -> u64 {
        self.pooled.as_ref().map(PooledSession::uses).unwrap_or(0)
    }

    /// Mark the session unfit for reuse; it is discarded on drop.
    pub fn poison(&mut self) {
        if let Some(pooled) = self.pooled.as_mut() {
            log::warn!("☠️ Session {} poisoned, will be discarded", pooled.id());
            pooled.poison();
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.pooled
            .as_ref()
            .is_some_and(PooledSession::is_poisoned)
    }
}

impl<S: Healthcheck + 'static> std::ops::Deref for SessionHandle<S> {
    type Target = S;

    fn deref(&self) -> &S {
        match &self.pooled {
            Some(pooled) => pooled.session(),
            // `pooled` is only taken in Drop.
            None => unreachable!("session handle used after release"),
        }
    }
}

impl<S: Healthcheck + 'static> Drop for SessionHandle<S> {
    fn drop(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            log::debug!("Session {} released", pooled.id());
            SessionPoolInner::release(&self.pool, pooled);
        }
    }
}

impl<S: Healthcheck + 'static> std::fmt::Debug for SessionHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.pooled {
            Some(pooled) => f
                .debug_struct("SessionHandle")
                .field("id", &pooled.id())
                .field("uses", &pooled.uses())
                .field("poisoned", &pooled.is_poisoned())
                .finish(),
            None => f
                .debug_struct("SessionHandle")
                .field("state", &"released")
                .finish(),
        }
    }
}
