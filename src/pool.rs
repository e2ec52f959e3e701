//! Bounded pool of rendering sessions.
//!
//! The pool caps the number of browser processes in use at once and keeps
//! a few idle processes warm between requests:
//!
//! ```text
//!            checkout()                      drop(handle)
//! request ──────────────► slot free? ──yes──► idle session? ──yes──► ping ──✓──► handle
//!                             │                    │                   │
//!                             no                   no                  ✗ discard, next
//!                             │                    │
//!                     wait on Condvar       factory.create()
//!               (until slot, deadline, cancel)
//! ```
//!
//! On release a session goes back to the idle list only if it is healthy
//! (not poisoned), younger than `session_ttl`, and the idle list holds fewer
//! than `max_idle` sessions. Otherwise it is dropped, which terminates the
//! process.
//!
//! # Invariants
//!
//! - At most `max_sessions` handles exist at any time.
//! - A session is owned by the idle list or by exactly one handle.
//! - Sessions are never created or dropped while the pool lock is held.
//!
//! # Example
//!
//! ```rust,ignore
//! use html2doc_pipeline::{ChromeSessionFactory, SessionPool, SessionPoolConfigBuilder};
//! use tokio_util::sync::CancellationToken;
//!
//! let pool = SessionPool::builder()
//!     .config(SessionPoolConfigBuilder::new().max_sessions(2).build()?)
//!     .factory(Box::new(ChromeSessionFactory::with_defaults()))
//!     .build()?;
//!
//! let browser = pool.checkout(&CancellationToken::new())?;
//! let version = browser.get_version()?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::SessionPoolConfig;
use crate::error::SessionError;
use crate::factory::SessionFactory;
use crate::handle::SessionHandle;
use crate::stats::PoolStats;
use crate::tracked::PooledSession;
use crate::traits::Healthcheck;

/// Longest single wait on the condvar, so cancellation is noticed promptly.
const CANCEL_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// SessionPoolInner
// ============================================================================

struct PoolState<S> {
    idle: Vec<PooledSession<S>>,
    checked_out: usize,
    waiting: usize,
}

/// Shared state behind [`SessionPool`] and every [`SessionHandle`].
pub(crate) struct SessionPoolInner<S> {
    config: SessionPoolConfig,
    factory: Box<dyn SessionFactory<S>>,
    state: Mutex<PoolState<S>>,
    slot_freed: Condvar,
    shutting_down: AtomicBool,
}

impl<S: Healthcheck + 'static> SessionPoolInner<S> {
    fn lock(&self) -> MutexGuard<'_, PoolState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Check a session out, waiting for a slot if necessary.
    pub(crate) fn checkout(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<SessionHandle<S>, SessionError> {
        let start = Instant::now();
        self.reserve_slot(start + self.config.acquire_timeout, cancel)?;

        if start.elapsed() > CANCEL_POLL {
            log::debug!("⏳ Waited {:?} for a rendering slot", start.elapsed());
        }

        let mut pooled = match self.take_idle() {
            Some(pooled) => pooled,
            None => match self.create() {
                Ok(pooled) => pooled,
                Err(e) => {
                    self.free_slot();
                    return Err(e);
                }
            },
        };
        pooled.mark_used();

        Ok(SessionHandle::new(pooled, Arc::clone(self)))
    }

    /// Block until `checked_out < max_sessions`, then claim the slot.
    fn reserve_slot(&self, deadline: Instant, cancel: &CancellationToken) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.waiting += 1;

        let outcome = loop {
            if self.is_shutting_down() {
                break Err(SessionError::ShuttingDown);
            }
            if cancel.is_cancelled() {
                break Err(SessionError::Cancelled);
            }
            if state.checked_out < self.config.max_sessions {
                state.checked_out += 1;
                break Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "⚠️ No rendering session freed up within {}ms ({} waiting)",
                    self.config.acquire_timeout.as_millis(),
                    state.waiting
                );
                break Err(SessionError::AcquireTimeout(
                    self.config.acquire_timeout.as_millis(),
                ));
            }

            log::trace!(
                "All {} sessions busy, waiting...",
                self.config.max_sessions
            );
            let wait = (deadline - now).min(CANCEL_POLL);
            state = match self.slot_freed.wait_timeout(state, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        };

        state.waiting -= 1;
        outcome
    }

    fn free_slot(&self) {
        {
            let mut state = self.lock();
            state.checked_out = state.checked_out.saturating_sub(1);
        }
        self.slot_freed.notify_one();
    }

    /// Pop idle sessions until one is young and healthy.
    ///
    /// Health checks and drops happen outside the lock.
    fn take_idle(&self) -> Option<PooledSession<S>> {
        loop {
            let candidate = self.lock().idle.pop()?;

            if candidate.is_expired(self.config.session_ttl) {
                log::info!(
                    "⏰ Session {} expired after {}s, retiring",
                    candidate.id(),
                    candidate.age().as_secs()
                );
                continue;
            }

            match candidate.session().ping() {
                Ok(()) => {
                    log::debug!(
                        "♻️ Reusing session {} (use #{})",
                        candidate.id(),
                        candidate.uses() + 1
                    );
                    return Some(candidate);
                }
                Err(e) => {
                    log::warn!("❌ Session {} failed health check: {}", candidate.id(), e);
                }
            }
        }
    }

    fn create(&self) -> Result<PooledSession<S>, SessionError> {
        if self.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }

        let start = Instant::now();
        let pooled = PooledSession::new(self.factory.create()?);
        log::info!(
            "✅ Created session {} in {:?}",
            pooled.id(),
            start.elapsed()
        );
        Ok(pooled)
    }

    /// Take a session back from a dropped handle.
    pub(crate) fn release(self: &Arc<Self>, pooled: PooledSession<S>) {
        let reason = if self.is_shutting_down() {
            Some("pool shutting down")
        } else if pooled.is_poisoned() {
            Some("poisoned")
        } else if pooled.is_expired(self.config.session_ttl) {
            Some("expired")
        } else {
            None
        };

        let discarded = {
            let mut state = self.lock();
            state.checked_out = state.checked_out.saturating_sub(1);

            match reason {
                None if state.idle.len() < self.config.max_idle => {
                    log::debug!(
                        "Session {} back to idle ({}/{})",
                        pooled.id(),
                        state.idle.len() + 1,
                        self.config.max_idle
                    );
                    state.idle.push(pooled);
                    None
                }
                None => Some((pooled, "idle list full")),
                Some(reason) => Some((pooled, reason)),
            }
        };
        self.slot_freed.notify_one();

        if let Some((pooled, reason)) = discarded {
            log::debug!("🗑️ Discarding session {} ({})", pooled.id(), reason);
            drop(pooled);
        }
    }

    fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            available: state.idle.len(),
            active: state.checked_out,
            total: state.idle.len() + state.checked_out,
            waiting: state.waiting,
            max_sessions: self.config.max_sessions,
        }
    }

    fn shutdown(&self) -> usize {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let idle = std::mem::take(&mut self.lock().idle);
        self.slot_freed.notify_all();

        let count = idle.len();
        drop(idle);
        count
    }
}

// ============================================================================
// SessionPool
// ============================================================================

/// Bounded, reusable set of rendering sessions.
///
/// Checkout is blocking; async callers run it inside
/// `tokio::task::spawn_blocking` together with the rest of the render.
pub struct SessionPool<S: Healthcheck + 'static> {
    inner: Arc<SessionPoolInner<S>>,
}

impl<S: Healthcheck + 'static> SessionPool<S> {
    pub fn builder() -> SessionPoolBuilder<S> {
        SessionPoolBuilder::new()
    }

    /// Check a session out.
    ///
    /// Waits up to `acquire_timeout` for a free slot. Idle sessions are
    /// health checked before reuse; otherwise a new one is launched.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AcquireTimeout`] if no slot frees up in time
    /// - [`SessionError::Cancelled`] if `cancel` fires while waiting
    /// - [`SessionError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`SessionError::Creation`] if a new session cannot be launched
    pub fn checkout(&self, cancel: &CancellationToken) -> Result<SessionHandle<S>, SessionError> {
        self.inner.checkout(cancel)
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    pub fn config(&self) -> &SessionPoolConfig {
        &self.inner.config
    }

    /// Ready to hand out sessions.
    pub fn is_ready(&self) -> bool {
        !self.inner.is_shutting_down()
    }

    /// Launch sessions until `max_idle` are parked, ready for reuse.
    ///
    /// Blocking. Returns the number of idle sessions afterwards.
    ///
    /// # Errors
    ///
    /// The first checkout error; sessions created before it stay idle.
    pub fn warmup(&self) -> Result<usize, SessionError> {
        let target = self.inner.config.max_idle;
        let have = self.stats().available;
        if have >= target {
            return Ok(have);
        }

        log::info!("🔥 Warming up {} rendering sessions", target - have);
        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(target - have);
        for i in have..target {
            let handle = self.checkout(&cancel)?;
            log::debug!("Warmup session {}/{} ready (id {})", i + 1, target, handle.id());
            handles.push(handle);
        }
        drop(handles);

        let stats = self.stats();
        log::info!("✅ Warmup completed - {}", stats);
        Ok(stats.available)
    }

    /// Stop handing out sessions and drop the idle ones.
    ///
    /// Waiters fail with [`SessionError::ShuttingDown`]; sessions still
    /// checked out are discarded when their handles drop. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.is_shutting_down() {
            return;
        }
        log::info!("🛑 Shutting down session pool");
        let closed = self.inner.shutdown();
        log::info!("✅ Session pool shut down ({} idle sessions closed)", closed);
    }
}

impl<S: Healthcheck + 'static> Drop for SessionPool<S> {
    fn drop(&mut self) {
        if !self.inner.is_shutting_down() {
            log::debug!("SessionPool dropped without shutdown(), shutting down now");
            self.shutdown();
        }
    }
}

impl<S: Healthcheck + 'static> std::fmt::Debug for SessionPool<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.inner.stats())
            .finish()
    }
}

// ============================================================================
// SessionPoolBuilder
// ============================================================================

/// Builder for [`SessionPool`].
///
/// A factory is required; the config defaults to [`SessionPoolConfig::default`].
pub struct SessionPoolBuilder<S> {
    config: Option<SessionPoolConfig>,
    factory: Option<Box<dyn SessionFactory<S>>>,
}

impl<S: Healthcheck + 'static> SessionPoolBuilder<S> {
    pub fn new() -> Self {
        Self {
            config: None,
            factory: None,
        }
    }

    pub fn config(mut self, config: SessionPoolConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn factory(mut self, factory: Box<dyn SessionFactory<S>>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// # Errors
    ///
    /// [`SessionError::Configuration`] if no factory was given or the
    /// limits are inconsistent.
    pub fn build(self) -> Result<SessionPool<S>, SessionError> {
        let config = self.config.unwrap_or_default();
        let factory = self
            .factory
            .ok_or_else(|| SessionError::Configuration("No session factory provided".to_string()))?;

        if config.max_sessions == 0 {
            return Err(SessionError::Configuration(
                "max_sessions must be greater than 0".to_string(),
            ));
        }
        if config.max_idle > config.max_sessions {
            return Err(SessionError::Configuration(
                "max_idle cannot exceed max_sessions".to_string(),
            ));
        }

        log::info!(
            "🔧 Session pool ready (max sessions: {}, max idle: {}, TTL: {}s)",
            config.max_sessions,
            config.max_idle,
            config.session_ttl.as_secs()
        );

        Ok(SessionPool {
            inner: Arc::new(SessionPoolInner {
                config,
                factory,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    checked_out: 0,
                    waiting: 0,
                }),
                slot_freed: Condvar::new(),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }
}

impl<S: Healthcheck + 'static> Default for SessionPoolBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionPoolConfigBuilder;
    use crate::factory::mock::{MockSession, MockSessionFactory};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn pool_with(
        config: SessionPoolConfig,
        factory: MockSessionFactory,
    ) -> (SessionPool<MockSession>, Arc<AtomicUsize>) {
        let counter = factory.counter();
        let pool = SessionPool::builder()
            .config(config)
            .factory(Box::new(factory))
            .build()
            .unwrap();
        (pool, counter)
    }

    fn config(max_sessions: usize, max_idle: usize) -> SessionPoolConfig {
        SessionPoolConfigBuilder::new()
            .max_sessions(max_sessions)
            .max_idle(max_idle)
            .acquire_timeout(Duration::from_millis(300))
            .build()
            .unwrap()
    }

    /// Verifies that the builder requires a factory.
    #[test]
    fn test_builder_missing_factory() {
        let result = SessionPool::<MockSession>::builder().build();
        match result {
            Err(SessionError::Configuration(msg)) => {
                assert!(msg.contains("No session factory provided"))
            }
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }
    }

    /// Verifies that an idle session is reused.
    #[test]
    fn test_reuse_idle_session() {
        let (pool, counter) = pool_with(config(2, 1), MockSessionFactory::new());
        let cancel = CancellationToken::new();

        let first = pool.checkout(&cancel).unwrap();
        let first_id = first.id();
        drop(first);
        assert_eq!(pool.stats().available, 1);

        let second = pool.checkout(&cancel).unwrap();
        assert_eq!(second.id(), first_id);
        assert_eq!(second.uses(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    /// Verifies that `max_idle = 0` gives every checkout a new session.
    #[test]
    fn test_no_idle_means_fresh_sessions() {
        let (pool, counter) = pool_with(config(2, 0), MockSessionFactory::new());
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            let handle = pool.checkout(&cancel).unwrap();
            assert_eq!(handle.uses(), 1);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(pool.stats().total, 0);
    }

    /// Verifies that poisoned sessions are not reused.
    #[test]
    fn test_poisoned_session_discarded() {
        let (pool, counter) = pool_with(config(1, 1), MockSessionFactory::new());
        let cancel = CancellationToken::new();

        let mut handle = pool.checkout(&cancel).unwrap();
        handle.poison();
        assert!(handle.is_poisoned());
        drop(handle);

        assert_eq!(pool.stats().available, 0);
        let _again = pool.checkout(&cancel).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    /// Verifies that an idle session failing its ping is replaced.
    #[test]
    fn test_unhealthy_idle_session_replaced() {
        let (pool, counter) = pool_with(config(1, 1), MockSessionFactory::new());
        let cancel = CancellationToken::new();

        let handle = pool.checkout(&cancel).unwrap();
        let health = handle.health_flag();
        drop(handle);
        health.store(false, Ordering::SeqCst);

        let replacement = pool.checkout(&cancel).unwrap();
        assert_eq!(replacement.serial(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    /// Verifies TTL retirement on release.
    #[test]
    fn test_expired_session_retired() {
        let config = SessionPoolConfigBuilder::new()
            .max_sessions(1)
            .max_idle(1)
            .session_ttl(Duration::ZERO)
            .build()
            .unwrap();
        let (pool, counter) = pool_with(config, MockSessionFactory::new());
        let cancel = CancellationToken::new();

        drop(pool.checkout(&cancel).unwrap());
        assert_eq!(pool.stats().available, 0);

        drop(pool.checkout(&cancel).unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    /// Verifies that waiting for a busy pool times out.
    #[test]
    fn test_acquire_timeout() {
        let (pool, _) = pool_with(config(1, 1), MockSessionFactory::new());
        let cancel = CancellationToken::new();

        let _held = pool.checkout(&cancel).unwrap();
        let start = Instant::now();
        let err = pool.checkout(&cancel).unwrap_err();

        assert!(matches!(err, SessionError::AcquireTimeout(300)));
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(pool.stats().waiting, 0);
    }

    /// Verifies that cancellation interrupts a waiting checkout.
    #[test]
    fn test_cancel_while_waiting() {
        let config = SessionPoolConfigBuilder::new()
            .max_sessions(1)
            .max_idle(1)
            .acquire_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        let (pool, _) = pool_with(config, MockSessionFactory::new());
        let pool = Arc::new(pool);

        let _held = pool.checkout(&CancellationToken::new()).unwrap();
        let cancel = CancellationToken::new();

        let waiter = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            thread::spawn(move || pool.checkout(&cancel).map(|_| ()))
        };

        thread::sleep(Duration::from_millis(150));
        assert_eq!(pool.stats().waiting, 1);
        cancel.cancel();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(SessionError::Cancelled)));
    }

    /// Verifies that a waiter gets the slot when a handle is released.
    #[test]
    fn test_waiter_woken_on_release() {
        let config = SessionPoolConfigBuilder::new()
            .max_sessions(1)
            .max_idle(1)
            .acquire_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let (pool, counter) = pool_with(config, MockSessionFactory::new());
        let pool = Arc::new(pool);

        let held = pool.checkout(&CancellationToken::new()).unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.checkout(&CancellationToken::new()).map(|h| h.serial()))
        };

        thread::sleep(Duration::from_millis(100));
        drop(held);

        assert_eq!(waiter.join().unwrap().unwrap(), 1, "Idle session is reused");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    /// Verifies that the checkout limit holds under contention.
    #[test]
    fn test_concurrency_bound() {
        let config = SessionPoolConfigBuilder::new()
            .max_sessions(2)
            .max_idle(2)
            .acquire_timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        let (pool, _) = pool_with(config, MockSessionFactory::new());
        let pool = Arc::new(pool);
        let in_use = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let in_use = Arc::clone(&in_use);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _handle = pool.checkout(&CancellationToken::new()).unwrap();
                    let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    in_use.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert!(stats.available <= 2);
    }

    /// Verifies that a creation failure frees the slot.
    #[test]
    fn test_creation_failure_frees_slot() {
        let (pool, counter) = pool_with(config(1, 1), MockSessionFactory::always_fails("no chrome"));
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            assert!(matches!(
                pool.checkout(&cancel),
                Err(SessionError::Creation(_))
            ));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().active, 0);
    }

    /// Verifies warmup fills the idle list.
    #[test]
    fn test_warmup() {
        let (pool, counter) = pool_with(config(4, 2), MockSessionFactory::new());

        assert_eq!(pool.warmup().unwrap(), 2);
        assert_eq!(pool.stats().available, 2);
        assert_eq!(pool.warmup().unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    /// Verifies shutdown semantics.
    #[test]
    fn test_shutdown() {
        let (pool, _) = pool_with(config(2, 2), MockSessionFactory::new());
        let cancel = CancellationToken::new();

        let held = pool.checkout(&cancel).unwrap();
        drop(pool.checkout(&cancel).unwrap());
        assert_eq!(pool.stats().available, 1);

        pool.shutdown();
        assert!(!pool.is_ready());
        assert_eq!(pool.stats().available, 0);
        assert!(matches!(
            pool.checkout(&cancel),
            Err(SessionError::ShuttingDown)
        ));

        drop(held);
        assert_eq!(pool.stats().total, 0);

        pool.shutdown();
    }
}
