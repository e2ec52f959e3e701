//! Traits at the seams of the session pool.
//!
//! - **Health monitoring**: [`Healthcheck`] for verifying a session before reuse
//!
//! Sessions are any `Healthcheck + Send + 'static` value; the pool never
//! looks inside them.

mod healthcheck;

pub use healthcheck::Healthcheck;
