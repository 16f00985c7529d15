//! Server-side half of the content-addressable cache protocol.
//!
//! [`catalog::ServerCatalog`] is the process-wide decision engine: given a
//! candidate rectangle's pixels, it decides whether the server has already
//! encoded this content before and whether a specific client already holds
//! it, so the encoder can send an 8-byte reference instead of re-encoding.
//! [`integrator::CacheIntegrator`] wraps one catalog handle with the
//! per-connection bookkeeping an encode loop actually needs to act on those
//! decisions.
//!
//! This crate is a self-contained library: it has no network I/O of its
//! own. A server's connection/encode loop is expected to call
//! [`integrator::CacheIntegrator::evaluate`] per candidate rectangle and
//! wire the resulting [`integrator::EncodeAction`] into its own rectangle
//! emission.

pub mod catalog;
pub mod config;
pub mod integrator;

pub use catalog::{CatalogStats, ClientCacheState, Decision, PendingInit, ServerCatalog};
pub use config::ServerCacheConfig;
pub use integrator::{CacheIntegrator, EncodeAction};
