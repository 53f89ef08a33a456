//! Ferret is a distributed search server: a multi-tenant shard pool,
//! a remote binary protocol and a replication transport around an
//! embedded full-text index engine.

pub mod backend;
pub mod cache;
pub mod cli;
pub mod engine;
pub mod net;
pub mod server;

/// Initialize tracing output. Safe to call more than once; tests use
/// it liberally.
pub fn logger() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
