//! Bounded caching primitives.
//!
//! The container here is deliberately not thread safe: callers that
//! share one (the shard pool, schema-style caches) wrap it in their own
//! mutex and keep lock scopes short.

pub mod lru;

pub use lru::{DropAction, GetAction, Lru, NotFound};
