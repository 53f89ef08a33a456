//! Shard checkout and checkin.

pub mod cleanup;
pub mod error;
pub mod guard;
pub mod pool_impl;
pub mod request;
pub mod shard_endpoint;
pub mod stats;
pub mod waiting;

pub use cleanup::Cleanup;
pub use error::Error;
pub use guard::Guard;
pub use pool_impl::{Config, Pool};
pub use request::Request;
pub use shard_endpoint::ShardEndpoint;
pub use stats::Counts;

#[cfg(test)]
mod test;
