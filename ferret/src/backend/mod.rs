//! Shards, endpoints, cluster nodes and the pool managing them.

pub mod endpoint;
pub mod node;
pub mod pool;
pub mod shard;

pub use endpoint::{Endpoint, Endpoints};
pub use node::Node;
pub use pool::{Guard, Pool, Request};
pub use shard::{Flags, Shard};
