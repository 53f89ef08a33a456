//! Checkout requests.

use std::time::Duration;

use tokio::time::Instant;

use crate::backend::shard::Flags;

/// One checkout request: the open mode and an absolute deadline every
/// wait inside the pool honors.
#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub flags: Flags,
    pub deadline: Instant,
}

impl Request {
    /// Request with a relative timeout from now.
    pub fn new(flags: Flags, timeout: Duration) -> Self {
        Self {
            flags,
            deadline: Instant::now() + timeout,
        }
    }

    /// Request with an absolute deadline, for batch acquisition where
    /// every member shares one.
    pub fn with_deadline(flags: Flags, deadline: Instant) -> Self {
        Self { flags, deadline }
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new(Flags::OPEN, Duration::from_secs(60))
    }
}
