//! Checkout guard.

use std::ops::Deref;
use std::sync::Arc;

use crate::backend::shard::Shard;

use super::Pool;

/// A checked-out shard. Dropping the guard checks the shard back in,
/// so every checkout has a matching checkin on every exit path.
pub struct Guard {
    shard: Option<Arc<Shard>>,
    pool: Pool,
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard").field("shard", &self.shard).finish()
    }
}

impl Guard {
    pub(super) fn new(pool: Pool, shard: Arc<Shard>) -> Self {
        Self {
            shard: Some(shard),
            pool,
        }
    }

    /// The underlying shared handle.
    pub fn shard(&self) -> &Arc<Shard> {
        self.shard.as_ref().unwrap()
    }
}

impl Deref for Guard {
    type Target = Shard;

    fn deref(&self) -> &Self::Target {
        self.shard.as_ref().unwrap()
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        if let Some(shard) = self.shard.take() {
            self.pool.checkin(shard);
        }
    }
}
