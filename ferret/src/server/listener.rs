//! Connection listeners.
//!
//! One listener per protocol: remote on the remote port, replication
//! on the replication port. Each accepted socket gets its own task;
//! shutdown stops accepting, then waits for inflight connections
//! through the task tracker.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio::{select, spawn};
use tracing::{info, warn};

use crate::backend::pool::Pool;

use super::error::Error;
use super::remote::RemoteProtocol;
use super::replication::ReplicationProtocol;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Which protocol a listener speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Remote,
    Replication,
}

/// One bound protocol listener.
pub struct Listener {
    listener: TcpListener,
    pool: Pool,
    protocol: Protocol,
    shutdown: Arc<Notify>,
    tracker: tokio_util::task::TaskTracker,
}

impl Listener {
    /// Bind a listener. Use port zero to let the OS pick one.
    pub async fn bind(addr: &str, pool: Pool, protocol: Protocol) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(crate::net::Error::Io)?;
        Ok(Self {
            listener,
            pool,
            protocol,
            shutdown: Arc::new(Notify::new()),
            tracker: tokio_util::task::TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Handle returned before `listen` consumes the listener; lets
    /// another task request shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown.
    pub async fn listen(self) -> Result<(), Error> {
        info!(
            "listening for {:?} protocol connections on {:?}",
            self.protocol,
            self.local_addr(),
        );

        loop {
            select! {
                connection = self.listener.accept() => {
                    let (stream, _addr) = connection.map_err(crate::net::Error::Io)?;
                    let pool = self.pool.clone();
                    match self.protocol {
                        Protocol::Remote => {
                            self.tracker.spawn(RemoteProtocol::handle(pool, stream));
                        }
                        Protocol::Replication => {
                            self.tracker.spawn(ReplicationProtocol::handle(pool, stream));
                        }
                    }
                }

                _ = self.shutdown.notified() => {
                    break;
                }
            }
        }

        self.tracker.close();
        info!(
            "waiting up to {:?} for {} connections to finish",
            SHUTDOWN_TIMEOUT,
            self.tracker.len(),
        );
        if timeout(SHUTDOWN_TIMEOUT, self.tracker.wait()).await.is_err() {
            warn!(
                "terminating {} connections due to shutdown timeout",
                self.tracker.len(),
            );
        }

        Ok(())
    }

    /// Bind and run in the background; returns the bound address and
    /// the shutdown handle. Used by tests and the node bootstrap.
    pub async fn spawn(
        addr: &str,
        pool: Pool,
        protocol: Protocol,
    ) -> Result<(SocketAddr, Arc<Notify>), Error> {
        let listener = Self::bind(addr, pool, protocol).await?;
        let local_addr = listener
            .local_addr()
            .ok_or(crate::net::Error::Serialisation("listener has no address"))?;
        let shutdown = listener.shutdown_handle();
        spawn(async move {
            if let Err(err) = listener.listen().await {
                warn!("listener exited with error: {}", err);
            }
        });
        Ok((local_addr, shutdown))
    }
}
