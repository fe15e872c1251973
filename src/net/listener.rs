//! Accept loop with a bounded number of live client connections.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to accept: {0}")]
    Accept(#[from] io::Error),
    #[error("listener closed")]
    Closed,
}

/// A `TcpListener` that stops accepting while `max_connections` are open.
///
/// Slots are held by [`ConnectionPermit`]s, so a tunnel keeps its slot until
/// it is torn down.
pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
}

impl Listener {
    pub fn from_listener(inner: TcpListener, max_connections: usize) -> Self {
        if let Ok(address) = inner.local_addr() {
            tracing::info!(address = %address, max_connections, "Listener bound");
        }
        Self {
            inner,
            slots: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Wait for a free slot, then accept the next client.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer) = self.inner.accept().await?;
        let _ = stream.set_nodelay(true);
        tracing::debug!(peer = %peer, free_slots = self.slots.available_permits(), "client accepted");

        Ok((stream, peer, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }
}

/// One connection slot; released on drop.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
