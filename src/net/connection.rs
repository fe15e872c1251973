//! Client connection bookkeeping.
//!
//! Every accepted socket gets an id for its log span and a guard that keeps
//! it counted until the socket (and any tunnel spliced onto it) is gone.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use super::listener::ConnectionPermit;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counts {
    open: AtomicU64,
    closed: Notify,
}

/// Counts open client connections so shutdown can wait for them.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counts: Arc<Counts>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self) -> ConnectionGuard {
        self.counts.open.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            counts: Arc::clone(&self.counts),
            id: ConnectionId::next(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.counts.open.load(Ordering::SeqCst)
    }

    /// Wait for every tracked connection to close, giving up after `deadline`.
    ///
    /// Returns how many were still open.
    pub async fn drain(&self, deadline: Duration) -> u64 {
        let all_closed = async {
            loop {
                let closed = self.counts.closed.notified();
                if self.active_count() == 0 {
                    break;
                }
                closed.await;
            }
        };
        let _ = tokio::time::timeout(deadline, all_closed).await;
        self.active_count()
    }
}

/// Keeps one connection counted; dropping it marks the connection closed.
#[derive(Debug)]
pub struct ConnectionGuard {
    counts: Arc<Counts>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counts.open.fetch_sub(1, Ordering::SeqCst);
        self.counts.closed.notify_waiters();
        tracing::trace!(connection_id = %self.id, "connection closed");
    }
}

/// The permit and guard of one client connection.
///
/// Cloned into every request on the connection. An upgraded request keeps a
/// clone in its tunnel task, so the slot stays taken until the last clone
/// (connection or tunnel) is gone.
#[derive(Debug, Clone)]
pub struct ConnectionSlot(Arc<Held>);

#[derive(Debug)]
struct Held {
    _permit: ConnectionPermit,
    guard: ConnectionGuard,
}

impl ConnectionSlot {
    pub fn new(permit: ConnectionPermit, guard: ConnectionGuard) -> Self {
        Self(Arc::new(Held {
            _permit: permit,
            guard,
        }))
    }

    pub fn id(&self) -> ConnectionId {
        self.0.guard.id()
    }
}
