//! Transport subsystem: the byte streams every tunnel layer is built from.
//!
//! # Data Flow
//! ```text
//! Target / ProxyHop
//!     → connector.rs (fresh TCP socket, TLS session, or reuse of a previous layer)
//!     → BoxStream (one duplex byte channel)
//!     → handed to the next protocol agent, or to relay.rs once the chain is complete
//! ```
//!
//! # Design Decisions
//! - Every layer is a `Box<dyn Tunnel>`; wrapping a stream moves it, so a
//!   consumed layer cannot be touched again by the caller
//! - Dropping the outermost layer drops every layer underneath it
//! - Cancellation is a `CancellationToken`; a cancelled step drops whatever it
//!   had opened before returning

pub mod connector;
pub mod relay;
pub mod target;
pub mod ws;

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

pub use connector::Connector;
pub use relay::splice;
pub use target::{ProtocolType, ProxyHop, Target};
pub use ws::WsStream;

/// A bidirectional byte channel usable as the transport of the next layer.
pub trait Tunnel: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Tunnel for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// An owned, type-erased tunnel layer.
pub type BoxStream = Box<dyn Tunnel>;

/// Runs `fut` until it finishes or `cancel` fires, whichever comes first.
///
/// On cancellation `fut` is dropped before this returns, which closes any
/// socket it was holding.
pub(crate) async fn cancellable<F, T, E>(
    cancel: &CancellationToken,
    fut: F,
    on_cancel: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(on_cancel()),
        result = fut => result,
    }
}
