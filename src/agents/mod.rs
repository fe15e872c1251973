//! Protocol agents: one handshake per hop protocol.
//!
//! # Data Flow
//! ```text
//! (hop, next, previous layer)
//!     → Connector (reuse previous, optionally wrap in TLS)
//!     → protocol handshake spoken to `hop`, naming `next` as destination
//!     → BoxStream that reaches `next`
//! ```
//!
//! # Design Decisions
//! - The protocol set is closed; dispatch is a `match` on [`ProtocolType`]
//! - Every handshake races the chain's cancellation token
//! - A failed handshake drops the transport it was given, closing every layer below

pub mod http;
pub mod millimol;
pub mod scifin;
pub mod ws;

use std::error::Error as StdError;
use std::future::Future;

use hyper::body::Body;
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{HeaderValue, PROXY_AUTHORIZATION, USER_AGENT};
use hyper::http::request::Builder;
use hyper_util::rt::TokioIo;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TunnelError;
use crate::transport::{BoxStream, Connector, ProtocolType, ProxyHop, Target};

/// `User-Agent` sent on every handshake.
pub const AGENT_NAME: &str = concat!("fog/v", env!("CARGO_PKG_VERSION"));

/// Establish a tunnel through `hop` whose far end is `next`.
///
/// `previous` is the layer `hop` is reached through; `None` means `hop` is
/// dialled directly. It is consumed either way.
pub async fn create_connection(
    connector: &Connector,
    hop: &ProxyHop,
    next: &Target,
    cancel: &CancellationToken,
    previous: Option<BoxStream>,
) -> Result<BoxStream, TunnelError> {
    debug!(protocol = %hop.protocol, hop = %hop.target, next = %next, "opening layer");
    match hop.protocol {
        ProtocolType::Http => http::create_connection(connector, hop, next, cancel, previous).await,
        ProtocolType::Scifin => {
            scifin::create_connection(connector, hop, next, cancel, previous).await
        }
        ProtocolType::Millimol => {
            millimol::create_connection(connector, hop, next, cancel, previous).await
        }
        ProtocolType::Ws => ws::create_connection(connector, hop, next, cancel, previous).await,
    }
}

/// Background task driving an HTTP/1 client connection; aborted on drop.
pub(crate) struct ConnectionTask(JoinHandle<()>);

impl ConnectionTask {
    pub(crate) fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(task))
    }
}

impl Drop for ConnectionTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Start an HTTP/1 client exchange with `hop` over `transport`.
pub(crate) async fn open_exchange<B>(
    hop: &ProxyHop,
    transport: BoxStream,
) -> Result<(SendRequest<B>, ConnectionTask), TunnelError>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let (sender, conn) = http1::handshake(TokioIo::new(transport))
        .await
        .map_err(|source| TunnelError::Http {
            hop: hop.target.clone(),
            source,
        })?;

    let label = hop.target.to_string();
    let task = ConnectionTask::spawn(async move {
        if let Err(err) = conn.with_upgrades().await {
            debug!(hop = %label, error = %err, "hop connection ended");
        }
    });
    Ok((sender, task))
}

/// Request builder carrying the headers every handshake shares.
pub(crate) fn handshake_request(hop: &ProxyHop) -> Builder {
    let builder = hyper::Request::builder().header(USER_AGENT, HeaderValue::from_static(AGENT_NAME));
    match &hop.authorization {
        Some(credential) => builder.header(PROXY_AUTHORIZATION, credential.as_str()),
        None => builder,
    }
}

pub(crate) fn http_error(hop: &ProxyHop) -> impl FnOnce(hyper::Error) -> TunnelError + '_ {
    move |source| TunnelError::Http {
        hop: hop.target.clone(),
        source,
    }
}

pub(crate) fn request_error(hop: &ProxyHop) -> impl FnOnce(hyper::http::Error) -> TunnelError + '_ {
    move |source| TunnelError::InvalidRequest {
        hop: hop.target.clone(),
        source,
    }
}
