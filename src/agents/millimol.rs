//! `millimol` agent: a `GET` upgraded to a raw byte pipe.
//!
//! The hop answers `101 Switching Protocols` with `Upgrade: millimol` and then
//! relays bytes to the host named in the `Target` header.

use bytes::Bytes;
use http_body_util::Empty;
use hyper::header::{HeaderValue, CONNECTION, HOST, UPGRADE};
use hyper::{Method, StatusCode};
use hyper_util::rt::TokioIo;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{handshake_request, http_error, open_exchange, request_error};
use crate::error::TunnelError;
use crate::transport::{cancellable, BoxStream, Connector, ProxyHop, Target};

pub const PROTOCOL: &str = "millimol";

pub async fn create_connection(
    connector: &Connector,
    hop: &ProxyHop,
    next: &Target,
    cancel: &CancellationToken,
    previous: Option<BoxStream>,
) -> Result<BoxStream, TunnelError> {
    let transport = connector.connect_hop(hop, previous, cancel).await?;
    cancellable(cancel, upgrade_through(hop, next, transport), || {
        TunnelError::Cancelled
    })
    .await
}

async fn upgrade_through(
    hop: &ProxyHop,
    next: &Target,
    transport: BoxStream,
) -> Result<BoxStream, TunnelError> {
    let (mut sender, _task) = open_exchange::<Empty<Bytes>>(hop, transport).await?;

    let destination = next.to_string();
    let request = handshake_request(hop)
        .method(Method::GET)
        .uri("/")
        .header(HOST, destination.as_str())
        .header("target", destination.as_str())
        .header(CONNECTION, HeaderValue::from_static("Upgrade"))
        .header(UPGRADE, HeaderValue::from_static(PROTOCOL))
        .body(Empty::new())
        .map_err(request_error(hop))?;

    let response = sender.send_request(request).await.map_err(http_error(hop))?;
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        debug!(hop = %hop.target, status = %response.status(), "millimol upgrade rejected");
        return Err(TunnelError::Handshake {
            hop: hop.target.clone(),
            status: response.status(),
        });
    }

    let upgraded = hyper::upgrade::on(response).await.map_err(http_error(hop))?;
    debug!(hop = %hop.target, next = %next, "millimol tunnel established");
    Ok(Box::new(TokioIo::new(upgraded)))
}
