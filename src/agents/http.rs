//! HTTP `CONNECT` agent.

use bytes::Bytes;
use http_body_util::Empty;
use hyper::header::HOST;
use hyper::{Method, StatusCode};
use hyper_util::rt::TokioIo;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{handshake_request, http_error, open_exchange, request_error};
use crate::error::TunnelError;
use crate::transport::{cancellable, BoxStream, Connector, ProxyHop, Target};

pub async fn create_connection(
    connector: &Connector,
    hop: &ProxyHop,
    next: &Target,
    cancel: &CancellationToken,
    previous: Option<BoxStream>,
) -> Result<BoxStream, TunnelError> {
    let transport = connector.connect_hop(hop, previous, cancel).await?;
    cancellable(cancel, connect_through(hop, next, transport), || {
        TunnelError::Cancelled
    })
    .await
}

async fn connect_through(
    hop: &ProxyHop,
    next: &Target,
    transport: BoxStream,
) -> Result<BoxStream, TunnelError> {
    let (mut sender, _task) = open_exchange::<Empty<Bytes>>(hop, transport).await?;

    let authority = next.to_string();
    let request = handshake_request(hop)
        .method(Method::CONNECT)
        .uri(authority.as_str())
        .header(HOST, authority.as_str())
        .body(Empty::new())
        .map_err(request_error(hop))?;

    let response = sender.send_request(request).await.map_err(http_error(hop))?;
    if response.status() != StatusCode::OK {
        debug!(
            hop = %hop.target,
            status = %response.status(),
            headers = ?response.headers(),
            "CONNECT rejected"
        );
        return Err(TunnelError::Handshake {
            hop: hop.target.clone(),
            status: response.status(),
        });
    }

    let upgraded = hyper::upgrade::on(response).await.map_err(http_error(hop))?;
    debug!(hop = %hop.target, next = %next, "CONNECT tunnel established");
    Ok(Box::new(TokioIo::new(upgraded)))
}
