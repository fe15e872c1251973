//! WebSocket endpoint: completes the RFC 6455 handshake and splices the
//! socket's byte stream with the target.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use hyper::header::{HeaderValue, CONNECTION, HOST, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::{HeaderMap, Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{requested_target, wants_upgrade, EndpointState};
use crate::error::{ProtocolError, TunnelError};
use crate::http::response;
use crate::net::connection::ConnectionSlot;
use crate::observability::metrics;
use crate::transport::{splice, Target, WsStream};

/// How long the closing handshake may take once the tunnel is done.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn handle(state: Arc<EndpointState>, request: Request<Body>) -> Response {
    let response = serve(&state, request).await;
    metrics::record_request("ws", response.status().as_u16());
    response
}

async fn serve(state: &EndpointState, mut request: Request<Body>) -> Response {
    if !wants_upgrade(request.headers(), "websocket") {
        return response::protocol_error(&ProtocolError::UpgradeRequired);
    }
    let Some(key) = request.headers().get(SEC_WEBSOCKET_KEY).cloned() else {
        return response::protocol_error(&ProtocolError::MalformedUpgrade("missing Sec-WebSocket-Key"));
    };
    let target = match websocket_target(request.headers()) {
        Ok(target) => target,
        Err(err) => return response::protocol_error(&err),
    };
    if let Err(err) = state.auth.check(request.headers()) {
        warn!(target = %target, "WebSocket upgrade rejected: bad credentials");
        return response::protocol_error(&err);
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let upstream = match state.connector.connect(&target, false, None, &cancel).await {
        Ok(stream) => stream,
        Err(err) => return response::tunnel_error(&TunnelError::from(err), false),
    };

    let slot = request.extensions_mut().remove::<ConnectionSlot>();
    let on_upgrade = hyper::upgrade::on(&mut request);
    let label = target.to_string();
    tokio::spawn(async move {
        let _slot = slot;
        match on_upgrade.await {
            Ok(upgraded) => {
                let socket =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
                let mut client = WsStream::new(socket);
                splice(&mut client, upstream, &label).await;
                match tokio::time::timeout(CLOSE_TIMEOUT, client.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => debug!(target = %label, error = %err, "closing handshake failed"),
                    Err(_) => debug!(target = %label, "peer never answered the close frame"),
                }
            }
            Err(err) => debug!(target = %label, error = %err, "client left before the WebSocket opened"),
        }
    });

    debug!(target = %target, "WebSocket tunnel open");
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    if let Ok(accept) = HeaderValue::try_from(derive_accept_key(key.as_bytes())) {
        headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    }
    response
}

/// `Target` header, falling back to `Host`.
fn websocket_target(headers: &HeaderMap) -> Result<Target, ProtocolError> {
    match requested_target(headers) {
        Err(ProtocolError::MissingTarget) => {
            let host = headers
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .ok_or(ProtocolError::MissingTarget)?;
            Target::parse_authority(host)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::TARGET_HEADER;

    #[test]
    fn target_header_preferred_over_host() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("fallback.test:81"));
        assert_eq!(websocket_target(&headers), Ok(Target::new("fallback.test", 81)));

        headers.insert(TARGET_HEADER, HeaderValue::from_static("origin.test:82"));
        assert_eq!(websocket_target(&headers), Ok(Target::new("origin.test", 82)));
    }
}
