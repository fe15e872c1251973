//! CONNECT tunnelling: build a chain, answer 200, then splice the raw sockets.

use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use hyper::ext::ReasonPhrase;
use hyper::header::HOST;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::response;
use super::server::FogState;
use crate::error::ProtocolError;
use crate::net::connection::ConnectionSlot;
use crate::observability::metrics;
use crate::transport::{splice, BoxStream, Target};

pub async fn connect(state: Arc<FogState>, request: Request<Body>) -> Response {
    let response = handle(&state, request).await;
    metrics::record_request("connect", response.status().as_u16());
    response
}

async fn handle(state: &FogState, mut request: Request<Body>) -> Response {
    let Some(authority) = requested_authority(&request) else {
        return response::protocol_error(&ProtocolError::MissingHost);
    };
    if let Err(err) = state.auth.check(request.headers()) {
        warn!(target = %authority, "CONNECT rejected: bad credentials");
        return response::protocol_error(&err);
    }
    let target = match Target::parse_authority(&authority) {
        Ok(target) => target,
        Err(err) => return response::protocol_error(&err),
    };

    // Dropping this future (client gone) cancels the build.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let upstream = match state.chain.build(&target, &cancel).await {
        Ok(stream) => stream,
        Err(err) => return response::tunnel_error(&err, state.passthrough),
    };

    debug!(target = %target, hops = state.chain.hops().len(), "CONNECT tunnel ready");
    spawn_splice(&mut request, upstream, target);
    connection_established()
}

/// `Host` header first, then the request-target.
fn requested_authority(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
}

/// `200 Connection established`, handing the socket over to the tunnel.
pub(crate) fn connection_established() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(b"Connection established"));
    response
}

/// Splice an upgraded client connection with `upstream` in the background.
///
/// The tunnel holds the client's connection slot until it closes.
pub(crate) fn spawn_splice(request: &mut Request<Body>, upstream: BoxStream, target: Target) {
    let slot = request.extensions_mut().remove::<ConnectionSlot>();
    let on_upgrade = hyper::upgrade::on(request);
    tokio::spawn(async move {
        let _slot = slot;
        match on_upgrade.await {
            Ok(upgraded) => splice(TokioIo::new(upgraded), upstream, &target.to_string()).await,
            Err(err) => debug!(target = %target, error = %err, "client left before the tunnel opened"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;

    #[test]
    fn host_header_wins_over_request_target() {
        let request = Request::builder()
            .method(Method::CONNECT)
            .uri("origin.test:443")
            .header(HOST, "other.test:8443")
            .body(Body::empty())
            .unwrap();
        assert_eq!(requested_authority(&request).as_deref(), Some("other.test:8443"));

        let request = Request::builder()
            .method(Method::CONNECT)
            .uri("origin.test:443")
            .body(Body::empty())
            .unwrap();
        assert_eq!(requested_authority(&request).as_deref(), Some("origin.test:443"));
    }

    #[test]
    fn established_response_has_reason() {
        let response = connection_established();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.extensions().get::<ReasonPhrase>().map(|r| r.as_bytes()),
            Some(&b"Connection established"[..])
        );
    }
}
