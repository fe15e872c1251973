//! `millimol` endpoint: acknowledges the upgrade with 101 and splices the
//! upgraded connection with the target.

use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use hyper::header::{HeaderValue, CONNECTION, UPGRADE};
use hyper::{Request, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{requested_target, wants_upgrade, EndpointState};
use crate::agents::millimol::PROTOCOL;
use crate::error::{ProtocolError, TunnelError};
use crate::http::response;
use crate::http::tunnel::spawn_splice;
use crate::observability::metrics;

pub async fn handle(state: Arc<EndpointState>, request: Request<Body>) -> Response {
    let response = serve(&state, request).await;
    metrics::record_request("millimol", response.status().as_u16());
    response
}

async fn serve(state: &EndpointState, mut request: Request<Body>) -> Response {
    if !wants_upgrade(request.headers(), PROTOCOL) {
        return response::protocol_error(&ProtocolError::UpgradeRequired);
    }
    let target = match requested_target(request.headers()) {
        Ok(target) => target,
        Err(err) => return response::protocol_error(&err),
    };
    if let Err(err) = state.auth.check(request.headers()) {
        warn!(target = %target, "millimol upgrade rejected: bad credentials");
        return response::protocol_error(&err);
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let upstream = match state.connector.connect(&target, false, None, &cancel).await {
        Ok(stream) => stream,
        Err(err) => return response::tunnel_error(&TunnelError::from(err), false),
    };

    debug!(target = %target, "millimol tunnel open");
    spawn_splice(&mut request, upstream, target);
    switching_protocols()
}

fn switching_protocols() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static(PROTOCOL));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    response
}
