//! `scifin` endpoint: the request body streams to the target, the target
//! streams back as the response body.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use futures_util::TryStreamExt;
use hyper::{Method, Request};
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{requested_target, EndpointState};
use crate::error::{ProtocolError, TunnelError};
use crate::http::response;
use crate::http::tunnel::connection_established;
use crate::observability::metrics;

pub async fn handle(state: Arc<EndpointState>, request: Request<Body>) -> Response {
    let response = serve(&state, request).await;
    metrics::record_request("scifin", response.status().as_u16());
    response
}

async fn serve(state: &EndpointState, request: Request<Body>) -> Response {
    if request.method() != Method::POST {
        return response::protocol_error(&ProtocolError::MethodNotAllowed {
            method: request.method().clone(),
            expected: Method::POST,
        });
    }
    let target = match requested_target(request.headers()) {
        Ok(target) => target,
        Err(err) => return response::protocol_error(&err),
    };
    if let Err(err) = state.auth.check(request.headers()) {
        warn!(target = %target, "scifin request rejected: bad credentials");
        return response::protocol_error(&err);
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let upstream = match state.connector.connect(&target, false, None, &cancel).await {
        Ok(stream) => stream,
        Err(err) => return response::tunnel_error(&TunnelError::from(err), false),
    };

    let (download, mut upload_sink) = tokio::io::split(upstream);
    let mut upload = StreamReader::new(request.into_body().into_data_stream().map_err(io::Error::other));
    let label = target.to_string();
    tokio::spawn(async move {
        match tokio::io::copy(&mut upload, &mut upload_sink).await {
            Ok(bytes) => debug!(target = %label, bytes, "scifin request body finished"),
            Err(err) => debug!(target = %label, error = %err, "scifin request body aborted"),
        }
        let _ = upload_sink.shutdown().await;
    });

    debug!(target = %target, "scifin tunnel open");
    let mut response = connection_established();
    *response.body_mut() = Body::from_stream(ReaderStream::new(download));
    response
}
