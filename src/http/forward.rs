//! Forward-proxy handling of absolute-form requests (`GET http://host/path`).

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::response::Response;
use hyper::body::{Frame, SizeHint};
use hyper::client::conn::http1;
use hyper::header::{HeaderValue, CONNECTION, HOST};
use hyper::{Request, Uri, Version};
use hyper_util::rt::TokioIo;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::response;
use super::server::FogState;
use crate::agents::ConnectionTask;
use crate::observability::metrics;
use crate::security::strip_hop_by_hop;
use crate::transport::{BoxStream, Target};

pub async fn forward(state: Arc<FogState>, request: Request<Body>) -> Response {
    let response = handle(&state, request).await;
    metrics::record_request("forward", response.status().as_u16());
    response
}

async fn handle(state: &FogState, request: Request<Body>) -> Response {
    if let Err(err) = state.auth.check(request.headers()) {
        warn!(uri = %request.uri(), "forward request rejected: bad credentials");
        return response::protocol_error(&err);
    }

    let target = match Target::from_forward_uri(request.uri()) {
        Ok(target) => target,
        Err(err) => {
            debug!(uri = %request.uri(), error = %err, "forward request rejected");
            return response::protocol_error(&err);
        }
    };

    // Dropping this future (client gone) cancels the build.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let stream = match state.chain.build(&target, &cancel).await {
        Ok(stream) => stream,
        Err(err) => return response::tunnel_error(&err, state.passthrough),
    };

    match send_upstream(&target, stream, request).await {
        Ok(response) => response,
        Err(err) => {
            error!(target = %target, error = %err, "upstream exchange failed");
            response::text(
                hyper::StatusCode::INTERNAL_SERVER_ERROR,
                format!("Upstream request to {target} failed: {err}"),
            )
        }
    }
}

/// Replay `request` over `stream` and return the sanitized upstream response.
async fn send_upstream(
    target: &Target,
    stream: BoxStream,
    request: Request<Body>,
) -> Result<Response, hyper::Error> {
    let (mut parts, body) = request.into_parts();

    parts.uri = origin_form(&parts.uri);
    parts.version = Version::HTTP_11;
    strip_hop_by_hop(&mut parts.headers);
    parts
        .headers
        .insert(CONNECTION, HeaderValue::from_static("close"));
    if !parts.headers.contains_key(HOST) {
        if let Ok(host) = HeaderValue::try_from(target.to_string()) {
            parts.headers.insert(HOST, host);
        }
    }

    let (mut sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
    let label = target.to_string();
    let conn = ConnectionTask::spawn(async move {
        if let Err(err) = conn.await {
            debug!(target = %label, error = %err, "upstream connection ended");
        }
    });

    let upstream = sender.send_request(Request::from_parts(parts, body)).await?;
    let (mut parts, body) = upstream.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    debug!(target = %target, status = %parts.status, "forwarded");
    Ok(Response::from_parts(
        parts,
        Body::new(HeldBody {
            inner: body,
            _conn: conn,
        }),
    ))
}

/// Response body that owns the connection it is read from.
///
/// The upstream connection (and the chain under it) is torn down when the
/// client stops reading the body.
struct HeldBody<B> {
    inner: B,
    _conn: ConnectionTask,
}

impl<B> hyper::body::Body for HeldBody<B>
where
    B: hyper::body::Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Path and query of an absolute-form URI.
fn origin_form(uri: &Uri) -> Uri {
    uri.path_and_query()
        .and_then(|pq| Uri::try_from(pq.as_str()).ok())
        .unwrap_or_else(|| Uri::from_static("/"))
}
