//! `scifin` agent: one long-lived `POST` whose bodies form the tunnel.
//!
//! Bytes written to the tunnel become the streamed request body; the streamed
//! response body is what reads return. The hop names its upstream from the
//! `Target` header and must answer `200`.

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use hyper::body::{Body, Frame, Incoming};
use hyper::header::HOST;
use hyper::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, PollSender};
use tracing::debug;

use super::{handshake_request, http_error, open_exchange, request_error, ConnectionTask};
use crate::error::TunnelError;
use crate::transport::{cancellable, BoxStream, Connector, ProxyHop, Target};

/// Chunks buffered between the tunnel writer and the request body.
const UPLOAD_QUEUE: usize = 16;

pub async fn create_connection(
    connector: &Connector,
    hop: &ProxyHop,
    next: &Target,
    cancel: &CancellationToken,
    previous: Option<BoxStream>,
) -> Result<BoxStream, TunnelError> {
    let transport = connector.connect_hop(hop, previous, cancel).await?;
    cancellable(cancel, post_through(hop, next, transport), || {
        TunnelError::Cancelled
    })
    .await
}

async fn post_through(
    hop: &ProxyHop,
    next: &Target,
    transport: BoxStream,
) -> Result<BoxStream, TunnelError> {
    let (tx, rx) = mpsc::channel(UPLOAD_QUEUE);
    let (mut sender, task) = open_exchange::<UploadBody>(hop, transport).await?;

    let request = handshake_request(hop)
        .method(Method::POST)
        .uri("/")
        .header(HOST, hop.target.to_string())
        .header("target", next.to_string())
        .body(UploadBody { rx })
        .map_err(request_error(hop))?;

    let response = sender.send_request(request).await.map_err(http_error(hop))?;
    if response.status() != StatusCode::OK {
        debug!(hop = %hop.target, status = %response.status(), "scifin POST rejected");
        return Err(TunnelError::Handshake {
            hop: hop.target.clone(),
            status: response.status(),
        });
    }

    debug!(hop = %hop.target, next = %next, "scifin tunnel established");
    Ok(Box::new(ScifinStream {
        upload: PollSender::new(tx),
        download: response.into_body(),
        pending: Bytes::new(),
        _task: task,
    }))
}

/// Request body fed by the tunnel's write half.
struct UploadBody {
    rx: mpsc::Receiver<Bytes>,
}

impl Body for UploadBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        self.rx
            .poll_recv(cx)
            .map(|chunk| chunk.map(|data| Ok(Frame::data(data))))
    }
}

/// Duplex view over a request body being sent and a response body being received.
struct ScifinStream {
    upload: PollSender<Bytes>,
    download: Incoming,
    pending: Bytes,
    _task: ConnectionTask,
}

impl AsyncRead for ScifinStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.remaining());
                buf.put_slice(&self.pending[..n]);
                self.pending = self.pending.slice(n..);
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut self.download).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    // Trailers carry nothing for the tunnel.
                    if let Ok(data) = frame.into_data() {
                        self.pending = data;
                    }
                }
                Some(Err(err)) => return Poll::Ready(Err(io::Error::other(err))),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl AsyncWrite for ScifinStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        if data.is_empty() {
            return Poll::Ready(Ok(0));
        }
        ready!(self.upload.poll_reserve(cx)).map_err(|_| broken_pipe())?;
        self.upload
            .send_item(Bytes::copy_from_slice(data))
            .map_err(|_| broken_pipe())?;
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    /// Ends the request body. Safe to call more than once.
    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.upload.close();
        Poll::Ready(Ok(()))
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "scifin request body closed")
}
