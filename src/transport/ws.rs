//! WebSocket message stream exposed as a plain byte stream.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::{Sink, Stream, StreamExt};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

/// Ping payload announcing that the sender will write no more data.
const WRITE_END: &str = r#"{"op":"DATA_END","data":""}"#;

#[derive(Deserialize)]
struct ControlPing<'a> {
    op: &'a str,
}

fn is_write_end(payload: &[u8]) -> bool {
    serde_json::from_slice::<ControlPing<'_>>(payload).is_ok_and(|ping| ping.op == "DATA_END")
}

/// Byte-stream view of a WebSocket.
///
/// Writes go out as binary messages. Binary and text messages are read back
/// as one continuous byte stream.
///
/// Shutting down the write side sends a `DATA_END` ping instead of a close
/// frame, so the peer can keep replying; receiving that ping (or a close
/// frame) reads as EOF. Other control frames are skipped, tungstenite
/// answers pings on its own. [`WsStream::close`] runs the closing handshake
/// once both directions are done.
pub struct WsStream<S> {
    ws: WebSocketStream<S>,
    read_buf: Bytes,
    read_eof: bool,
    write_end_sent: bool,
}

impl<S> WsStream<S> {
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self {
            ws,
            read_buf: Bytes::new(),
            read_eof: false,
            write_end_sent: false,
        }
    }

    fn drain_into(&mut self, buf: &mut ReadBuf<'_>) {
        let n = self.read_buf.len().min(buf.remaining());
        buf.put_slice(&self.read_buf[..n]);
        self.read_buf = self.read_buf.slice(n..);
    }
}

impl<S> WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send a close frame and wait for the peer's answer.
    pub async fn close(&mut self) -> Result<(), WsError> {
        match self.ws.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {}
            Err(err) => return Err(err),
        }
        while let Some(message) = self.ws.next().await {
            match message {
                Ok(_) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl<S> AsyncRead for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.read_buf.is_empty() {
                self.drain_into(buf);
                return Poll::Ready(Ok(()));
            }
            if self.read_eof {
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut self.ws).poll_next(cx)) {
                Some(Ok(Message::Binary(data))) => self.read_buf = data,
                Some(Ok(Message::Text(text))) => {
                    self.read_buf = Bytes::copy_from_slice(text.as_str().as_bytes())
                }
                Some(Ok(Message::Ping(payload))) if is_write_end(&payload) => self.read_eof = true,
                Some(Ok(Message::Close(_))) | None => self.read_eof = true,
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    self.read_eof = true
                }
                Some(Err(err)) => return Poll::Ready(Err(ws_err(err))),
            }
        }
    }
}

impl<S> AsyncWrite for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.write_end_sent {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        if data.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let mut ws = Pin::new(&mut self.ws);
        ready!(ws.as_mut().poll_ready(cx)).map_err(ws_err)?;
        ws.start_send(Message::binary(Bytes::copy_from_slice(data)))
            .map_err(ws_err)?;
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.ws).poll_flush(cx).map_err(ws_err)
    }

    /// Sends the `DATA_END` ping once, then flushes.
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if !self.write_end_sent {
            let mut ws = Pin::new(&mut self.ws);
            ready!(ws.as_mut().poll_ready(cx)).map_err(ws_err)?;
            ws.start_send(Message::Ping(Bytes::from_static(WRITE_END.as_bytes())))
                .map_err(ws_err)?;
            self.write_end_sent = true;
        }
        match ready!(Pin::new(&mut self.ws).poll_flush(cx)) {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Poll::Ready(Ok(())),
            Err(err) => Poll::Ready(Err(ws_err(err))),
        }
    }
}

fn ws_err(err: WsError) -> io::Error {
    match err {
        WsError::Io(err) => err,
        other => io::Error::other(other),
    }
}
