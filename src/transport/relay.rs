//! Splicing two byte streams together.

use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite};
use tracing::debug;

use crate::observability::metrics;

/// Pipe `client` and `upstream` into each other until both directions finish.
///
/// EOF on one side is forwarded as a write shutdown to the other, so
/// half-closed connections keep draining. An error on either side ends the
/// relay, and both streams are dropped exactly once when it returns.
pub async fn splice<A, B>(mut client: A, mut upstream: B, label: &str)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let _active = metrics::ActiveTunnel::open();
    match copy_bidirectional(&mut client, &mut upstream).await {
        Ok((sent, received)) => {
            debug!(tunnel = %label, sent, received, "tunnel closed");
        }
        Err(err) => {
            debug!(tunnel = %label, error = %err, "tunnel closed with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn half_close_still_delivers_reply() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (upstream, mut upstream_peer) = tokio::io::duplex(1024);
        let relay = tokio::spawn(splice(client, upstream, "test"));

        client_peer.write_all(b"request").await.unwrap();
        client_peer.shutdown().await.unwrap();

        let mut request = Vec::new();
        upstream_peer.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"request");

        upstream_peer.write_all(b"reply").await.unwrap();
        upstream_peer.shutdown().await.unwrap();

        let mut reply = Vec::new();
        client_peer.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"reply");

        relay.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_side_closes_the_other() {
        let (client, client_peer) = tokio::io::duplex(1024);
        let (upstream, mut upstream_peer) = tokio::io::duplex(1024);
        let relay = tokio::spawn(splice(client, upstream, "test"));

        drop(client_peer);

        let mut rest = Vec::new();
        upstream_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        drop(upstream_peer);
        relay.await.unwrap();
    }
}
