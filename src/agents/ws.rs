//! WebSocket agent: a WebSocket to the hop used as a plain byte pipe.

use hyper::header::{HeaderName, HeaderValue, HOST, PROXY_AUTHORIZATION, USER_AGENT};
use tokio_tungstenite::client_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::AGENT_NAME;
use crate::error::TunnelError;
use crate::transport::{cancellable, BoxStream, Connector, ProxyHop, Target, WsStream};

pub async fn create_connection(
    connector: &Connector,
    hop: &ProxyHop,
    next: &Target,
    cancel: &CancellationToken,
    previous: Option<BoxStream>,
) -> Result<BoxStream, TunnelError> {
    let transport = connector.connect_hop(hop, previous, cancel).await?;
    cancellable(cancel, open_socket(hop, next, transport), || {
        TunnelError::Cancelled
    })
    .await
}

async fn open_socket(
    hop: &ProxyHop,
    next: &Target,
    transport: BoxStream,
) -> Result<BoxStream, TunnelError> {
    let scheme = if hop.tls { "wss" } else { "ws" };
    let ws_error = |source: WsError| TunnelError::WebSocket {
        hop: hop.target.clone(),
        source: Box::new(source),
    };

    let mut request = format!("{scheme}://{}/", hop.target)
        .into_client_request()
        .map_err(ws_error)?;

    let invalid = |err: hyper::header::InvalidHeaderValue| TunnelError::InvalidRequest {
        hop: hop.target.clone(),
        source: err.into(),
    };
    let destination = HeaderValue::try_from(next.to_string()).map_err(invalid)?;
    let headers = request.headers_mut();
    headers.insert(HOST, destination.clone());
    headers.insert(HeaderName::from_static("target"), destination);
    headers.insert(USER_AGENT, HeaderValue::from_static(AGENT_NAME));
    if let Some(credential) = &hop.authorization {
        headers.insert(
            PROXY_AUTHORIZATION,
            HeaderValue::try_from(credential.as_str()).map_err(invalid)?,
        );
    }

    let (socket, _response) = client_async(request, transport)
        .await
        .map_err(|err| match err {
            WsError::Http(response) => {
                debug!(hop = %hop.target, status = %response.status(), "WebSocket upgrade rejected");
                TunnelError::Handshake {
                    hop: hop.target.clone(),
                    status: response.status(),
                }
            }
            other => ws_error(other),
        })?;

    debug!(hop = %hop.target, next = %next, "WebSocket tunnel established");
    Ok(Box::new(WsStream::new(socket)))
}
