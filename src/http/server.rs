//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Accept connections on a bounded listener, optionally terminating TLS
//! - Serve HTTP/1.1 with upgrades so CONNECT and protocol upgrades can take
//!   over the socket
//! - Wrap every request in tower-http's `TraceLayer`
//! - Dispatch to the forward, CONNECT or endpoint handler of the configured server

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use super::{forward, tunnel};
use crate::chain::ChainBuilder;
use crate::config::{ProxyConfig, ServerKind};
use crate::endpoints::{self, EndpointState};
use crate::net::connection::{ConnectionSlot, ConnectionTracker};
use crate::net::listener::Listener;
use crate::net::tls;
use crate::security::ProxyAuth;
use crate::transport::{BoxStream, Connector};

/// How long shutdown waits for open connections and tunnels.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to build TLS client configuration")]
    ClientTls(#[from] rustls::Error),
    #[error("failed to load listener TLS material")]
    ListenerTls(#[source] std::io::Error),
    #[error("listener error")]
    Io(#[from] std::io::Error),
}

/// State of the chaining gateway.
pub struct FogState {
    pub chain: ChainBuilder,
    pub auth: ProxyAuth,
    pub passthrough: bool,
}

/// The request handler for one server kind.
#[derive(Clone)]
pub enum App {
    Fog(Arc<FogState>),
    Scifin(Arc<EndpointState>),
    Millimol(Arc<EndpointState>),
    Ws(Arc<EndpointState>),
}

impl App {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ServerError> {
        let connector = Connector::new(config.loose_tls)?;
        let auth = ProxyAuth::new(&config.auth);
        let endpoint = || Arc::new(EndpointState {
            connector: connector.clone(),
            auth: auth.clone(),
        });

        Ok(match config.server {
            ServerKind::Fog => App::Fog(Arc::new(FogState {
                chain: ChainBuilder::new(connector.clone(), config.hops.clone()),
                auth: auth.clone(),
                passthrough: config.handshake_status_passthrough,
            })),
            ServerKind::Scifin => App::Scifin(endpoint()),
            ServerKind::Millimol => App::Millimol(endpoint()),
            ServerKind::Ws => App::Ws(endpoint()),
        })
    }

    pub async fn handle(self, request: Request<Body>) -> Response {
        match self {
            App::Fog(state) if request.method() == Method::CONNECT => {
                tunnel::connect(state, request).await
            }
            App::Fog(state) => forward::forward(state, request).await,
            App::Scifin(state) => endpoints::scifin::handle(state, request).await,
            App::Millimol(state) => endpoints::millimol::handle(state, request).await,
            App::Ws(state) => endpoints::ws::handle(state, request).await,
        }
    }
}

/// HTTP server for the gateway and its protocol endpoints.
pub struct HttpServer {
    app: App,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let app = App::from_config(&config)?;
        Ok(Self { app, config })
    }

    /// Run the server until `shutdown` fires, then drain open connections.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let acceptor = match &self.config.listener.tls {
            Some(tls_config) => Some(
                tls::load_acceptor(Path::new(&tls_config.cert_path), Path::new(&tls_config.key_path))
                    .await
                    .map_err(ServerError::ListenerTls)?,
            ),
            None => None,
        };

        let listener = Listener::from_listener(listener, self.config.listener.max_connections);
        tracing::info!(
            address = %listener.local_addr()?,
            server = %self.config.server,
            hops = self.config.hops.len(),
            tls = acceptor.is_some(),
            "HTTP server starting"
        );
        if self.config.server == ServerKind::Fog && self.config.hops.is_empty() {
            tracing::info!("No hops configured, running in direct mode");
        }

        let tracker = ConnectionTracker::new();
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let slot = ConnectionSlot::new(permit, tracker.track());
                    let span = tracing::debug_span!("connection", connection_id = %slot.id(), peer = %peer);
                    tokio::spawn(
                        serve_connection(self.app.clone(), stream, peer, acceptor.clone(), slot)
                            .instrument(span),
                    );
                }
            }
        }

        tracing::info!(active = tracker.active_count(), "HTTP server stopping");
        let remaining = tracker.drain(DRAIN_TIMEOUT).await;
        if remaining > 0 {
            tracing::warn!(remaining, "shutting down with connections still open");
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

async fn serve_connection(
    app: App,
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    slot: ConnectionSlot,
) {
    let io: BoxStream = match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => Box::new(stream),
            Err(err) => {
                tracing::debug!(peer = %peer, error = %err, "TLS handshake failed");
                return;
            }
        },
        None => Box::new(stream),
    };

    let service = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .service_fn(move |request: Request<Body>| {
            let app = app.clone();
            async move { Ok::<_, Infallible>(app.handle(request).await) }
        });
    // Handlers that take over the socket move the slot into their tunnel.
    let hyper_service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(slot.clone());
        service.clone().oneshot(request.map(Body::new))
    });

    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(io), hyper_service)
        .with_upgrades()
        .await
    {
        tracing::debug!(peer = %peer, error = %err, "connection closed with error");
    }
}
