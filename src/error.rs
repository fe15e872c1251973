//! Error types shared by the tunnel and server layers.

use std::fmt;
use std::io;

use hyper::{Method, StatusCode};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::transport::Target;

/// Why an outbound connection could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    /// The hostname did not resolve.
    DnsNotFound,
    /// Every resolved address refused the connection.
    Refused,
    /// The TLS handshake failed.
    TlsFailed,
    /// The attempt was cancelled.
    Aborted,
    /// Any other socket error.
    Io,
}

impl fmt::Display for ConnectErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectErrorKind::DnsNotFound => "host not found",
            ConnectErrorKind::Refused => "connection refused",
            ConnectErrorKind::TlsFailed => "TLS handshake failed",
            ConnectErrorKind::Aborted => "connection aborted",
            ConnectErrorKind::Io => "I/O error",
        })
    }
}

#[derive(Debug, Error)]
#[error("{kind} while connecting to {target}")]
pub struct ConnectError {
    pub kind: ConnectErrorKind,
    pub target: Target,
    #[source]
    pub source: Option<io::Error>,
}

impl ConnectError {
    pub fn new(kind: ConnectErrorKind, target: &Target) -> Self {
        Self {
            kind,
            target: target.clone(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: io::Error) -> Self {
        self.source = Some(source);
        self
    }
}

/// Failure while establishing one tunnel layer or a whole chain.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The hop answered the handshake with an unexpected status.
    #[error("hop {hop} answered the handshake with {status}")]
    Handshake { hop: Target, status: StatusCode },

    #[error("HTTP exchange with hop {hop} failed")]
    Http {
        hop: Target,
        #[source]
        source: hyper::Error,
    },

    #[error("WebSocket handshake with hop {hop} failed")]
    WebSocket {
        hop: Target,
        #[source]
        source: Box<tungstenite::Error>,
    },

    #[error("invalid handshake request for hop {hop}")]
    InvalidRequest {
        hop: Target,
        #[source]
        source: hyper::http::Error,
    },

    #[error("tunnel setup cancelled")]
    Cancelled,

    /// Wraps the failure of hop `index` while building a chain.
    #[error("hop #{index} ({hop}) failed")]
    Chain {
        index: usize,
        hop: Target,
        #[source]
        source: Box<TunnelError>,
    },
}

impl TunnelError {
    /// The innermost error, with chain context peeled off.
    pub fn root(&self) -> &TunnelError {
        match self {
            TunnelError::Chain { source, .. } => source.root(),
            other => other,
        }
    }

    /// Connection failure kind, if the root cause was one.
    pub fn connect_kind(&self) -> Option<ConnectErrorKind> {
        match self.root() {
            TunnelError::Connect(err) => Some(err.kind),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), TunnelError::Cancelled)
            || self.connect_kind() == Some(ConnectErrorKind::Aborted)
    }
}

/// A request the proxy refuses to serve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("No `Host` header or target URL given.")]
    MissingHost,

    #[error("No `Target` header given.")]
    MissingTarget,

    #[error("Invalid URL: {0}")]
    InvalidTarget(String),

    #[error("{0}: requests should be made through CONNECT proxies")]
    UnsupportedScheme(String),

    #[error("Proxy authentication required")]
    BadCredentials,

    #[error("Incorrect method {method}, expected {expected}")]
    MethodNotAllowed { method: Method, expected: Method },

    #[error("Upgrade required")]
    UpgradeRequired,

    #[error("Malformed upgrade request: {0}")]
    MalformedUpgrade(&'static str),
}

impl ProtocolError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProtocolError::MissingHost
            | ProtocolError::MissingTarget
            | ProtocolError::InvalidTarget(_)
            | ProtocolError::UnsupportedScheme(_)
            | ProtocolError::MalformedUpgrade(_) => StatusCode::BAD_REQUEST,
            ProtocolError::BadCredentials => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            ProtocolError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ProtocolError::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
        }
    }
}
