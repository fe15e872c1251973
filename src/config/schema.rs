//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::transport::ProxyHop;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Which server to run on the listener.
    pub server: ServerKind,

    /// Credential clients must present in `Proxy-Authorization`.
    /// Empty means clients must send no credential at all.
    pub auth: String,

    /// Hops traversed, in order, before reaching each target.
    pub hops: Vec<ProxyHop>,

    /// Skip certificate verification when dialling TLS hops.
    pub loose_tls: bool,

    /// Relay a hop's rejection status (e.g. 407) to the client instead of 500.
    pub handshake_status_passthrough: bool,

    /// Tokio worker threads.
    pub workers: usize,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            server: ServerKind::default(),
            auth: String::new(),
            hops: Vec::new(),
            loose_tls: false,
            handshake_status_passthrough: false,
            workers: 2,
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// The server variants the binary can run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// Forward proxy and CONNECT gateway that routes through the hop chain.
    #[default]
    Fog,
    /// Endpoint for the `scifin` streaming-POST protocol.
    Scifin,
    /// Endpoint for the `millimol` upgrade protocol.
    Millimol,
    /// Endpoint for WebSocket tunnels.
    Ws,
}

impl std::fmt::Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ServerKind::Fog => "fog",
            ServerKind::Scifin => "scifin",
            ServerKind::Millimol => "millimol",
            ServerKind::Ws => "ws",
        })
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
