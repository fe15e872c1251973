//! fog: a composable proxy-chaining gateway.
//!
//! Client connections (forward-proxy requests or CONNECT tunnels) reach their
//! target through an ordered chain of hops, each speaking its own tunnel
//! protocol over the stream opened by the hop before it.

pub mod agents;
pub mod chain;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;
pub mod transport;

pub use chain::{build_chain, ChainBuilder};
pub use config::schema::ProxyConfig;
pub use error::{ConnectError, ConnectErrorKind, ProtocolError, TunnelError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use transport::{BoxStream, Connector, ProtocolType, ProxyHop, Target};
