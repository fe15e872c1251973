//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → auth.rs (Proxy-Authorization must equal the configured credential)
//!     → headers.rs (strip hop-by-hop headers before forwarding)
//!     → Pass to forward / CONNECT / endpoint handlers
//! ```
//!
//! # Design Decisions
//! - Fail closed: a credential mismatch is answered before any outbound connection
//! - The credential is opaque; any scheme is compared verbatim

pub mod auth;
pub mod headers;

pub use auth::ProxyAuth;
pub use headers::strip_hop_by_hop;
