//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (hyper HTTP/1.1 with upgrades, TraceLayer, dispatch)
//!     → CONNECT: tunnel.rs (auth, chain build, 200, splice)
//!     → other methods: forward.rs (auth, chain build, replay request, stream response)
//!     → endpoint servers: crate::endpoints
//!     → response.rs (errors to statuses)
//! ```

pub mod forward;
pub mod response;
pub mod server;
pub mod tunnel;

pub use server::{App, HttpServer, ServerError};
