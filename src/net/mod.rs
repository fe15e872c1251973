//! Client-facing sockets.
//!
//! # Data Flow
//! ```text
//! bound TcpListener
//!     → listener.rs (waits for a free slot, then accepts)
//!     → connection.rs (id + guard held until the socket and its tunnel end)
//!     → tls.rs (when the listener serves HTTPS)
//!     → crate::http::server
//! ```
//!
//! # Design Decisions
//! - A spliced tunnel keeps its connection slot; `max_connections` bounds
//!   tunnels as well as plain requests
//! - Shutdown waits on the tracker, not on individual tasks

pub mod connection;
pub mod listener;
pub mod tls;
