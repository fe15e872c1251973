//! Server side of each tunnel protocol.
//!
//! # Data Flow
//! ```text
//! agent request (Target header, Proxy-Authorization)
//!     → method / upgrade check
//!     → target parse (400) → credential gate (407)
//!     → direct connection to the target
//!     → protocol acknowledgement, then bytes spliced both ways
//! ```
//!
//! # Design Decisions
//! - Endpoints never chain further; they always dial the target directly
//! - The target is connected before the handshake is acknowledged, so a
//!   connect failure is still reported with an HTTP status

pub mod millimol;
pub mod scifin;
pub mod ws;

use hyper::header::{HeaderName, CONNECTION, UPGRADE};
use hyper::HeaderMap;

use crate::error::ProtocolError;
use crate::security::ProxyAuth;
use crate::transport::{Connector, Target};

pub const TARGET_HEADER: HeaderName = HeaderName::from_static("target");

/// Shared state of an endpoint server.
pub struct EndpointState {
    pub connector: Connector,
    pub auth: ProxyAuth,
}

/// Destination named by the `Target` header.
pub(crate) fn requested_target(headers: &HeaderMap) -> Result<Target, ProtocolError> {
    let value = headers
        .get(&TARGET_HEADER)
        .ok_or(ProtocolError::MissingTarget)?;
    let authority = value
        .to_str()
        .map_err(|_| ProtocolError::InvalidTarget(String::from_utf8_lossy(value.as_bytes()).into_owned()))?;
    Target::parse_authority(authority)
}

/// Whether the request asks to upgrade to `protocol`.
pub(crate) fn wants_upgrade(headers: &HeaderMap, protocol: &str) -> bool {
    let has_token = |name: HeaderName, token: &str| {
        headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    };
    has_token(CONNECTION, "upgrade") && has_token(UPGRADE, protocol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn target_header_parses() {
        let mut headers = HeaderMap::new();
        assert_eq!(requested_target(&headers), Err(ProtocolError::MissingTarget));

        headers.insert(TARGET_HEADER, HeaderValue::from_static("origin.test:8080"));
        assert_eq!(requested_target(&headers), Ok(Target::new("origin.test", 8080)));
    }

    #[test]
    fn upgrade_tokens_are_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        headers.insert(UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(wants_upgrade(&headers, "websocket"));
        assert!(!wants_upgrade(&headers, "millimol"));

        headers.remove(CONNECTION);
        assert!(!wants_upgrade(&headers, "websocket"));
    }
}
