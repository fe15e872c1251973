//! Addresses of hops and final destinations.

use std::fmt;

use hyper::Uri;
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::ProtocolError;

/// A host and port: either an intermediate hop or the final destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub hostname: String,
    pub port: u16,
}

impl Target {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    /// Parse `host[:port]` as the authority of an `http://` URL.
    ///
    /// The port defaults to 80. IPv6 literals must be bracketed.
    pub fn parse_authority(authority: &str) -> Result<Self, ProtocolError> {
        let authority = authority.trim();
        let invalid = || ProtocolError::InvalidTarget(authority.to_string());
        if authority.is_empty() || authority.contains(['/', '?', '#', '@']) {
            return Err(invalid());
        }

        let url = Url::parse(&format!("http://{authority}")).map_err(|_| invalid())?;
        let hostname = match url.host().ok_or_else(invalid)? {
            Host::Domain(domain) => domain.to_string(),
            Host::Ipv4(addr) => addr.to_string(),
            Host::Ipv6(addr) => addr.to_string(),
        };
        let port = url.port_or_known_default().unwrap_or(80);
        Ok(Self { hostname, port })
    }

    /// Extract the origin of an absolute-form forward-proxy request URI.
    ///
    /// Only plain `http` is accepted; TLS origins have to go through CONNECT.
    pub fn from_forward_uri(uri: &Uri) -> Result<Self, ProtocolError> {
        let (Some(scheme), Some(authority)) = (uri.scheme_str(), uri.authority()) else {
            return Err(ProtocolError::InvalidTarget(uri.to_string()));
        };
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(ProtocolError::UnsupportedScheme(scheme.to_string()));
        }
        // Credentials embedded in the URI are not part of the target.
        let host_port = authority
            .as_str()
            .rsplit_once('@')
            .map_or(authority.as_str(), |(_, rest)| rest);
        Self::parse_authority(host_port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hostname.contains(':') {
            write!(f, "[{}]:{}", self.hostname, self.port)
        } else {
            write!(f, "{}:{}", self.hostname, self.port)
        }
    }
}

/// Tunnel protocol spoken by a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    /// HTTP `CONNECT`.
    Http,
    /// Streaming `POST` whose request and response bodies form the tunnel.
    Scifin,
    /// `GET` upgraded to the `millimol` protocol.
    Millimol,
    /// WebSocket used as a byte pipe.
    Ws,
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolType::Http => "http",
            ProtocolType::Scifin => "scifin",
            ProtocolType::Millimol => "millimol",
            ProtocolType::Ws => "ws",
        })
    }
}

/// One link of a proxy chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyHop {
    #[serde(flatten)]
    pub target: Target,

    #[serde(rename = "type", alias = "protocolType")]
    pub protocol: ProtocolType,

    /// Wrap the connection to this hop in TLS.
    #[serde(default, alias = "ssl", alias = "useTLS")]
    pub tls: bool,

    /// Sent verbatim as `Proxy-Authorization` to this hop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
}

impl ProxyHop {
    pub fn new(protocol: ProtocolType, target: Target) -> Self {
        Self {
            target,
            protocol,
            tls: false,
            authorization: None,
        }
    }

    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_authority_defaults_port() {
        let target = Target::parse_authority("example.com").unwrap();
        assert_eq!(target, Target::new("example.com", 80));

        let target = Target::parse_authority("example.com:443").unwrap();
        assert_eq!(target, Target::new("example.com", 443));
    }

    #[test]
    fn parse_authority_ipv6() {
        let target = Target::parse_authority("[::1]:8080").unwrap();
        assert_eq!(target.hostname, "::1");
        assert_eq!(target.port, 8080);
        assert_eq!(target.to_string(), "[::1]:8080");
    }

    #[test]
    fn parse_authority_rejects_garbage() {
        assert!(Target::parse_authority("").is_err());
        assert!(Target::parse_authority("host:99999").is_err());
        assert!(Target::parse_authority("host/path").is_err());
        assert!(Target::parse_authority(":80").is_err());
    }

    #[test]
    fn forward_uri_requires_plain_http() {
        let uri: Uri = "http://origin.test:8081/index.html?q=1".parse().unwrap();
        assert_eq!(
            Target::from_forward_uri(&uri).unwrap(),
            Target::new("origin.test", 8081)
        );

        let uri: Uri = "https://origin.test/".parse().unwrap();
        assert!(matches!(
            Target::from_forward_uri(&uri),
            Err(ProtocolError::UnsupportedScheme(_))
        ));

        let uri: Uri = "/relative".parse().unwrap();
        assert!(matches!(
            Target::from_forward_uri(&uri),
            Err(ProtocolError::InvalidTarget(_))
        ));
    }

    #[test]
    fn hop_deserializes_legacy_field_names() {
        let hop: ProxyHop = serde_json::from_str(
            r#"{"hostname":"proxy.test","port":3128,"type":"http","ssl":true,"authorization":"Basic abc"}"#,
        )
        .unwrap();
        assert_eq!(hop.target, Target::new("proxy.test", 3128));
        assert_eq!(hop.protocol, ProtocolType::Http);
        assert!(hop.tls);
        assert_eq!(hop.authorization.as_deref(), Some("Basic abc"));
        assert_eq!(
            hop,
            ProxyHop::new(ProtocolType::Http, Target::new("proxy.test", 3128))
                .with_tls(true)
                .with_authorization("Basic abc")
        );
    }
}
