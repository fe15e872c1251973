//! Proxy credential gate.
//!
//! The configured credential is compared byte-for-byte with the
//! `Proxy-Authorization` header. An empty credential admits requests that
//! carry no header at all.

use std::sync::Arc;

use hyper::header::PROXY_AUTHORIZATION;
use hyper::HeaderMap;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Default)]
pub struct ProxyAuth {
    expected: Arc<str>,
}

impl ProxyAuth {
    pub fn new(expected: impl AsRef<str>) -> Self {
        Self {
            expected: Arc::from(expected.as_ref()),
        }
    }

    pub fn check(&self, headers: &HeaderMap) -> Result<(), ProtocolError> {
        let supplied = headers
            .get(PROXY_AUTHORIZATION)
            .map(|value| value.as_bytes())
            .unwrap_or_default();
        if supplied == self.expected.as_bytes() {
            Ok(())
        } else {
            Err(ProtocolError::BadCredentials)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers(credential: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = credential {
            headers.insert(PROXY_AUTHORIZATION, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn exact_match_required() {
        let auth = ProxyAuth::new("secret");
        assert!(auth.check(&headers(Some("secret"))).is_ok());
        assert_eq!(
            auth.check(&headers(Some("Secret"))),
            Err(ProtocolError::BadCredentials)
        );
        assert_eq!(auth.check(&headers(None)), Err(ProtocolError::BadCredentials));
    }

    #[test]
    fn empty_credential_admits_missing_header_only() {
        let auth = ProxyAuth::new("");
        assert!(auth.check(&headers(None)).is_ok());
        assert!(auth.check(&headers(Some("anything"))).is_err());
    }
}
