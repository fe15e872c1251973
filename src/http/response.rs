//! Error-to-response mapping.
//!
//! # Design Decisions
//! - Only server components turn errors into statuses; agents and the chain
//!   builder report typed errors
//! - Bodies are short plain-text diagnostics
//! - A hop's rejection status is hidden behind 500 unless passthrough is configured

use axum::body::Body;
use axum::response::Response;
use hyper::header::{HeaderValue, CONTENT_TYPE, PROXY_AUTHENTICATE};
use hyper::StatusCode;

use crate::error::{ConnectErrorKind, ProtocolError, TunnelError};

pub const AUTH_CHALLENGE: &str = "Basic realm=\"proxy\"";

/// Plain-text response with `status`.
pub fn text(status: StatusCode, message: impl Into<String>) -> Response {
    let mut response = Response::new(Body::from(message.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn protocol_error(err: &ProtocolError) -> Response {
    let mut response = text(err.status(), err.to_string());
    if *err == ProtocolError::BadCredentials {
        response
            .headers_mut()
            .insert(PROXY_AUTHENTICATE, HeaderValue::from_static(AUTH_CHALLENGE));
    }
    response
}

/// Status a client sees when a tunnel could not be established.
pub fn tunnel_status(err: &TunnelError, passthrough: bool) -> StatusCode {
    match err.root() {
        TunnelError::Connect(connect) => match connect.kind {
            ConnectErrorKind::DnsNotFound => StatusCode::NOT_FOUND,
            ConnectErrorKind::Refused => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        TunnelError::Handshake { status, .. } if passthrough => *status,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn tunnel_error(err: &TunnelError, passthrough: bool) -> Response {
    let status = tunnel_status(err, passthrough);
    let message = match status {
        StatusCode::NOT_FOUND => "Host not found".to_string(),
        _ => diagnostic(err),
    };
    text(status, message)
}

/// `err` and each of its causes, one per line.
fn diagnostic(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str("\ncaused by: ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectError;
    use crate::transport::Target;

    fn chained(inner: TunnelError) -> TunnelError {
        TunnelError::Chain {
            index: 0,
            hop: Target::new("hop.test", 8080),
            source: Box::new(inner),
        }
    }

    fn connect(kind: ConnectErrorKind) -> TunnelError {
        ConnectError::new(kind, &Target::new("origin.test", 80)).into()
    }

    #[test]
    fn connect_failures_map_to_statuses() {
        assert_eq!(
            tunnel_status(&connect(ConnectErrorKind::DnsNotFound), false),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            tunnel_status(&chained(connect(ConnectErrorKind::Refused)), false),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            tunnel_status(&connect(ConnectErrorKind::TlsFailed), false),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn handshake_status_passthrough_is_opt_in() {
        let err = chained(TunnelError::Handshake {
            hop: Target::new("hop.test", 8080),
            status: StatusCode::PROXY_AUTHENTICATION_REQUIRED,
        });
        assert_eq!(tunnel_status(&err, false), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            tunnel_status(&err, true),
            StatusCode::PROXY_AUTHENTICATION_REQUIRED
        );
    }

    #[test]
    fn bad_credentials_carry_challenge() {
        let response = protocol_error(&ProtocolError::BadCredentials);
        assert_eq!(response.status(), StatusCode::PROXY_AUTHENTICATION_REQUIRED);
        assert_eq!(response.headers()[PROXY_AUTHENTICATE], AUTH_CHALLENGE);
    }

    #[test]
    fn diagnostic_lists_causes() {
        let err = chained(connect(ConnectErrorKind::TlsFailed));
        let message = diagnostic(&err);
        assert!(message.starts_with("hop #0 (hop.test:8080) failed"));
        assert!(message.contains("caused by: TLS handshake failed while connecting to origin.test:80"));
    }
}
