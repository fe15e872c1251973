//! Outbound connections: TCP, TLS, or reuse of an existing tunnel layer.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::{lookup_host, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{cancellable, BoxStream, ProxyHop, Target};
use crate::error::{ConnectError, ConnectErrorKind};

/// Opens the byte stream each tunnel layer is spoken over.
#[derive(Clone)]
pub struct Connector {
    tls: TlsConnector,
}

impl Connector {
    /// `loose_tls` disables certificate verification for every TLS hop.
    pub fn new(loose_tls: bool) -> Result<Self, rustls::Error> {
        let config = client_config(loose_tls)?;
        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Connect to `target`.
    ///
    /// - `existing` without TLS is returned untouched.
    /// - With TLS, the session is layered over `existing`, or over a fresh TCP
    ///   connection when there is none.
    /// - Otherwise a fresh TCP connection is opened.
    pub async fn connect(
        &self,
        target: &Target,
        tls: bool,
        existing: Option<BoxStream>,
        cancel: &CancellationToken,
    ) -> Result<BoxStream, ConnectError> {
        match (existing, tls) {
            (Some(stream), false) => Ok(stream),
            (None, false) => self.open(target, cancel).await,
            (existing, true) => {
                let stream = match existing {
                    Some(stream) => stream,
                    None => self.open(target, cancel).await?,
                };
                cancellable(cancel, self.handshake(target, stream), || {
                    ConnectError::new(ConnectErrorKind::Aborted, target)
                })
                .await
            }
        }
    }

    /// Connect to a hop, honouring its TLS flag.
    pub async fn connect_hop(
        &self,
        hop: &ProxyHop,
        existing: Option<BoxStream>,
        cancel: &CancellationToken,
    ) -> Result<BoxStream, ConnectError> {
        self.connect(&hop.target, hop.tls, existing, cancel).await
    }

    async fn open(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<BoxStream, ConnectError> {
        let stream = cancellable(cancel, tcp_connect(target), || {
            ConnectError::new(ConnectErrorKind::Aborted, target)
        })
        .await?;
        Ok(Box::new(stream))
    }

    async fn handshake(&self, target: &Target, stream: BoxStream) -> Result<BoxStream, ConnectError> {
        let server_name = ServerName::try_from(target.hostname.clone()).map_err(|err| {
            ConnectError::new(ConnectErrorKind::TlsFailed, target)
                .with_source(io::Error::new(io::ErrorKind::InvalidInput, err))
        })?;

        let stream = self
            .tls
            .connect(server_name, stream)
            .await
            .map_err(|err| ConnectError::new(ConnectErrorKind::TlsFailed, target).with_source(err))?;
        debug!(target = %target, "TLS session established");
        Ok(Box::new(stream))
    }
}

async fn tcp_connect(target: &Target) -> Result<TcpStream, ConnectError> {
    let addrs: Vec<SocketAddr> = lookup_host((target.hostname.as_str(), target.port))
        .await
        .map_err(|err| ConnectError::new(ConnectErrorKind::DnsNotFound, target).with_source(err))?
        .collect();
    if addrs.is_empty() {
        return Err(ConnectError::new(ConnectErrorKind::DnsNotFound, target));
    }

    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no usable address");
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                trace!(target = %target, addr = %addr, "TCP connected");
                return Ok(stream);
            }
            Err(err) => {
                trace!(target = %target, addr = %addr, error = %err, "TCP connect failed");
                last_err = err;
            }
        }
    }

    let kind = if last_err.kind() == io::ErrorKind::ConnectionRefused {
        ConnectErrorKind::Refused
    } else {
        ConnectErrorKind::Io
    };
    Err(ConnectError::new(kind, target).with_source(last_err))
}

fn client_config(loose_tls: bool) -> Result<ClientConfig, rustls::Error> {
    let provider = Arc::new(crypto::aws_lc_rs::default_provider());
    let builder =
        ClientConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;

    let config = if loose_tls {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier::new(&provider)))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(config)
}

/// Accepts any server certificate; signatures are still checked.
#[derive(Debug)]
struct NoVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl NoVerifier {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
