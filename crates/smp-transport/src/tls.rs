//! TLS 1.3 connector for SMP servers.
//!
//! Server certificates are not validated against any trust store: SMP
//! authenticates servers by the certificate key hash instead, which
//! [`SmpSession::handshake`] derives and compares against the pinned value.
//! Handshake signatures are still verified so the peer must hold the key
//! of the certificate it presents.

use crate::handshake::key_hash_from_chain;
use crate::session::SmpSession;
use crate::transport::{BlockTransport, Connector, TransportError, TransportResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{
    CryptoProvider, WebPkiSupportedAlgorithms, ring, verify_tls12_signature,
    verify_tls13_signature,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, SignatureScheme};

/// ALPN protocol identifier for SMP
pub const SMP_ALPN: &[u8] = b"smp/1";

/// Default SMP server port
pub const DEFAULT_SMP_PORT: u16 = 5223;

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for the TLS and hello exchange
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct KeyHashVerifier {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for KeyHashVerifier {
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
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Build the rustls client configuration: TLS 1.3 only, a single
/// ChaCha20-Poly1305 suite, ALPN `smp/1`.
///
/// # Errors
///
/// Returns [`TransportError::TlsHandshakeFailed`] if rustls rejects the
/// protocol version selection.
pub fn client_config() -> TransportResult<ClientConfig> {
    let provider = CryptoProvider {
        cipher_suites: vec![ring::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256],
        ..ring::default_provider()
    };
    let verifier = KeyHashVerifier {
        algorithms: provider.signature_verification_algorithms,
    };

    let mut config = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::TlsHandshakeFailed(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    config.alpn_protocols = vec![SMP_ALPN.to_vec()];
    Ok(config)
}

/// Production [`Connector`]: DNS, TCP, TLS 1.3 and the SMP hello.
#[derive(Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl TlsConnector {
    /// Create a connector with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TlsHandshakeFailed`] if the TLS
    /// configuration cannot be built.
    pub fn new(connect_timeout: Duration, handshake_timeout: Duration) -> TransportResult<Self> {
        Ok(Self {
            config: Arc::new(client_config()?),
            connect_timeout,
            handshake_timeout,
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        key_hash: Option<[u8; 32]>,
    ) -> TransportResult<Box<dyn BlockTransport>> {
        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| TransportError::DnsFailure(format!("{host}: {e}")))?
            .next()
            .ok_or_else(|| TransportError::DnsFailure(format!("{host}: no addresses")))?;
        tracing::debug!("Resolved {} to {}", host, addr);

        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                TransportError::TcpConnectFailed(format!(
                    "{addr}: timed out after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|e| TransportError::TcpConnectFailed(format!("{addr}: {e}")))?;
        tcp.set_nodelay(true)?;
        tracing::debug!("TCP connected to {}", addr);

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TransportError::TlsHandshakeFailed(e.to_string()))?;
        tracing::debug!("Starting TLS handshake with {}", host);
        let connector = tokio_rustls::TlsConnector::from(Arc::clone(&self.config));
        let tls = tokio::time::timeout(self.handshake_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| TransportError::TlsHandshakeFailed("timed out".to_string()))?
            .map_err(|e| TransportError::TlsHandshakeFailed(e.to_string()))?;

        let (_, conn) = tls.get_ref();
        match conn.alpn_protocol() {
            Some(SMP_ALPN) => {}
            other => {
                return Err(TransportError::AlpnMismatch(
                    other.map(|p| String::from_utf8_lossy(p).into_owned()),
                ));
            }
        }
        let fallback_hash = conn.peer_certificates().and_then(|certs| {
            let chain: Vec<&[u8]> = certs.iter().map(|c| &c[..]).collect();
            key_hash_from_chain(&chain)
        });

        let session = SmpSession::handshake(tls, key_hash, fallback_hash, self.handshake_timeout)
            .await?;
        tracing::info!(
            "Connected to SMP server {}:{} (session id {} bytes)",
            host,
            port,
            session.session_id().len()
        );
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config() {
        let config = client_config().unwrap();
        assert_eq!(config.alpn_protocols, vec![b"smp/1".to_vec()]);
    }

    #[test]
    fn test_connector_new() {
        assert!(TlsConnector::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT).is_ok());
    }

    #[tokio::test]
    async fn test_dns_failure() {
        let connector =
            TlsConnector::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        let result = connector.connect("nonexistent.invalid", 5223, None).await;
        assert!(matches!(result, Err(TransportError::DnsFailure(_))));
    }

    #[tokio::test]
    async fn test_peer_closing_fails_tls_handshake() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let connector =
            TlsConnector::new(Duration::from_secs(1), Duration::from_secs(2)).unwrap();
        let result = connector.connect("127.0.0.1", port, None).await;
        assert!(matches!(result, Err(TransportError::TlsHandshakeFailed(_))));
    }
}
