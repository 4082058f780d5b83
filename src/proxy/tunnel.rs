//! Raw TLS tunnel probes through relay candidates
//!
//! A probe connects to the candidate itself, then speaks TLS as if the
//! candidate were the verification service. A working relay forwards the
//! session to the real service, whose answer reveals the relay's public
//! address.

use crate::error::ProbeError;
use crate::proxy::models::ProbeResponse;
use crate::proxy::response::read_response;
use crate::proxy::useragent::random_user_agent;
use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_rustls::TlsConnector;
use url::Url;

/// Default per-operation budget for connect and for the TLS exchange
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One request through one candidate to one verification endpoint
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, ip: IpAddr, port: &str, target: &Url) -> Result<ProbeResponse, ProbeError>;
}

/// Probes over a real TCP connection and TLS session
#[derive(Clone)]
pub struct TunnelProber {
    connector: TlsConnector,
    timeout: Duration,
}

impl TunnelProber {
    pub fn new(timeout: Duration) -> Result<Self, rustls::Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = Arc::new(RelayCertVerifier::new(provider.clone()));

        let config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            timeout,
        })
    }
}

#[async_trait]
impl Probe for TunnelProber {
    async fn probe(&self, ip: IpAddr, port: &str, target: &Url) -> Result<ProbeResponse, ProbeError> {
        let host = target
            .host_str()
            .ok_or_else(|| ProbeError::InvalidTarget(format!("{} has no host", target)))?
            .to_string();
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| ProbeError::InvalidTarget(format!("bad port {:?}", port)))?;
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| ProbeError::InvalidTarget(format!("bad server name {}: {}", host, e)))?;
        let request = build_request(target, &host);

        let stream = match timeout(self.timeout, TcpStream::connect(SocketAddr::new(ip, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProbeError::Connect(e)),
            Err(_) => return Err(ProbeError::ConnectTimeout),
        };

        // One absolute deadline covers handshake, request and response
        let deadline = Instant::now() + self.timeout;
        timeout_at(deadline, exchange(&self.connector, server_name, stream, &request))
            .await
            .map_err(|_| ProbeError::DeadlineExpired)?
    }
}

async fn exchange(
    connector: &TlsConnector,
    server_name: ServerName<'static>,
    stream: TcpStream,
    request: &str,
) -> Result<ProbeResponse, ProbeError> {
    let mut tls = connector
        .connect(server_name, stream)
        .await
        .map_err(ProbeError::Handshake)?;

    tls.write_all(request.as_bytes()).await?;
    tls.flush().await?;

    read_response(&mut tls).await
}

/// Build the GET request sent through the tunnel
pub fn build_request(target: &Url, host: &str) -> String {
    let mut path = target.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = target.query() {
        path.push('?');
        path.push_str(query);
    }

    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        path,
        host,
        random_user_agent()
    )
}

/// Accepts any certificate chain while still checking handshake signatures.
///
/// The peer is an untrusted relay, so chain trust says nothing useful;
/// only completing a handshake through it matters.
#[derive(Debug)]
struct RelayCertVerifier {
    provider: Arc<CryptoProvider>,
}

impl RelayCertVerifier {
    fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for RelayCertVerifier {
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
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use rustls::{ServerConfig, SupportedProtocolVersion};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    // Self-signed for relay.invalid, so it never matches the requested host
    const RELAY_CERT: &[u8] = include_bytes!("../../testdata/relay-cert.der");
    const RELAY_KEY: &[u8] = include_bytes!("../../testdata/relay-key.der");

    fn prober(timeout: Duration) -> TunnelProber {
        TunnelProber::new(timeout).unwrap()
    }

    /// What a loopback TLS relay saw from the client
    struct Seen {
        server_name: Option<String>,
        request: String,
    }

    /// Serve one TLS session that answers `body` with a 200
    async fn tls_relay(
        version: &'static SupportedProtocolVersion,
        body: &'static str,
    ) -> (u16, tokio::task::JoinHandle<Seen>) {
        let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_protocol_versions(&[version])
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(
                vec![CertificateDer::from(RELAY_CERT.to_vec())],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(RELAY_KEY.to_vec())),
            )
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut tls = acceptor.accept(socket).await.unwrap();
            let server_name = tls.get_ref().1.server_name().map(str::to_string);

            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = tls.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed before finishing its request");
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            tls.write_all(response.as_bytes()).await.unwrap();
            let _ = tls.shutdown().await;

            Seen {
                server_name,
                request: String::from_utf8(request).unwrap(),
            }
        });
        (port, server)
    }

    async fn assert_tunnel_round_trip(version: &'static SupportedProtocolVersion) {
        let body = r#"{"ip":"203.0.113.7","country":"ID"}"#;
        let (port, server) = tls_relay(version, body).await;

        let url = Url::parse("https://worker.example.com/geo?fmt=json").unwrap();
        let response = prober(Duration::from_secs(5))
            .probe("127.0.0.1".parse().unwrap(), &port.to_string(), &url)
            .await
            .unwrap();
        let seen = server.await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, body.as_bytes());
        assert_eq!(seen.server_name.as_deref(), Some("worker.example.com"));
        assert!(seen.request.starts_with("GET /geo?fmt=json HTTP/1.1\r\n"));
        assert!(seen.request.contains("\r\nHost: worker.example.com\r\n"));
    }

    #[tokio::test]
    async fn test_tunnel_accepts_foreign_certificate_tls13() {
        assert_tunnel_round_trip(&rustls::version::TLS13).await;
    }

    #[tokio::test]
    async fn test_tunnel_accepts_foreign_certificate_tls12() {
        assert_tunnel_round_trip(&rustls::version::TLS12).await;
    }

    #[test]
    fn test_build_request() {
        let url = Url::parse("https://worker.example.com/geo?fmt=json").unwrap();
        let request = build_request(&url, "worker.example.com");

        assert!(request.starts_with("GET /geo?fmt=json HTTP/1.1\r\n"));
        assert!(request.contains("\r\nHost: worker.example.com\r\n"));
        assert!(request.contains("\r\nUser-Agent: Mozilla/5.0"));
        assert!(request.contains("\r\nAccept: */*\r\n"));
        assert!(request.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn test_build_request_default_path() {
        let url = Url::parse("https://checkip.amazonaws.com").unwrap();
        let request = build_request(&url, "checkip.amazonaws.com");
        assert!(request.starts_with("GET / HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_probe_rejects_bad_port() {
        let url = Url::parse("https://example.com/").unwrap();
        let result = prober(Duration::from_secs(1))
            .probe("127.0.0.1".parse().unwrap(), "http", &url)
            .await;
        assert!(matches!(result, Err(ProbeError::InvalidTarget(_))));
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = Url::parse("https://example.com/").unwrap();
        let result = prober(Duration::from_secs(2))
            .probe("127.0.0.1".parse().unwrap(), &port.to_string(), &url)
            .await;
        assert!(matches!(result, Err(ProbeError::Connect(_))));
    }

    #[tokio::test]
    async fn test_probe_handshake_failure_on_plaintext_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                .await;
        });

        let url = Url::parse("https://example.com/").unwrap();
        let result = prober(Duration::from_secs(2))
            .probe("127.0.0.1".parse().unwrap(), &port.to_string(), &url)
            .await;
        server.await.unwrap();
        assert!(matches!(result, Err(ProbeError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_probe_deadline_on_silent_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(800)).await;
            drop(socket);
        });

        let url = Url::parse("https://example.com/").unwrap();
        let result = prober(Duration::from_millis(200))
            .probe("127.0.0.1".parse().unwrap(), &port.to_string(), &url)
            .await;
        server.await.unwrap();
        assert!(matches!(result, Err(ProbeError::DeadlineExpired)));
    }
}
