//! QUIC/TLS transport setup shared by both hops: the ALPN identifier both
//! sides must negotiate, and the rustls configuration plumbing quinn needs
//! on top of it.

use std::sync::Arc;
use std::time::Duration;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig as RustlsClientConfig, DigitallySignedStruct, ServerConfig as RustlsServerConfig, SignatureScheme};

/// The ALPN protocol identifier both hops must negotiate before any stream
/// is opened.
pub const ALPN: &[u8] = b"quic-echo-example";

pub const DEFAULT_MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// How the first-hop client validates the second-hop server's certificate.
#[derive(Debug, Clone)]
pub enum CertificateVerificationMode {
    /// Accept any certificate the server presents. Matches a self-signed
    /// deployment where there is no CA to validate against; the operator is
    /// trusting the configured remote address itself, not a certificate
    /// chain.
    Insecure,
    /// Only accept a connection presenting exactly this certificate.
    Pinned(CertificateDer<'static>),
}

#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

#[derive(Debug)]
struct PinnedVerification {
    expected: CertificateDer<'static>,
}

impl ServerCertVerifier for PinnedVerification {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.expected.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "server certificate does not match pinned certificate".into(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        NoVerification.supported_verify_schemes()
    }
}

/// Builds the quinn client endpoint configuration for connecting to the
/// second hop.
pub fn client_endpoint_config(
    mode: CertificateVerificationMode,
) -> Result<quinn::ClientConfig, rustls::Error> {
    let mut tls = RustlsClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(match mode {
            CertificateVerificationMode::Insecure => Arc::new(NoVerification),
            CertificateVerificationMode::Pinned(cert) => {
                Arc::new(PinnedVerification { expected: cert })
            }
        })
        .with_no_client_auth();
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let quic_crypto = QuicClientConfig::try_from(tls)
        .map_err(|e| rustls::Error::General(format!("invalid quic client crypto: {e}")))?;
    let mut config = quinn::ClientConfig::new(Arc::new(quic_crypto));
    let mut transport = quinn::TransportConfig::default();
    let idle_timeout: quinn::IdleTimeout = DEFAULT_MAX_IDLE_TIMEOUT
        .try_into()
        .map_err(|_| rustls::Error::General("idle timeout out of range".into()))?;
    transport.max_idle_timeout(Some(idle_timeout));
    config.transport_config(Arc::new(transport));
    Ok(config)
}

/// Builds the quinn server endpoint configuration from a certificate chain
/// and private key, typically produced by `proxy-server`'s self-signed
/// certificate generator.
pub fn server_endpoint_config(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<quinn::ServerConfig, rustls::Error> {
    let mut tls = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| rustls::Error::General(format!("invalid server cert/key: {e}")))?;
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let quic_crypto = QuicServerConfig::try_from(tls)
        .map_err(|e| rustls::Error::General(format!("invalid quic server crypto: {e}")))?;
    let mut config = quinn::ServerConfig::with_crypto(Arc::new(quic_crypto));
    let mut transport = quinn::TransportConfig::default();
    let idle_timeout: quinn::IdleTimeout = DEFAULT_MAX_IDLE_TIMEOUT
        .try_into()
        .map_err(|_| rustls::Error::General("idle timeout out of range".into()))?;
    transport.max_idle_timeout(Some(idle_timeout));
    config.transport_config(Arc::new(transport));
    Ok(config)
}
