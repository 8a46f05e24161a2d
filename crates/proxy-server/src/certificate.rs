//! Self-signed certificate material for the QUIC endpoint. There is no CA on
//! the other side of this tunnel, so the first hop is configured to either
//! skip verification or pin the exact certificate produced here - see
//! `proxy_shared::quic::CertificateVerificationMode`.

use std::path::Path;

use rcgen::{generate_simple_self_signed, CertifiedKey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),
    #[error("i/o error accessing certificate material: {0}")]
    Io(#[from] std::io::Error),
    #[error("no certificate found in {0}")]
    NoCertificate(String),
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
}

pub struct CertificateMaterial {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Generates a fresh self-signed certificate for the given subject
/// alternative names. Returns both the rustls-ready material and its PEM
/// encoding, so the caller can persist the PEM for reuse across restarts
/// without re-deriving it.
pub fn generate_self_signed(
    subject_alt_names: Vec<String>,
) -> Result<(CertificateMaterial, String, String), CertificateError> {
    let CertifiedKey { cert, key_pair } = generate_simple_self_signed(subject_alt_names)?;
    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();
    let cert_der = cert.der().clone();
    let key_der = PrivatePkcs8KeyDer::from(key_pair.serialize_der());
    let material = CertificateMaterial {
        cert_chain: vec![cert_der],
        key: PrivateKeyDer::Pkcs8(key_der),
    };
    Ok((material, cert_pem, key_pem))
}

pub fn persist(cert_pem: &str, key_pem: &str, cert_path: &Path, key_path: &Path) -> Result<(), CertificateError> {
    std::fs::write(cert_path, cert_pem)?;
    std::fs::write(key_path, key_pem)?;
    Ok(())
}

pub fn load_from_disk(cert_path: &Path, key_path: &Path) -> Result<CertificateMaterial, CertificateError> {
    let cert_pem = std::fs::read(cert_path)?;
    let key_pem = std::fs::read(key_path)?;

    let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<_, _>>()?;
    if cert_chain.is_empty() {
        return Err(CertificateError::NoCertificate(cert_path.display().to_string()));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])?
        .ok_or_else(|| CertificateError::NoPrivateKey(key_path.display().to_string()))?;

    Ok(CertificateMaterial { cert_chain, key })
}
