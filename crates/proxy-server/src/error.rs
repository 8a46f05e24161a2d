use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Certificate(#[from] crate::certificate::CertificateError),

    #[error("tls configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("endpoint io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error(transparent)]
    Shared(#[from] proxy_shared::ProxyError),
}
