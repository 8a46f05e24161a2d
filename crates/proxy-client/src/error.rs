use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to the remote proxy")]
    NotConnected,

    #[error("failed to connect to remote proxy: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("failed to open a stream: {0}")]
    OpenStream(#[source] quinn::ConnectionError),

    #[error(transparent)]
    Shared(#[from] proxy_shared::ProxyError),

    #[error("tls configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("endpoint io error: {0}")]
    Io(#[from] std::io::Error),
}
