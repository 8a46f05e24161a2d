use thiserror::Error;

/// Errors that can occur while classifying or relaying a single proxy stream.
///
/// These replace the panics of the original implementation: every malformed
/// or unexpected input is reported to the caller, which decides whether to
/// close just the stream or tear down the whole connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("stream closed before a request line was received")]
    EmptyStream,

    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("unsupported request target: {0:?}")]
    UnsupportedTarget(String),

    #[error("missing Host header")]
    MissingHost,

    #[error("invalid header line: {0:?}")]
    MalformedHeader(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("quic connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("quic stream write error: {0}")]
    Write(#[from] quinn::WriteError),

    #[error("quic stream read error: {0}")]
    Read(#[from] quinn::ReadError),

    #[error("origin dial failed: {0}")]
    OriginDial(std::io::Error),

    #[error("heartbeat timed out after {0:?} without a response")]
    HeartbeatTimeout(std::time::Duration),
}
