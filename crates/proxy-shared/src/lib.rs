//! Primitives shared between the first-hop (client) and second-hop (server)
//! proxy processes: the stream framing codec, a minimal HTTP/1.1 reader and
//! writer, the heartbeat wire format, and the QUIC/TLS transport setup that
//! both hops need to agree on (ALPN, certificate verification mode).

pub mod buffered;
pub mod config;
pub mod error;
pub mod framing;
pub mod heartbeat;
pub mod http1;
pub mod quic;
pub mod splice;

pub use error::ProxyError;
pub use framing::StreamKind;
