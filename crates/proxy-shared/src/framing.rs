//! Classifies the first bytes of a freshly opened proxy stream into one of
//! the three kinds of traffic that can be multiplexed over a single QUIC
//! connection: a heartbeat probe, a CONNECT tunnel request, or a plain
//! HTTP/1.1 request to be relayed and reconstructed on the other hop.

use crate::buffered::BufferedReader;
use crate::error::ProxyError;
use tokio::io::AsyncRead;

pub const HEARTBEAT_PREFIX: &[u8] = b"HEARTBEAT";
pub const HEARTBEAT_LINE: &str = "HEARTBEAT\n";
pub const HEARTBEAT_RESPONSE_LINE: &str = "HEARTBEAT_RESPONSE\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    Heartbeat,
    Connect {
        target: String,
    },
    Http {
        method: String,
        target: String,
        version: String,
        raw_line: String,
    },
}

/// Peeks the first [`HEARTBEAT_PREFIX`] bytes of `reader`; if they match,
/// consumes the rest of the line and returns `Heartbeat`. Otherwise reads and
/// parses a single request line (`METHOD target VERSION`).
///
/// Only the request line is consumed - headers and body, if any, are left
/// untouched on `reader` for the caller to read next (or, for a CONNECT
/// tunnel, to relay byte-for-byte as the start of the tunnelled payload).
pub async fn classify<R: AsyncRead + Unpin>(
    reader: &mut BufferedReader<R>,
) -> Result<StreamKind, ProxyError> {
    let peeked = reader.peek(HEARTBEAT_PREFIX.len()).await?;
    if peeked == HEARTBEAT_PREFIX {
        reader.read_line().await?;
        return Ok(StreamKind::Heartbeat);
    }
    let line = reader.read_line().await?.ok_or(ProxyError::EmptyStream)?;
    parse_request_line(&line)
}

fn parse_request_line(line: &str) -> Result<StreamKind, ProxyError> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let mut parts = trimmed.split(' ').filter(|s| !s.is_empty());
    let method = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequestLine(line.to_string()))?;
    let target = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequestLine(line.to_string()))?;
    let version = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequestLine(line.to_string()))?;
    if parts.next().is_some() {
        return Err(ProxyError::MalformedRequestLine(line.to_string()));
    }

    if method.eq_ignore_ascii_case("CONNECT") {
        Ok(StreamKind::Connect {
            target: target.to_string(),
        })
    } else {
        Ok(StreamKind::Http {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            raw_line: line.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffered::BufferedReader;
    use std::io::Cursor;

    async fn classify_bytes(bytes: &[u8]) -> Result<StreamKind, ProxyError> {
        let mut r = BufferedReader::new(Cursor::new(bytes.to_vec()));
        classify(&mut r).await
    }

    #[tokio::test]
    async fn detects_heartbeat() {
        let kind = classify_bytes(b"HEARTBEAT\n").await.unwrap();
        assert_eq!(kind, StreamKind::Heartbeat);
    }

    #[tokio::test]
    async fn heartbeat_prefix_match_ignores_rest_of_line() {
        // only the first 9 bytes are checked, so "HEARTBEATX" still counts.
        let kind = classify_bytes(b"HEARTBEATX\n").await.unwrap();
        assert_eq!(kind, StreamKind::Heartbeat);
    }

    #[tokio::test]
    async fn detects_connect() {
        let kind = classify_bytes(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(
            kind,
            StreamKind::Connect {
                target: "example.com:443".to_string()
            }
        );
    }

    #[tokio::test]
    async fn detects_plain_http() {
        let kind = classify_bytes(b"GET /index.html HTTP/1.1\r\n").await.unwrap();
        match kind {
            StreamKind::Http {
                method,
                target,
                version,
                ..
            } => {
                assert_eq!(method, "GET");
                assert_eq!(target, "/index.html");
                assert_eq!(version, "HTTP/1.1");
            }
            other => panic!("expected Http, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_request_line_with_too_few_tokens() {
        let err = classify_bytes(b"GET HTTP/1.1\r\n").await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequestLine(_)));
    }

    #[tokio::test]
    async fn rejects_request_line_with_too_many_tokens() {
        let err = classify_bytes(b"GET /a HTTP/1.1 extra\r\n").await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequestLine(_)));
    }

    #[tokio::test]
    async fn empty_stream_is_an_error_not_a_panic() {
        let err = classify_bytes(b"").await.unwrap_err();
        assert!(matches!(err, ProxyError::EmptyStream));
    }
}
