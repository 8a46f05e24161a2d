//! Minimal HTTP/1.1 head parsing and serialization.
//!
//! This intentionally does not pull in a full HTTP client/server stack: a
//! tunnelling proxy only ever needs to read a request/response head once,
//! reconstruct it on the other hop, and stream the body through unchanged.
//! Header parsing uses `httparse`; values are carried in an [`http::HeaderMap`]
//! so name lookup stays case-insensitive and duplicate headers are handled
//! correctly, without dragging in `hyper`'s connection and body machinery.

use crate::buffered::BufferedReader;
use crate::error::ProxyError;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: String,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
}

/// Reads CRLF- or LF-terminated header lines from `reader` until a blank
/// line, the request/status line having already been consumed by the
/// caller, and parses them with `httparse`.
pub async fn read_headers<R: AsyncRead + Unpin>(
    reader: &mut BufferedReader<R>,
) -> Result<HeaderMap, ProxyError> {
    let mut raw = Vec::new();
    loop {
        let line = reader
            .read_line()
            .await?
            .ok_or_else(|| ProxyError::MalformedHeader("connection closed mid-headers".into()))?;
        let is_blank = matches!(line.as_str(), "\r\n" | "\n");
        raw.extend_from_slice(line.as_bytes());
        if is_blank {
            break;
        }
    }

    let mut storage = [httparse::EMPTY_HEADER; 64];
    let parsed = httparse::parse_headers(&raw, &mut storage)
        .map_err(|e| ProxyError::MalformedHeader(e.to_string()))?;
    let raw_headers = match parsed {
        httparse::Status::Complete((_, headers)) => headers,
        httparse::Status::Partial => {
            return Err(ProxyError::MalformedHeader(
                "incomplete header block".to_string(),
            ))
        }
    };

    let mut headers = HeaderMap::new();
    for h in raw_headers {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|_| ProxyError::MalformedHeader(h.name.to_string()))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|_| ProxyError::MalformedHeader(String::from_utf8_lossy(h.value).into_owned()))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Reads a full request head: the request line (already parsed by
/// [`crate::framing::classify`]) plus headers.
pub async fn read_request_head<R: AsyncRead + Unpin>(
    reader: &mut BufferedReader<R>,
    method: String,
    target: String,
    version: String,
) -> Result<RequestHead, ProxyError> {
    let headers = read_headers(reader).await?;
    Ok(RequestHead {
        method,
        target,
        version,
        headers,
    })
}

/// Reads a full response head: status line plus headers.
pub async fn read_response_head<R: AsyncRead + Unpin>(
    reader: &mut BufferedReader<R>,
) -> Result<ResponseHead, ProxyError> {
    let line = reader
        .read_line()
        .await?
        .ok_or(ProxyError::EmptyStream)?;
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let mut parts = trimmed.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequestLine(line.clone()))?
        .to_string();
    let status_str = parts
        .next()
        .ok_or_else(|| ProxyError::MalformedRequestLine(line.clone()))?;
    let reason = parts.next().unwrap_or("").to_string();
    let status = status_str
        .parse::<u16>()
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| ProxyError::MalformedRequestLine(line.clone()))?;
    let headers = read_headers(reader).await?;
    Ok(ResponseHead {
        version,
        status,
        reason,
        headers,
    })
}

pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

pub async fn write_request_head<W: AsyncWrite + Unpin>(
    writer: &mut W,
    head: &RequestHead,
) -> Result<(), ProxyError> {
    let line = format!("{} {} {}\r\n", head.method, head.target, head.version);
    writer.write_all(line.as_bytes()).await?;
    write_headers(writer, &head.headers).await
}

pub async fn write_response_head<W: AsyncWrite + Unpin>(
    writer: &mut W,
    head: &ResponseHead,
) -> Result<(), ProxyError> {
    let line = format!(
        "{} {} {}\r\n",
        head.version,
        head.status.as_u16(),
        head.reason
    );
    writer.write_all(line.as_bytes()).await?;
    write_headers(writer, &head.headers).await
}

async fn write_headers<W: AsyncWrite + Unpin>(
    writer: &mut W,
    headers: &HeaderMap,
) -> Result<(), ProxyError> {
    for (name, value) in headers.iter() {
        writer.write_all(name.as_str().as_bytes()).await?;
        writer.write_all(b": ").await?;
        writer.write_all(value.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
    }
    writer.write_all(b"\r\n").await?;
    Ok(())
}

/// Copies exactly `len` body bytes from `reader` to `writer`.
pub async fn copy_body_fixed<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
) -> Result<u64, ProxyError> {
    let mut limited = reader.take(len);
    let n = tokio::io::copy(&mut limited, writer).await?;
    Ok(n)
}

/// Copies body bytes from `reader` to `writer` until EOF. Used for response
/// bodies with no Content-Length, where the end of the stream is itself the
/// end-of-body marker.
pub async fn copy_body_to_end<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, ProxyError> {
    let n = tokio::io::copy(reader, writer).await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffered::BufferedReader;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_headers_until_blank_line() {
        let mut r = BufferedReader::new(Cursor::new(
            b"Host: example.com\r\nContent-Length: 2\r\n\r\nhi".to_vec(),
        ));
        let headers = read_headers(&mut r).await.unwrap();
        assert_eq!(headers.get("host").unwrap(), "example.com");
        assert_eq!(content_length(&headers), Some(2));
    }

    #[tokio::test]
    async fn rejects_header_line_without_colon() {
        let mut r = BufferedReader::new(Cursor::new(b"not-a-header\r\n\r\n".to_vec()));
        let err = read_headers(&mut r).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedHeader(_)));
    }

    #[tokio::test]
    async fn round_trips_a_response_head() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("2"));
        let head = ResponseHead {
            version: "HTTP/1.1".to_string(),
            status: StatusCode::OK,
            reason: "OK".to_string(),
            headers,
        };
        let mut buf = Vec::new();
        write_response_head(&mut buf, &head).await.unwrap();
        let mut r = BufferedReader::new(Cursor::new(buf));
        let parsed = read_response_head(&mut r).await.unwrap();
        assert_eq!(parsed.status, StatusCode::OK);
        assert_eq!(content_length(&parsed.headers), Some(2));
    }
}
