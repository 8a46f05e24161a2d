//! Origin dispatch: turns a classified stream into an outbound connection to
//! the real destination.
//!
//! HTTP requests are always relayed to the origin over plain TCP, even if
//! the original request implied TLS - this hop only ever speaks plain HTTP
//! to the origin, matching the behaviour of the process this was modelled
//! on. CONNECT requests get a raw TCP tunnel instead, since the payload
//! behind a CONNECT (typically a TLS handshake) is opaque to this proxy.

use http::HeaderMap;
use proxy_shared::buffered::BufferedReader;
use proxy_shared::http1::{self, RequestHead};
use proxy_shared::splice::{self, BoxedReader, BoxedWriter};
use proxy_shared::ProxyError;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

pub async fn handle_http(
    mut reader: BufferedReader<quinn::RecvStream>,
    mut send: quinn::SendStream,
    method: String,
    target: String,
    version: String,
) -> Result<(), ProxyError> {
    let head = http1::read_request_head(&mut reader, method, target.clone(), version).await?;
    let body_len = http1::content_length(&head.headers);
    let (host, port, path_and_query) = resolve_origin(&head.headers, &target)?;

    debug!(host, port, path_and_query, "dispatching http request to origin");
    let origin = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(ProxyError::OriginDial)?;
    let (origin_read, mut origin_write) = origin.into_split();

    let mut outgoing_headers = head.headers.clone();
    let host_value = host_header_value(&host, port);
    outgoing_headers.insert(
        http::header::HOST,
        http::HeaderValue::from_str(&host_value)
            .map_err(|_| ProxyError::MalformedHeader(host_value.clone()))?,
    );
    let outgoing_head = RequestHead {
        method: head.method,
        target: path_and_query,
        version: head.version,
        headers: outgoing_headers,
    };

    http1::write_request_head(&mut origin_write, &outgoing_head).await?;
    if let Some(n) = body_len {
        http1::copy_body_fixed(&mut reader, &mut origin_write, n).await?;
    }
    origin_write.shutdown().await.ok();

    let mut origin_reader = BufferedReader::new(origin_read);
    let response_head = http1::read_response_head(&mut origin_reader).await?;
    let response_len = http1::content_length(&response_head.headers);

    http1::write_response_head(&mut send, &response_head).await?;
    match response_len {
        Some(n) => {
            http1::copy_body_fixed(&mut origin_reader, &mut send, n).await?;
        }
        None => {
            http1::copy_body_to_end(&mut origin_reader, &mut send).await?;
        }
    }
    let _ = send.finish();
    Ok(())
}

pub async fn handle_connect(
    reader: BufferedReader<quinn::RecvStream>,
    send: quinn::SendStream,
    target: String,
) -> Result<(), ProxyError> {
    let (host, port) = split_host_port(&target, 0);
    if port == 0 {
        return Err(ProxyError::UnsupportedTarget(target));
    }

    debug!(host, port, "dialing origin for connect tunnel");
    let origin = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(ProxyError::OriginDial)?;
    let (origin_read, origin_write) = origin.into_split();

    let a_reader: BoxedReader = Box::pin(reader);
    let a_writer: BoxedWriter = Box::pin(send);
    let b_reader: BoxedReader = Box::pin(origin_read);
    let b_writer: BoxedWriter = Box::pin(origin_write);

    let stats = splice::splice(a_reader, a_writer, b_reader, b_writer).await?;
    debug!(
        target,
        quic_to_origin = stats.a_to_b,
        origin_to_quic = stats.b_to_a,
        "connect tunnel closed"
    );
    Ok(())
}

fn resolve_origin(headers: &HeaderMap, original_target: &str) -> Result<(String, u16, String), ProxyError> {
    let host_header = headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or(ProxyError::MissingHost)?;
    let (host, port) = split_host_port(host_header, 80);

    let path_and_query = original_target
        .parse::<http::Uri>()
        .ok()
        .filter(|uri| uri.authority().is_some())
        .and_then(|uri| uri.path_and_query().map(|pq| pq.as_str().to_string()))
        .unwrap_or_else(|| original_target.to_string());

    Ok((host, port, path_and_query))
}

fn split_host_port(host_header: &str, default_port: u16) -> (String, u16) {
    if let Some((h, p)) = host_header.rsplit_once(':') {
        if let Ok(port) = p.parse::<u16>() {
            return (h.to_string(), port);
        }
    }
    (host_header.to_string(), default_port)
}

fn host_header_value(host: &str, port: u16) -> String {
    if port == 80 {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn resolves_absolute_form_target() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::HOST, HeaderValue::from_static("example.com"));
        let (host, port, path) = resolve_origin(&headers, "http://example.com/a/b?x=1").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 80);
        assert_eq!(path, "/a/b?x=1");
    }

    #[test]
    fn resolves_origin_form_target_via_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::HOST, HeaderValue::from_static("example.com:8080"));
        let (host, port, path) = resolve_origin(&headers, "/a/b").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 8080);
        assert_eq!(path, "/a/b");
    }

    #[test]
    fn missing_host_header_is_an_error() {
        let headers = HeaderMap::new();
        let err = resolve_origin(&headers, "/a").unwrap_err();
        assert!(matches!(err, ProxyError::MissingHost));
    }

    #[test]
    fn connect_target_without_port_is_unsupported() {
        let (_, port) = split_host_port("example.com", 0);
        assert_eq!(port, 0);
    }
}
