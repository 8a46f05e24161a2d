//! The local, browser-facing HTTP/HTTPS front-end. Accepts plain TCP
//! connections from a browser configured to use this process as its proxy,
//! classifies each one as a CONNECT tunnel or a plain HTTP request, and
//! relays it to the second hop over the shared [`QuicLink`].

use std::net::SocketAddr;
use std::sync::Arc;

use proxy_shared::buffered::BufferedReader;
use proxy_shared::framing::{self, StreamKind};
use proxy_shared::http1;
use proxy_shared::splice::{self, BoxedReader, BoxedWriter};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::quic::QuicLink;

const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

pub async fn serve(link: Arc<QuicLink>, listen_addr: SocketAddr) -> Result<(), ClientError> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!(%listen_addr, "local proxy front-end listening");
    loop {
        let (socket, peer) = listener.accept().await?;
        let link = link.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(link, socket).await {
                warn!(%peer, error = %err, "browser connection ended with an error");
            }
        });
    }
}

async fn handle_connection(link: Arc<QuicLink>, socket: TcpStream) -> Result<(), ClientError> {
    socket.set_nodelay(true).ok();
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufferedReader::new(read_half);

    let kind = framing::classify(&mut reader).await.map_err(ClientError::Shared)?;
    match kind {
        StreamKind::Heartbeat => {
            debug!("browser sent a line matching the heartbeat prefix; ignoring");
            Ok(())
        }
        StreamKind::Connect { target } => handle_connect(link, reader, write_half, target).await,
        StreamKind::Http {
            method,
            target,
            version,
            ..
        } => handle_http(link, reader, write_half, method, target, version).await,
    }
}

/// Opens a stream, reconnecting and retrying exactly once if the first
/// attempt fails for any reason - not just `NotConnected`, but also a stale
/// connection handle whose `open_bi` fails because the second hop went away
/// mid-session (e.g. the server process was killed and restarted).
async fn open_stream_with_retry(
    link: &QuicLink,
) -> Result<(quinn::SendStream, quinn::RecvStream), ClientError> {
    match link.open_stream().await {
        Err(ClientError::NotConnected) | Err(ClientError::OpenStream(_)) => {
            link.reconnect().await?;
            link.open_stream().await
        }
        other => other,
    }
}

async fn handle_http(
    link: Arc<QuicLink>,
    mut reader: BufferedReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    method: String,
    target: String,
    version: String,
) -> Result<(), ClientError> {
    let head = http1::read_request_head(&mut reader, method, target, version)
        .await
        .map_err(ClientError::Shared)?;
    let body_len = http1::content_length(&head.headers);

    let (mut send, recv) = match open_stream_with_retry(&link).await {
        Ok(streams) => streams,
        Err(err) => {
            debug!(error = %err, "no stream available after reconnect retry, surfacing bad gateway");
            writer.write_all(BAD_GATEWAY).await?;
            return Ok(());
        }
    };

    http1::write_request_head(&mut send, &head)
        .await
        .map_err(ClientError::Shared)?;
    if let Some(n) = body_len {
        http1::copy_body_fixed(&mut reader, &mut send, n)
            .await
            .map_err(ClientError::Shared)?;
    }
    let _ = send.finish();

    let mut remote_reader = BufferedReader::new(recv);
    let response_head = http1::read_response_head(&mut remote_reader)
        .await
        .map_err(ClientError::Shared)?;
    let response_len = http1::content_length(&response_head.headers);

    http1::write_response_head(&mut writer, &response_head)
        .await
        .map_err(ClientError::Shared)?;
    match response_len {
        Some(n) => {
            http1::copy_body_fixed(&mut remote_reader, &mut writer, n)
                .await
                .map_err(ClientError::Shared)?;
        }
        None => {
            http1::copy_body_to_end(&mut remote_reader, &mut writer)
                .await
                .map_err(ClientError::Shared)?;
        }
    }
    writer.shutdown().await.ok();
    Ok(())
}

async fn handle_connect(
    link: Arc<QuicLink>,
    reader: BufferedReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    target: String,
) -> Result<(), ClientError> {
    let (mut send, recv) = match open_stream_with_retry(&link).await {
        Ok(streams) => streams,
        Err(err) => {
            debug!(error = %err, "no stream available after reconnect retry, surfacing bad gateway");
            writer.write_all(BAD_GATEWAY).await?;
            return Ok(());
        }
    };

    let preamble = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
    send.write_all(preamble.as_bytes()).await?;

    writer.write_all(CONNECTION_ESTABLISHED).await?;

    let a_reader: BoxedReader = Box::pin(reader);
    let a_writer: BoxedWriter = Box::pin(writer);
    let b_reader: BoxedReader = Box::pin(recv);
    let b_writer: BoxedWriter = Box::pin(send);

    let stats = splice::splice(a_reader, a_writer, b_reader, b_writer).await?;
    debug!(
        browser_to_remote = stats.a_to_b,
        remote_to_browser = stats.b_to_a,
        target,
        "connect tunnel closed"
    );
    Ok(())
}
