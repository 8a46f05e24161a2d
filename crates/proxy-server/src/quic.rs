//! The QUIC endpoint: accepts connections from first-hop clients, and for
//! each one accepts streams and dispatches them by the kind of traffic they
//! carry.

use std::net::SocketAddr;

use proxy_shared::buffered::BufferedReader;
use proxy_shared::framing::{self, StreamKind, HEARTBEAT_RESPONSE_LINE};
use proxy_shared::quic::server_endpoint_config;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::certificate::CertificateMaterial;
use crate::dispatch;
use crate::error::ServerError;

pub struct QuicServerEndpoint {
    endpoint: quinn::Endpoint,
}

impl QuicServerEndpoint {
    pub fn bind(bind_addr: SocketAddr, material: CertificateMaterial) -> Result<Self, ServerError> {
        let server_config = server_endpoint_config(material.cert_chain, material.key)?;
        let endpoint = quinn::Endpoint::server(server_config, bind_addr)?;
        Ok(Self { endpoint })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Accepts connections until `cancel` fires, then stops accepting new
    /// ones and closes the endpoint.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), ServerError> {
        info!(addr = ?self.endpoint.local_addr(), "quic endpoint listening");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                incoming = self.endpoint.accept() => {
                    let Some(incoming) = incoming else { break };
                    let conn_cancel = cancel.child_token();
                    tokio::spawn(async move {
                        if let Err(err) = accept_connection(incoming, conn_cancel).await {
                            warn!(error = %err, "connection ended with an error");
                        }
                    });
                }
            }
        }
        self.endpoint.close(0u32.into(), b"");
        self.endpoint.wait_idle().await;
        Ok(())
    }
}

async fn accept_connection(
    incoming: quinn::Incoming,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let connection = match incoming.await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(error = %err, "rejecting connection: handshake failed");
            return Err(err.into());
        }
    };
    info!(remote = %connection.remote_address(), "accepted connection");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            stream = connection.accept_bi() => {
                match stream {
                    Ok((send, recv)) => {
                        tokio::spawn(async move {
                            if let Err(err) = handle_stream(send, recv).await {
                                debug!(error = %err, "stream closed with an error");
                            }
                        });
                    }
                    Err(quinn::ConnectionError::ApplicationClosed(_))
                    | Err(quinn::ConnectionError::LocallyClosed) => break,
                    Err(err) => {
                        warn!(error = %err, "stream accept failed, dropping connection");
                        connection.close(400u32.into(), b"");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_stream(send: quinn::SendStream, recv: quinn::RecvStream) -> Result<(), ServerError> {
    let mut reader = BufferedReader::new(recv);
    let kind = framing::classify(&mut reader).await.map_err(ServerError::Shared)?;
    match kind {
        StreamKind::Heartbeat => handle_heartbeat(reader, send).await,
        StreamKind::Connect { target } => dispatch::handle_connect(reader, send, target)
            .await
            .map_err(ServerError::Shared),
        StreamKind::Http {
            method,
            target,
            version,
            ..
        } => dispatch::handle_http(reader, send, method, target, version)
            .await
            .map_err(ServerError::Shared),
    }
}

/// Replies to a heartbeat and keeps replying to whatever further
/// `HEARTBEAT\n` lines arrive on the same stream, until it closes.
///
/// The client opens its heartbeat stream once at connect time and reuses it
/// for every beat, so this has to loop rather than reply once and return -
/// but ad-hoc, one-shot heartbeat streams (the historical shape this also
/// has to accept) just hit EOF after the first reply and fall out of the
/// loop the same way a one-shot handler would have returned.
async fn handle_heartbeat(
    mut reader: BufferedReader<quinn::RecvStream>,
    mut send: quinn::SendStream,
) -> Result<(), ServerError> {
    loop {
        send.write_all(HEARTBEAT_RESPONSE_LINE.as_bytes())
            .await
            .map_err(proxy_shared::ProxyError::from)?;
        match reader.read_line().await.map_err(proxy_shared::ProxyError::from)? {
            Some(_line) => continue,
            None => break,
        }
    }
    let _ = send.finish();
    Ok(())
}
