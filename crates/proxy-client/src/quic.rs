use std::sync::Arc;
use std::time::Instant;

use proxy_shared::buffered::BufferedReader;
use proxy_shared::framing::{HEARTBEAT_LINE, HEARTBEAT_RESPONSE_LINE};
use proxy_shared::heartbeat::HeartbeatState;
use proxy_shared::quic::{client_endpoint_config, CertificateVerificationMode};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{CertVerificationSetting, ClientConfig};
use crate::error::ClientError;

#[derive(Default)]
struct LinkState {
    endpoint: Option<quinn::Endpoint>,
    connection: Option<quinn::Connection>,
    liveness: Option<JoinHandle<()>>,
}

/// The dedicated heartbeat stream opened once at connect time and reused
/// for every beat thereafter, plus the timestamps it drives.
///
/// Kept behind its own mutex, separate from [`LinkState`]: the liveness
/// loop holds this lock for an entire heartbeat round trip (write + wait
/// for the reply), and must never also hold the connection-level lock for
/// that long, or a concurrent `open_stream`/`reconnect`/`stop` call would
/// stall behind a slow heartbeat.
struct HeartbeatChannel {
    send: quinn::SendStream,
    recv: BufferedReader<quinn::RecvStream>,
    timing: HeartbeatState,
}

/// Manages the single QUIC connection to the second-hop `proxy-server`:
/// dialing, reconnecting on heartbeat failure, and keeping the link alive
/// with a periodic heartbeat stream.
///
/// `connect` and `stop` are idempotent: calling either while already in
/// that state is a no-op. Once stopped a link is done for good - build a
/// new `QuicLink` to reconnect.
#[derive(Clone)]
pub struct QuicLink {
    state: Arc<Mutex<LinkState>>,
    heartbeat: Arc<Mutex<Option<HeartbeatChannel>>>,
    config: Arc<ClientConfig>,
    cancel: CancellationToken,
}

impl QuicLink {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState::default())),
            heartbeat: Arc::new(Mutex::new(None)),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Establishes the QUIC connection if not already connected and starts
    /// the background heartbeat task. A no-op while already connected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        if state.connection.is_some() {
            return Ok(());
        }
        self.dial(&mut state).await?;
        drop(state);
        self.spawn_liveness_if_absent().await;
        Ok(())
    }

    /// Closes the current connection (if any) with reason "reconnecting"
    /// and dials a fresh one, opening a new heartbeat stream. The liveness
    /// task keeps running across this - it is only ever torn down by
    /// [`QuicLink::stop`].
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        self.close_current(&mut state, b"reconnecting");
        self.dial(&mut state).await
    }

    fn close_current(&self, state: &mut LinkState, reason: &'static [u8]) {
        if let Some(connection) = state.connection.take() {
            connection.close(0u32.into(), reason);
        }
        if let Some(endpoint) = state.endpoint.take() {
            endpoint.close(0u32.into(), reason);
        }
    }

    async fn dial(&self, state: &mut LinkState) -> Result<(), ClientError> {
        let verification = match self.config.cert_verification {
            CertVerificationSetting::Insecure => CertificateVerificationMode::Insecure,
            CertVerificationSetting::Pinned => {
                let path = self.config.pinned_cert_path.as_ref().ok_or_else(|| {
                    ClientError::Tls(rustls::Error::General(
                        "pinned_cert_path is required when cert_verification = \"pinned\"".into(),
                    ))
                })?;
                let pem = std::fs::read(path)?;
                let mut certs = rustls_pemfile::certs(&mut &pem[..]);
                let der = certs
                    .next()
                    .ok_or_else(|| {
                        ClientError::Tls(rustls::Error::General(
                            "no certificate found in pinned_cert_path".into(),
                        ))
                    })?
                    .map_err(ClientError::Io)?;
                CertificateVerificationMode::Pinned(der)
            }
        };

        let client_config = client_endpoint_config(verification)?;
        let mut endpoint = quinn::Endpoint::client("0.0.0.0:0".parse().unwrap())?;
        endpoint.set_default_client_config(client_config);

        info!(remote = %self.config.remote_addr, "dialing remote proxy");
        let connecting = endpoint.connect(self.config.remote_addr, &self.config.remote_name)?;
        let connection = connecting.await?;
        info!("connected to remote proxy");

        let (hb_send, hb_recv) = connection.open_bi().await.map_err(ClientError::OpenStream)?;
        let mut channel = HeartbeatChannel {
            send: hb_send,
            recv: BufferedReader::new(hb_recv),
            timing: HeartbeatState::new(
                self.config.heartbeat_interval(),
                self.config.heartbeat_timeout(),
            ),
        };
        channel.timing.record_received(Instant::now());
        *self.heartbeat.lock().await = Some(channel);

        state.endpoint = Some(endpoint);
        state.connection = Some(connection);
        Ok(())
    }

    async fn spawn_liveness_if_absent(&self) {
        let mut state = self.state.lock().await;
        if state.liveness.is_some() {
            return;
        }
        let this = self.clone();
        state.liveness = Some(tokio::spawn(async move { this.liveness_loop().await }));
    }

    async fn liveness_loop(&self) {
        loop {
            let interval = self.config.heartbeat_interval();
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            if self.cancel.is_cancelled() {
                return;
            }
            if let Err(err) = self.send_heartbeat().await {
                let expired = {
                    let guard = self.heartbeat.lock().await;
                    guard
                        .as_ref()
                        .map(|c| c.timing.is_expired(Instant::now()))
                        .unwrap_or(true)
                };
                warn!(error = %err, expired, "heartbeat failed");
                if !expired {
                    continue;
                }
                let mut state = self.state.lock().await;
                self.close_current(&mut state, b"reconnecting");
                if let Err(err) = self.dial(&mut state).await {
                    warn!(error = %err, "reconnect attempt failed, will retry next interval");
                }
            }
        }
    }

    /// Writes one `HEARTBEAT\n` on the dedicated heartbeat stream and waits
    /// for `HEARTBEAT_RESPONSE\n` within the configured timeout. Holds only
    /// the heartbeat-specific lock for the round trip, never the
    /// connection-level `state` lock.
    async fn send_heartbeat(&self) -> Result<(), ClientError> {
        let mut guard = self.heartbeat.lock().await;
        let channel = guard.as_mut().ok_or(ClientError::NotConnected)?;

        channel
            .send
            .write_all(HEARTBEAT_LINE.as_bytes())
            .await
            .map_err(|e| ClientError::Shared(e.into()))?;
        channel.timing.record_sent(Instant::now());

        let deadline = self.config.heartbeat_timeout();
        let line = timeout(deadline, channel.recv.read_line())
            .await
            .map_err(|_| ClientError::Shared(proxy_shared::ProxyError::HeartbeatTimeout(deadline)))?
            .map_err(|e| ClientError::Shared(e.into()))?
            .ok_or(ClientError::Shared(proxy_shared::ProxyError::EmptyStream))?;

        if line.trim_end_matches(['\r', '\n']) != HEARTBEAT_RESPONSE_LINE.trim_end_matches('\n') {
            return Err(ClientError::Shared(proxy_shared::ProxyError::MalformedRequestLine(
                line,
            )));
        }

        channel.timing.record_received(Instant::now());
        Ok(())
    }

    /// Opens a new bidirectional stream over the current connection.
    /// Returns [`ClientError::NotConnected`] if there is no active
    /// connection; the caller decides whether to `reconnect` and retry.
    pub async fn open_stream(&self) -> Result<(quinn::SendStream, quinn::RecvStream), ClientError> {
        let connection = {
            let state = self.state.lock().await;
            state.connection.clone().ok_or(ClientError::NotConnected)?
        };
        connection.open_bi().await.map_err(ClientError::OpenStream)
    }

    /// Tears down the connection and stops the heartbeat task. Safe to call
    /// more than once, or when never connected.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock().await;
        if let Some(handle) = state.liveness.take() {
            handle.abort();
        }
        if let Some(connection) = state.connection.take() {
            connection.close(0u32.into(), b"connection manager stopped");
        }
        *self.heartbeat.lock().await = None;
        if let Some(endpoint) = state.endpoint.take() {
            endpoint.close(0u32.into(), b"connection manager stopped");
            endpoint.wait_idle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn open_stream_without_connect_is_not_connected() {
        let config = Arc::new(ClientConfig::default());
        let link = QuicLink::new(config);
        let err = link.open_stream().await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn stop_without_connect_is_a_no_op() {
        let config = Arc::new(ClientConfig::default());
        let link = QuicLink::new(config);
        link.stop().await;
        link.stop().await;
    }

    #[tokio::test]
    async fn reconnect_without_prior_connect_dials_fresh() {
        // reconnect() with no prior connection has nothing to close, so it
        // behaves like connect() and just dials. Pointed at an address
        // nothing listens on, so it resolves quickly to a transport error
        // rather than hanging.
        let mut config = ClientConfig::default();
        config.remote_addr = "127.0.0.1:1".parse().unwrap();
        let link = QuicLink::new(Arc::new(config));
        let _ = link.reconnect().await;
        link.stop().await;
    }
}
