use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const DEFAULTS: &str = r#"
listen_addr = "127.0.0.1:8080"
remote_addr = "127.0.0.1:4433"
remote_name = "localhost"
cert_verification = "insecure"
heartbeat_interval_secs = 1
heartbeat_timeout_secs = 2
log_filter = "info"
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertVerificationSetting {
    Insecure,
    Pinned,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Address the local HTTP/HTTPS front-end listens on, facing the browser.
    pub listen_addr: SocketAddr,
    /// Address of the second-hop `proxy-server` to dial over QUIC.
    pub remote_addr: SocketAddr,
    /// Server name used for the QUIC/TLS handshake (SNI).
    pub remote_name: String,
    pub cert_verification: CertVerificationSetting,
    /// Required when `cert_verification = "pinned"`.
    pub pinned_cert_path: Option<PathBuf>,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub log_filter: String,
}

impl ClientConfig {
    pub fn load(file_path: Option<&Path>) -> color_eyre::Result<Self> {
        let config = proxy_shared::config::load_layered_as(DEFAULTS, file_path)?;
        Ok(config)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        proxy_shared::config::load_layered_as(DEFAULTS, None)
            .expect("built-in defaults must parse")
    }
}
