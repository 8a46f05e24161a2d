use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULTS: &str = r#"
bind_addr = "0.0.0.0:4433"
subject_alt_names = ["localhost"]
log_filter = "info"
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the QUIC endpoint binds to, facing the first-hop clients.
    pub bind_addr: SocketAddr,
    /// Path to a PEM certificate chain. If unset, or if the file does not
    /// exist yet, a self-signed certificate is generated and persisted here.
    pub cert_path: Option<PathBuf>,
    /// Path to the PEM private key matching `cert_path`.
    pub key_path: Option<PathBuf>,
    /// Subject alternative names for a freshly generated certificate.
    pub subject_alt_names: Vec<String>,
    pub log_filter: String,
}

impl ServerConfig {
    pub fn load(file_path: Option<&Path>) -> color_eyre::Result<Self> {
        let config = proxy_shared::config::load_layered_as(DEFAULTS, file_path)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        proxy_shared::config::load_layered_as(DEFAULTS, None)
            .expect("built-in defaults must parse")
    }
}
