use std::path::PathBuf;

use clap::Parser;
use proxy_server::{certificate, QuicServerEndpoint, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "proxy-server", about = "Second-hop QUIC tunneling proxy server")]
struct Args {
    /// Path to a TOML config file. Built-in defaults and PROXY__ prefixed
    /// environment variables always apply; this file sits between them.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the address the QUIC endpoint binds to.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind.parse()?;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let material = match (&config.cert_path, &config.key_path) {
        (Some(cert_path), Some(key_path)) if cert_path.exists() && key_path.exists() => {
            certificate::load_from_disk(cert_path, key_path)?
        }
        _ => {
            let (material, cert_pem, key_pem) =
                certificate::generate_self_signed(config.subject_alt_names.clone())?;
            if let (Some(cert_path), Some(key_path)) = (&config.cert_path, &config.key_path) {
                certificate::persist(&cert_pem, &key_pem, cert_path, key_path)?;
            }
            material
        }
    };

    let endpoint = QuicServerEndpoint::bind(config.bind_addr, material)?;
    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_cancel.cancel();
    });

    endpoint.serve(cancel).await?;
    Ok(())
}
