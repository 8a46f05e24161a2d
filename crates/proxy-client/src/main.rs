use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use proxy_client::{ClientConfig, QuicLink};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "proxy-client", about = "First-hop QUIC tunneling proxy client")]
struct Args {
    /// Path to a TOML config file. Built-in defaults and PROXY__ prefixed
    /// environment variables always apply; this file sits between them.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the local address the browser-facing front-end listens on.
    #[arg(long)]
    listen: Option<String>,

    /// Overrides the second-hop proxy-server address to dial.
    #[arg(long)]
    remote: Option<String>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let mut config = ClientConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen.parse()?;
    }
    if let Some(remote) = args.remote {
        config.remote_addr = remote.parse()?;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(config);
    let link = Arc::new(QuicLink::new(config.clone()));
    link.connect().await?;

    let serve_result = tokio::select! {
        result = proxy_client::frontend::serve(link.clone(), config.listen_addr) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };

    link.stop().await;
    serve_result.map_err(Into::into)
}
