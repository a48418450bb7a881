use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use talk2me::config::{Cli, Config};
use talk2me::dispatcher;
use talk2me::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Arc::new(Config::from_cli(Cli::parse())?);
    let store = Arc::new(Store::load_or_init(std::path::Path::new(&config.state_file), &config.chat_servers)?);

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, chat_servers = ?config.chat_servers, "talk2me listening");

    dispatcher::run(listener, store, config).await
}
