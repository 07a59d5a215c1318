//! credwire binary: serve one protocol with the credentials from the environment
//! or from a JSON config file given as the only argument.

use credwire::proxy::{MetricsObserver, ProxyService, StaticCredentials};
use credwire::ProxyConfig;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("credwire=info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "credwire exited");
        std::process::exit(1);
    }
}

async fn run() -> credwire::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => ProxyConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => ProxyConfig::from_env()?,
    };
    tracing::debug!(?config, "loaded configuration");

    let listener = TcpListener::bind(config.listen_address()).await?;
    let service = ProxyService::new(config.protocol, StaticCredentials::new(config.credentials))
        .with_observer(Arc::new(MetricsObserver));

    service
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "could not listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
}
