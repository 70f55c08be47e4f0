//! docseal server
//!
//! Loads the configuration and key store, then serves the transform API
//! until SIGINT or SIGTERM.
//!
//! Usage:
//!   docseal --config /etc/docseal/docseal.toml
//!   DOCSEAL_BIND=0.0.0.0:8080 docseal --config docseal.toml --check
//!
//! Logging follows `RUST_LOG` (default `info`).

use anyhow::Context;
use clap::Parser;
use docseal::config::ServiceConfig;
use docseal::handler::RequestHandler;
use docseal::keystore::{KeyResolver, KeyStore};
use docseal::server;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "docseal", version, about = "Sign, verify, encrypt and decrypt documents over HTTP")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "DOCSEAL_CONFIG")]
    config: Option<PathBuf>,

    /// Load configuration and keys, then exit
    #[arg(long)]
    check: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ServiceConfig::load(args.config.as_deref()).context("loading configuration")?;
    let keys = KeyStore::load(&config.keys).context("loading key store")?;
    if args.check {
        log::info!("Configuration OK: {} keys", keys.len());
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers)
        .enable_all()
        .build()
        .context("starting runtime")?;

    runtime.block_on(async move {
        let keys: Arc<dyn KeyResolver> = Arc::new(keys);
        let handler = Arc::new(RequestHandler::new(keys, config.limits.handler_config()));
        let listener = tokio::net::TcpListener::bind(&config.server.bind)
            .await
            .with_context(|| format!("binding {}", config.server.bind))?;

        log::info!(
            "docseal {} starting with {} workers, {} in-flight jobs",
            docseal::VERSION,
            config.server.workers,
            config.limits.max_in_flight
        );
        server::serve(listener, server::router(handler), shutdown_signal())
            .await
            .context("serving")?;
        log::info!("Shut down");
        Ok(())
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                log::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("Shutdown requested");
}
