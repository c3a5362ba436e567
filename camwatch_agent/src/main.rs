//! camwatch_agent: serves camera telemetry as Prometheus metrics and a JSON
//! health report.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use camwatch_agent::config::{self, Invocation};
use camwatch_agent::http::router;
use camwatch_agent::logbuf::{LogBuffer, RingBufferLayer, DEFAULT_CAPACITY};
use camwatch_agent::state::AppState;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(logs: Arc<LogBuffer>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(RingBufferLayer::new(logs, Level::INFO))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = match config::load(std::env::args(), |k| std::env::var(k).ok())? {
        Invocation::Help(text) => {
            println!("{text}");
            return Ok(());
        }
        Invocation::Run(cfg) => cfg,
    };

    let logs = Arc::new(LogBuffer::new(DEFAULT_CAPACITY));
    init_tracing(Arc::clone(&logs));

    let checks = config::load_checks(cfg.thresholds_file.as_deref())?;
    let state = AppState::from_config(&cfg, checks, logs).context("building VAPIX client")?;

    let addr = SocketAddr::new(cfg.bind, cfg.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, proc_root = %cfg.proc_root.display(), vapix = cfg.vapix_enabled, "camwatch agent listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("serving HTTP")?;
    Ok(())
}
