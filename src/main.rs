mod config;
mod console;
mod constants;
mod controller;
mod format;
mod graph;
mod job_model;
mod notice;
mod pending;
mod refresher;
mod routes;
mod scheduler;

use anyhow::{Context, Result};
use std::{net::SocketAddr, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use console::Console;
use scheduler::HttpSchedulerClient;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let conf = config::init(constants::DEFAULT_CONF).context("failed to load configuration")?;

    let client = HttpSchedulerClient::new(&conf.scheduler_url, conf.request_timeout())
        .context("could not construct scheduler client")?;
    let console = Arc::new(Console::new(Arc::new(client), &conf));
    console
        .start(conf.poll_interval(), conf.frame_interval())
        .await;

    let app = routes::router(console.clone());

    let addr: SocketAddr = conf
        .listen_addr
        .parse()
        .with_context(|| format!("bad listen_addr '{}'", conf.listen_addr))?;
    info!(%addr, job_name = %conf.job_name, "console listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(?e, "could not listen for shutdown signal");
            }
        })
        .await
        .context("server failed")?;

    console.shutdown().await;
    Ok(())
}
