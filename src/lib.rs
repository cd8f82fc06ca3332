pub mod cli;
pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod services;
pub mod state;

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Cli;
use state::AppContext;

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn spawn_shutdown_listener(ctx: Arc<AppContext>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                ctx.shutdown();
            }
            Err(e) => warn!(error = %e, "Cannot listen for interrupt"),
        }
    });
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level());

    let settings = cli.load_settings()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let ctx = Arc::new(AppContext::open(settings)?);
        spawn_shutdown_listener(ctx.clone());
        commands::dispatch(ctx, cli.command()).await
    })
}
