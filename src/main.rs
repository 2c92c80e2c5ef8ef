#![forbid(unsafe_code)]

//! `runtime-dap` — debug adapter binary.
//!
//! Speaks the Debug Adapter Protocol on stdio (default) or on a TCP
//! listener, and drives the script runtime through its debug port.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use runtime_dap::dap;
use runtime_dap::{AdapterConfig, AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "runtime-dap", about = "Debug adapter for the script runtime", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accept front ends on this TCP address instead of stdio.
    #[arg(long)]
    listen: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("runtime-dap bootstrap");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));
    // A blocking stdin read would otherwise hold the runtime open.
    runtime.shutdown_background();
    result
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => AdapterConfig::load_from_path(path)?,
        None => AdapterConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen = Some(listen);
    }
    let listen = config.listen_addr()?;
    info!(?listen, "configuration loaded");

    // ── Serve ───────────────────────────────────────────
    let ct = CancellationToken::new();
    let serve_ct = ct.clone();
    let runtime = config.runtime;
    let serve_handle = tokio::spawn(async move {
        match listen {
            Some(addr) => dap::serve_tcp(addr, runtime, serve_ct).await,
            None => dap::serve_stdio(runtime, serve_ct).await,
        }
    });

    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    // ── Wait for the adapter to finish ──────────────────
    let result = serve_handle
        .await
        .map_err(|err| AppError::Io(format!("adapter task failed: {err}")))?;
    if let Err(err) = &result {
        error!(%err, "debug adapter failed");
    }
    info!("runtime-dap shut down");
    result
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

/// Logs go to stderr; stdout carries the protocol in stdio mode.
fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
