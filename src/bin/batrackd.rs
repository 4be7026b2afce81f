//! `batrackd` CLI entrypoint (spec.md §6 "CLI"): loads the configuration
//! file, wires logging, and drives the run scheduler until a shutdown
//! signal arrives.
//!
//! Mirrors `original_source/batrack/__main__.py`'s `if __name__ == "__main__":`
//! block: parse a config path, build the `BatRack` object graph, install
//! signal handlers, then block on the scheduler for the life of the process.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use tokio::sync::watch;

use batrackd::config::AppConfig;
use batrackd::error::ErrorCode;
use batrackd::scheduler::RunScheduler;

#[derive(Parser, Debug)]
#[command(name = "batrackd", about = "Autonomous multi-modal bat activity sensing station")]
struct Cli {
    /// Path to the BatRack INI configuration file.
    #[arg(default_value = "etc/BatRack.conf")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load_from_path(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            // No logger is configured yet: the config itself controls the
            // logging level, so a config failure has to reach the user on
            // stderr directly.
            eprintln!("batrackd: failed to load config '{}': {}", cli.config.display(), e);
            return ExitCode::from(e.code() as u8);
        }
    };

    env_logger::Builder::new()
        .parse_filters(&config.batrack.logging_level)
        .init();

    let host = match hostname::get() {
        Ok(h) => h.to_string_lossy().into_owned(),
        Err(e) => {
            error!("failed to determine station hostname: {}", e);
            "unknown-station".to_string()
        }
    };
    info!("starting batrackd on station '{}'", host);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to build async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(config, host, runtime.handle().clone()))
}

async fn run(config: AppConfig, host: String, handle: tokio::runtime::Handle) -> ExitCode {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_watcher(shutdown_tx);

    let scheduler = RunScheduler::new(config, host, handle);
    scheduler.run(shutdown_rx).await;

    info!("batrackd shut down cleanly");
    ExitCode::SUCCESS
}

/// Installs SIGINT/SIGTERM handlers (spec.md §4.6 "Signal handling") and
/// flips `shutdown_tx` to `true` on the first one received, which every
/// scheduler task is watching.
fn spawn_signal_watcher(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal, shutting down");
        }

        let _ = shutdown_tx.send(true);
    });
}
