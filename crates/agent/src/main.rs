//! Testflinger device agent entry point.
//!
//! Loads its YAML configuration, installs SIGTERM/SIGUSR1 handling, and
//! drives the phase engine loop until the process is terminated.

mod attachments;
mod client;
mod command_runner;
mod config;
mod error;
mod output_handlers;
mod phase_engine;
mod status_handler;
mod stop_conditions;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use client::{AgentClient, ReqwestAgentClient};
use config::AgentConfig;
use phase_engine::PhaseEngine;
use testflinger_core::port::time_provider::SystemTimeProvider;

#[derive(Parser, Debug)]
#[command(name = "testflinger-agent", about = "Device agent: polls for jobs and drives them through the phase sequence")]
struct Cli {
    /// Path to the agent's YAML config. Defaults to the XDG config dir.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config.as_deref())?;

    init_logging(&config.logging_level, config.logging_quiet);

    tracing::info!(agent_id = %config.agent_id, server = %config.server_address, "testflinger-agent starting");

    std::fs::create_dir_all(&config.execution_basedir)?;
    std::fs::create_dir_all(&config.logging_basedir)?;
    std::fs::create_dir_all(&config.results_basedir)?;

    let client: Arc<dyn AgentClient> = Arc::new(ReqwestAgentClient::new(&config.server_address, config.agent_id.clone())?);
    let clock = Arc::new(SystemTimeProvider);

    let terminate = Arc::new(AtomicBool::new(false));
    let restart_signal = Arc::new(AtomicBool::new(false));
    install_signal_handlers(terminate.clone(), restart_signal.clone());

    client.wait_for_server_connectivity(std::time::Duration::from_secs(30), std::time::Duration::from_secs(180)).await;

    let mut engine = PhaseEngine::new(config, client, clock, terminate.clone(), restart_signal);

    tokio::select! {
        _ = engine.run_forever() => {}
        _ = wait_for_terminate(terminate) => {
            tracing::info!("SIGTERM received, shutting down");
        }
    }

    Ok(())
}

async fn wait_for_terminate(flag: Arc<AtomicBool>) {
    loop {
        if flag.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

/// Installs OS signal handling (§5): SIGTERM sets `terminate` (the running
/// phase's CommandRunner polls this and kills the subprocess); SIGUSR1 sets
/// `restart_signal`, consumed by the phase engine at its next tick.
#[cfg(unix)]
fn install_signal_handlers(terminate: Arc<AtomicBool>, restart_signal: Arc<AtomicBool>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
        terminate.store(true, Ordering::SeqCst);
    });

    tokio::spawn(async move {
        let mut usr1 = signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");
        loop {
            usr1.recv().await;
            restart_signal.store(true, Ordering::SeqCst);
        }
    });
}

#[cfg(not(unix))]
fn install_signal_handlers(_terminate: Arc<AtomicBool>, _restart_signal: Arc<AtomicBool>) {}

fn init_logging(level: &str, quiet: bool) {
    let directive = if quiet { "warn".to_string() } else { format!("testflinger={level}") };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::registry().with(env_filter).with(fmt::layer().pretty()).init();
}
