//! Warden - game server launcher
//!
//! Loads configuration, sets up logging, and runs the terminal control
//! surface on top of the `warden_core` supervisor.

mod cli;
mod commands;
mod config;
mod logging;
mod signals;
mod surface;

use anyhow::anyhow;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use warden_core::events;
use warden_core::{ProcessSupervisor, RemoteConsoleClient, RoleDirectory};

use cli::Args;
use config::AppConfig;
use logging::setup_logging;
use signals::setup_signal_handlers;
use surface::ControlSurface;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load_from_file(&args.config).await?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration in {}: {}", args.config.display(), e))?;
    setup_logging(&config.logging)?;

    info!("🚀 Starting Warden v{}", env!("CARGO_PKG_VERSION"));
    info!("📂 Server folder: {}", config.server.folder);
    info!("🔌 Console at {}:{}", config.console.host, config.console.port);
    if config.console.password.trim().is_empty() {
        warn!("Console password is empty; roster and plugin features stay disabled");
    }

    let (sender, receiver) = events::channel();
    let client = Arc::new(RemoteConsoleClient::rcon(config.console_config(), config.command_timeout()));
    let roles = Arc::new(RoleDirectory::load(config.roles_path()).await);
    let supervisor = ProcessSupervisor::new(config.supervisor_settings(), client, roles, sender.clone());

    let surface = ControlSurface::new(supervisor, &config, sender);
    if args.autostart {
        surface.start_server().await;
    }

    surface.run(receiver, setup_signal_handlers()).await?;

    info!("✅ Warden shutdown complete");
    Ok(())
}
