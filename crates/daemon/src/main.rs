//! webmux daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use daemon::config::Config;
use daemon::server::Server;
use daemon::session::SessionManager;

/// webmux daemon - bridges remote clients to local PTY sessions.
#[derive(Parser, Debug)]
#[command(name = "webmux-daemon")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    config.apply_env_overrides();
    if let Some(bind) = cli.bind {
        config.server.bind_addr = bind;
    }
    config.validate()?;

    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("webmux daemon starting");

    let manager = Arc::new(SessionManager::new(
        config.session.clone(),
        config.tmux.clone(),
    ));
    let listener = TcpListener::bind(&config.server.bind_addr).await?;

    Server::new(manager).run(listener).await
}
