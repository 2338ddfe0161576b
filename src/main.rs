mod attach;
mod settings;
mod watch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

/// Headless console and telemetry client for a game-server panel.
#[derive(Debug, Parser)]
#[command(name = "gantry", version, about, arg_required_else_help = true)]
struct Cli {
    /// Panel base URL (overrides settings.json and GANTRY_PANEL_URL).
    #[arg(long, global = true, value_name = "URL")]
    panel_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Attach to a server console. Lines typed on stdin are sent as commands;
    /// :start, :stop, :restart, :kill, :up, :down, :stats and :quit are
    /// handled locally.
    Console {
        server_id: String,
    },
    /// Poll resource usage for one or more servers.
    Watch {
        #[arg(required = true)]
        server_ids: Vec<String>,
        /// User whose dashboard preferences apply.
        #[arg(long)]
        user: Option<String>,
        /// Flip the persisted "show all servers" preference.
        #[arg(long, requires = "user")]
        toggle_show_all: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = settings::load_settings().with_env_overrides();
    if let Some(url) = cli.panel_url {
        settings.panel_url = url;
    }
    log::debug!("Using panel {}", settings.panel_url);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("gantry-client")
        .build()
        .context("failed to start tokio runtime")?;

    match cli.command {
        Command::Console { server_id } => runtime.block_on(attach::run(&settings, &server_id)),
        Command::Watch {
            server_ids,
            user,
            toggle_show_all,
        } => runtime.block_on(watch::run(
            &settings,
            watch::WatchOptions {
                server_ids,
                user_id: user,
                toggle_show_all,
            },
        )),
    }
}
