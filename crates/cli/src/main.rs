mod config_commands;
mod run_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    meshtrace_config::MeshtraceConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "meshtrace", about = "meshtrace: MeshCore reception and relay telemetry")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and ~/.config/meshtrace/).
    #[arg(long, global = true, env = "MESHTRACE_CONFIG")]
    config: Option<PathBuf>,

    /// Custom data directory (overrides the config value).
    #[arg(long, global = true, env = "MESHTRACE_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow an event stream (default when no subcommand is provided).
    Run {
        /// Newline-delimited JSON events; stdin when omitted.
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Process a recorded event file once, then save and export.
    Replay { file: PathBuf },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<MeshtraceConfig> {
    let mut config = match &cli.config {
        Some(path) => meshtrace_config::load_config(path)?,
        None => meshtrace_config::discover_and_load(),
    };
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = Some(dir.clone());
    }
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "meshtrace starting");

    match &cli.command {
        None => run_commands::run(load_config(&cli)?, None).await,
        Some(Commands::Run { events }) => run_commands::run(load_config(&cli)?, events.clone()).await,
        Some(Commands::Replay { file }) => run_commands::replay(load_config(&cli)?, file),
        Some(Commands::Config { action }) => config_commands::handle_config(action, cli.config.as_deref()),
    }
}
