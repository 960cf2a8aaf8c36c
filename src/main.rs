use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use mediabot::{
    apps::{App, cmd_init},
    config::{ConfigManager, EnvConfigManager},
    logger::init_tracing,
};
use std::{env, path::PathBuf, process};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "mediabot",
    about = "Telegram bot that finds music and documents on VK and generates text",
    version = "0.1.0"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bot
    Run(RunArgs),

    /// Initialize a fresh layout
    Init,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Seconds a conversation may stay idle before it is forgotten
    #[arg(long, default_value = "1800")]
    session_timeout: u64,
    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            session_timeout: 1800,
            log_level: "info".to_string(),
        }
    }
}

/// Resolve the mediabot root directory from the environment or use default.
pub fn resolve_root_dir() -> PathBuf {
    if let Ok(path) = env::var("MEDIABOT_ROOT") {
        PathBuf::from(path)
    } else {
        PathBuf::from("./mediabot")
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            let root = resolve_root_dir();
            run(root, args.session_timeout, args.log_level).await
        }
        Commands::Init => {
            let root = resolve_root_dir();
            cmd_init(&root).await?;
            println!("Initialized mediabot layout at {}", root.display());
            Ok(())
        }
    }
}

async fn run(root: PathBuf, session_timeout: u64, log_level: String) -> anyhow::Result<()> {
    if !root.exists() {
        bail!(
            "Root directory `{}` does not exist. Please run `mediabot init` first.",
            root.display()
        );
    }

    init_tracing(
        &root,
        "logs/mediabot_logs.log",
        "logs/mediabot_events.log",
        &log_level,
    )?;
    info!("mediabot starting up");

    let env_file = root.join("config").join(".env");
    let config_mgr = ConfigManager(EnvConfigManager::new(env_file));

    let mut app = App::new();
    if let Err(err) = app.bootstrap(session_timeout, config_mgr).await {
        error!("Failed to bootstrap mediabot: {:#}", err);
        process::exit(1);
    }

    info!("mediabot running; press Ctrl-C to exit");
    println!("mediabot running; press Ctrl-C to exit");

    app.run().await?;

    println!("\nShutting down…");
    info!("mediabot shutting down");
    app.shutdown();

    Ok(())
}
