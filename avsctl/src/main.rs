//! avsctl: operate dockerized AVS instances and their backups.

use avsctl::commands;
use avsctl::utils::logger;
use avsctl::Config;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG_PATH: &str = "/etc/avsctl/config.toml";

#[derive(Parser, Debug)]
#[command(name = "avsctl", version, about = "Operate dockerized AVS instances")]
struct Args {
    /// Path to the configuration file. Without this flag the default path
    /// is used when present, built-in defaults otherwise.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data directory from the config file.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level filter, overriding the config file.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage deployed instances.
    #[command(subcommand)]
    Instance(InstanceCommand),

    /// Create and inspect backups.
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Run a one-off container on an instance's network.
    Run {
        /// Instance whose network the container joins.
        instance_id: String,
        /// Image to run.
        image: String,
        /// Arguments passed to the container.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum InstanceCommand {
    /// List deployed instances.
    List,
    /// Start an instance's services.
    Up { instance_id: String },
    /// Stop an instance's services.
    Stop { instance_id: String },
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
    /// Back up an instance into a new archive.
    Create { instance_id: String },
    /// List backup archives.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.is_file() {
                Config::from_file(default_path)?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env();
    if let Some(data_dir) = args.data_dir {
        config.general.data_dir = data_dir;
    }
    if let Some(level) = args.log_level {
        config.general.log_level = level;
    }

    logger::init(&config.general.log_level)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.general.data_dir.display(),
        "avsctl starting"
    );

    // One interrupt cancels gracefully; in-flight containers are still
    // removed before commands return.
    let cancel = CancellationToken::new();
    let interrupt_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            interrupt_cancel.cancel();
        }
    });

    match args.command {
        Command::Instance(cmd) => match cmd {
            InstanceCommand::List => commands::instance::list(&config),
            InstanceCommand::Up { instance_id } => {
                commands::instance::up(&config, &instance_id).await
            }
            InstanceCommand::Stop { instance_id } => {
                commands::instance::stop(&config, &instance_id).await
            }
        },
        Command::Backup(cmd) => match cmd {
            BackupCommand::Create { instance_id } => {
                commands::backup::create(&config, &instance_id, cancel).await
            }
            BackupCommand::List => commands::backup::list(&config),
        },
        Command::Run {
            instance_id,
            image,
            args,
        } => commands::run::run(&config, &instance_id, &image, args, cancel).await,
    }
}
