use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use stagehand::logging::{self, LogFormat, LogOptions};

mod cmd;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(version, about = "Live preview runtime for generated web projects")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format: pretty, json. Overrides stagehand.toml.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load the project, boot it and serve the live preview
    Serve {
        /// Port to serve on (overrides config and STAGEHAND_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Open the preview in a browser once listening
        #[arg(long)]
        open: bool,

        /// Enable dev mode (permissive CORS)
        #[arg(long)]
        dev: bool,
    },
    /// Boot the project once and print the composed document
    Boot {
        /// Print the boot outcome as JSON instead of the document
        #[arg(long)]
        json: bool,

        /// Entry designator (overrides config and project kind)
        #[arg(long)]
        entry: Option<String>,
    },
    /// Stream a recorded build through the orchestrator, then boot it
    Replay {
        /// Recording in JSON form ({"files": [{"path", "chunks"}]})
        recording: PathBuf,

        /// Pause between chunks in milliseconds (overrides config)
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Keep serving the preview after the replay settles
        #[arg(long)]
        serve: bool,
    },
    /// Print the executable form of one source file
    Transform {
        file: PathBuf,

        /// Print dependencies and exports as JSON as well
        #[arg(long)]
        json: bool,
    },
    /// Resolve an import specifier against the project files
    Resolve {
        /// Project path of the importing module
        from: String,
        specifier: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default stagehand.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // Logging settings may come from the project's config file; a broken
    // file is reported by the command itself.
    let file_config = stagehand::config::Config::new(project_dir.clone()).ok();
    let _log_guard = logging::init(LogOptions {
        verbose: cli.verbose,
        format: cli
            .log_format
            .or_else(|| file_config.as_ref().map(|c| c.toml.logging.format))
            .unwrap_or_default(),
        dir: file_config.as_ref().and_then(|c| c.log_dir()),
    })?;

    match &cli.command {
        Commands::Serve { port, open, dev } => {
            cmd::cmd_serve(&project_dir, *port, *open, *dev).await
        }
        Commands::Boot { json, entry } => {
            cmd::cmd_boot(&project_dir, *json, entry.as_deref()).await
        }
        Commands::Replay {
            recording,
            delay_ms,
            serve,
        } => cmd::cmd_replay(&project_dir, recording, *delay_ms, *serve, cli.verbose).await,
        Commands::Transform { file, json } => cmd::cmd_transform(&project_dir, file, *json),
        Commands::Resolve { from, specifier } => cmd::cmd_resolve(&project_dir, from, specifier),
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone()),
    }
}
