//! Configuration view and validation commands — `stagehand config`.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;

use stagehand::config::Config;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<ExitCode> {
    let config = Config::new(project_dir.to_path_buf())?;
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            if config.has_config_file() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No stagehand.toml at {} (defaults)", config_path.display());
            }
            println!("# Effective values, including environment overrides");
            println!();
            print!("{}", config.toml.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
                Ok(ExitCode::FAILURE)
            }
        }
        Some(ConfigCommands::Init) => {
            if config.init_file()? {
                println!("Created stagehand.toml at {}", config_path.display());
                println!();
                println!("You can now customize:");
                println!("  - [project] kind, entry");
                println!("  - [gateway] port, scope, upstream");
                println!("  - [sandbox] command, timeout_secs, mount_id");
                println!("  - [externals] \"package\" = \"globalName\"");
            } else {
                println!("stagehand.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
