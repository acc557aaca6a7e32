//! Live preview server command — `stagehand serve`.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Result, anyhow};
use tracing::info;

use stagehand::config::Config;
use stagehand::orchestrator::OrchestratorCommand;
use stagehand::server::start_server;
use stagehand::storage::load_project;

use super::runtime::{Runtime, server_config};

pub async fn cmd_serve(project_dir: &Path, port: Option<u16>, open: bool, dev: bool) -> Result<ExitCode> {
    let config = Config::new(project_dir.to_path_buf())?;
    let project = load_project(&config.project_dir, &config.toml.ignore)?;
    let kind = config.toml.project_kind()?.unwrap_or(project.kind);
    info!(
        files = project.files.len(),
        kind = %kind,
        "Serving {}",
        config.project_dir.display()
    );

    let runtime = Runtime::new(&config, kind, None)?;
    runtime.check_sandbox().await;
    let _session_tasks = runtime.spawn_session();
    let (commands, _orchestrator_task) = runtime.spawn_orchestrator();
    commands
        .send(OrchestratorCommand::Load {
            files: project.files,
        })
        .await
        .map_err(|_| anyhow!("Orchestrator stopped before the project was loaded"))?;

    let app = runtime.router()?;
    start_server(server_config(&config, port, open, dev), app).await?;
    Ok(ExitCode::SUCCESS)
}
