//! Recorded build replay — `stagehand replay`.

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Result, anyhow};
use console::style;

use stagehand::config::Config;
use stagehand::orchestrator::{BuildState, OrchestratorCommand, RecordedBuild};
use stagehand::project::ProjectKind;
use stagehand::server::start_server;
use stagehand::surface::Surface;
use stagehand::ui::BuildProgressUI;

use super::print_faults;
use super::runtime::{Runtime, server_config};

pub async fn cmd_replay(
    project_dir: &Path,
    recording_path: &Path,
    delay_ms: Option<u64>,
    serve: bool,
    verbose: bool,
) -> Result<ExitCode> {
    let config = Config::new(project_dir.to_path_buf())?;
    let recording = RecordedBuild::load(recording_path)?;
    let kind = match config.toml.project_kind()? {
        Some(kind) => kind,
        None => ProjectKind::detect(
            recording
                .artifacts
                .iter()
                .map(|a| a.path.as_str())
                .chain(recording.files.iter().map(|f| f.path.as_str())),
        ),
    };
    println!(
        "Replaying {} ({} files, {} chunks, {} project)",
        style(recording_path.display()).bold(),
        recording.files.len(),
        recording.total_chunks(),
        kind
    );

    let delay = Duration::from_millis(delay_ms.unwrap_or(config.toml.build.replay_delay_ms));
    let (plan, source) = recording.into_parts(delay);

    let runtime = Runtime::new(&config, kind, None)?;
    runtime.check_sandbox().await;
    let ui = BuildProgressUI::new(verbose);
    let progress = runtime.events.subscribe();
    let _session_tasks = runtime.spawn_session();
    let (commands, _orchestrator_task) = runtime.spawn_orchestrator();
    commands
        .send(OrchestratorCommand::Build {
            plan,
            source: Box::new(source),
        })
        .await
        .map_err(|_| anyhow!("Orchestrator stopped before the replay started"))?;

    ui.follow(progress).await;
    ui.clear();

    let failed = match (runtime.orchestrator.state(), runtime.session.surface()) {
        (BuildState::Faulted { reason, .. }, _) => {
            eprintln!("{} {}", style("Build faulted:").red().bold(), reason);
            true
        }
        (_, Surface::Faulted { faults, .. }) => {
            print_faults(&faults);
            true
        }
        (_, Surface::Running { version, .. }) => {
            println!("{} snapshot v{}", style("Preview rendered").green().bold(), version);
            false
        }
        (_, surface) => {
            eprintln!("Replay ended without a boot ({})", surface.status());
            true
        }
    };

    if serve {
        let app = runtime.router()?;
        start_server(server_config(&config, None, false, false), app).await?;
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
