//! One-shot boot command — `stagehand boot`.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use serde::Serialize;

use stagehand::config::Config;
use stagehand::errors::FaultSignal;
use stagehand::storage::load_project;

use super::print_faults;
use super::runtime::Runtime;

#[derive(Serialize)]
struct BootSummary<'a> {
    version: u64,
    entry: &'a str,
    faults: &'a [FaultSignal],
    document: Option<&'a str>,
}

/// Boot the project directory once. Prints the composed document (or JSON
/// summary) on stdout and faults on stderr; exits with 1 on any fault.
pub async fn cmd_boot(project_dir: &Path, json: bool, entry: Option<&str>) -> Result<ExitCode> {
    let config = Config::new(project_dir.to_path_buf())?;
    let project = load_project(&config.project_dir, &config.toml.ignore)?;
    let kind = config.toml.project_kind()?.unwrap_or(project.kind);

    let runtime = Runtime::new(&config, kind, entry.map(str::to_string))?;
    runtime.registry.replace_all(project.files);
    let mut emitted = runtime.session.subscribe_faults();
    let outcome = runtime.session.boot(&runtime.registry.snapshot()).await;
    let mut signals = Vec::with_capacity(outcome.faults.len());
    while let Ok(signal) = emitted.try_recv() {
        signals.push(signal);
    }

    if json {
        let summary = BootSummary {
            version: outcome.version,
            entry: runtime.session.entry(),
            faults: &signals,
            document: outcome.document.as_deref(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if let Some(document) = &outcome.document {
        println!("{}", document);
    }

    if signals.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        if !json {
            print_faults(&signals);
        }
        Ok(ExitCode::FAILURE)
    }
}
