//! Sandbox backed by a Node.js child process.
//!
//! The rendered bundle is piped to `node -` on stdin and the runtime's
//! events are read back from stdout. Each boot is a new process, so every
//! boot starts with an empty module instance cache.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{BootReport, BootRequest, Sandbox, SandboxEvent, bundle};
use crate::errors::Fault;

const STDERR_TAIL_LINES: usize = 8;

#[derive(Debug, Clone)]
pub struct NodeSandbox {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    env: HashMap<String, String>,
}

impl Default for NodeSandbox {
    fn default() -> Self {
        Self {
            command: "node".to_string(),
            args: vec!["-".to_string()],
            timeout: Duration::from_secs(15),
            env: HashMap::new(),
        }
    }
}

impl NodeSandbox {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether the configured interpreter can be started at all.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.command)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Sandbox for NodeSandbox {
    async fn boot(&self, request: BootRequest) -> Result<BootReport> {
        let script = bundle::render(&request)?;
        let entry = request.program.entry.clone();

        debug!(
            command = %self.command,
            entry = %entry,
            modules = request.program.modules.len(),
            "Booting sandbox"
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn sandbox command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .context("Failed to write bundle to sandbox stdin")?;
        }

        // The runtime exits on its own once settled; the timeout only covers
        // programs that keep the event loop busy forever.
        let budget = request.settle + self.timeout;
        let output = match timeout(budget, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for sandbox process")?,
            Err(_) => {
                warn!(entry = %entry, "Sandbox timed out");
                let mut report = BootReport::default();
                report.faults.push(Fault::Runtime {
                    message: format!("Sandbox timed out after {}s", budget.as_secs()),
                    path: None,
                });
                return Ok(report);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut report = BootReport::default();
        let mut settled = false;
        for event in stdout.lines().filter_map(SandboxEvent::parse_line) {
            if event == SandboxEvent::Settled {
                settled = true;
            }
            report.apply(event, &entry);
        }

        if (!output.status.success() || !settled) && report.faults.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            let code = output.status.code().unwrap_or(-1);
            let message = if tail.is_empty() {
                format!("Sandbox exited with code {code}")
            } else {
                format!("Sandbox exited with code {code}: {tail}")
            };
            warn!(entry = %entry, code, "Sandbox exited abnormally");
            report.faults.push(Fault::Runtime {
                message,
                path: None,
            });
        }

        debug!(
            entry = %entry,
            faults = report.faults.len(),
            rendered = report.mount_html.is_some(),
            "Sandbox settled"
        );
        Ok(report)
    }
}
