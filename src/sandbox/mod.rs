//! Sandbox boot contract.
//!
//! A sandbox is handed a [`LinkedProgram`] and renders its entry into the
//! single mount point of the host document. Every sandbox boot starts a
//! fresh module instance graph; nothing survives between boots.

pub mod bundle;
pub mod node;
pub mod shell;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{Fault, FaultKind};
use crate::loader::LinkedProgram;

pub use node::NodeSandbox;
pub use shell::{DocumentElement, HostDocument};

/// Everything one boot needs.
#[derive(Debug, Clone)]
pub struct BootRequest {
    pub program: LinkedProgram,
    pub mount_id: String,
    /// Elements of the host document the runtime's DOM shim exposes.
    pub elements: Vec<DocumentElement>,
    /// How long to wait for asynchronous work after the first render.
    pub settle: Duration,
}

/// A stylesheet registered by a stylesheet module while booting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleSheet {
    pub path: String,
    pub css: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub level: String,
    pub message: String,
}

/// Outcome of one boot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    /// Markup rendered into the mount point, if rendering got that far.
    pub mount_html: Option<String>,
    pub styles: Vec<StyleSheet>,
    pub faults: Vec<Fault>,
    pub logs: Vec<ConsoleLine>,
}

impl BootReport {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }

    /// Fold one runtime event into the report.
    pub fn apply(&mut self, event: SandboxEvent, entry: &str) {
        match event {
            SandboxEvent::Rendered { html } => self.mount_html = Some(html),
            SandboxEvent::Style { path, css } => {
                match self.styles.iter_mut().find(|s| s.path == path) {
                    Some(existing) => existing.css = css,
                    None => self.styles.push(StyleSheet { path, css }),
                }
            }
            SandboxEvent::Log { level, message } => self.logs.push(ConsoleLine { level, message }),
            SandboxEvent::Fault {
                kind,
                message,
                path,
            } => {
                let fault = match kind {
                    FaultKind::Startup => Fault::InvalidDefaultExport {
                        entry: path.unwrap_or_else(|| entry.to_string()),
                        found: message,
                    },
                    _ => Fault::Runtime { message, path },
                };
                if !self.faults.contains(&fault) {
                    self.faults.push(fault);
                }
            }
            SandboxEvent::Settled => {}
        }
    }
}

/// Newline-delimited JSON events written by the sandbox runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SandboxEvent {
    Rendered {
        html: String,
    },
    Style {
        path: String,
        css: String,
    },
    Log {
        level: String,
        message: String,
    },
    Fault {
        kind: FaultKind,
        message: String,
        #[serde(default)]
        path: Option<String>,
    },
    Settled,
}

impl SandboxEvent {
    /// Parse one output line; lines that are not events yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn boot(&self, request: BootRequest) -> anyhow::Result<BootReport>;
}
