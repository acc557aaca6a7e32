//! Typed error hierarchy for the preview runtime.
//!
//! Two top-level enums cover the two failure domains:
//! - `Fault` — anything that goes wrong with the generated program itself
//!   (transform, resolution, startup, runtime). Faults are surfaced to the
//!   host, never propagated as process errors.
//! - `OrchestratorError` — failures of the build pipeline driving the preview
//!   (generator stream, malformed plans, closed channels).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four fault categories a preview can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    Transform,
    Resolution,
    Startup,
    Runtime,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Transform => write!(f, "transform"),
            FaultKind::Resolution => write!(f, "resolution"),
            FaultKind::Startup => write!(f, "startup"),
            FaultKind::Runtime => write!(f, "runtime"),
        }
    }
}

impl std::str::FromStr for FaultKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transform" => Ok(FaultKind::Transform),
            "resolution" => Ok(FaultKind::Resolution),
            "startup" => Ok(FaultKind::Startup),
            "runtime" => Ok(FaultKind::Runtime),
            _ => anyhow::bail!(
                "Invalid fault kind '{}'. Valid values: transform, resolution, startup, runtime",
                s
            ),
        }
    }
}

/// A fault raised by the generated program or by the pipeline preparing it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("Transform fault in {path} at {line}:{column}: {message}")]
    Transform {
        path: String,
        message: String,
        line: usize,
        column: usize,
    },

    #[error("Cannot resolve module '{specifier}' from {from} (attempted {attempted})")]
    Resolution {
        specifier: String,
        from: String,
        attempted: String,
    },

    #[error("Unknown external module '{specifier}' imported from {from}")]
    UnknownExternal { specifier: String, from: String },

    #[error("Entry not found: no module matches '{entry}'")]
    EntryNotFound { entry: String },

    #[error("Entry module {entry} has no default export")]
    MissingDefaultExport { entry: String },

    #[error("Entry module {entry} must default-export a component, found {found}")]
    InvalidDefaultExport { entry: String, found: String },

    #[error("Host document has no mount point with id '{mount_id}'")]
    NoMountPoint { mount_id: String },

    #[error("{message}")]
    Runtime {
        message: String,
        path: Option<String>,
    },
}

impl Fault {
    pub fn kind(&self) -> FaultKind {
        match self {
            Fault::Transform { .. } => FaultKind::Transform,
            Fault::Resolution { .. } | Fault::UnknownExternal { .. } => FaultKind::Resolution,
            Fault::EntryNotFound { .. }
            | Fault::MissingDefaultExport { .. }
            | Fault::InvalidDefaultExport { .. }
            | Fault::NoMountPoint { .. } => FaultKind::Startup,
            Fault::Runtime { .. } => FaultKind::Runtime,
        }
    }

    /// The project path the fault is attributed to, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Fault::Transform { path, .. } => Some(path),
            Fault::Resolution { from, .. } | Fault::UnknownExternal { from, .. } => Some(from),
            Fault::EntryNotFound { entry }
            | Fault::MissingDefaultExport { entry }
            | Fault::InvalidDefaultExport { entry, .. } => Some(entry),
            Fault::NoMountPoint { .. } => None,
            Fault::Runtime { path, .. } => path.as_deref(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Fault::Runtime {
            message: message.into(),
            path: None,
        }
    }

    /// Convert into the outbound signal consumed by the host.
    pub fn to_signal(&self) -> FaultSignal {
        FaultSignal {
            kind: self.kind(),
            message: self.to_string(),
            path: self.path().map(str::to_string),
            occurred_at: Utc::now(),
        }
    }
}

/// The single outbound message type carrying a fault to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultSignal {
    pub kind: FaultKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Errors from the incremental build orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Generator stream for {path} failed: {source}")]
    Generator {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Build plan lists {path} more than once")]
    DuplicatePlanPath { path: String },

    #[error("Invalid project path '{path}'")]
    InvalidPath { path: String },

    #[error("Gateway channel closed")]
    GatewayClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
