//! Build state machine.
//!
//! `Idle -> Planning -> Streaming(0) -> ... -> Streaming(n) -> Settled`,
//! with `Faulted` reachable from any state. A preempted build simply stops
//! advancing; the next command moves the machine to `Planning` again.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BuildState {
    #[default]
    Idle,
    Planning {
        build_id: Uuid,
    },
    Streaming {
        build_id: Uuid,
        index: usize,
        path: String,
    },
    Settled {
        build_id: Uuid,
    },
    Faulted {
        build_id: Uuid,
        reason: String,
    },
}

impl BuildState {
    pub fn build_id(&self) -> Option<Uuid> {
        match self {
            BuildState::Idle => None,
            BuildState::Planning { build_id }
            | BuildState::Streaming { build_id, .. }
            | BuildState::Settled { build_id }
            | BuildState::Faulted { build_id, .. } => Some(*build_id),
        }
    }

    /// A build is in flight and may still mutate the registry.
    pub fn is_active(&self) -> bool {
        matches!(self, BuildState::Planning { .. } | BuildState::Streaming { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildState::Settled { .. } | BuildState::Faulted { .. })
    }

    /// Short label for progress output.
    pub fn label(&self) -> String {
        match self {
            BuildState::Idle => "idle".to_string(),
            BuildState::Planning { .. } => "planning".to_string(),
            BuildState::Streaming { index, path, .. } => format!("streaming #{} {}", index + 1, path),
            BuildState::Settled { .. } => "settled".to_string(),
            BuildState::Faulted { reason, .. } => format!("faulted: {reason}"),
        }
    }
}

/// When completed work asks the session for a reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootPolicy {
    /// Only once the whole plan has settled.
    #[default]
    Plan,
    /// After every completed file as well.
    File,
}

impl std::str::FromStr for BootPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plan" => Ok(BootPolicy::Plan),
            "file" => Ok(BootPolicy::File),
            _ => anyhow::bail!("Invalid boot policy '{}'. Valid values: plan, file", s),
        }
    }
}

impl std::fmt::Display for BootPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootPolicy::Plan => write!(f, "plan"),
            BootPolicy::File => write!(f, "file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BootReason {
    PlanSettled,
    FileCompleted { path: String },
    SnapshotLoaded,
}

/// A request to (re)boot the sandbox with a specific snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootTicket {
    pub build_id: Uuid,
    pub reason: BootReason,
    pub snapshot: Snapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_with_tag() {
        let state = BuildState::Streaming {
            build_id: Uuid::nil(),
            index: 1,
            path: "src/App.tsx".into(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "streaming");
        assert_eq!(json["index"], 1);
        assert_eq!(serde_json::to_value(BuildState::Idle).unwrap()["state"], "idle");
    }

    #[test]
    fn test_state_predicates() {
        let id = Uuid::new_v4();
        assert!(BuildState::Planning { build_id: id }.is_active());
        assert!(BuildState::Settled { build_id: id }.is_terminal());
        assert!(!BuildState::Idle.is_active());
        assert_eq!(BuildState::Idle.build_id(), None);
        assert_eq!(
            BuildState::Faulted {
                build_id: id,
                reason: "x".into()
            }
            .build_id(),
            Some(id)
        );
    }

    #[test]
    fn test_boot_policy_parse() {
        assert_eq!("FILE".parse::<BootPolicy>().unwrap(), BootPolicy::File);
        assert_eq!("plan".parse::<BootPolicy>().unwrap(), BootPolicy::Plan);
        assert!("always".parse::<BootPolicy>().is_err());
    }
}
