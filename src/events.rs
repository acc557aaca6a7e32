//! Live preview events.
//!
//! Everything observable about a preview (build progress, boots, faults) is
//! published on one broadcast channel. The host server forwards it to
//! WebSocket clients; the CLI renders it as progress.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::errors::FaultSignal;
use crate::orchestrator::BuildState;

/// Capacity of the event channel; slow receivers observe `Lagged`.
pub const EVENT_CAPACITY: usize = 1024;

pub type EventSender = broadcast::Sender<PreviewEvent>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PreviewEvent {
    StateChanged {
        state: BuildState,
    },
    BuildStarted {
        build_id: Uuid,
        paths: Vec<String>,
    },
    /// A planned file exists, still empty.
    FileAnnounced {
        build_id: Uuid,
        index: usize,
        path: String,
    },
    FileChunk {
        build_id: Uuid,
        path: String,
        bytes: usize,
    },
    FileCompleted {
        build_id: Uuid,
        path: String,
        bytes: usize,
    },
    BuildSettled {
        build_id: Uuid,
        files: usize,
    },
    /// A newer command preempted this build; its files stay as written.
    BuildAbandoned {
        build_id: Uuid,
    },
    BuildFaulted {
        build_id: Uuid,
        reason: String,
    },
    SnapshotLoaded {
        build_id: Uuid,
        files: usize,
    },
    BootStarted {
        version: u64,
    },
    BootFinished {
        version: u64,
        rendered: bool,
        faults: usize,
    },
    Fault {
        signal: FaultSignal,
    },
}

pub fn channel() -> (EventSender, broadcast::Receiver<PreviewEvent>) {
    broadcast::channel(EVENT_CAPACITY)
}

/// Publish an event. Returns silently when nobody is listening.
pub fn publish(tx: &EventSender, event: PreviewEvent) {
    if tx.send(event).is_err() {
        trace!("No event subscribers");
    }
}
