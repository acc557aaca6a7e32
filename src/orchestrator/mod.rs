//! Incremental build orchestrator.
//!
//! The orchestrator is the only writer of the [`Registry`]. It consumes a
//! [`BuildPlan`] strictly in order: each planned file is announced empty,
//! then grows chunk by chunk until its stream ends. Every mutation is pushed
//! to the gateway, and completed work is turned into [`BootTicket`]s on a
//! `watch` channel, so a slow sandbox only ever sees the newest request.

pub mod plan;
pub mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::OrchestratorError;
use crate::events::{EventSender, PreviewEvent, publish};
use crate::gateway::GatewayHandle;
use crate::project::ProjectFile;
use crate::registry::{Registry, Snapshot};

pub use plan::{BuildPlan, ChannelSource, ChunkSource, RecordedBuild, RecordedSource, SourceEvent};
pub use state::{BootPolicy, BootReason, BootTicket, BuildState};

/// Work handed to [`Orchestrator::run`]. Each command preempts whatever
/// build is still in flight.
pub enum OrchestratorCommand {
    Build {
        plan: BuildPlan,
        source: Box<dyn ChunkSource>,
    },
    Load {
        files: Vec<ProjectFile>,
    },
}

pub struct Orchestrator {
    registry: Arc<Registry>,
    gateway: GatewayHandle,
    events: EventSender,
    policy: BootPolicy,
    state: watch::Sender<BuildState>,
    boots: watch::Sender<Option<BootTicket>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, gateway: GatewayHandle, events: EventSender) -> Self {
        let (state, _) = watch::channel(BuildState::Idle);
        let (boots, _) = watch::channel(None);
        Self {
            registry,
            gateway,
            events,
            policy: BootPolicy::default(),
            state,
            boots,
        }
    }

    pub fn with_policy(mut self, policy: BootPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn state(&self) -> BuildState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<BuildState> {
        self.state.subscribe()
    }

    /// Newest boot request. Older unconsumed requests are overwritten.
    pub fn boot_requests(&self) -> watch::Receiver<Option<BootTicket>> {
        self.boots.subscribe()
    }

    /// Stream one plan to completion.
    pub async fn run_build(
        &self,
        plan: BuildPlan,
        source: &mut dyn ChunkSource,
    ) -> Result<Snapshot, OrchestratorError> {
        let build_id = Uuid::new_v4();
        self.transition(BuildState::Planning { build_id });

        let paths = plan.validate().map_err(|e| self.fail(build_id, e))?;
        let artifact_paths = plan::canonical_paths(plan.artifacts.iter().map(|a| a.path.as_str()))
            .map_err(|e| self.fail(build_id, e))?;
        info!(build_id = %build_id, files = paths.len(), "Build started");
        publish(
            &self.events,
            PreviewEvent::BuildStarted {
                build_id,
                paths: paths.clone(),
            },
        );

        for (path, artifact) in artifact_paths.iter().zip(&plan.artifacts) {
            self.registry.upsert(path, artifact.content.as_str());
        }
        if !artifact_paths.is_empty() {
            debug!(build_id = %build_id, artifacts = artifact_paths.len(), "Artifacts seeded");
            self.push_files(build_id).await?;
        }

        for (index, path) in paths.iter().enumerate() {
            self.transition(BuildState::Streaming {
                build_id,
                index,
                path: path.clone(),
            });
            self.registry.upsert(path, "");
            self.push_files(build_id).await?;
            publish(
                &self.events,
                PreviewEvent::FileAnnounced {
                    build_id,
                    index,
                    path: path.clone(),
                },
            );

            let mut bytes = 0;
            loop {
                let chunk = match source.next_chunk(path).await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(cause) => {
                        let error = OrchestratorError::Generator {
                            path: path.clone(),
                            source: cause,
                        };
                        return Err(self.fail(build_id, error));
                    }
                };
                bytes += chunk.len();
                self.registry.append(path, &chunk);
                self.push_files(build_id).await?;
                debug!(path = %path, bytes = chunk.len(), "Chunk applied");
                publish(
                    &self.events,
                    PreviewEvent::FileChunk {
                        build_id,
                        path: path.clone(),
                        bytes: chunk.len(),
                    },
                );
            }

            if self.policy == BootPolicy::File {
                self.request_boot(
                    build_id,
                    BootReason::FileCompleted { path: path.clone() },
                    self.registry.snapshot(),
                );
            }
            debug!(path = %path, bytes, "File complete");
            publish(
                &self.events,
                PreviewEvent::FileCompleted {
                    build_id,
                    path: path.clone(),
                    bytes,
                },
            );
        }

        let snapshot = self.registry.snapshot();
        self.transition(BuildState::Settled { build_id });
        publish(
            &self.events,
            PreviewEvent::BuildSettled {
                build_id,
                files: paths.len(),
            },
        );
        self.request_boot(build_id, BootReason::PlanSettled, snapshot.clone());
        Ok(snapshot)
    }

    /// Replace the whole registry at once and go straight to `Settled`.
    pub async fn load_snapshot(&self, files: Vec<ProjectFile>) -> Result<Snapshot, OrchestratorError> {
        let build_id = Uuid::new_v4();
        let paths = plan::canonical_paths(files.iter().map(|f| f.path.as_str()))
            .map_err(|e| self.fail(build_id, e))?;
        let count = paths.len();
        self.registry.replace_all(
            paths
                .into_iter()
                .zip(files)
                .map(|(path, file)| ProjectFile::new(path, file.content)),
        );
        let snapshot = self.push_files(build_id).await?;

        info!(build_id = %build_id, files = count, "Snapshot loaded");
        self.transition(BuildState::Settled { build_id });
        publish(
            &self.events,
            PreviewEvent::SnapshotLoaded {
                build_id,
                files: count,
            },
        );
        self.request_boot(build_id, BootReason::SnapshotLoaded, snapshot.clone());
        Ok(snapshot)
    }

    /// Process commands until the channel closes.
    ///
    /// A command arriving while a build streams abandons that build: its
    /// cursor stops and the files it already wrote stay in the registry.
    pub async fn run(&self, mut commands: mpsc::Receiver<OrchestratorCommand>) {
        let mut pending = commands.recv().await;
        while let Some(command) = pending.take() {
            match command {
                OrchestratorCommand::Load { files } => {
                    if let Err(e) = self.load_snapshot(files).await {
                        warn!(error = %e, "Snapshot load failed");
                    }
                    pending = commands.recv().await;
                }
                OrchestratorCommand::Build { plan, mut source } => {
                    let build = self.run_build(plan, source.as_mut());
                    tokio::pin!(build);
                    let preempted = tokio::select! {
                        result = &mut build => {
                            if let Err(e) = result {
                                warn!(error = %e, "Build failed");
                            }
                            None
                        }
                        next = commands.recv() => Some(next),
                    };
                    match preempted {
                        None => pending = commands.recv().await,
                        Some(Some(next)) => {
                            if let Some(build_id) = self.state().build_id() {
                                info!(build_id = %build_id, "Build abandoned for a newer command");
                                publish(&self.events, PreviewEvent::BuildAbandoned { build_id });
                            }
                            pending = Some(next);
                        }
                        Some(None) => {
                            // No more commands: let the current build finish.
                            if let Err(e) = build.await {
                                warn!(error = %e, "Build failed");
                            }
                        }
                    }
                }
            }
        }
        debug!("Orchestrator command channel closed");
    }

    fn transition(&self, next: BuildState) {
        info!(state = %next.label(), "Build state");
        self.state.send_replace(next.clone());
        publish(&self.events, PreviewEvent::StateChanged { state: next });
    }

    fn fail(&self, build_id: Uuid, error: OrchestratorError) -> OrchestratorError {
        let reason = error.to_string();
        warn!(build_id = %build_id, reason = %reason, "Build faulted");
        self.transition(BuildState::Faulted {
            build_id,
            reason: reason.clone(),
        });
        publish(&self.events, PreviewEvent::BuildFaulted { build_id, reason });
        error
    }

    async fn push_files(&self, build_id: Uuid) -> Result<Snapshot, OrchestratorError> {
        let snapshot = self.registry.snapshot();
        self.gateway
            .replace_files(snapshot.clone())
            .await
            .map_err(|e| self.fail(build_id, e))?;
        Ok(snapshot)
    }

    fn request_boot(&self, build_id: Uuid, reason: BootReason, snapshot: Snapshot) {
        debug!(build_id = %build_id, version = snapshot.version(), ?reason, "Boot requested");
        self.boots.send_replace(Some(BootTicket {
            build_id,
            reason,
            snapshot,
        }));
    }
}
