//! Build plans and the chunk sources that feed them.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::OrchestratorError;
use crate::project::{ProjectFile, normalize_path};

/// Ordered list of files the generator will produce, plus artifacts seeded
/// into the registry before streaming starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub paths: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<ProjectFile>,
}

impl BuildPlan {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.artifacts.push(ProjectFile::new(path, content));
        self
    }

    /// Canonical planned paths; a path that escapes the project or repeats
    /// is rejected.
    pub fn validate(&self) -> Result<Vec<String>, OrchestratorError> {
        canonical_paths(self.paths.iter().map(String::as_str))
    }
}

/// Normalize a list of project paths, rejecting invalid and duplicate ones.
pub fn canonical_paths<'a>(
    paths: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<String>, OrchestratorError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for raw in paths {
        let path = match normalize_path(raw) {
            Some(path) if !path.is_empty() => path,
            _ => {
                return Err(OrchestratorError::InvalidPath {
                    path: raw.to_string(),
                });
            }
        };
        if !seen.insert(path.clone()) {
            return Err(OrchestratorError::DuplicatePlanPath { path });
        }
        out.push(path);
    }
    Ok(out)
}

/// Incremental text for the file currently being generated.
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk of `path`; `None` once that file's stream is exhausted.
    async fn next_chunk(&mut self, path: &str) -> Result<Option<String>>;
}

/// What a live generator sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Chunk(String),
    EndOfFile,
}

/// Chunks delivered over a channel, in plan order.
pub struct ChannelSource {
    rx: mpsc::Receiver<SourceEvent>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<SourceEvent>) -> Self {
        Self { rx }
    }

    pub fn channel(buffer: usize) -> (mpsc::Sender<SourceEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl ChunkSource for ChannelSource {
    async fn next_chunk(&mut self, path: &str) -> Result<Option<String>> {
        match self.rx.recv().await {
            Some(SourceEvent::Chunk(chunk)) => Ok(Some(chunk)),
            Some(SourceEvent::EndOfFile) => Ok(None),
            None => bail!("Generator closed before {} was complete", path),
        }
    }
}

/// One recorded file: its chunks in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedFile {
    pub path: String,
    pub chunks: Vec<String>,
}

/// A generator session captured as JSON, for replaying builds offline.
///
/// ```json
/// { "artifacts": [{ "path": "schema.sql", "content": "..." }],
///   "files": [{ "path": "src/App.tsx", "chunks": ["export ", "default ..."] }] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedBuild {
    #[serde(default)]
    pub artifacts: Vec<ProjectFile>,
    pub files: Vec<RecordedFile>,
}

impl RecordedBuild {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recording: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse recording: {}", path.display()))
    }

    /// Record whole files, each split into chunks of at most `chunk_size`
    /// characters.
    pub fn from_files(files: &[ProjectFile], chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let files = files
            .iter()
            .map(|file| {
                let chars: Vec<char> = file.content.chars().collect();
                RecordedFile {
                    path: file.path.clone(),
                    chunks: chars
                        .chunks(chunk_size)
                        .map(|c| c.iter().collect())
                        .collect(),
                }
            })
            .collect();
        Self {
            artifacts: Vec::new(),
            files,
        }
    }

    pub fn total_chunks(&self) -> usize {
        self.files.iter().map(|f| f.chunks.len()).sum()
    }

    /// Split into the plan and a source replaying the chunks.
    pub fn into_parts(self, delay: Duration) -> (BuildPlan, RecordedSource) {
        let plan = BuildPlan {
            paths: self.files.iter().map(|f| f.path.clone()).collect(),
            artifacts: self.artifacts,
        };
        let source = RecordedSource {
            files: self.files.into_iter().map(|f| f.chunks).collect(),
            file: 0,
            chunk: 0,
            delay,
        };
        (plan, source)
    }
}

/// Replays a [`RecordedBuild`], optionally pausing between chunks.
pub struct RecordedSource {
    files: Vec<Vec<String>>,
    file: usize,
    chunk: usize,
    delay: Duration,
}

#[async_trait]
impl ChunkSource for RecordedSource {
    async fn next_chunk(&mut self, path: &str) -> Result<Option<String>> {
        let Some(chunks) = self.files.get(self.file) else {
            bail!("Recording has no chunks for {}", path);
        };
        match chunks.get(self.chunk) {
            Some(chunk) => {
                let chunk = chunk.clone();
                self.chunk += 1;
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                Ok(Some(chunk))
            }
            None => {
                self.file += 1;
                self.chunk = 0;
                Ok(None)
            }
        }
    }
}
