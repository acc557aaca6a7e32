//! Virtual module registry.
//!
//! An injectable, in-memory store mapping project paths to their current
//! (possibly partial) source text. Readers take a [`Snapshot`], an immutable
//! `Arc`-backed view; writers swap the shared map under a lock, cloning it
//! only when a reader still holds the previous version. Every operation is
//! therefore atomic from a reader's perspective: a snapshot never mixes two
//! updates.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::project::ProjectFile;

/// Immutable point-in-time view of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: Arc<BTreeMap<String, String>>,
    version: u64,
}

impl Snapshot {
    pub fn from_files(files: impl IntoIterator<Item = ProjectFile>) -> Self {
        Self {
            files: Arc::new(files.into_iter().map(|f| (f.path, f.content)).collect()),
            version: 0,
        }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Monotonic version; bumped by every registry mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn to_files(&self) -> Vec<ProjectFile> {
        self.iter().map(|(p, c)| ProjectFile::new(p, c)).collect()
    }
}

/// Single-writer, multi-reader registry of project files.
#[derive(Debug, Default)]
pub struct Registry {
    current: RwLock<Snapshot>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace one entry, creating it if absent.
    pub fn upsert(&self, path: &str, content: impl Into<String>) -> u64 {
        let content = content.into();
        self.mutate(|files| {
            files.insert(path.to_string(), content);
        })
    }

    /// Append a streamed chunk to an entry, creating it if absent.
    pub fn append(&self, path: &str, chunk: &str) -> u64 {
        self.mutate(|files| {
            files.entry(path.to_string()).or_default().push_str(chunk);
        })
    }

    pub fn remove(&self, path: &str) -> u64 {
        self.mutate(|files| {
            files.remove(path);
        })
    }

    /// Swap the whole snapshot at once.
    pub fn replace_all(&self, files: impl IntoIterator<Item = ProjectFile>) -> u64 {
        let replacement: BTreeMap<String, String> =
            files.into_iter().map(|f| (f.path, f.content)).collect();
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        guard.version += 1;
        guard.files = Arc::new(replacement);
        guard.version
    }

    pub fn snapshot(&self) -> Snapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.snapshot().get(path).map(str::to_string)
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    fn mutate(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        apply(Arc::make_mut(&mut guard.files));
        guard.version += 1;
        guard.version
    }
}
