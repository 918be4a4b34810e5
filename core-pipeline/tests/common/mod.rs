//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::storage::{RemoteEntry, RemoteStore, RemoteTag};
use bridge_traits::time::FixedClock;
use chrono::{TimeZone, Utc};
use core_pipeline::{ImageTransform, PipelineContext, PipelineError};
use core_runtime::config::{Backoff, PipelineConfig, RetryPolicy, SchedulerMode};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ROOT: &str = "Photos";
pub const RAW: &str = "_raw";
pub const UNSORTED: &str = "_unsorted";
pub const MARKER: &str = "ai";

/// Scripted failure for one remote operation
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    ConnectionLost,
    Server,
}

impl Failure {
    fn error(self, operation: &str) -> BridgeError {
        match self {
            Failure::ConnectionLost => {
                BridgeError::ConnectionLost(format!("{}: connection reset", operation))
            }
            Failure::Server => BridgeError::OperationFailed(format!("{}: status 500", operation)),
        }
    }
}

#[derive(Default)]
struct State {
    /// path -> (id, content)
    files: BTreeMap<String, (String, Vec<u8>)>,
    /// path -> id
    dirs: BTreeMap<String, String>,
    tags: HashMap<String, Vec<RemoteTag>>,
    /// directory -> entries listed verbatim after the real ones
    extra_entries: HashMap<String, Vec<RemoteEntry>>,
    failures: HashMap<String, (Failure, u32)>,
    calls: Vec<String>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

/// In-memory remote store with Nextcloud-like semantics
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        let store = Arc::new(Self::default());
        for dir in [ROOT, RAW, UNSORTED] {
            store.add_dir(dir);
        }
        store
    }

    pub fn add_dir(&self, path: &str) -> String {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = state.dirs.get(path) {
            return id.clone();
        }
        let id = state.next_id();
        state.dirs.insert(path.to_string(), id.clone());
        id
    }

    pub fn add_file(&self, path: &str, data: &[u8]) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.files.insert(path.to_string(), (id.clone(), data.to_vec()));
        id
    }

    pub fn add_entry(&self, directory: &str, entry: RemoteEntry) {
        let mut state = self.state.lock().unwrap();
        state
            .extra_entries
            .entry(directory.to_string())
            .or_default()
            .push(entry);
    }

    pub fn tag(&self, item_id: &str, tag_id: &str, display_name: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .tags
            .entry(item_id.to_string())
            .or_default()
            .push(RemoteTag::new(tag_id, display_name));
    }

    pub fn tags_of(&self, item_id: &str) -> Vec<RemoteTag> {
        let state = self.state.lock().unwrap();
        state.tags.get(item_id).cloned().unwrap_or_default()
    }

    /// Fail the next `times` calls of `operation`
    pub fn fail(&self, operation: &str, failure: Failure, times: u32) {
        let mut state = self.state.lock().unwrap();
        state.failures.insert(operation.to_string(), (failure, times));
    }

    pub fn contains(&self, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.files.contains_key(path) || state.dirs.contains_key(path)
    }

    pub fn file_id(&self, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.files.get(path).map(|(id, _)| id.clone())
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.files.get(path).map(|(_, data)| data.clone())
    }

    /// File paths directly inside `directory`
    pub fn files_in(&self, directory: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .files
            .keys()
            .filter(|path| parent(path) == directory)
            .cloned()
            .collect()
    }

    /// Every call as `"<operation> <argument>"`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(' ').next() == Some(operation))
            .count()
    }

    fn begin(&self, operation: &str, argument: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{} {}", operation, argument));

        if let Some((failure, remaining)) = state.failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(failure.error(operation));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self, directory: &str) -> Result<Vec<RemoteEntry>> {
        self.begin("list", directory)?;
        let state = self.state.lock().unwrap();
        if !state.dirs.contains_key(directory) {
            return Err(BridgeError::NotFound(directory.to_string()));
        }

        let dirs = state
            .dirs
            .iter()
            .filter(|(path, _)| parent(path) == directory)
            .map(|(path, id)| (path, id, true));
        let files = state
            .files
            .iter()
            .filter(|(path, _)| parent(path) == directory)
            .map(|(path, (id, _))| (path, id, false));

        let mut entries: Vec<RemoteEntry> = dirs
            .chain(files)
            .map(|(path, id, is_directory)| RemoteEntry {
                path: Some(path.clone()),
                name: Some(basename(path).to_string()),
                is_directory: Some(is_directory),
                id: Some(id.clone()),
                raw: format!("path={} id={}", path, id),
            })
            .collect();
        entries.extend(state.extra_entries.get(directory).cloned().unwrap_or_default());
        Ok(entries)
    }

    async fn get_tags(&self, item_id: &str) -> Result<Vec<RemoteTag>> {
        self.begin("get_tags", item_id)?;
        Ok(self.tags_of(item_id))
    }

    async fn list_all_tags(&self) -> Result<Vec<RemoteTag>> {
        self.begin("list_all_tags", "")?;
        let state = self.state.lock().unwrap();
        let mut all: Vec<RemoteTag> = state.tags.values().flatten().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all.dedup();
        Ok(all)
    }

    async fn move_item(&self, source_path: &str, destination_path: &str) -> Result<()> {
        self.begin("move", source_path)?;
        let mut state = self.state.lock().unwrap();
        if state.files.contains_key(destination_path) {
            return Err(BridgeError::AlreadyExists(destination_path.to_string()));
        }
        if !state.dirs.contains_key(parent(destination_path)) {
            return Err(BridgeError::OperationFailed(format!(
                "409 Conflict: parent of {} missing",
                destination_path
            )));
        }
        let file = state
            .files
            .remove(source_path)
            .ok_or_else(|| BridgeError::NotFound(source_path.to_string()))?;
        state.files.insert(destination_path.to_string(), file);
        Ok(())
    }

    async fn unassign_tag(&self, item_id: &str, tag_id: &str) -> Result<()> {
        self.begin("unassign_tag", item_id)?;
        let mut state = self.state.lock().unwrap();
        if let Some(tags) = state.tags.get_mut(item_id) {
            tags.retain(|tag| tag.id != tag_id);
        }
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        self.begin("download", remote_path)?;
        let data = self
            .content(remote_path)
            .ok_or_else(|| BridgeError::NotFound(remote_path.to_string()))?;
        std::fs::write(local_path, data)?;
        Ok(())
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        self.begin("upload", remote_path)?;
        let data = std::fs::read(local_path)?;
        self.add_file(remote_path, &data);
        Ok(())
    }

    async fn delete(&self, remote_path: &str) -> Result<()> {
        self.begin("delete", remote_path)?;
        let mut state = self.state.lock().unwrap();
        match state.files.remove(remote_path) {
            Some(_) => Ok(()),
            None => Err(BridgeError::NotFound(remote_path.to_string())),
        }
    }

    async fn exists(&self, remote_path: &str) -> Result<bool> {
        self.begin("exists", remote_path)?;
        Ok(self.contains(remote_path))
    }

    async fn create_directory(&self, remote_path: &str) -> Result<()> {
        self.begin("create_directory", remote_path)?;
        let mut current = String::new();
        for segment in remote_path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            self.add_dir(&current);
        }
        Ok(())
    }
}

/// Copies the input to the output
pub struct CopyTransform;

impl ImageTransform for CopyTransform {
    fn apply(&self, input: &Path, output: &Path) -> core_pipeline::Result<()> {
        std::fs::copy(input, output)?;
        Ok(())
    }
}

/// Reports success without writing anything
pub struct SilentTransform;

impl ImageTransform for SilentTransform {
    fn apply(&self, _input: &Path, _output: &Path) -> core_pipeline::Result<()> {
        Ok(())
    }
}

/// Fails like a decoder would on a broken file
pub struct BrokenTransform;

impl ImageTransform for BrokenTransform {
    fn apply(&self, input: &Path, _output: &Path) -> core_pipeline::Result<()> {
        Err(PipelineError::TransformFailed {
            input: input.display().to_string(),
            message: "unsupported image format".to_string(),
        })
    }
}

pub fn config(scratch: &Path, threads_limit: usize) -> PipelineConfig {
    PipelineConfig::builder()
        .images_root_dir(ROOT)
        .raw_dir(RAW)
        .unsorted_dir(UNSORTED)
        .parent_tag(MARKER)
        .raw_prefixes(vec!["raw_".to_string(), "IMG".to_string()])
        .threads_limit(threads_limit)
        .work_dir(scratch.join("tmp"))
        .output_dir(scratch.join("output"))
        .retry_policy(RetryPolicy::bounded(
            3,
            Backoff::Fixed(Duration::from_millis(10)),
        ))
        .scheduler_mode(SchedulerMode::WorkerPool)
        .build()
        .unwrap()
}

pub fn context(
    store: Arc<MemoryStore>,
    transform: Arc<dyn ImageTransform>,
    config: PipelineConfig,
) -> PipelineContext {
    let clock = FixedClock(Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap());
    PipelineContext::new(
        config,
        store,
        Arc::new(TokioFileSystem::new()),
        transform,
        Arc::new(clock),
    )
}
