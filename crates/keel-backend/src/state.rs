//! Stack state stores.

use async_trait::async_trait;
use keel_core::Result;
use keel_core::stack::{Stack, StackKind};
use keel_core::state::{StackState, StateStore};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

fn state_key(kind: StackKind, name: &str) -> String {
    format!("{}-{}", kind, name)
}

/// State store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, StackState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, kind: StackKind, name: &str) -> Result<Option<StackState>> {
        Ok(self.states.read().await.get(&state_key(kind, name)).cloned())
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        self.states
            .write()
            .await
            .insert(state.stack.state_key(), state.clone());
        Ok(())
    }

    async fn delete(&self, kind: StackKind, name: &str) -> Result<()> {
        self.states.write().await.remove(&state_key(kind, name));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Stack>> {
        let mut stacks: Vec<Stack> = self
            .states
            .read()
            .await
            .values()
            .map(|s| s.stack.clone())
            .collect();
        stacks.sort_by_key(|s| s.state_key());
        Ok(stacks)
    }
}

/// State store writing one JSON file per stack into a directory.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash never leaves a half-written state file behind.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, kind: StackKind, name: &str) -> Result<Option<StackState>> {
        let path = self.path_for(&state_key(kind, name));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&state.stack.state_key());
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(state)?;

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(stack = %state.stack, path = %path.display(), "Saved stack state");
        Ok(())
    }

    async fn delete(&self, kind: StackKind, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(&state_key(kind, name))).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Stack>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut stacks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let state: StackState = serde_json::from_slice(&bytes)?;
            stacks.push(state.stack);
        }
        stacks.sort_by_key(|s| s.state_key());
        Ok(stacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::contract::OutputValue;
    use keel_core::stack::StackStatus;

    fn sample_state() -> StackState {
        let mut state = StackState::new(Stack::foundation("prod").unwrap());
        state.status = StackStatus::Ready;
        state
            .outputs
            .insert("clusterId".to_string(), OutputValue::Text("cluster-1".to_string()));
        state
    }

    async fn exercise(store: &dyn StateStore) {
        assert!(store.load(StackKind::Foundation, "prod").await.unwrap().is_none());

        store.save(&sample_state()).await.unwrap();
        let app = StackState::new(Stack::application("preview-1", "prod").unwrap());
        store.save(&app).await.unwrap();

        let loaded = store.load(StackKind::Foundation, "prod").await.unwrap().unwrap();
        assert_eq!(loaded.status, StackStatus::Ready);
        assert_eq!(loaded.outputs["clusterId"], OutputValue::Text("cluster-1".to_string()));
        assert!(store.load(StackKind::Application, "prod").await.unwrap().is_none());

        let names: Vec<String> = store.list().await.unwrap().iter().map(|s| s.to_string()).collect();
        assert_eq!(names.len(), 2);

        store.delete(StackKind::Foundation, "prod").await.unwrap();
        store.delete(StackKind::Foundation, "prod").await.unwrap();
        assert!(store.load(StackKind::Foundation, "prod").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryStateStore::new()).await;
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));
        exercise(&store).await;
        assert!(!store.dir().join("foundation-prod.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_lists_nothing_before_first_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("missing"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
