//! Knowledge store implementations.
//!
//! - [`InMemoryStore`] — tests and throwaway sessions.
//! - [`FileStore`] — JSON documents under a data directory. Simple,
//!   portable, human-inspectable; loaded once at conversation start and
//!   written at conversation end, so there is no write amplification to
//!   worry about.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use tiller_core::error::StoreError;
use tiller_core::store::{DecisionPattern, KnowledgeStore, ProjectKnowledge};
use tracing::{debug, warn};

/// Volatile store for tests and ephemeral sessions.
#[derive(Default)]
pub struct InMemoryStore {
    knowledge: Mutex<ProjectKnowledge>,
    patterns: Mutex<Vec<DecisionPattern>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn load_knowledge(&self) -> Result<ProjectKnowledge, StoreError> {
        Ok(self.knowledge.lock().unwrap().clone())
    }

    async fn save_knowledge(&self, knowledge: &ProjectKnowledge) -> Result<(), StoreError> {
        *self.knowledge.lock().unwrap() = knowledge.clone();
        Ok(())
    }

    async fn load_patterns(&self) -> Result<Vec<DecisionPattern>, StoreError> {
        Ok(self.patterns.lock().unwrap().clone())
    }

    async fn save_patterns(&self, patterns: &[DecisionPattern]) -> Result<(), StoreError> {
        *self.patterns.lock().unwrap() = patterns.to_vec();
        Ok(())
    }
}

/// File-backed store: `knowledge.json` and `patterns.json` under a
/// data directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn knowledge_path(&self) -> PathBuf {
        self.dir.join("knowledge.json")
    }

    fn patterns_path(&self) -> PathBuf {
        self.dir.join("patterns.json")
    }

    fn read_or_default<T: Default + serde::de::DeserializeOwned>(
        path: &PathBuf,
    ) -> Result<T, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                debug!(path = %path.display(), "Document absent, starting empty");
                return Ok(T::default());
            }
        };
        serde_json::from_str(&content).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Corrupt store document");
            StoreError::Corrupt(format!("{}: {e}", path.display()))
        })
    }

    fn write<T: serde::Serialize>(&self, path: &PathBuf, value: &T) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| StoreError::Storage(format!("create {}: {e}", self.dir.display())))?;
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| StoreError::Storage(format!("serialize: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| StoreError::Storage(format!("write {}: {e}", path.display())))
    }
}

#[async_trait]
impl KnowledgeStore for FileStore {
    async fn load_knowledge(&self) -> Result<ProjectKnowledge, StoreError> {
        Self::read_or_default(&self.knowledge_path())
    }

    async fn save_knowledge(&self, knowledge: &ProjectKnowledge) -> Result<(), StoreError> {
        self.write(&self.knowledge_path(), knowledge)
    }

    async fn load_patterns(&self) -> Result<Vec<DecisionPattern>, StoreError> {
        Self::read_or_default(&self.patterns_path())
    }

    async fn save_patterns(&self, patterns: &[DecisionPattern]) -> Result<(), StoreError> {
        self.write(&self.patterns_path(), &patterns.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiller_core::store::KnowledgeFact;

    #[tokio::test]
    async fn in_memory_roundtrip() {
        let store = InMemoryStore::new();
        let knowledge = ProjectKnowledge {
            facts: vec![KnowledgeFact::new("uses tokio", "Cargo.toml")],
        };
        store.save_knowledge(&knowledge).await.unwrap();

        let loaded = store.load_knowledge().await.unwrap();
        assert_eq!(loaded.facts.len(), 1);
        assert_eq!(loaded.facts[0].statement, "uses tokio");
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("tiller-store-{}", uuid_ish()));
        let store = FileStore::new(dir.clone());

        let patterns = vec![DecisionPattern::new(
            "rename a function",
            vec!["read_entry".into(), "patch_entry".into()],
            true,
        )];
        store.save_patterns(&patterns).await.unwrap();

        let loaded = store.load_patterns().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].tool_sequence.len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_files_load_as_empty() {
        let dir = std::env::temp_dir().join(format!("tiller-store-{}", uuid_ish()));
        let store = FileStore::new(dir);
        assert!(store.load_knowledge().await.unwrap().facts.is_empty());
        assert!(store.load_patterns().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_document_is_an_error() {
        let dir = std::env::temp_dir().join(format!("tiller-store-{}", uuid_ish()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("knowledge.json"), "not json {{{").unwrap();

        let store = FileStore::new(dir.clone());
        assert!(matches!(
            store.load_knowledge().await,
            Err(StoreError::Corrupt(_))
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    fn uuid_ish() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        format!("{}-{nanos}", std::process::id())
    }
}
