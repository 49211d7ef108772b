//! Resumable chunk progress.
//!
//! When a run fails after completing some chunks, the orchestrator saves a
//! [`ChunkProgress`] under the run's [`ProgressKey`]. A later invocation with
//! the same key resumes from `completed_chunks` instead of reclassifying
//! finished work; a successful run deletes its checkpoint.
//!
//! [`ProgressStore`] is the seam for backing stores. [`InMemoryProgressStore`]
//! is the default; [`crate::sqlite_store::SqliteProgressStore`] survives
//! process restarts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::models::{DomainGroup, FileGroup, Taxonomy, TokenUsage};

/// Identity of one classification run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgressKey {
    pub analysis_id: String,
    pub language: String,
    pub model: String,
}

impl ProgressKey {
    /// Build the key for a run. Without an analysis id the key falls back to
    /// a content hash of the input so identical inputs share a checkpoint.
    pub fn for_run(analysis_id: &str, language: &str, model: &str, files: &[FileGroup]) -> Self {
        let analysis_id = if analysis_id.trim().is_empty() {
            format!("sha256:{}", content_hash(files))
        } else {
            analysis_id.to_string()
        };
        Self {
            analysis_id,
            language: language.to_string(),
            model: model.to_string(),
        }
    }
}

/// SHA-256 over file paths and test identities, in input order.
pub fn content_hash(files: &[FileGroup]) -> String {
    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(file.path.as_bytes());
        hasher.update([0u8]);
        for test in &file.tests {
            hasher.update(test.index.to_le_bytes());
            hasher.update(test.suite_path.as_bytes());
            hasher.update([0u8]);
            hasher.update(test.name.as_bytes());
            hasher.update([0u8]);
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Checkpoint of a partially completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    /// Chunks `0..completed_chunks` are done; their outputs are below, in order.
    pub completed_chunks: usize,
    /// Validated outputs in global index space, one per completed chunk.
    pub completed_outputs: Vec<Taxonomy>,
    pub anchor_domains: Vec<DomainGroup>,
    pub total_chunks: usize,
    pub total_usage: TokenUsage,
}

/// Get/save/delete of checkpoints by key.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, key: &ProgressKey) -> Result<Option<ChunkProgress>>;

    async fn save(&self, key: &ProgressKey, progress: &ChunkProgress) -> Result<()>;

    async fn delete(&self, key: &ProgressKey) -> Result<()>;
}

/// Process-local checkpoint map. Does not survive restarts.
#[derive(Default)]
pub struct InMemoryProgressStore {
    entries: Mutex<HashMap<ProgressKey, ChunkProgress>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ProgressKey, ChunkProgress>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn get(&self, key: &ProgressKey) -> Result<Option<ChunkProgress>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn save(&self, key: &ProgressKey, progress: &ChunkProgress) -> Result<()> {
        self.lock().insert(key.clone(), progress.clone());
        Ok(())
    }

    async fn delete(&self, key: &ProgressKey) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestCase;

    fn files(name: &str) -> Vec<FileGroup> {
        vec![FileGroup {
            path: "a_test.go".into(),
            tests: vec![TestCase {
                index: 0,
                name: name.into(),
                suite_path: String::new(),
                file_path: "a_test.go".into(),
            }],
        }]
    }

    #[test]
    fn key_prefers_analysis_id() {
        let key = ProgressKey::for_run("run-7", "go", "m", &files("x"));
        assert_eq!(key.analysis_id, "run-7");
    }

    #[test]
    fn key_falls_back_to_content_hash() {
        let a = ProgressKey::for_run("", "go", "m", &files("x"));
        let b = ProgressKey::for_run("  ", "go", "m", &files("x"));
        let c = ProgressKey::for_run("", "go", "m", &files("y"));
        assert!(a.analysis_id.starts_with("sha256:"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn in_memory_roundtrip() {
        let store = InMemoryProgressStore::new();
        let key = ProgressKey::for_run("id", "go", "m", &[]);
        assert!(store.get(&key).await.unwrap().is_none());

        let progress = ChunkProgress {
            completed_chunks: 2,
            total_chunks: 5,
            ..Default::default()
        };
        store.save(&key, &progress).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(progress));

        store.delete(&key).await.unwrap();
        assert!(store.is_empty());
    }
}
