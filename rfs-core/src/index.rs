//! Search index collaborator contract

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Result, SyncError};
use crate::metadata::FileMetadata;

/// Secondary, rebuildable view of file metadata used for queries
pub trait SearchIndex: Send + Sync {
    /// Replace the indexed metadata of `key`
    fn index(&self, key: &str, metadata: &FileMetadata) -> Result<()>;
}

/// Index that keeps the latest metadata per key in memory
#[derive(Default)]
pub struct MemoryIndex {
    entries: RwLock<HashMap<String, FileMetadata>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexed metadata of `key`
    pub fn get(&self, key: &str) -> Option<FileMetadata> {
        self.entries.read().ok()?.get(key).cloned()
    }

    /// Keys whose indexed metadata carries the conflict flag, sorted
    pub fn conflicted(&self) -> Vec<String> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, meta)| meta.is_in_conflict())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SearchIndex for MemoryIndex {
    fn index(&self, key: &str, metadata: &FileMetadata) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SyncError::StorageTransaction("index lock poisoned".to_string()))?;
        entries.insert(key.to_string(), metadata.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::keys;

    #[test]
    fn test_index_replaces_entry() {
        let index = MemoryIndex::new();
        let mut meta = FileMetadata::new();
        meta.set("Content-Type", "text/plain");
        index.index("a.txt", &meta).unwrap();

        meta.set("Content-Type", "text/html");
        index.index("a.txt", &meta).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(
            index.get("a.txt").unwrap().get("Content-Type"),
            Some(&"text/html".to_string())
        );
    }

    #[test]
    fn test_conflicted_query() {
        let index = MemoryIndex::new();
        let mut conflicted = FileMetadata::new();
        conflicted.set(keys::CONFLICT, "true");

        index.index("b.txt", &conflicted).unwrap();
        index.index("a.txt", &conflicted).unwrap();
        index.index("c.txt", &FileMetadata::new()).unwrap();

        assert_eq!(index.conflicted(), vec!["a.txt".to_string(), "b.txt".to_string()]);
    }
}
