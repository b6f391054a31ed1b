//! Signature repository
//!
//! Durable keyed storage for signature sets. Writes overwrite by name and
//! are not versioned; each synchronization attempt uses a fresh name.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use fjall::{Database, KeyspaceCreateOptions};
use lru::LruCache;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::signature::SignatureSet;

/// Keyed store of signature sets
pub trait SignatureRepository: Send + Sync {
    /// Store a set under `name`, replacing any previous set with that name
    fn put(&self, name: &str, signatures: &SignatureSet) -> Result<()>;

    /// Read back a set by name
    fn get(&self, name: &str) -> Result<Option<SignatureSet>>;

    /// Discard a set; returns whether it existed
    fn remove(&self, name: &str) -> Result<bool>;

    fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.is_some())
    }
}

fn repo_error(context: &str, e: impl std::fmt::Display) -> SyncError {
    SyncError::SignatureRepository(format!("{}: {}", context, e))
}

/// Signature repository backed by a Fjall keyspace
pub struct FjallSignatureRepository {
    /// Fjall database
    db: Database,

    /// Signature keyspace
    signatures: fjall::Keyspace,
}

impl FjallSignatureRepository {
    /// Open or create a repository at `path`
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let db = Database::builder(path)
            .open()
            .map_err(|e| repo_error("Failed to open signature database", e))?;

        let signatures = db
            .keyspace("signatures", || KeyspaceCreateOptions::default())
            .map_err(|e| repo_error("Failed to open signatures keyspace", e))?;

        Ok(Self { db, signatures })
    }

    /// Persist data to disk
    pub fn persist(&self) -> Result<()> {
        self.db
            .persist(fjall::PersistMode::SyncAll)
            .map_err(|e| repo_error("Failed to persist signature database", e))?;
        Ok(())
    }
}

impl SignatureRepository for FjallSignatureRepository {
    fn put(&self, name: &str, signatures: &SignatureSet) -> Result<()> {
        let data = signatures.encode()?;
        self.signatures
            .insert(name.as_bytes(), data.as_slice())
            .map_err(|e| repo_error("Failed to insert signatures", e))?;
        debug!("Stored {} block signatures as {}", signatures.len(), name);
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<SignatureSet>> {
        match self.signatures.get(name.as_bytes()) {
            Ok(Some(data)) => {
                let bytes: &[u8] = data.as_ref();
                Ok(Some(SignatureSet::decode(bytes)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(repo_error("Failed to read signatures", e)),
        }
    }

    fn remove(&self, name: &str) -> Result<bool> {
        let exists = self
            .signatures
            .get(name.as_bytes())
            .map_err(|e| repo_error("Failed to read signatures", e))?
            .is_some();

        if exists {
            self.signatures
                .remove(name.as_bytes())
                .map_err(|e| repo_error("Failed to remove signatures", e))?;
        }
        Ok(exists)
    }
}

/// In-memory signature repository
#[derive(Default)]
pub struct MemorySignatureRepository {
    sets: RwLock<HashMap<String, SignatureSet>>,
}

impl MemorySignatureRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sets.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> SyncError {
    SyncError::SignatureRepository("repository lock poisoned".to_string())
}

impl SignatureRepository for MemorySignatureRepository {
    fn put(&self, name: &str, signatures: &SignatureSet) -> Result<()> {
        let mut sets = self.sets.write().map_err(|_| poisoned())?;
        sets.insert(name.to_string(), signatures.clone());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<SignatureSet>> {
        let sets = self.sets.read().map_err(|_| poisoned())?;
        Ok(sets.get(name).cloned())
    }

    fn remove(&self, name: &str) -> Result<bool> {
        let mut sets = self.sets.write().map_err(|_| poisoned())?;
        Ok(sets.remove(name).is_some())
    }
}

/// Read-through LRU cache in front of another repository
pub struct CachedSignatureRepository<R> {
    inner: R,
    cache: Mutex<LruCache<String, SignatureSet>>,
}

impl<R: SignatureRepository> CachedSignatureRepository<R> {
    /// Wrap `inner`, keeping up to `capacity` sets in memory (at least one)
    pub fn new(inner: R, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: SignatureRepository> SignatureRepository for CachedSignatureRepository<R> {
    fn put(&self, name: &str, signatures: &SignatureSet) -> Result<()> {
        self.inner.put(name, signatures)?;
        let mut cache = self.cache.lock().map_err(|_| poisoned())?;
        cache.put(name.to_string(), signatures.clone());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<SignatureSet>> {
        {
            let mut cache = self.cache.lock().map_err(|_| poisoned())?;
            if let Some(set) = cache.get(name) {
                return Ok(Some(set.clone()));
            }
        }
        let loaded = self.inner.get(name)?;
        if let Some(set) = &loaded {
            let mut cache = self.cache.lock().map_err(|_| poisoned())?;
            cache.put(name.to_string(), set.clone());
        }
        Ok(loaded)
    }

    fn remove(&self, name: &str) -> Result<bool> {
        {
            let mut cache = self.cache.lock().map_err(|_| poisoned())?;
            cache.pop(name);
        }
        self.inner.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{BlockSignature, Checksum};
    use tempfile::TempDir;

    fn sample_set() -> SignatureSet {
        SignatureSet::new(
            vec![
                BlockSignature::new(0, 4, Checksum::from_data(b"abcd")),
                BlockSignature::new(4, 2, Checksum::from_data(b"ef")),
            ],
            6,
        )
        .unwrap()
    }

    #[test]
    fn test_fjall_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FjallSignatureRepository::open(temp_dir.path()).unwrap();

        repo.put("a.sig", &sample_set()).unwrap();
        assert_eq!(repo.get("a.sig").unwrap(), Some(sample_set()));
        assert!(repo.contains("a.sig").unwrap());
        assert!(repo.get("missing.sig").unwrap().is_none());
    }

    #[test]
    fn test_fjall_overwrite_by_name() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FjallSignatureRepository::open(temp_dir.path()).unwrap();

        repo.put("a.sig", &sample_set()).unwrap();
        repo.put("a.sig", &SignatureSet::empty()).unwrap();
        assert_eq!(repo.get("a.sig").unwrap(), Some(SignatureSet::empty()));
    }

    #[test]
    fn test_fjall_remove() {
        let temp_dir = TempDir::new().unwrap();
        let repo = FjallSignatureRepository::open(temp_dir.path()).unwrap();

        repo.put("a.sig", &sample_set()).unwrap();
        assert!(repo.remove("a.sig").unwrap());
        assert!(!repo.remove("a.sig").unwrap());
        assert!(!repo.contains("a.sig").unwrap());
    }

    #[test]
    fn test_fjall_persistence() {
        let temp_dir = TempDir::new().unwrap();

        let repo = FjallSignatureRepository::open(temp_dir.path()).unwrap();
        repo.put("kept.sig", &sample_set()).unwrap();
        repo.persist().unwrap();
        drop(repo);

        let reopened = FjallSignatureRepository::open(temp_dir.path()).unwrap();
        assert_eq!(reopened.get("kept.sig").unwrap(), Some(sample_set()));
    }

    #[test]
    fn test_memory_repository() {
        let repo = MemorySignatureRepository::new();
        assert!(repo.is_empty());
        repo.put("x", &sample_set()).unwrap();
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.get("x").unwrap(), Some(sample_set()));
        assert!(repo.remove("x").unwrap());
        assert!(repo.get("x").unwrap().is_none());
    }

    #[test]
    fn test_cached_repository_reads_through() {
        let inner = MemorySignatureRepository::new();
        inner.put("warm", &sample_set()).unwrap();
        let cached = CachedSignatureRepository::new(inner, 2);

        assert_eq!(cached.get("warm").unwrap(), Some(sample_set()));
        // Served from cache even after the backing entry is gone.
        cached.inner().remove("warm").unwrap();
        assert_eq!(cached.get("warm").unwrap(), Some(sample_set()));
    }

    #[test]
    fn test_cached_repository_remove_evicts() {
        let cached = CachedSignatureRepository::new(MemorySignatureRepository::new(), 0);
        cached.put("a", &sample_set()).unwrap();
        assert!(cached.remove("a").unwrap());
        assert!(cached.get("a").unwrap().is_none());
    }
}
