//! Storage collaborator contract
//!
//! File metadata and configuration values are read and written through
//! [`StorageActions`] inside an all-or-nothing [`TransactionalStorage::batch`].
//! [`SqliteStorage`] implements the contract on SQLite in WAL mode.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use crate::error::{Result, SyncError};
use crate::metadata::FileMetadata;

/// Prefix of the configuration key holding a file's conflict marker
pub const CONFLICT_CONFIG_PREFIX: &str = "conflict-for:";

/// Configuration key of the conflict marker for `file_name`
pub fn conflict_config_key(file_name: &str) -> String {
    format!("{}{}", CONFLICT_CONFIG_PREFIX, file_name)
}

/// Operations available inside a storage batch
pub trait StorageActions {
    fn get_file_metadata(&mut self, name: &str) -> Result<Option<FileMetadata>>;

    fn update_file_metadata(&mut self, name: &str, metadata: &FileMetadata) -> Result<()>;

    fn get_config_value(&mut self, key: &str) -> Result<Option<String>>;

    fn set_config_value(&mut self, key: &str, value: &str) -> Result<()>;

    /// Deleting a missing key is not an error
    fn delete_config_value(&mut self, key: &str) -> Result<()>;
}

/// Storage that executes batches atomically
pub trait TransactionalStorage: Send + Sync {
    /// Run `work` in one transaction.
    ///
    /// Everything `work` does is committed together when it returns `Ok`,
    /// and rolled back when it returns an error. The error is passed through.
    fn batch(&self, work: &mut dyn FnMut(&mut dyn StorageActions) -> Result<()>) -> Result<()>;
}

/// Read one file's metadata in its own batch
pub fn load_file_metadata(
    storage: &dyn TransactionalStorage,
    name: &str,
) -> Result<Option<FileMetadata>> {
    let mut found = None;
    storage.batch(&mut |actions: &mut dyn StorageActions| {
        found = actions.get_file_metadata(name)?;
        Ok(())
    })?;
    Ok(found)
}

/// Read one configuration value in its own batch
pub fn load_config_value(storage: &dyn TransactionalStorage, key: &str) -> Result<Option<String>> {
    let mut found = None;
    storage.batch(&mut |actions: &mut dyn StorageActions| {
        found = actions.get_config_value(key)?;
        Ok(())
    })?;
    Ok(found)
}

fn init_db(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS file_metadata (
            name TEXT PRIMARY KEY,
            metadata TEXT NOT NULL
        ) WITHOUT ROWID;
        CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        ) WITHOUT ROWID;",
    )?;
    Ok(())
}

/// SQLite-backed metadata and configuration store
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::StorageTransaction("connection lock poisoned".to_string()))
    }
}

struct SqliteActions<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl StorageActions for SqliteActions<'_> {
    fn get_file_metadata(&mut self, name: &str) -> Result<Option<FileMetadata>> {
        let raw: Option<String> = self
            .tx
            .query_row(
                "SELECT metadata FROM file_metadata WHERE name=?1",
                rusqlite::params![name],
                |r| r.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn update_file_metadata(&mut self, name: &str, metadata: &FileMetadata) -> Result<()> {
        let raw = serde_json::to_string(metadata)?;
        self.tx.execute(
            "INSERT INTO file_metadata (name,metadata) VALUES (?1,?2) \
             ON CONFLICT(name) DO UPDATE SET metadata=excluded.metadata",
            rusqlite::params![name, raw],
        )?;
        Ok(())
    }

    fn get_config_value(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self
            .tx
            .query_row(
                "SELECT value FROM config WHERE key=?1",
                rusqlite::params![key],
                |r| r.get(0),
            )
            .optional()?)
    }

    fn set_config_value(&mut self, key: &str, value: &str) -> Result<()> {
        self.tx.execute(
            "INSERT INTO config (key,value) VALUES (?1,?2) \
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    fn delete_config_value(&mut self, key: &str) -> Result<()> {
        self.tx
            .execute("DELETE FROM config WHERE key=?1", rusqlite::params![key])?;
        Ok(())
    }
}

impl TransactionalStorage for SqliteStorage {
    fn batch(&self, work: &mut dyn FnMut(&mut dyn StorageActions) -> Result<()>) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut actions = SqliteActions { tx: &tx };
            // Dropping `tx` without committing rolls the batch back.
            work(&mut actions)?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_conflict_config_key() {
        assert_eq!(conflict_config_key("docs/a.txt"), "conflict-for:docs/a.txt");
    }

    #[test]
    fn test_metadata_roundtrip() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let mut meta = FileMetadata::new();
        meta.set("Content-Type", "text/plain");

        storage
            .batch(&mut |actions: &mut dyn StorageActions| {
                actions.update_file_metadata("a.txt", &meta)
            })
            .unwrap();

        assert_eq!(load_file_metadata(&storage, "a.txt").unwrap(), Some(meta));
        assert!(load_file_metadata(&storage, "missing.txt").unwrap().is_none());
    }

    #[test]
    fn test_config_set_and_delete() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        storage
            .batch(&mut |actions: &mut dyn StorageActions| {
                actions.set_config_value("k", "v1")?;
                actions.set_config_value("k", "v2")
            })
            .unwrap();
        assert_eq!(load_config_value(&storage, "k").unwrap(), Some("v2".to_string()));

        storage
            .batch(&mut |actions: &mut dyn StorageActions| {
                actions.delete_config_value("k")?;
                actions.delete_config_value("never-set")
            })
            .unwrap();
        assert!(load_config_value(&storage, "k").unwrap().is_none());
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        let result = storage.batch(&mut |actions: &mut dyn StorageActions| {
            actions.set_config_value("k", "v")?;
            actions.update_file_metadata("a.txt", &FileMetadata::new())?;
            Err(SyncError::StorageTransaction("injected".to_string()))
        });
        assert!(matches!(result, Err(SyncError::StorageTransaction(_))));

        assert!(load_config_value(&storage, "k").unwrap().is_none());
        assert!(load_file_metadata(&storage, "a.txt").unwrap().is_none());
    }

    #[test]
    fn test_on_disk_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rfs.sqlite");

        let storage = SqliteStorage::open(&path).unwrap();
        storage
            .batch(&mut |actions: &mut dyn StorageActions| actions.set_config_value("k", "v"))
            .unwrap();
        drop(storage);

        let reopened = SqliteStorage::open(&path).unwrap();
        assert_eq!(load_config_value(&reopened, "k").unwrap(), Some("v".to_string()));
    }
}
