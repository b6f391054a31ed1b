//! Conflict artifact management
//!
//! A conflict marker is the serialized [`ConflictItem`] stored as
//! configuration under [`conflict_config_key`], plus the conflict flag in the
//! file's metadata. Both change in one storage batch; the search index is
//! refreshed afterwards and may briefly lag the committed state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::conflict::ConflictItem;
use crate::error::Result;
use crate::index::SearchIndex;
use crate::metadata::keys;
use crate::storage::{
    StorageActions, TransactionalStorage, conflict_config_key, load_config_value,
    load_file_metadata,
};

pub struct ConflictArtifactManager {
    storage: Arc<dyn TransactionalStorage>,
    index: Arc<dyn SearchIndex>,
}

impl ConflictArtifactManager {
    pub fn new(storage: Arc<dyn TransactionalStorage>, index: Arc<dyn SearchIndex>) -> Self {
        Self { storage, index }
    }

    /// Persist a conflict marker for `file_name` and flag its metadata.
    ///
    /// Storage failures are returned as-is and not retried.
    pub fn create_artifact(&self, file_name: &str, conflict: &ConflictItem) -> Result<()> {
        let key = conflict_config_key(file_name);
        let value = serde_json::to_string(conflict)?;

        self.storage.batch(&mut |actions: &mut dyn StorageActions| {
            actions.set_config_value(&key, &value)?;
            match actions.get_file_metadata(file_name)? {
                Some(mut metadata) => {
                    metadata.set(keys::CONFLICT, "true");
                    actions.update_file_metadata(file_name, &metadata)
                }
                None => {
                    warn!("Conflict recorded for {} but it has no metadata", file_name);
                    Ok(())
                }
            }
        })?;

        info!(
            "Conflict artifact created for {}: current {}/{} vs remote {}/{}",
            file_name,
            conflict.current.server_id,
            conflict.current.version,
            conflict.remote.server_id,
            conflict.remote.version
        );
        self.reindex(file_name)
    }

    /// Delete the conflict marker of `file_name` and clear its conflict
    /// flag and stored resolution.
    pub fn remove_artifact(&self, file_name: &str) -> Result<()> {
        let key = conflict_config_key(file_name);

        self.storage.batch(&mut |actions: &mut dyn StorageActions| {
            actions.delete_config_value(&key)?;
            if let Some(mut metadata) = actions.get_file_metadata(file_name)? {
                metadata.remove(keys::CONFLICT);
                metadata.remove(keys::CONFLICT_RESOLUTION);
                actions.update_file_metadata(file_name, &metadata)?;
            }
            Ok(())
        })?;

        info!("Conflict artifact removed for {}", file_name);
        self.reindex(file_name)
    }

    /// Stored conflict marker of `file_name`, if any
    pub fn get_artifact(&self, file_name: &str) -> Result<Option<ConflictItem>> {
        match load_config_value(self.storage.as_ref(), &conflict_config_key(file_name))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn reindex(&self, file_name: &str) -> Result<()> {
        match load_file_metadata(self.storage.as_ref(), file_name)? {
            Some(metadata) => self.index.index(file_name, &metadata),
            None => {
                // Deleted concurrently; nothing to index.
                debug!("Skipping re-index of {}: metadata not found", file_name);
                Ok(())
            }
        }
    }
}
