//! File metadata and version history
//!
//! Every synchronized file carries a string property map. The
//! synchronization properties in [`keys`] hold the revision that produced the
//! file content and the chain of revisions it descends from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, SyncError};

/// Property value
pub type PropertyValue = String;

/// Metadata properties of one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl FileMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a property value
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Set a property value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Remove a property
    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.properties.remove(name)
    }

    /// List all property names
    pub fn list(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Whether the file is flagged as holding an unresolved conflict
    pub fn is_in_conflict(&self) -> bool {
        self.get(keys::CONFLICT).map(|v| v == "true").unwrap_or(false)
    }
}

/// Synchronization property names
pub mod keys {
    /// Version counter of the revision, per origin server
    pub const VERSION: &str = "Rfs-Synchronization-Version";

    /// Id of the server that produced the revision
    pub const SOURCE: &str = "Rfs-Synchronization-Source";

    /// JSON array of ancestor `(server_id, version)` pairs
    pub const HISTORY: &str = "Rfs-Synchronization-History";

    /// Set to `true` while a conflict is outstanding
    pub const CONFLICT: &str = "Rfs-Synchronization-Conflict";

    /// JSON conflict resolution decision
    pub const CONFLICT_RESOLUTION: &str = "Rfs-Synchronization-Conflict-Resolution";

    pub fn is_synchronization_property(name: &str) -> bool {
        name.starts_with("Rfs-Synchronization-")
    }
}

/// One revision of a file as produced by one origin server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryItem {
    pub server_id: String,
    pub version: i64,
}

impl HistoryItem {
    pub fn new(server_id: impl Into<String>, version: i64) -> Self {
        Self {
            server_id: server_id.into(),
            version,
        }
    }
}

/// Bounded retention of version history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPolicy {
    /// Ancestors kept per file; the oldest are dropped first
    pub max_history_len: usize,
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            max_history_len: 50,
        }
    }
}

impl HistoryPolicy {
    /// Drop the oldest entries beyond the bound
    pub fn apply(&self, history: &mut Vec<HistoryItem>) {
        if history.len() > self.max_history_len {
            let excess = history.len() - self.max_history_len;
            history.drain(..excess);
        }
    }
}

/// Revision identity and ancestry of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub server_id: String,
    pub version: i64,
    /// Ancestors, oldest first
    pub history: Vec<HistoryItem>,
}

impl FileVersion {
    pub fn new(server_id: impl Into<String>, version: i64, history: Vec<HistoryItem>) -> Self {
        Self {
            server_id: server_id.into(),
            version,
            history,
        }
    }

    /// Parse the synchronization properties of `metadata`.
    ///
    /// A missing history is an empty chain; a missing or unparsable server
    /// id or version is [`SyncError::InvalidMetadata`].
    pub fn from_metadata(metadata: &FileMetadata) -> Result<Self> {
        let server_id = match metadata.get(keys::SOURCE) {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            Some(_) => {
                return Err(SyncError::InvalidMetadata(format!(
                    "{} is empty",
                    keys::SOURCE
                )));
            }
            None => {
                return Err(SyncError::InvalidMetadata(format!(
                    "{} is missing",
                    keys::SOURCE
                )));
            }
        };

        let raw_version = metadata.get(keys::VERSION).ok_or_else(|| {
            SyncError::InvalidMetadata(format!("{} is missing", keys::VERSION))
        })?;
        let version = raw_version.trim().parse::<i64>().map_err(|e| {
            SyncError::InvalidMetadata(format!(
                "{} value {:?} is not a number: {}",
                keys::VERSION,
                raw_version,
                e
            ))
        })?;

        let history = match metadata.get(keys::HISTORY) {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).map_err(|e| {
                SyncError::InvalidMetadata(format!("{} is not valid: {}", keys::HISTORY, e))
            })?,
            _ => Vec::new(),
        };

        Ok(Self {
            server_id,
            version,
            history,
        })
    }

    /// Write the synchronization properties into `metadata`
    pub fn write_to(&self, metadata: &mut FileMetadata) -> Result<()> {
        metadata.set(keys::SOURCE, self.server_id.clone());
        metadata.set(keys::VERSION, self.version.to_string());
        metadata.set(keys::HISTORY, serde_json::to_string(&self.history)?);
        Ok(())
    }

    /// The revision this version identifies
    pub fn current(&self) -> HistoryItem {
        HistoryItem::new(self.server_id.clone(), self.version)
    }

    /// Same origin and version
    pub fn is_same_revision(&self, other: &FileVersion) -> bool {
        self.server_id == other.server_id && self.version == other.version
    }

    /// Whether `item` is an ancestor of this revision
    pub fn descends_from(&self, item: &HistoryItem) -> bool {
        self.history.contains(item)
    }

    /// Record a write made on `server_id`.
    ///
    /// The current revision moves into history and the version advances past
    /// every version `server_id` has produced along this lineage. Fails with
    /// [`SyncError::InvalidMetadata`], leaving `self` untouched, when the next
    /// version would overflow.
    pub fn record_local_write(&mut self, server_id: &str, policy: &HistoryPolicy) -> Result<()> {
        let previous = self.current();
        let latest_local = self
            .history
            .iter()
            .chain(std::iter::once(&previous))
            .filter(|item| item.server_id == server_id)
            .map(|item| item.version)
            .max()
            .unwrap_or(0);
        let next = latest_local.checked_add(1).ok_or_else(|| {
            SyncError::InvalidMetadata(format!(
                "version {} of {} cannot be advanced",
                latest_local, server_id
            ))
        })?;

        self.history.push(previous);
        policy.apply(&mut self.history);
        self.server_id = server_id.to_string();
        self.version = next;
        Ok(())
    }
}
