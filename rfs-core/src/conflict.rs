//! Conflict detection and resolution
//!
//! Decides from version metadata alone whether an incoming revision is the
//! same as, a fast-forward of, or divergent from the destination's revision.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::metadata::{FileMetadata, FileVersion, HistoryItem, keys};

/// A divergence between the destination revision and an incoming one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictItem {
    /// Revision held by the destination
    pub current: HistoryItem,
    /// Incoming revision
    pub remote: HistoryItem,
    /// Ancestry of the incoming revision
    pub remote_history: Vec<HistoryItem>,
}

impl ConflictItem {
    /// Last ancestor of the remote lineage, if any
    pub fn remote_lineage_tip(&self) -> Option<&HistoryItem> {
        self.remote_history.last()
    }
}

/// Which side wins a resolved conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolutionStrategy {
    RemoteVersion,
    CurrentVersion,
}

/// A stored decision for a file's outstanding conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub strategy: ConflictResolutionStrategy,
    /// Server of the remote lineage the decision was made against
    pub remote_server_id: String,
    pub version: i64,
}

impl ConflictResolution {
    pub fn new(
        strategy: ConflictResolutionStrategy,
        remote_server_id: impl Into<String>,
        version: i64,
    ) -> Self {
        Self {
            strategy,
            remote_server_id: remote_server_id.into(),
            version,
        }
    }

    /// Read the stored resolution, if any
    pub fn from_metadata(metadata: &FileMetadata) -> Result<Option<Self>> {
        match metadata.get(keys::CONFLICT_RESOLUTION) {
            None => Ok(None),
            Some(raw) => serde_json::from_str(raw).map(Some).map_err(|e| {
                SyncError::InvalidMetadata(format!(
                    "{} is not valid: {}",
                    keys::CONFLICT_RESOLUTION,
                    e
                ))
            }),
        }
    }

    /// Store this resolution in `metadata`
    pub fn write_to(&self, metadata: &mut FileMetadata) -> Result<()> {
        metadata.set(keys::CONFLICT_RESOLUTION, serde_json::to_string(self)?);
        Ok(())
    }
}

/// Classifies the relationship between two revisions
pub struct ConflictDetector;

impl ConflictDetector {
    /// Compare destination and source metadata.
    ///
    /// Returns `None` when the revisions are identical or the source descends
    /// from the destination; otherwise the conflict. Fails with
    /// [`SyncError::InvalidMetadata`] if either side lacks a parsable version.
    pub fn check(
        destination: &FileMetadata,
        source: &FileMetadata,
    ) -> Result<Option<ConflictItem>> {
        let destination = FileVersion::from_metadata(destination)?;
        let source = FileVersion::from_metadata(source)?;
        Ok(Self::check_versions(&destination, &source))
    }

    /// Same as [`ConflictDetector::check`] on already parsed versions
    pub fn check_versions(destination: &FileVersion, source: &FileVersion) -> Option<ConflictItem> {
        if destination.is_same_revision(source) {
            return None;
        }

        if source.descends_from(&destination.current()) {
            return None;
        }

        Some(ConflictItem {
            current: destination.current(),
            remote: source.current(),
            remote_history: source.history.clone(),
        })
    }
}

/// Decides whether a detected conflict is already settled
pub struct ConflictResolver;

impl ConflictResolver {
    /// A conflict is resolved only by a `RemoteVersion` decision made against
    /// the same remote lineage: the stored server id must equal the server of
    /// the last entry of the conflict's remote history.
    pub fn is_resolved(destination: &FileMetadata, conflict: &ConflictItem) -> Result<bool> {
        let Some(resolution) = ConflictResolution::from_metadata(destination)? else {
            return Ok(false);
        };

        if resolution.strategy != ConflictResolutionStrategy::RemoteVersion {
            return Ok(false);
        }

        Ok(conflict
            .remote_lineage_tip()
            .map(|tip| tip.server_id == resolution.remote_server_id)
            .unwrap_or(false))
    }
}
