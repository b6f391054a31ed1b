//! One synchronization round on the destination side
//!
//! Gates an incoming revision through conflict detection and resolution,
//! keeping conflict artifacts in step, then plans the byte transfer from the
//! two signature sets. Fetching `Source` ranges is left to the transport.

use tracing::{debug, info};

use crate::artifact::ConflictArtifactManager;
use crate::conflict::{ConflictDetector, ConflictItem, ConflictResolver};
use crate::error::Result;
use crate::metadata::{FileMetadata, FileVersion};
use crate::need_list::{NeedList, NeedListGenerator};
use crate::signature::SignatureSet;

/// Outcome of comparing the destination's revision with an incoming one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundDecision {
    /// The destination has no copy of the file yet
    NewFile,
    /// Both sides hold the same revision; nothing to transfer
    UpToDate,
    /// The incoming revision descends from the destination's
    FastForward,
    /// The revisions diverged, but a stored decision accepts the remote side
    ResolvedConflict(ConflictItem),
    /// The revisions diverged and must go through conflict handling
    Conflict(ConflictItem),
}

impl RoundDecision {
    /// Whether content may be transferred in this round
    pub fn may_transfer(&self) -> bool {
        matches!(
            self,
            RoundDecision::NewFile | RoundDecision::FastForward | RoundDecision::ResolvedConflict(_)
        )
    }
}

/// Need list plus transfer statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub need_list: NeedList,
    /// Bytes copied from the local seed
    pub seed_bytes: u64,
    /// Bytes fetched from the remote source
    pub source_bytes: u64,
}

impl TransferPlan {
    /// Share of the source served locally, in `[0, 1]`
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.seed_bytes + self.source_bytes;
        if total == 0 {
            return 1.0;
        }
        self.seed_bytes as f64 / total as f64
    }
}

pub struct Synchronizer {
    artifacts: ConflictArtifactManager,
}

impl Synchronizer {
    pub fn new(artifacts: ConflictArtifactManager) -> Self {
        Self { artifacts }
    }

    pub fn artifacts(&self) -> &ConflictArtifactManager {
        &self.artifacts
    }

    /// Decide whether `source` may be applied over `destination`.
    ///
    /// An unresolved conflict creates a conflict artifact; a resolved one
    /// removes it.
    pub fn evaluate(
        &self,
        file_name: &str,
        destination: Option<&FileMetadata>,
        source: &FileMetadata,
    ) -> Result<RoundDecision> {
        let source_version = FileVersion::from_metadata(source)?;
        let Some(destination) = destination else {
            debug!("{} is new on this node", file_name);
            return Ok(RoundDecision::NewFile);
        };
        let destination_version = FileVersion::from_metadata(destination)?;

        let decision = match ConflictDetector::check_versions(&destination_version, &source_version)
        {
            None if destination_version.is_same_revision(&source_version) => {
                RoundDecision::UpToDate
            }
            None => RoundDecision::FastForward,
            Some(conflict) => {
                if ConflictResolver::is_resolved(destination, &conflict)? {
                    self.artifacts.remove_artifact(file_name)?;
                    RoundDecision::ResolvedConflict(conflict)
                } else {
                    self.artifacts.create_artifact(file_name, &conflict)?;
                    RoundDecision::Conflict(conflict)
                }
            }
        };

        debug!("{}: {:?}", file_name, decision);
        Ok(decision)
    }

    /// Plan the transfer of `source` onto a destination holding `seed`
    pub fn plan_transfer(
        &self,
        file_name: &str,
        seed: &SignatureSet,
        source: &SignatureSet,
    ) -> Result<TransferPlan> {
        let need_list = NeedListGenerator::reconcile(seed, source)?;
        let plan = TransferPlan {
            seed_bytes: need_list.seed_bytes(),
            source_bytes: need_list.source_bytes(),
            need_list,
        };

        info!(
            "Planned transfer of {} bytes for {}: {} items, {} bytes local, {} bytes remote",
            source.length,
            file_name,
            plan.need_list.len(),
            plan.seed_bytes,
            plan.source_bytes
        );
        Ok(plan)
    }
}
