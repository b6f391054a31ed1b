//! RFS Core Library
//!
//! Synchronization core of the RFS replicated file store:
//! - Content-defined block signatures (buzhash chunking, SHA-256 blocks)
//! - Signature repository (Fjall, in-memory, LRU-cached)
//! - Need-list reconciliation of a seed against a source signature set
//! - Version history, conflict detection and conflict resolution
//! - Conflict artifacts persisted through transactional storage (SQLite)
//!   and mirrored into a search index
//! - Synchronization round planning and node configuration

pub mod artifact;
pub mod chunker;
pub mod config;
pub mod conflict;
pub mod error;
pub mod index;
pub mod metadata;
pub mod need_list;
pub mod signature;
pub mod signature_repository;
pub mod storage;
pub mod synchronization;

pub use artifact::ConflictArtifactManager;
pub use chunker::{ChunkingConfig, RollingHash, SignatureGenerator};
pub use config::RfsConfig;
pub use conflict::{
    ConflictDetector, ConflictItem, ConflictResolution, ConflictResolutionStrategy,
    ConflictResolver,
};
pub use error::{Result, SyncError};
pub use index::{MemoryIndex, SearchIndex};
pub use metadata::{FileMetadata, FileVersion, HistoryItem, HistoryPolicy};
pub use need_list::{NeedList, NeedListGenerator, NeedListItem};
pub use signature::{BlockSignature, Checksum, SignatureSet};
pub use signature_repository::{
    CachedSignatureRepository, FjallSignatureRepository, MemorySignatureRepository,
    SignatureRepository,
};
pub use storage::{SqliteStorage, StorageActions, TransactionalStorage};
pub use synchronization::{RoundDecision, Synchronizer, TransferPlan};
