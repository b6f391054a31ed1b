//! Content-defined chunking and signature generation
//!
//! Block boundaries are chosen by a buzhash rolling checksum over a small
//! window of the stream. A boundary depends only on the bytes inside the
//! window (plus the min/max block size limits), so an insertion or deletion
//! moves boundaries only near the edit and the rest of the stream keeps its
//! blocks.

use std::io::{ErrorKind, Read};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::signature::{BlockSignature, Checksum, SignatureSet};
use crate::signature_repository::SignatureRepository;

/// Width of the rolling checksum window in bytes
pub const WINDOW_SIZE: usize = 48;

/// Rotation that removes the outgoing byte's contribution
const WINDOW_ROTATION: u32 = (WINDOW_SIZE % 32) as u32;

/// Size of the read buffer used while scanning a stream
const READ_BUFFER_SIZE: usize = 64 * 1024;

const fn build_table() -> [u32; 256] {
    // splitmix64
    let mut table = [0u32; 256];
    let mut state: u64 = 0x5246_5353_4947_4E31;
    let mut i = 0;
    while i < 256 {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        table[i] = z as u32;
        i += 1;
    }
    table
}

static BUZHASH_TABLE: [u32; 256] = build_table();

/// Buzhash over the last [`WINDOW_SIZE`] bytes
#[derive(Clone)]
pub struct RollingHash {
    hash: u32,
    window: [u8; WINDOW_SIZE],
    pos: usize,
    filled: usize,
}

impl RollingHash {
    pub fn new() -> Self {
        Self {
            hash: 0,
            window: [0u8; WINDOW_SIZE],
            pos: 0,
            filled: 0,
        }
    }

    /// Push one byte into the window and return the updated hash
    pub fn roll(&mut self, byte: u8) -> u32 {
        let outgoing = self.window[self.pos];
        self.window[self.pos] = byte;
        self.pos = (self.pos + 1) % WINDOW_SIZE;

        self.hash = self.hash.rotate_left(1) ^ BUZHASH_TABLE[byte as usize];
        if self.filled == WINDOW_SIZE {
            self.hash ^= BUZHASH_TABLE[outgoing as usize].rotate_left(WINDOW_ROTATION);
        } else {
            self.filled += 1;
        }
        self.hash
    }

    /// Current hash value
    pub fn value(&self) -> u32 {
        self.hash
    }
}

impl Default for RollingHash {
    fn default() -> Self {
        Self::new()
    }
}

/// Block size limits for content-defined chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// No boundary is declared before a block reaches this size
    pub min_block_size: u32,
    /// Expected distance between content-defined boundaries past the minimum; power of two
    pub avg_block_size: u32,
    /// A boundary is forced once a block reaches this size
    pub max_block_size: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_block_size: 2 * 1024,
            avg_block_size: 8 * 1024,
            max_block_size: 64 * 1024,
        }
    }
}

impl ChunkingConfig {
    /// Small blocks, for tests and tiny files
    pub fn small() -> Self {
        Self {
            min_block_size: 64,
            avg_block_size: 256,
            max_block_size: 1024,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_block_size == 0 {
            return Err(SyncError::Config(
                "min_block_size must be greater than zero".to_string(),
            ));
        }
        if !self.avg_block_size.is_power_of_two() {
            return Err(SyncError::Config(format!(
                "avg_block_size must be a power of two, got {}",
                self.avg_block_size
            )));
        }
        if self.min_block_size > self.avg_block_size || self.avg_block_size > self.max_block_size {
            return Err(SyncError::Config(format!(
                "block sizes must satisfy min <= avg <= max, got {}/{}/{}",
                self.min_block_size, self.avg_block_size, self.max_block_size
            )));
        }
        Ok(())
    }

    fn boundary_mask(&self) -> u32 {
        self.avg_block_size - 1
    }
}

/// Partitions byte streams into content-defined blocks and fingerprints them.
///
/// The generator is stateless between calls; every `generate` owns its own
/// rolling hash, so one generator can be shared across threads.
#[derive(Debug, Clone)]
pub struct SignatureGenerator {
    config: ChunkingConfig,
    mask: u32,
}

impl SignatureGenerator {
    /// Create a generator, rejecting inconsistent block size limits
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        let mask = config.boundary_mask();
        Ok(Self { config, mask })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Scan `stream` once and return its signature set.
    ///
    /// Fails with [`SyncError::Io`] if the stream cannot be read to the end.
    pub fn generate<R: Read>(&self, mut stream: R) -> Result<SignatureSet> {
        let mut blocks = Vec::new();
        let mut roller = RollingHash::new();
        let mut hasher = Sha256::new();
        let mut block_start = 0u64;
        let mut block_len = 0u32;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let data = &buf[..n];
            let mut segment_start = 0;

            for (i, &byte) in data.iter().enumerate() {
                let hash = roller.roll(byte);
                block_len += 1;
                if self.is_boundary(hash, block_len) {
                    hasher.update(&data[segment_start..=i]);
                    blocks.push(BlockSignature::new(
                        block_start,
                        block_len,
                        Checksum::new(hasher.finalize_reset().into()),
                    ));
                    block_start += u64::from(block_len);
                    block_len = 0;
                    segment_start = i + 1;
                }
            }
            hasher.update(&data[segment_start..]);
        }

        if block_len > 0 {
            blocks.push(BlockSignature::new(
                block_start,
                block_len,
                Checksum::new(hasher.finalize().into()),
            ));
            block_start += u64::from(block_len);
        }

        debug!(
            "Generated {} block signatures for {} bytes",
            blocks.len(),
            block_start
        );

        Ok(SignatureSet {
            blocks,
            length: block_start,
        })
    }

    /// Generate signatures and persist them under `name`.
    ///
    /// The repository overwrites by name; callers use a fresh name per snapshot.
    pub fn generate_and_store<R: Read>(
        &self,
        stream: R,
        name: &str,
        repository: &dyn SignatureRepository,
    ) -> Result<SignatureSet> {
        let set = self.generate(stream)?;
        repository.put(name, &set)?;
        Ok(set)
    }

    /// Generate signatures and persist them under a newly assigned name.
    ///
    /// Returns the name together with the set.
    pub fn generate_and_store_fresh<R: Read>(
        &self,
        stream: R,
        prefix: &str,
        repository: &dyn SignatureRepository,
    ) -> Result<(String, SignatureSet)> {
        let name = format!("{}.{}.sig", prefix, uuid::Uuid::new_v4());
        let set = self.generate_and_store(stream, &name, repository)?;
        Ok((name, set))
    }

    fn is_boundary(&self, hash: u32, block_len: u32) -> bool {
        block_len >= self.config.max_block_size
            || (block_len >= self.config.min_block_size && hash & self.mask == 0)
    }
}

impl Default for SignatureGenerator {
    fn default() -> Self {
        let config = ChunkingConfig::default();
        let mask = config.boundary_mask();
        Self { config, mask }
    }
}
