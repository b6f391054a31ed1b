//! Need-list generation
//!
//! Reconciles the signatures of the bytes a destination already holds (the
//! seed) with the signatures of the bytes it must end up with (the source),
//! producing an ordered plan of local copies and remote fetches.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::{self, Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::signature::{Checksum, SignatureSet};

/// One step of a transfer plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NeedListItem {
    /// Bytes already present in the local seed at `offset`
    Seed { offset: u64, length: u32 },
    /// Bytes to fetch from the remote source at `offset`
    Source { offset: u64, length: u32 },
}

impl NeedListItem {
    /// Offset on the side the bytes come from
    pub fn offset(&self) -> u64 {
        match *self {
            NeedListItem::Seed { offset, .. } | NeedListItem::Source { offset, .. } => offset,
        }
    }

    pub fn length(&self) -> u32 {
        match *self {
            NeedListItem::Seed { length, .. } | NeedListItem::Source { length, .. } => length,
        }
    }

    pub fn is_seed(&self) -> bool {
        matches!(self, NeedListItem::Seed { .. })
    }

    pub fn is_source(&self) -> bool {
        matches!(self, NeedListItem::Source { .. })
    }

    /// Extend `self` by `next` when both are the same variant, contiguous on
    /// their own side, and the merged length still fits in a `u32`.
    fn try_coalesce(&mut self, next: &NeedListItem) -> bool {
        let (own_offset, own_length, next_offset, next_length) = match (&mut *self, next) {
            (
                NeedListItem::Seed { offset, length },
                NeedListItem::Seed {
                    offset: next_offset,
                    length: next_length,
                },
            )
            | (
                NeedListItem::Source { offset, length },
                NeedListItem::Source {
                    offset: next_offset,
                    length: next_length,
                },
            ) => (*offset, length, *next_offset, *next_length),
            _ => return false,
        };

        if own_offset + u64::from(*own_length) != next_offset {
            return false;
        }
        match own_length.checked_add(next_length) {
            Some(merged) => {
                *own_length = merged;
                true
            }
            None => false,
        }
    }
}

/// Ordered transfer plan covering a whole source stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedList {
    /// Items in source order
    pub items: Vec<NeedListItem>,
    /// Length of the source stream the plan reconstructs
    pub source_length: u64,
}

impl NeedList {
    fn with_source_length(source_length: u64) -> Self {
        Self {
            items: Vec::new(),
            source_length,
        }
    }

    fn push(&mut self, item: NeedListItem) {
        if let Some(last) = self.items.last_mut() {
            if last.try_coalesce(&item) {
                return;
            }
        }
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeedListItem> {
        self.items.iter()
    }

    /// Sum of all item lengths
    pub fn total_length(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.length())).sum()
    }

    /// Bytes that can be copied from the local seed
    pub fn seed_bytes(&self) -> u64 {
        self.items
            .iter()
            .filter(|i| i.is_seed())
            .map(|i| u64::from(i.length()))
            .sum()
    }

    /// Bytes that must be fetched from the remote source
    pub fn source_bytes(&self) -> u64 {
        self.items
            .iter()
            .filter(|i| i.is_source())
            .map(|i| u64::from(i.length()))
            .sum()
    }

    /// Rebuild the source stream into `out`.
    ///
    /// `Seed` items are copied from `seed`; `Source` items are obtained from
    /// `fetch(offset, length)`, which must return exactly `length` bytes.
    /// Returns the number of bytes written.
    pub fn assemble<S, W, F>(&self, seed: &mut S, mut fetch: F, out: &mut W) -> Result<u64>
    where
        S: Read + Seek,
        W: Write,
        F: FnMut(u64, u32) -> Result<Vec<u8>>,
    {
        let mut written = 0u64;
        for item in &self.items {
            match *item {
                NeedListItem::Seed { offset, length } => {
                    seed.seek(SeekFrom::Start(offset))?;
                    let copied = io::copy(&mut seed.by_ref().take(u64::from(length)), out)?;
                    if copied != u64::from(length) {
                        return Err(SyncError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!(
                                "seed ended after {} of {} bytes at offset {}",
                                copied, length, offset
                            ),
                        )));
                    }
                }
                NeedListItem::Source { offset, length } => {
                    let data = fetch(offset, length)?;
                    if data.len() != length as usize {
                        return Err(SyncError::InvalidInput(format!(
                            "fetched {} bytes for source range {}+{}",
                            data.len(),
                            offset,
                            length
                        )));
                    }
                    out.write_all(&data)?;
                }
            }
            written += u64::from(item.length());
        }
        Ok(written)
    }
}

/// Prefix a validation failure with the side it was found on
fn label_invalid(side: &str, e: SyncError) -> SyncError {
    match e {
        SyncError::InvalidInput(msg) => {
            SyncError::InvalidInput(format!("{} signatures: {}", side, msg))
        }
        other => other,
    }
}

/// Builds need lists from two signature sets
pub struct NeedListGenerator;

impl NeedListGenerator {
    /// Plan how to turn the `seed` into the `source`.
    ///
    /// Deterministic and free of I/O. Fails with [`SyncError::InvalidInput`]
    /// when either set is not an ordered, contiguous tiling of its stream.
    pub fn reconcile(seed: &SignatureSet, source: &SignatureSet) -> Result<NeedList> {
        seed.validate().map_err(|e| label_invalid("seed", e))?;
        source.validate().map_err(|e| label_invalid("source", e))?;

        // Duplicate checksums mean identical content; the first occurrence wins.
        let mut lookup: HashMap<Checksum, u64> = HashMap::with_capacity(seed.len());
        for block in &seed.blocks {
            if let Entry::Vacant(slot) = lookup.entry(block.checksum) {
                slot.insert(block.offset);
            }
        }

        let mut list = NeedList::with_source_length(source.length);
        for block in &source.blocks {
            let item = match lookup.get(&block.checksum) {
                Some(&seed_offset) => NeedListItem::Seed {
                    offset: seed_offset,
                    length: block.length,
                },
                None => NeedListItem::Source {
                    offset: block.offset,
                    length: block.length,
                },
            };
            list.push(item);
        }

        debug_assert_eq!(list.total_length(), source.length);
        Ok(list)
    }
}
