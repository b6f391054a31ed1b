//! Need-list regression tests over large synthetic streams
//!
//! The seed is a copy of the source in which every byte has a 1% chance of
//! carrying one flipped bit.

use std::io::{self, Cursor, Read};

use rfs_core::{ChunkingConfig, NeedListGenerator, SignatureGenerator};

/// Chance, out of 100, that a byte of the seed is modified
const FLIP_PERCENT: u64 = 1;

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

/// Deterministic pseudo-random stream, optionally with flipped bits
struct SyntheticStream {
    data: XorShift,
    flips: Option<XorShift>,
    position: u64,
    length: u64,
}

impl SyntheticStream {
    fn source(length: u64) -> Self {
        Self {
            data: XorShift(0x9E37_79B9_7F4A_7C15),
            flips: None,
            position: 0,
            length,
        }
    }

    fn flipped_copy(length: u64) -> Self {
        Self {
            flips: Some(XorShift(0xD1B5_4A32_D192_ED03)),
            ..Self::source(length)
        }
    }
}

impl Read for SyntheticStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (buf.len() as u64).min(self.length - self.position) as usize;
        for slot in &mut buf[..n] {
            let mut byte = (self.data.next() >> 32) as u8;
            if let Some(rng) = self.flips.as_mut() {
                let roll = rng.next();
                if roll % 100 < FLIP_PERCENT {
                    byte ^= 1 << ((roll >> 32) % 8);
                }
            }
            *slot = byte;
            self.position += 1;
        }
        Ok(n)
    }
}

fn read_all(mut stream: SyntheticStream) -> Vec<u8> {
    let mut data = Vec::new();
    stream.read_to_end(&mut data).unwrap();
    data
}

#[test]
fn test_flipped_copy_changes_one_percent_of_bytes() {
    let length = 8 * 1024 * 1024;
    let source = read_all(SyntheticStream::source(length));
    let seed = read_all(SyntheticStream::flipped_copy(length));
    assert_eq!(source.len(), seed.len());
    let differing = source.iter().zip(&seed).filter(|(a, b)| a != b).count();
    // About 1% of the bytes, within half a percent either way.
    assert!(differing * 200 > source.len(), "differing {}", differing);
    assert!(differing * 200 < source.len() * 3, "differing {}", differing);
    let flipped_bits: u32 = source.iter().zip(&seed).map(|(a, b)| (a ^ b).count_ones()).sum();
    assert_eq!(flipped_bits as usize, differing);
}

#[test]
fn test_bit_flipped_seed_8_mib() {
    let length = 8 * 1024 * 1024;
    let generator = SignatureGenerator::default();
    let source_bytes = read_all(SyntheticStream::source(length));
    let seed_bytes = read_all(SyntheticStream::flipped_copy(length));

    let source = generator.generate(&source_bytes[..]).unwrap();
    let seed = generator.generate(&seed_bytes[..]).unwrap();
    let list = NeedListGenerator::reconcile(&seed, &source).unwrap();

    assert_eq!(list.total_length(), length);
    assert_eq!(list.seed_bytes() + list.source_bytes(), length);
    // With a modified byte every ~100 bytes nearly every block changes.
    assert!(list.source_bytes() * 10 > length * 9, "fetched {}", list.source_bytes());

    let mut rebuilt = Vec::with_capacity(length as usize);
    list.assemble(
        &mut Cursor::new(&seed_bytes),
        |offset, len| {
            let start = offset as usize;
            Ok(source_bytes[start..start + len as usize].to_vec())
        },
        &mut rebuilt,
    )
    .unwrap();
    assert!(rebuilt == source_bytes);
}

#[test]
fn test_bit_flipped_seed_small_blocks() {
    let length = 4 * 1024 * 1024;
    let generator = SignatureGenerator::new(ChunkingConfig::small()).unwrap();
    let source = generator.generate(SyntheticStream::source(length)).unwrap();
    let seed = generator.generate(SyntheticStream::flipped_copy(length)).unwrap();

    let list = NeedListGenerator::reconcile(&seed, &source).unwrap();
    assert_eq!(list.total_length(), length);
    assert!(list.source_bytes() > 0);
    // Some small blocks fall between modified bytes and are reused.
    assert!(list.seed_bytes() > 0);
}

#[test]
#[ignore = "hashes 2 GiB of synthetic data"]
fn test_bit_flipped_seed_1_gib() {
    let length = 1024 * 1024 * 1024;
    let generator = SignatureGenerator::default();
    let source = generator.generate(SyntheticStream::source(length)).unwrap();
    let seed = generator.generate(SyntheticStream::flipped_copy(length)).unwrap();

    let list = NeedListGenerator::reconcile(&seed, &source).unwrap();
    assert_eq!(source.length, length);
    assert_eq!(list.total_length(), length);
    assert_eq!(list.seed_bytes() + list.source_bytes(), length);
}
