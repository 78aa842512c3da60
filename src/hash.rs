// src/hash.rs

//! Content checksums for data files
//!
//! Manifest checksums are lowercase hex SHA-256 digests of a file's bytes.
//! Files are always streamed through the hasher in fixed-size chunks so
//! memory use does not depend on file size.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Chunk size used for every streaming copy in the crate (32 KiB)
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Incremental SHA-256 hasher producing lowercase hex digests
#[derive(Default)]
pub struct Hasher {
    state: Sha256,
}

impl Hasher {
    /// Create a new hasher
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        hex::encode(self.state.finalize())
    }
}

/// Compute the SHA-256 hex digest of a byte slice
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Compute the SHA-256 hex digest of everything readable from `reader`
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Compute the SHA-256 hex digest of a file
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    hash_reader(&mut file)
}

/// Compare a recorded checksum against an actual digest
///
/// Both sides must be lowercase hex; the manifest parser lowercases
/// recorded values.
pub fn checksums_match(recorded: &str, actual: &str) -> bool {
    recorded == actual
}
