//! Incremental payload digests: CRC32 + SHA-1 over plaintext, SHA-1 over compressed bytes

use pwat_core::SHA1_LEN;
use sha1::{Digest, Sha1};

/// Sizes and digests of one attachment payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadDigests {
    pub uncsize: u64,
    pub cmpsize: u64,
    pub crc: u32,
    /// SHA-1 of the original (uncompressed) bytes
    pub odigest: [u8; SHA1_LEN],
    /// SHA-1 of the concatenated compressed chunks
    pub cdigest: [u8; SHA1_LEN],
}

#[derive(Clone, Default)]
pub struct DigestState {
    crc: crc32fast::Hasher,
    original: Sha1,
    compressed: Sha1,
    uncsize: u64,
    cmpsize: u64,
}

impl DigestState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_original(&mut self, plain: &[u8]) {
        self.crc.update(plain);
        self.original.update(plain);
        self.uncsize += plain.len() as u64;
    }

    pub fn update_compressed(&mut self, compressed: &[u8]) {
        self.compressed.update(compressed);
        self.cmpsize += compressed.len() as u64;
    }

    pub fn uncsize(&self) -> u64 {
        self.uncsize
    }

    pub fn cmpsize(&self) -> u64 {
        self.cmpsize
    }

    pub fn finish(self) -> PayloadDigests {
        PayloadDigests {
            uncsize: self.uncsize,
            cmpsize: self.cmpsize,
            crc: self.crc.finalize(),
            odigest: self.original.finalize().into(),
            cdigest: self.compressed.finalize().into(),
        }
    }
}

impl std::fmt::Debug for DigestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestState")
            .field("uncsize", &self.uncsize)
            .field("cmpsize", &self.cmpsize)
            .finish()
    }
}

/// SHA-1 of a complete buffer
pub fn sha1_of(data: &[u8]) -> [u8; SHA1_LEN] {
    Sha1::digest(data).into()
}
