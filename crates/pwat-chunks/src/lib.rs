//! pwat-chunks: chunked deflate/inflate for attachment payloads
//!
//! # Overview
//! - `blocksize`: chunk size as a function of file size (32 KiB – 256 KiB, 4 KiB aligned)
//! - `deflate`: persistent zlib context, one compressed chunk per `DATA`/`LASTDATA` field
//! - `inflate`: the mirror image, with output bounded by `block_size + 1`
//! - `digest`: CRC32 + SHA-1 over plaintext, SHA-1 over compressed bytes

pub mod blocksize;
pub mod deflate;
pub mod digest;
pub mod inflate;

// Convenience re-exports for the most common operations
pub use blocksize::{block_size_for, chunk_count, is_single_shot, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use deflate::{deflate_all, Deflater};
pub use digest::{sha1_of, DigestState, PayloadDigests};
pub use inflate::Inflater;
