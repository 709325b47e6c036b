//! Chunked zlib decompression mirroring [`crate::deflate`]

use flate2::{Decompress, FlushDecompress, Status};
use pwat_core::{PwatError, PwatResult, SecretBytes};
use zeroize::Zeroizing;

use crate::digest::{DigestState, PayloadDigests};

/// One inflate context spanning every chunk of a single attachment.
pub struct Inflater {
    stream: Decompress,
    block_size: u32,
    finished: bool,
    digests: DigestState,
}

impl Inflater {
    pub fn new(block_size: u32) -> Self {
        Self {
            stream: Decompress::new(true),
            block_size,
            finished: false,
            digests: DigestState::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn bytes_out(&self) -> u64 {
        self.digests.uncsize()
    }

    /// Inflate one compressed chunk. `last` must be set for the `LASTDATA`
    /// chunk, which is required to end the zlib stream.
    pub fn decompress_chunk(&mut self, compressed: &[u8], last: bool) -> PwatResult<SecretBytes> {
        if self.finished {
            return Err(PwatError::Compression("data after end of stream".into()));
        }
        // one spare byte so an overlong chunk is detected instead of truncated
        let limit = self.block_size as usize + 1;
        let mut out = Zeroizing::new(Vec::with_capacity(limit));
        let mut consumed = 0usize;

        loop {
            let before = self.stream.total_in();
            let status = self
                .stream
                .decompress_vec(&compressed[consumed..], &mut out, FlushDecompress::None)
                .map_err(|e| PwatError::Compression(format!("inflate: {e}")))?;
            consumed += (self.stream.total_in() - before) as usize;

            match status {
                Status::StreamEnd => {
                    self.finished = true;
                    break;
                }
                Status::Ok | Status::BufError => {
                    if out.len() == out.capacity() {
                        break;
                    }
                    if consumed == compressed.len() {
                        break;
                    }
                    if matches!(status, Status::BufError) {
                        return Err(PwatError::Compression("inflate made no progress".into()));
                    }
                }
            }
        }

        if out.len() > self.block_size as usize {
            return Err(PwatError::Compression(format!(
                "chunk inflates past block size {}",
                self.block_size
            )));
        }
        if consumed != compressed.len() {
            return Err(PwatError::Compression(format!(
                "{} trailing compressed bytes in chunk",
                compressed.len() - consumed
            )));
        }
        if last && !self.finished {
            return Err(PwatError::Compression("last chunk did not end the stream".into()));
        }
        if !last && self.finished {
            return Err(PwatError::Compression("stream ended before the last chunk".into()));
        }

        self.digests.update_compressed(compressed);
        self.digests.update_original(&out);
        Ok(out)
    }

    pub fn finish(self) -> PwatResult<PayloadDigests> {
        if !self.finished {
            return Err(PwatError::Compression("payload ended without stream end".into()));
        }
        Ok(self.digests.finish())
    }
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("block_size", &self.block_size)
            .field("finished", &self.finished)
            .field("bytes_out", &self.digests.uncsize())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocksize::MIN_BLOCK_SIZE;
    use crate::deflate::{deflate_all, Deflater};
    use crate::digest::sha1_of;
    use proptest::prelude::*;

    fn pattern(size: usize) -> Vec<u8> {
        (0..size)
            .map(|i| (i.wrapping_mul(31) ^ (i >> 5)) as u8)
            .collect()
    }

    fn roundtrip(data: &[u8]) -> (Vec<u8>, PayloadDigests, PayloadDigests, usize) {
        let (chunks, written, block_size) = deflate_all(data).unwrap();
        let mut inflater = Inflater::new(block_size);
        let mut out = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let plain = inflater.decompress_chunk(chunk, i + 1 == chunks.len()).unwrap();
            out.extend_from_slice(&plain);
        }
        (out, written, inflater.finish().unwrap(), chunks.len())
    }

    #[test]
    fn boundary_sizes() {
        // a multi-chunk block size is 32 KiB for anything under 1.6 MB
        let bs = MIN_BLOCK_SIZE as usize;
        for (size, chunks) in [(0, 1), (bs - 1, 1), (bs, 1), (bs + 1, 2), (bs * 3 + 1, 4)] {
            let data = pattern(size);
            let (out, written, read, n) = roundtrip(&data);
            assert_eq!(out, data, "size {size}");
            assert_eq!(n, chunks, "chunk count for size {size}");
            assert_eq!(written, read, "digests for size {size}");
            assert_eq!(read.odigest, sha1_of(&data));
            assert_eq!(read.crc, crc32fast::hash(&data));
            assert_eq!(read.uncsize, size as u64);
        }
    }

    #[test]
    fn corrupted_chunk_is_compression_error() {
        let data = pattern(100_000);
        let (mut chunks, _, bs) = deflate_all(&data).unwrap();
        let mid = chunks[0].len() / 2;
        chunks[0][mid] ^= 0xFF;
        chunks[0][0] ^= 0xFF;

        let mut inflater = Inflater::new(bs);
        let err = inflater.decompress_chunk(&chunks[0], false).unwrap_err();
        assert!(matches!(err, PwatError::Compression(_)));
    }

    #[test]
    fn missing_last_chunk_detected() {
        let data = pattern(100_000);
        let (chunks, _, bs) = deflate_all(&data).unwrap();
        assert!(chunks.len() > 1);

        let mut inflater = Inflater::new(bs);
        // treat the first chunk as if it were LASTDATA
        let err = inflater.decompress_chunk(&chunks[0], true).unwrap_err();
        assert!(matches!(err, PwatError::Compression(_)));
    }

    #[test]
    fn finish_before_stream_end_fails() {
        let mut deflater = Deflater::new(70_000);
        let bs = deflater.block_size();
        let (first, last) = deflater.compress_chunk(&pattern(bs as usize)).unwrap();
        assert!(!last);

        let mut inflater = Inflater::new(bs);
        inflater.decompress_chunk(&first, false).unwrap();
        assert!(inflater.finish().is_err());
    }

    #[test]
    fn small_block_size_rejects_overlong_chunk() {
        let data = pattern(1000);
        let (chunks, _, _) = deflate_all(&data).unwrap();
        let mut inflater = Inflater::new(500);
        assert!(inflater.decompress_chunk(&chunks[0], true).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn random_payloads_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..120_000)) {
            let (out, written, read, _) = roundtrip(&data);
            prop_assert_eq!(out, data);
            prop_assert_eq!(written, read);
        }
    }
}
