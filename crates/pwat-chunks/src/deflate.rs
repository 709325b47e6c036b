//! Chunked zlib compression of one attachment payload
//!
//! A payload larger than the minimum block size is fed through a single
//! persistent deflate context, one `block_size` chunk at a time. Every
//! non-final chunk is sync-flushed so its compressed bytes stand alone as one
//! `DATA` field; the final chunk finishes the stream and becomes `LASTDATA`.
//! Small payloads are compressed in one finishing call.

use flate2::{Compress, Compression, FlushCompress, Status};
use pwat_core::{PwatError, PwatResult, SecretBytes};
use zeroize::Zeroizing;

use crate::blocksize::{block_size_for, chunk_count};
use crate::digest::{DigestState, PayloadDigests};

pub struct Deflater {
    stream: Compress,
    block_size: u32,
    total_chunks: u64,
    chunks_done: u64,
    digests: DigestState,
}

impl Deflater {
    /// Prepare to compress a payload of exactly `file_size` bytes.
    pub fn new(file_size: u64) -> Self {
        let block_size = block_size_for(file_size);
        Self {
            stream: Compress::new(Compression::default(), true),
            block_size,
            total_chunks: chunk_count(file_size, block_size),
            chunks_done: 0,
            digests: DigestState::new(),
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn chunks_done(&self) -> u64 {
        self.chunks_done
    }

    pub fn is_finished(&self) -> bool {
        self.chunks_done == self.total_chunks
    }

    /// Compress the next plaintext chunk. Returns the compressed bytes and
    /// whether this was the last chunk.
    pub fn compress_chunk(&mut self, plain: &[u8]) -> PwatResult<(SecretBytes, bool)> {
        if self.is_finished() {
            return Err(PwatError::Compression("payload already finished".into()));
        }
        if plain.len() as u64 > self.block_size as u64 {
            return Err(PwatError::Compression(format!(
                "chunk of {} bytes exceeds block size {}",
                plain.len(),
                self.block_size
            )));
        }
        let last = self.chunks_done + 1 == self.total_chunks;
        let flush = if last {
            FlushCompress::Finish
        } else {
            FlushCompress::Sync
        };

        let out = self.run(plain, flush)?;
        self.digests.update_original(plain);
        self.digests.update_compressed(&out);
        self.chunks_done += 1;
        tracing::trace!(
            chunk = self.chunks_done,
            plain = plain.len(),
            compressed = out.len(),
            last,
            "deflated chunk"
        );
        Ok((out, last))
    }

    fn run(&mut self, input: &[u8], flush: FlushCompress) -> PwatResult<SecretBytes> {
        // zlib's worst case is a few bytes per 16 KiB block plus framing
        let mut out = Zeroizing::new(Vec::with_capacity(input.len() + input.len() / 8 + 128));
        let mut consumed = 0usize;
        loop {
            if out.len() == out.capacity() {
                grow(&mut out);
            }
            let before = self.stream.total_in();
            let status = self
                .stream
                .compress_vec(&input[consumed..], &mut out, flush)
                .map_err(|e| PwatError::Compression(format!("deflate: {e}")))?;
            consumed += (self.stream.total_in() - before) as usize;

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    let flushing_done = !matches!(flush, FlushCompress::Finish)
                        && consumed == input.len()
                        && out.len() < out.capacity();
                    if flushing_done {
                        break;
                    }
                }
            }
        }
        Ok(out)
    }

    /// Sizes and digests of the payload. Only valid once every chunk has
    /// been compressed.
    pub fn finish(self) -> PwatResult<PayloadDigests> {
        if !self.is_finished() {
            return Err(PwatError::Compression(format!(
                "payload finished after {} of {} chunks",
                self.chunks_done, self.total_chunks
            )));
        }
        Ok(self.digests.finish())
    }
}

/// Double the capacity without leaving an unscrubbed copy behind.
fn grow(buf: &mut SecretBytes) {
    let mut bigger = Zeroizing::new(Vec::with_capacity(buf.capacity().max(64) * 2));
    bigger.extend_from_slice(buf);
    *buf = bigger;
}

impl std::fmt::Debug for Deflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deflater")
            .field("block_size", &self.block_size)
            .field("chunks_done", &self.chunks_done)
            .field("total_chunks", &self.total_chunks)
            .finish()
    }
}

/// Compress a whole in-memory payload, returning the chunks and digests.
pub fn deflate_all(data: &[u8]) -> PwatResult<(Vec<SecretBytes>, PayloadDigests, u32)> {
    let mut deflater = Deflater::new(data.len() as u64);
    let block_size = deflater.block_size();
    let mut chunks = Vec::with_capacity(deflater.total_chunks() as usize);
    if data.is_empty() {
        chunks.push(deflater.compress_chunk(&[])?.0);
    } else {
        for part in data.chunks(block_size as usize) {
            chunks.push(deflater.compress_chunk(part)?.0);
        }
    }
    Ok((chunks, deflater.finish()?, block_size))
}
