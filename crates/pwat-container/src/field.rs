//! Encrypted field stream
//!
//! A field is `len: u32 LE | type: u8 | data[len]`, packed into 16-byte
//! blocks: the first block carries the length, the type and up to 11 data
//! bytes, each further block carries 16 more. Unused bytes of the last block
//! are random. Every block goes through one CBC chain that runs from the
//! envelope IV to the end of the stream, and the plaintext data of every
//! field feeds a single HMAC-SHA256 that is written after the unencrypted
//! end-of-stream sentinel.

use hmac::{Hmac, Mac};
use pwat_core::{PwatError, PwatResult, SecretBytes};
use pwat_crypto::{CbcChain, DataKey, HmacKey, BLOCK_SIZE};
use rand::RngCore;
use sha2::Sha256;
use std::io::{ErrorKind, Read, Write};
use zeroize::{Zeroize, Zeroizing};

use crate::format::{FIRST_BLOCK_DATA, HMAC_LEN, MAX_FIELD_LEN, TERMINAL_BLOCK, TRAILER_LEN};

type HmacSha256 = Hmac<Sha256>;

fn new_mac(key: &HmacKey) -> PwatResult<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|_| PwatError::InvalidState("HMAC key rejected"))
}

/// Number of continuation blocks after the first block of a field.
fn continuation_blocks(len: u32) -> u64 {
    (len as u64)
        .saturating_sub(FIRST_BLOCK_DATA as u64)
        .div_ceil(BLOCK_SIZE as u64)
}

// ── Writer ────────────────────────────────────────────────────────────────────

pub struct FieldWriter<W: Write> {
    inner: W,
    chain: CbcChain,
    mac: HmacSha256,
    fields: u64,
}

impl<W: Write> FieldWriter<W> {
    /// Start a field stream right after an envelope carrying `iv`.
    pub fn new(inner: W, data_key: &DataKey, hmac_key: &HmacKey, iv: &[u8; BLOCK_SIZE]) -> PwatResult<Self> {
        Ok(Self {
            inner,
            chain: CbcChain::new(data_key, iv)?,
            mac: new_mac(hmac_key)?,
            fields: 0,
        })
    }

    pub fn fields_written(&self) -> u64 {
        self.fields
    }

    pub fn write_field(&mut self, ftype: u8, data: &[u8]) -> PwatResult<()> {
        let len = u32::try_from(data.len())
            .ok()
            .filter(|len| *len <= MAX_FIELD_LEN)
            .ok_or_else(|| {
                PwatError::BadRecord(format!("field of {} bytes is too large", data.len()))
            })?;
        self.mac.update(data);

        let mut rng = rand::thread_rng();
        let mut block = [0u8; BLOCK_SIZE];
        block[..4].copy_from_slice(&len.to_le_bytes());
        block[4] = ftype;
        let head = data.len().min(FIRST_BLOCK_DATA);
        block[5..5 + head].copy_from_slice(&data[..head]);
        rng.fill_bytes(&mut block[5 + head..]);
        self.put_block(&mut block)?;

        for part in data[head..].chunks(BLOCK_SIZE) {
            block[..part.len()].copy_from_slice(part);
            rng.fill_bytes(&mut block[part.len()..]);
            self.put_block(&mut block)?;
        }
        block.zeroize();
        self.fields += 1;
        Ok(())
    }

    fn put_block(&mut self, block: &mut [u8; BLOCK_SIZE]) -> PwatResult<()> {
        self.chain.encrypt_block(block);
        self.inner.write_all(block)?;
        Ok(())
    }

    /// Write the sentinel and the HMAC, flush, and hand back the sink.
    pub fn finish(self) -> PwatResult<W> {
        let Self {
            mut inner,
            mac,
            fields,
            ..
        } = self;
        inner.write_all(&TERMINAL_BLOCK)?;
        inner.write_all(&mac.finalize().into_bytes())?;
        inner.flush()?;
        tracing::trace!(fields, "field stream finished");
        Ok(inner)
    }
}

impl<W: Write> std::fmt::Debug for FieldWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldWriter")
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// One decoded field. `data` is `None` when the caller asked for it to be
/// skipped; the bytes were still decrypted and authenticated.
#[derive(Debug)]
pub struct Field {
    pub ftype: u8,
    pub len: u32,
    pub data: Option<SecretBytes>,
}

impl Field {
    /// Field bytes, empty for a skipped field.
    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().map(Vec::as_slice).unwrap_or_default()
    }
}

#[derive(Debug)]
pub enum FieldRead {
    Field(Field),
    /// The end-of-stream sentinel was reached
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Fields,
    /// Sentinel seen, HMAC not yet checked
    Terminated,
    Authenticated,
}

pub struct FieldReader<R: Read> {
    inner: R,
    chain: CbcChain,
    mac: HmacSha256,
    consumed: u64,
    /// Offset of the sentinel when the stream length is known
    limit: Option<u64>,
    state: StreamState,
}

impl<R: Read> FieldReader<R> {
    /// Start reading fields right after an envelope carrying `iv`.
    ///
    /// `stream_len` is the number of bytes from here to the end of the file,
    /// when known. It lets the reader reject a stream whose shape cannot hold
    /// a sentinel and HMAC, and a field whose length runs into the trailer.
    pub fn new(
        inner: R,
        data_key: &DataKey,
        hmac_key: &HmacKey,
        iv: &[u8; BLOCK_SIZE],
        stream_len: Option<u64>,
    ) -> PwatResult<Self> {
        let limit = match stream_len {
            Some(len) => {
                if len < TRAILER_LEN || (len - HMAC_LEN as u64) % BLOCK_SIZE as u64 != 0 {
                    return Err(PwatError::TruncatedStream(format!(
                        "{len} bytes after the envelope is not a whole field stream"
                    )));
                }
                Some(len - TRAILER_LEN)
            }
            None => None,
        };
        Ok(Self {
            inner,
            chain: CbcChain::new(data_key, iv)?,
            mac: new_mac(hmac_key)?,
            consumed: 0,
            limit,
            state: StreamState::Fields,
        })
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Read the next field. With `skip` set, fields whose type is listed in
    /// `skip_types` are authenticated but their data is not returned.
    pub fn read_field(&mut self, skip: bool, skip_types: &[u8]) -> PwatResult<FieldRead> {
        self.next_field(|ftype| !(skip && skip_types.contains(&ftype)))
    }

    fn next_field(&mut self, keep: impl Fn(u8) -> bool) -> PwatResult<FieldRead> {
        if self.state != StreamState::Fields {
            return Err(PwatError::InvalidState("field stream already ended"));
        }
        let start = self.consumed;
        let mut block = [0u8; BLOCK_SIZE];
        match self.read_block(&mut block) {
            Err(PwatError::TruncatedStream(_)) => {
                return Err(PwatError::TruncatedStream(
                    "stream ended without the end-of-stream sentinel".into(),
                ))
            }
            other => other?,
        }

        if block == TERMINAL_BLOCK {
            if self.limit.is_some_and(|limit| start != limit) {
                return Err(PwatError::Integrity(
                    "end-of-stream sentinel before the end of the file".into(),
                ));
            }
            self.state = StreamState::Terminated;
            return Ok(FieldRead::End);
        }
        if self.limit.is_some_and(|limit| start >= limit) {
            return Err(PwatError::Integrity("field found in the trailer".into()));
        }

        self.chain.decrypt_block(&mut block);
        let len = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        let ftype = block[4];
        if len > MAX_FIELD_LEN {
            block.zeroize();
            return Err(PwatError::Integrity(format!("field length {len} out of range")));
        }
        let end = self.consumed + continuation_blocks(len) * BLOCK_SIZE as u64;
        if self.limit.is_some_and(|limit| end > limit) {
            block.zeroize();
            return Err(PwatError::Integrity(format!(
                "field of {len} bytes runs past the end of the stream"
            )));
        }

        let mut data = keep(ftype).then(|| Zeroizing::new(Vec::with_capacity(len as usize)));
        let head = (len as usize).min(FIRST_BLOCK_DATA);
        self.absorb(&block[5..5 + head], data.as_mut());

        let mut remaining = len as usize - head;
        while remaining > 0 {
            self.read_block(&mut block)?;
            self.chain.decrypt_block(&mut block);
            let n = remaining.min(BLOCK_SIZE);
            self.absorb(&block[..n], data.as_mut());
            remaining -= n;
        }
        block.zeroize();

        Ok(FieldRead::Field(Field { ftype, len, data }))
    }

    fn absorb(&mut self, part: &[u8], data: Option<&mut SecretBytes>) {
        self.mac.update(part);
        if let Some(data) = data {
            data.extend_from_slice(part);
        }
    }

    fn read_block(&mut self, block: &mut [u8; BLOCK_SIZE]) -> PwatResult<()> {
        self.inner.read_exact(block).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => PwatError::TruncatedStream("stream ended inside a field".into()),
            _ => PwatError::Io(e),
        })?;
        self.consumed += BLOCK_SIZE as u64;
        Ok(())
    }

    /// Skip everything up to the sentinel. Returns the number of fields skipped.
    pub fn drain(&mut self) -> PwatResult<u64> {
        let mut skipped = 0;
        while self.state == StreamState::Fields {
            if let FieldRead::Field(_) = self.next_field(|_| false)? {
                skipped += 1;
            }
        }
        Ok(skipped)
    }

    /// Check the HMAC that follows the sentinel.
    pub fn verify(&mut self) -> PwatResult<()> {
        match self.state {
            StreamState::Authenticated => return Ok(()),
            StreamState::Fields => return Err(PwatError::InvalidState("field stream not terminated")),
            StreamState::Terminated => {}
        }
        let mut tag = [0u8; HMAC_LEN];
        self.inner.read_exact(&mut tag).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => PwatError::TruncatedStream("missing HMAC".into()),
            _ => PwatError::Io(e),
        })?;
        self.mac
            .clone()
            .verify_slice(&tag)
            .map_err(|_| PwatError::Integrity("HMAC mismatch".into()))?;
        self.state = StreamState::Authenticated;
        Ok(())
    }

    /// Drain the remaining fields and check the HMAC.
    pub fn authenticate(&mut self) -> PwatResult<()> {
        let skipped = self.drain()?;
        if skipped > 0 {
            tracing::trace!(skipped, "drained unread fields");
        }
        self.verify()
    }
}

impl<R: Read> std::fmt::Debug for FieldReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldReader")
            .field("consumed", &self.consumed)
            .field("limit", &self.limit)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
