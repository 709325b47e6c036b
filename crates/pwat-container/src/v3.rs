//! Version 3 container file

use pwat_core::{AttachmentRecord, ContainerHeader, PwatError, PwatResult};
use secrecy::SecretString;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::container::ContainerFile;
use crate::envelope::{read_envelope, write_envelope};
use crate::field::{FieldReader, FieldWriter, StreamState};
use crate::format::{ENVELOPE_LEN, TERMINAL_BLOCK, TRAILER_LEN};
use crate::header::{read_header, write_header};
use crate::record::{DataChunk, RecordCodec, RecordPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

enum Stream {
    Closed,
    Reading(FieldReader<BufReader<File>>),
    Writing(FieldWriter<BufWriter<File>>),
}

#[derive(Debug)]
pub struct V3Container {
    path: PathBuf,
    mode: Mode,
    header: ContainerHeader,
    stream: Stream,
    records: RecordCodec,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stream::Closed => f.write_str("Closed"),
            Stream::Reading(r) => std::fmt::Debug::fmt(r, f),
            Stream::Writing(w) => std::fmt::Debug::fmt(w, f),
        }
    }
}

impl V3Container {
    /// A container to be read from `path`. The header is known after `open`.
    pub fn for_read(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: Mode::Read,
            header: empty_header(),
            stream: Stream::Closed,
            records: RecordCodec::new(),
        }
    }

    /// A new container to be created at `path`, which must not exist yet.
    /// `header.iterations` sets the key-stretch work factor.
    pub fn for_write(path: impl Into<PathBuf>, header: ContainerHeader) -> Self {
        Self {
            path: path.into(),
            mode: Mode::Write,
            header,
            stream: Stream::Closed,
            records: RecordCodec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn open_read(&mut self, passphrase: &SecretString) -> PwatResult<()> {
        let mut file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let envelope = read_envelope(&mut file, passphrase)?;

        let stream_len = file_len.saturating_sub(ENVELOPE_LEN);
        if stream_len >= TRAILER_LEN {
            // a damaged sentinel cannot be told apart from a cut-off file
            file.seek(SeekFrom::Start(file_len - TRAILER_LEN))?;
            let mut sentinel = [0u8; TERMINAL_BLOCK.len()];
            file.read_exact(&mut sentinel)?;
            if sentinel != TERMINAL_BLOCK {
                return Err(PwatError::TruncatedStream(format!(
                    "no end-of-stream sentinel in {}",
                    self.path.display()
                )));
            }
            file.seek(SeekFrom::Start(ENVELOPE_LEN))?;
        }

        let reader = FieldReader::new(
            BufReader::new(file),
            &envelope.data_key,
            &envelope.hmac_key,
            &envelope.iv,
            Some(stream_len),
        )?;
        self.stream = Stream::Reading(reader);
        self.records = RecordCodec::new();

        let header = match read_header(reading(&mut self.stream)?, envelope.iterations) {
            Ok(header) => header,
            Err(err) => return Err(self.authenticated(err)),
        };
        debug!(
            path = %self.path.display(),
            db_uuid = %header.db_uuid,
            major = header.version.major,
            minor = header.version.minor,
            "container opened for read"
        );
        self.header = header;
        Ok(())
    }

    fn open_write(&mut self, passphrase: &SecretString) -> PwatResult<()> {
        let file = OpenOptions::new().write(true).create_new(true).open(&self.path)?;
        let mut out = BufWriter::new(file);
        let envelope = write_envelope(&mut out, passphrase, self.header.iterations)?;
        let mut writer = FieldWriter::new(out, &envelope.data_key, &envelope.hmac_key, &envelope.iv)?;
        write_header(&mut writer, &self.header)?;
        self.stream = Stream::Writing(writer);
        self.records = RecordCodec::new();
        debug!(path = %self.path.display(), "container opened for write");
        Ok(())
    }
}

fn reading(stream: &mut Stream) -> PwatResult<&mut FieldReader<BufReader<File>>> {
    match stream {
        Stream::Reading(r) => Ok(r),
        Stream::Writing(_) => Err(PwatError::InvalidState("container is open for writing")),
        Stream::Closed => Err(PwatError::InvalidState("container is not open")),
    }
}

fn writing(stream: &mut Stream) -> PwatResult<&mut FieldWriter<BufWriter<File>>> {
    match stream {
        Stream::Writing(w) => Ok(w),
        Stream::Reading(_) => Err(PwatError::InvalidState("container is open for reading")),
        Stream::Closed => Err(PwatError::InvalidState("container is not open")),
    }
}

fn empty_header() -> ContainerHeader {
    ContainerHeader {
        version: crate::format::CURRENT_VERSION,
        file_uuid: uuid::Uuid::nil(),
        db_uuid: uuid::Uuid::nil(),
        last_saved: 0,
        last_saved_by: String::new(),
        last_saved_on: String::new(),
        last_saved_app: String::new(),
        iterations: 0,
    }
}

impl ContainerFile for V3Container {
    fn open(&mut self, passphrase: &SecretString) -> PwatResult<()> {
        if !matches!(self.stream, Stream::Closed) {
            return Err(PwatError::InvalidState("container is already open"));
        }
        match self.mode {
            Mode::Read => self.open_read(passphrase),
            Mode::Write => self.open_write(passphrase),
        }
    }

    fn close(&mut self) -> PwatResult<()> {
        match std::mem::replace(&mut self.stream, Stream::Closed) {
            Stream::Closed => Ok(()),
            Stream::Reading(mut reader) => {
                reader.authenticate()?;
                trace!(path = %self.path.display(), "container authenticated");
                Ok(())
            }
            Stream::Writing(writer) => {
                if self.records.phase() != RecordPhase::BetweenRecords {
                    return Err(PwatError::InvalidState("container closed mid-record"));
                }
                let file = writer
                    .finish()?
                    .into_inner()
                    .map_err(|e| PwatError::Io(e.into_error()))?;
                file.sync_all()?;
                debug!(path = %self.path.display(), "container written");
                Ok(())
            }
        }
    }

    fn discard(&mut self) {
        if !matches!(self.stream, Stream::Closed) {
            trace!(path = %self.path.display(), "container discarded");
        }
        self.stream = Stream::Closed;
    }

    fn header(&self) -> &ContainerHeader {
        &self.header
    }

    fn is_reading(&self) -> bool {
        matches!(&self.stream, Stream::Reading(r) if r.state() != StreamState::Authenticated)
    }

    fn read_pre(&mut self) -> PwatResult<Option<AttachmentRecord>> {
        self.records.read_pre(reading(&mut self.stream)?)
    }

    fn read_data(&mut self, skip: bool) -> PwatResult<DataChunk> {
        self.records.read_data(reading(&mut self.stream)?, skip)
    }

    fn read_post(&mut self, record: &mut AttachmentRecord) -> PwatResult<()> {
        self.records.read_post(reading(&mut self.stream)?, record)
    }

    fn write_pre(&mut self, record: &AttachmentRecord) -> PwatResult<()> {
        self.records.write_pre(writing(&mut self.stream)?, record)
    }

    fn write_data(&mut self, chunk: &[u8], last: bool) -> PwatResult<()> {
        self.records.write_data(writing(&mut self.stream)?, chunk, last)
    }

    fn write_post(&mut self, record: &AttachmentRecord) -> PwatResult<()> {
        self.records.write_post(writing(&mut self.stream)?, record)
    }
}
