//! Container files behind one interface, one variant per format version.

use pwat_core::{AttachmentRecord, ContainerHeader, PwatError, PwatResult};
use secrecy::SecretString;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::format::TAG;
use crate::record::DataChunk;
use crate::v3::V3Container;

/// Record-level access to an attachment container.
///
/// A container is opened for reading or for writing, never both. Records are
/// read or written in order: `*_pre`, one or more `*_data` ending with the
/// last chunk, then `*_post`. `close` is idempotent; on a read container it
/// drains whatever was not read and checks the HMAC.
pub trait ContainerFile {
    fn open(&mut self, passphrase: &SecretString) -> PwatResult<()>;
    fn close(&mut self) -> PwatResult<()>;
    /// Drop the stream without finishing or authenticating it.
    fn discard(&mut self);
    fn header(&self) -> &ContainerHeader;
    /// Open for reading and not yet authenticated
    fn is_reading(&self) -> bool;

    fn read_pre(&mut self) -> PwatResult<Option<AttachmentRecord>>;
    fn read_data(&mut self, skip: bool) -> PwatResult<DataChunk>;
    fn read_post(&mut self, record: &mut AttachmentRecord) -> PwatResult<()>;

    fn write_pre(&mut self, record: &AttachmentRecord) -> PwatResult<()>;
    fn write_data(&mut self, chunk: &[u8], last: bool) -> PwatResult<()>;
    fn write_post(&mut self, record: &AttachmentRecord) -> PwatResult<()>;

    /// Settle an error raised while reading.
    ///
    /// A content error found before the HMAC was checked is only reported
    /// as-is if the rest of the stream authenticates; otherwise the stream
    /// was tampered with and the result is `Integrity`. Any other error
    /// discards the stream and passes through. The container is closed
    /// either way.
    fn authenticated(&mut self, err: PwatError) -> PwatError {
        if !err.is_content_error() || !self.is_reading() {
            self.discard();
            return err;
        }
        match self.close() {
            Ok(()) => err,
            Err(PwatError::Io(io)) => PwatError::Io(io),
            Err(auth) => {
                debug!(error = %err, cause = %auth, "stream failed authentication after a content error");
                PwatError::Integrity(format!("{auth} (while reporting: {err})"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerVersion {
    V3,
}

impl ContainerVersion {
    /// Identify the container format of an existing file from its tag.
    pub fn detect(path: &Path) -> PwatResult<Self> {
        let mut tag = [0u8; 4];
        File::open(path)?.read_exact(&mut tag).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => PwatError::NotThisFormat,
            _ => PwatError::Io(e),
        })?;
        if tag == TAG {
            Ok(ContainerVersion::V3)
        } else {
            Err(PwatError::NotThisFormat)
        }
    }
}

#[derive(Debug)]
pub enum Container {
    V3(V3Container),
}

impl Container {
    /// An existing container, dispatched on its tag.
    pub fn for_read(path: impl Into<PathBuf>) -> PwatResult<Self> {
        let path = path.into();
        match ContainerVersion::detect(&path)? {
            ContainerVersion::V3 => Ok(Container::V3(V3Container::for_read(path))),
        }
    }

    /// A new container in the current format.
    pub fn for_write(path: impl Into<PathBuf>, header: ContainerHeader) -> Self {
        Container::V3(V3Container::for_write(path, header))
    }

    pub fn version(&self) -> ContainerVersion {
        match self {
            Container::V3(_) => ContainerVersion::V3,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Container::V3(c) => c.path(),
        }
    }
}

impl ContainerFile for Container {
    fn open(&mut self, passphrase: &SecretString) -> PwatResult<()> {
        match self {
            Container::V3(c) => c.open(passphrase),
        }
    }

    fn close(&mut self) -> PwatResult<()> {
        match self {
            Container::V3(c) => c.close(),
        }
    }

    fn discard(&mut self) {
        match self {
            Container::V3(c) => c.discard(),
        }
    }

    fn header(&self) -> &ContainerHeader {
        match self {
            Container::V3(c) => c.header(),
        }
    }

    fn is_reading(&self) -> bool {
        match self {
            Container::V3(c) => c.is_reading(),
        }
    }

    fn read_pre(&mut self) -> PwatResult<Option<AttachmentRecord>> {
        match self {
            Container::V3(c) => c.read_pre(),
        }
    }

    fn read_data(&mut self, skip: bool) -> PwatResult<DataChunk> {
        match self {
            Container::V3(c) => c.read_data(skip),
        }
    }

    fn read_post(&mut self, record: &mut AttachmentRecord) -> PwatResult<()> {
        match self {
            Container::V3(c) => c.read_post(record),
        }
    }

    fn write_pre(&mut self, record: &AttachmentRecord) -> PwatResult<()> {
        match self {
            Container::V3(c) => c.write_pre(record),
        }
    }

    fn write_data(&mut self, chunk: &[u8], last: bool) -> PwatResult<()> {
        match self {
            Container::V3(c) => c.write_data(chunk, last),
        }
    }

    fn write_post(&mut self, record: &AttachmentRecord) -> PwatResult<()> {
        match self {
            Container::V3(c) => c.write_post(record),
        }
    }
}
