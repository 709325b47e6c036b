//! Streaming extraction of single attachments
//!
//! An [`ExtractSession`] holds the manager exclusively while it walks the
//! live container. Payload bytes are handed out chunk by chunk before the
//! container's HMAC has been checked; they are only known to be authentic
//! once [`ExtractSession::close`] succeeds.

use pwat_chunks::Inflater;
use pwat_core::{
    AttachmentRecord, ContainerHeader, Progress, ProgressEvent, ProgressFunction, PwatError, PwatResult,
    SecretBytes,
};
use secrecy::SecretString;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::container::{Container, ContainerFile};
use crate::manager::{check_digests, chunk_bytes, report, AttachmentFileManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Data,
    Trailer,
}

#[derive(Debug)]
struct Current {
    record: AttachmentRecord,
    inflater: Inflater,
    stage: Stage,
}

#[derive(Debug)]
pub struct ExtractSession<'m> {
    container: Container,
    current: Option<Current>,
    failed: bool,
    _manager: PhantomData<&'m mut AttachmentFileManager>,
}

impl AttachmentFileManager {
    /// Start an extraction pass over the live container.
    pub fn open_extract(&mut self, passphrase: &SecretString) -> PwatResult<ExtractSession<'_>> {
        let container = self.open_live(passphrase)?;
        Ok(ExtractSession {
            container,
            current: None,
            failed: false,
            _manager: PhantomData,
        })
    }

    /// Extract one attachment into `out` and authenticate the container.
    pub fn extract_to(
        &mut self,
        passphrase: &SecretString,
        attmt_uuid: &Uuid,
        out: &mut dyn Write,
        progress: &mut dyn Progress,
    ) -> PwatResult<AttachmentRecord> {
        let mut session = self.open_extract(passphrase)?;
        session.seek(attmt_uuid, progress)?;
        while let Some(plain) = session.pull_chunk(progress)? {
            out.write_all(&plain)?;
        }
        let record = session.read_trailer()?;
        session.close()?;
        out.flush()?;
        Ok(record)
    }

    /// Extract one attachment to a new file at `dest`. The file is removed
    /// again if extraction or authentication fails.
    pub fn extract_to_file(
        &mut self,
        passphrase: &SecretString,
        attmt_uuid: &Uuid,
        dest: &Path,
        progress: &mut dyn Progress,
    ) -> PwatResult<AttachmentRecord> {
        let file = OpenOptions::new().write(true).create_new(true).open(dest)?;
        let mut out = BufWriter::new(file);
        let result = self.extract_to(passphrase, attmt_uuid, &mut out, progress);
        let result = result.and_then(|record| {
            out.into_inner()
                .map_err(|e| PwatError::Io(e.into_error()))?
                .sync_all()?;
            Ok(record)
        });
        if let Err(e) = &result {
            warn!(error = %e, dest = %dest.display(), "extraction failed, removing output");
            crate::naming::remove_quietly(dest);
        }
        result
    }
}

impl ExtractSession<'_> {
    pub fn header(&self) -> &ContainerHeader {
        self.container.header()
    }

    /// The record positioned by the last successful `seek`
    pub fn current(&self) -> Option<&AttachmentRecord> {
        self.current.as_ref().map(|c| &c.record)
    }

    fn usable(&self) -> PwatResult<()> {
        if self.failed {
            return Err(PwatError::InvalidState("extract session failed"));
        }
        Ok(())
    }

    /// Close the container on error, keeping the error authenticated.
    fn fail(&mut self, e: PwatError) -> PwatError {
        if matches!(e, PwatError::InvalidState(_)) {
            return e;
        }
        self.failed = true;
        self.current = None;
        self.container.authenticated(e)
    }

    /// Move forward to the attachment `attmt_uuid`, skipping the payloads of
    /// records in between. Only records after the current position are
    /// searched.
    pub fn seek(&mut self, attmt_uuid: &Uuid, progress: &mut dyn Progress) -> PwatResult<&AttachmentRecord> {
        self.usable()?;
        match self.seek_inner(attmt_uuid, progress) {
            Ok(()) => self
                .current
                .as_ref()
                .map(|c| &c.record)
                .ok_or(PwatError::NotFound(*attmt_uuid)),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn seek_inner(&mut self, attmt_uuid: &Uuid, progress: &mut dyn Progress) -> PwatResult<()> {
        if let Some(mut current) = self.current.take() {
            if current.stage == Stage::Data {
                while !self.container.read_data(true)?.last {}
            }
            self.container.read_post(&mut current.record)?;
        }

        while let Some(mut record) = self.container.read_pre()? {
            let event = ProgressEvent::new(ProgressFunction::SearchFile).record(&record);
            report(progress, event)?;
            if record.attmt_uuid == *attmt_uuid {
                debug!(%attmt_uuid, file = %record.filename, "attachment found");
                self.current = Some(Current {
                    inflater: Inflater::new(record.blksize),
                    record,
                    stage: Stage::Data,
                });
                return Ok(());
            }
            while !self.container.read_data(true)?.last {}
            self.container.read_post(&mut record)?;
        }
        Err(PwatError::NotFound(*attmt_uuid))
    }

    /// The next decompressed chunk of the current attachment, or `None`
    /// after the last one.
    pub fn pull_chunk(&mut self, progress: &mut dyn Progress) -> PwatResult<Option<SecretBytes>> {
        self.usable()?;
        match self.pull_inner(progress) {
            Ok(chunk) => Ok(chunk),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn pull_inner(&mut self, progress: &mut dyn Progress) -> PwatResult<Option<SecretBytes>> {
        let current = self
            .current
            .as_mut()
            .ok_or(PwatError::InvalidState("no attachment selected"))?;
        if current.stage == Stage::Trailer {
            return Ok(None);
        }
        let chunk = self.container.read_data(false)?;
        let plain = current
            .inflater
            .decompress_chunk(chunk_bytes(&chunk.data), chunk.last)?;
        if chunk.last {
            current.stage = Stage::Trailer;
        }
        let event = ProgressEvent::new(ProgressFunction::ExtractFile)
            .record(&current.record)
            .percent(current.inflater.bytes_out(), current.record.uncsize as u64);
        report(progress, event)?;
        Ok(Some(plain))
    }

    /// Read the current attachment's post-data and check it against the
    /// extracted bytes. Every chunk must have been pulled.
    pub fn read_trailer(&mut self) -> PwatResult<AttachmentRecord> {
        self.usable()?;
        match self.trailer_inner() {
            Ok(record) => Ok(record),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn trailer_inner(&mut self) -> PwatResult<AttachmentRecord> {
        let Some(current) = self.current.take() else {
            return Err(PwatError::InvalidState("no attachment selected"));
        };
        if current.stage != Stage::Trailer {
            self.current = Some(current);
            return Err(PwatError::InvalidState("attachment data not fully extracted"));
        }
        let Current {
            mut record, inflater, ..
        } = current;
        self.container.read_post(&mut record)?;
        check_digests(&record, &inflater.finish()?)?;
        Ok(record)
    }

    /// Drain the rest of the container and check its HMAC.
    pub fn close(mut self) -> PwatResult<()> {
        self.usable()?;
        self.current = None;
        self.container.close()
    }
}

impl Drop for ExtractSession<'_> {
    fn drop(&mut self) {
        self.container.discard();
    }
}
