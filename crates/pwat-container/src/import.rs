//! Importing attachments exported from another database
//!
//! Each imported attachment arrives as its record plus the decompressed
//! payload. Items whose entry is unknown, whose size disagrees with the
//! record, or whose CRC/SHA-1 do not match are skipped and reported. The
//! rest are compressed into a scratch container, which is then merged into
//! a rewrite of the live container.

use pwat_chunks::{Deflater, DigestState};
use pwat_core::{
    AttachmentRecord, EntryLookup, Progress, ProgressEvent, ProgressFunction, PwatResult, SecretBytes,
};
use secrecy::SecretString;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::container::{Container, ContainerFile};
use crate::manager::{now, report, write_compressed, AttachmentFileManager, RewritePlan};
use crate::naming::remove_quietly;

pub struct ImportedAttachment {
    pub record: AttachmentRecord,
    /// Decompressed payload
    pub data: SecretBytes,
}

impl std::fmt::Debug for ImportedAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportedAttachment")
            .field("record", &self.record)
            .field("data", &format_args!("[{} bytes]", self.data.len()))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EntryNotFound,
    SizeMismatch { recorded: u32, actual: u64 },
    DigestFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedImport {
    pub attmt_uuid: Uuid,
    pub filename: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Uuids the imported attachments were stored under
    pub imported: Vec<Uuid>,
    pub skipped: Vec<SkippedImport>,
}

fn validate(record: &AttachmentRecord, data: &[u8], lookup: &dyn EntryLookup) -> Option<SkipReason> {
    if !lookup.entry_exists(&record.entry_uuid) {
        return Some(SkipReason::EntryNotFound);
    }
    if data.len() as u64 != record.uncsize as u64 {
        return Some(SkipReason::SizeMismatch {
            recorded: record.uncsize,
            actual: data.len() as u64,
        });
    }
    let mut digests = DigestState::new();
    digests.update_original(data);
    let digests = digests.finish();
    if digests.crc != record.crc || digests.odigest != record.odigest {
        return Some(SkipReason::DigestFailed);
    }
    None
}

impl AttachmentFileManager {
    /// Validate and store imported attachments. Attachments whose uuid is
    /// already in use are stored under a fresh uuid.
    pub fn import(
        &mut self,
        passphrase: &SecretString,
        items: impl IntoIterator<Item = ImportedAttachment>,
        lookup: &dyn EntryLookup,
        progress: &mut dyn Progress,
    ) -> PwatResult<ImportReport> {
        let scratch = self.paths().import();
        let result = self.import_via(&scratch, passphrase, items, lookup, progress);
        remove_quietly(&scratch);
        if let Ok(done) = &result {
            info!(
                imported = done.imported.len(),
                skipped = done.skipped.len(),
                "attachments imported"
            );
        }
        result
    }

    fn import_via(
        &mut self,
        scratch: &Path,
        passphrase: &SecretString,
        items: impl IntoIterator<Item = ImportedAttachment>,
        lookup: &dyn EntryLookup,
        progress: &mut dyn Progress,
    ) -> PwatResult<ImportReport> {
        let mut done = ImportReport::default();
        let mut taken: HashSet<Uuid> = self.store().iter_all().map(|r| r.attmt_uuid).collect();
        let mut out = Container::for_write(scratch, self.new_header());
        out.open(passphrase)?;

        for ImportedAttachment { mut record, data } in items {
            if let Some(reason) = validate(&record, &data, lookup) {
                warn!(attmt_uuid = %record.attmt_uuid, file = %record.filename, ?reason, "import skipped");
                done.skipped.push(SkippedImport {
                    attmt_uuid: record.attmt_uuid,
                    filename: record.filename,
                    reason,
                });
                continue;
            }
            if !taken.insert(record.attmt_uuid) {
                let fresh = Uuid::new_v4();
                debug!(old = %record.attmt_uuid, new = %fresh, "imported uuid already in use");
                record.attmt_uuid = fresh;
                taken.insert(fresh);
            }
            record.uiflags = 0;
            if record.dtime == 0 {
                record.dtime = now();
            }
            if let Err(e) = write_payload(&mut out, &mut record, &data, progress) {
                out.discard();
                return Err(e);
            }
            done.imported.push(record.attmt_uuid);
        }

        if done.imported.is_empty() {
            out.discard();
            return Ok(done);
        }
        out.close()?;

        let plan = RewritePlan {
            scratch: Some(scratch),
            ..Default::default()
        };
        let (next, _) = self.rewrite(passphrase, &plan, progress)?;
        *self.store_mut() = next;
        Ok(done)
    }
}

fn write_payload(
    out: &mut Container,
    record: &mut AttachmentRecord,
    data: &[u8],
    progress: &mut dyn Progress,
) -> PwatResult<()> {
    let mut deflater = Deflater::new(data.len() as u64);
    record.blksize = deflater.block_size();
    out.write_pre(record)?;

    let parts: Vec<&[u8]> = if data.is_empty() {
        vec![data]
    } else {
        data.chunks(record.blksize as usize).collect()
    };
    let mut done = 0u64;
    for part in parts {
        let (compressed, last) = deflater.compress_chunk(part)?;
        out.write_data(&compressed, last)?;
        done += part.len() as u64;
        let event = ProgressEvent::new(ProgressFunction::ProcessFile)
            .record(record)
            .percent(done, data.len() as u64);
        report(progress, event)?;
    }
    write_compressed(out, record, deflater)
}
