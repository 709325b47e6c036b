//! Attachment file manager: loads a container into the store and writes the
//! store back through a temporary container and the install protocol.
//!
//! Every pass reads the live container front to back and ends by checking
//! its HMAC. A write never touches the live container until the new one is
//! complete and synced; see [`crate::naming::install`].

use pwat_chunks::{Deflater, Inflater, PayloadDigests};
use pwat_core::config::ContainerConfig;
use pwat_core::{
    uiflags, AttachmentRecord, ContainerHeader, Progress, ProgressEvent, ProgressFunction, ProgressReply,
    PwatConfig, PwatError, PwatResult,
};
use secrecy::SecretString;
use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::container::{Container, ContainerFile};
use crate::format::CURRENT_VERSION;
use crate::naming::{install, recover, remove_quietly, ContainerPaths, InstallOutcome};
use crate::store::AttachmentStore;

/// Result of [`AttachmentFileManager::read`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// Records loaded into the store
    pub records: usize,
    /// Records dropped because their uuid was already loaded
    pub duplicates: usize,
    /// Whether every payload was inflated and checked
    pub verified: bool,
}

/// Result of [`AttachmentFileManager::write`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Nothing new, changed or purgeable; no file was touched
    Unchanged,
    Installed { records: usize, backup: Option<PathBuf> },
    /// The store ended up empty, so there is no live container any more
    Removed { backup: Option<PathBuf> },
}

/// What a rewrite adds on top of carrying the live container forward
#[derive(Debug, Default)]
pub(crate) struct RewritePlan<'a> {
    pub cleanup: bool,
    pub append_new: bool,
    /// Copy the persisted records of the first entry to the second
    pub duplicate: Option<(Uuid, Uuid)>,
    /// Append every record of this scratch container
    pub scratch: Option<&'a Path>,
}

#[derive(Debug, Default)]
struct Rewritten {
    copied: Vec<AttachmentRecord>,
    appended: Vec<AttachmentRecord>,
    duplicated: Vec<AttachmentRecord>,
    imported: Vec<AttachmentRecord>,
}

#[derive(Debug)]
pub struct AttachmentFileManager {
    paths: ContainerPaths,
    db_uuid: Uuid,
    config: ContainerConfig,
    iterations: u32,
    store: AttachmentStore,
    header: Option<ContainerHeader>,
}

impl AttachmentFileManager {
    /// Manager for the attachments of the database at `db_path`.
    pub fn new(db_path: impl AsRef<Path>, db_uuid: Uuid, config: &PwatConfig) -> Self {
        Self {
            paths: ContainerPaths::new(db_path.as_ref(), &config.container),
            db_uuid,
            config: config.container.clone(),
            iterations: config.crypto.hash_iterations,
            store: AttachmentStore::new(),
            header: None,
        }
    }

    pub fn db_uuid(&self) -> Uuid {
        self.db_uuid
    }

    pub fn paths(&self) -> &ContainerPaths {
        &self.paths
    }

    pub fn container_path(&self) -> PathBuf {
        self.paths.live()
    }

    pub fn store(&self) -> &AttachmentStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AttachmentStore {
        &mut self.store
    }

    /// Header of the container last read, if any
    pub fn header(&self) -> Option<&ContainerHeader> {
        self.header.as_ref()
    }

    /// Restore the newest backup if the live container is missing.
    pub fn recover(&self) -> PwatResult<Option<PathBuf>> {
        recover(&self.paths)
    }

    /// Temporary, duplicates and import containers left by interrupted runs.
    pub fn stray_files(&self) -> PwatResult<Vec<PathBuf>> {
        self.paths.stray_files()
    }

    /// Open the live container and return its header without reading any
    /// record. The stream is not authenticated.
    pub fn read_header_only(&mut self, passphrase: &SecretString) -> PwatResult<Option<ContainerHeader>> {
        let live = self.paths.live();
        if !live.exists() {
            return Ok(None);
        }
        let mut input = Container::for_read(&live)?;
        input.open(passphrase)?;
        let header = input.header().clone();
        input.discard();
        Ok(Some(header))
    }

    /// Open the live container for reading and check that it belongs to
    /// this database.
    pub(crate) fn open_live(&self, passphrase: &SecretString) -> PwatResult<Container> {
        let mut input = Container::for_read(self.paths.live())?;
        input.open(passphrase)?;
        if let Err(e) = self.check_owner(input.header()) {
            return Err(input.authenticated(e));
        }
        Ok(input)
    }

    fn check_owner(&self, header: &ContainerHeader) -> PwatResult<()> {
        if header.db_uuid != self.db_uuid {
            return Err(PwatError::HeaderMismatch {
                expected: self.db_uuid,
                found: header.db_uuid,
            });
        }
        Ok(())
    }

    pub(crate) fn new_header(&self) -> ContainerHeader {
        ContainerHeader {
            version: CURRENT_VERSION,
            file_uuid: self
                .header
                .as_ref()
                .map(|h| h.file_uuid)
                .filter(|u| !u.is_nil())
                .unwrap_or_else(Uuid::new_v4),
            db_uuid: self.db_uuid,
            last_saved: now(),
            last_saved_by: current_user(),
            last_saved_on: current_host(),
            last_saved_app: self.config.application.clone(),
            iterations: self.iterations,
        }
    }

    // ── Read ──────────────────────────────────────────────────────────────────

    /// Load every record of the live container into the store, replacing its
    /// contents. A missing container is an empty store.
    ///
    /// With `verify` set each payload is inflated and its sizes, CRC and
    /// digests are checked. The progress callback can turn verification off
    /// (`CancelVerify`) or abandon the read (`CancelAll`), which leaves the
    /// store empty. On other errors the store keeps what was read so far.
    pub fn read(
        &mut self,
        passphrase: &SecretString,
        verify: bool,
        progress: &mut dyn Progress,
    ) -> PwatResult<ReadSummary> {
        self.store.clear();
        let live = self.paths.live();
        if !live.exists() {
            debug!(container = %live.display(), "no attachment container");
            return Ok(ReadSummary::default());
        }

        report(progress, ProgressEvent::new(ProgressFunction::Start))?;
        let result = self
            .open_live(passphrase)
            .and_then(|mut input| match self.read_records(&mut input, verify, progress) {
                Ok(summary) => {
                    input.close()?;
                    Ok((summary, input.header().clone()))
                }
                Err(PwatError::UserCancelled) => {
                    input.discard();
                    Err(PwatError::UserCancelled)
                }
                Err(e) => Err(input.authenticated(e)),
            });

        match result {
            Ok((summary, header)) => {
                info!(
                    records = summary.records,
                    duplicates = summary.duplicates,
                    verified = summary.verified,
                    "attachments loaded"
                );
                self.header = Some(header);
                progress.report(&ProgressEvent::new(ProgressFunction::End));
                Ok(summary)
            }
            Err(PwatError::UserCancelled) => {
                self.store.clear();
                info!("attachment read cancelled");
                Err(PwatError::UserCancelled)
            }
            Err(e) => {
                let message = e.to_string();
                progress.report(&ProgressEvent::new(ProgressFunction::Error).message(&message));
                Err(e)
            }
        }
    }

    fn read_records(
        &mut self,
        input: &mut Container,
        verify: bool,
        progress: &mut dyn Progress,
    ) -> PwatResult<ReadSummary> {
        let mut summary = ReadSummary {
            verified: verify,
            ..Default::default()
        };

        while let Some(mut record) = input.read_pre()? {
            let duplicate = self.store.contains(&record.attmt_uuid);
            let mut check = (summary.verified && !duplicate).then(|| Inflater::new(record.blksize));
            let mut done = 0u64;

            loop {
                let chunk = input.read_data(check.is_none())?;
                match check.as_mut() {
                    Some(inflater) => {
                        let plain = inflater.decompress_chunk(chunk_bytes(&chunk.data), chunk.last)?;
                        done += plain.len() as u64;
                    }
                    None => done += record.blksize as u64,
                }
                let event = ProgressEvent::new(ProgressFunction::ProcessFile)
                    .record(&record)
                    .percent(done, record.uncsize as u64);
                if report(progress, event)? == ProgressReply::CancelVerify && summary.verified {
                    debug!("verification turned off by caller");
                    summary.verified = false;
                    check = None;
                }
                if chunk.last {
                    break;
                }
            }

            input.read_post(&mut record)?;
            if let Some(inflater) = check {
                check_digests(&record, &inflater.finish()?)?;
            }
            if duplicate {
                warn!(attmt_uuid = %record.attmt_uuid, "duplicate attachment uuid in container, skipped");
                summary.duplicates += 1;
                continue;
            }
            self.store.add_attachment(record);
            summary.records += 1;
        }
        Ok(summary)
    }

    // ── Write ─────────────────────────────────────────────────────────────────

    /// Persist the store.
    ///
    /// Existing payloads are copied forward unchanged, new records are read
    /// from their source files and compressed, and with `cleanup` set
    /// soft-deleted records are purged. When nothing is new, changed or
    /// purgeable the call does nothing.
    pub fn write(
        &mut self,
        passphrase: &SecretString,
        cleanup: bool,
        progress: &mut dyn Progress,
    ) -> PwatResult<WriteOutcome> {
        let needs_write = self.store.iter_all().any(|r| {
            (!r.is_persisted() && !r.is_deleted()) || r.is_changed() || (cleanup && r.is_deleted())
        });
        if !needs_write {
            debug!("attachment store unchanged, nothing to write");
            return Ok(WriteOutcome::Unchanged);
        }

        let plan = RewritePlan {
            cleanup,
            append_new: true,
            ..Default::default()
        };
        let (next, outcome) = self.rewrite(passphrase, &plan, progress)?;
        let records = next.len();
        self.store = next;
        Ok(match outcome {
            InstallOutcome::Installed { backup } => WriteOutcome::Installed { records, backup },
            InstallOutcome::Removed { backup } => WriteOutcome::Removed { backup },
        })
    }

    /// Build a new container according to `plan`, install it and return the
    /// store that matches it. `self.store` is left untouched.
    pub(crate) fn rewrite(
        &mut self,
        passphrase: &SecretString,
        plan: &RewritePlan<'_>,
        progress: &mut dyn Progress,
    ) -> PwatResult<(AttachmentStore, InstallOutcome)> {
        let temp = self.paths.temp();
        let header = self.new_header();
        let mut out = Container::for_write(&temp, header.clone());
        report(progress, ProgressEvent::new(ProgressFunction::Start))?;

        if let Err(e) = out.open(passphrase) {
            if !matches!(&e, PwatError::Io(io) if io.kind() == ErrorKind::AlreadyExists) {
                remove_quietly(&temp);
            }
            return Err(self.failed(e, progress));
        }

        let done = match self.fill(&mut out, passphrase, plan, progress) {
            Ok(done) => out.close().map(|()| done),
            Err(e) => Err(e),
        };
        let done = match done {
            Ok(done) => done,
            Err(e) => {
                out.discard();
                remove_quietly(&temp);
                return Err(self.failed(e, progress));
            }
        };

        let next = self.next_store(plan, done);
        let outcome = install(&self.paths, &temp, next.is_empty(), self.config.keep_backups)
            .map_err(|e| self.failed(e, progress))?;
        self.header = Some(header);
        progress.report(&ProgressEvent::new(ProgressFunction::End));
        Ok((next, outcome))
    }

    fn failed(&self, e: PwatError, progress: &mut dyn Progress) -> PwatError {
        if !matches!(e, PwatError::UserCancelled) {
            warn!(error = %e, "attachment container not written");
            let message = e.to_string();
            progress.report(&ProgressEvent::new(ProgressFunction::Error).message(&message));
        }
        e
    }

    fn fill(
        &self,
        out: &mut Container,
        passphrase: &SecretString,
        plan: &RewritePlan<'_>,
        progress: &mut dyn Progress,
    ) -> PwatResult<Rewritten> {
        let mut done = Rewritten::default();

        if self.paths.live().exists() {
            match plan.duplicate {
                None => done.copied = self.copy_live(out, None, passphrase, plan.cleanup, progress)?,
                Some((from, to)) => {
                    let dup_path = self.paths.duplicate();
                    let result = self.copy_with_duplicates(out, &dup_path, passphrase, plan.cleanup, (from, to), progress);
                    remove_quietly(&dup_path);
                    let (copied, duplicated) = result?;
                    done.copied = copied;
                    done.duplicated = duplicated;
                }
            }
        }

        if plan.append_new {
            let pending: Vec<AttachmentRecord> = self
                .store
                .iter_all()
                .filter(|r| !r.is_persisted() && !r.is_deleted())
                .cloned()
                .collect();
            for mut record in pending {
                write_new_record(out, &mut record, progress)?;
                done.appended.push(record);
            }
        }

        if let Some(scratch) = plan.scratch {
            done.imported = self.append_container(out, scratch, passphrase, progress)?;
        }
        Ok(done)
    }

    fn copy_with_duplicates(
        &self,
        out: &mut Container,
        dup_path: &Path,
        passphrase: &SecretString,
        cleanup: bool,
        entries: (Uuid, Uuid),
        progress: &mut dyn Progress,
    ) -> PwatResult<(Vec<AttachmentRecord>, Vec<AttachmentRecord>)> {
        let mut dup = Container::for_write(dup_path, self.new_header());
        dup.open(passphrase)?;
        let copied = match self.copy_live(out, Some((&mut dup, entries)), passphrase, cleanup, progress) {
            Ok(copied) => copied,
            Err(e) => {
                dup.discard();
                return Err(e);
            }
        };
        dup.close()?;
        let duplicated = self.append_container(out, dup_path, passphrase, progress)?;
        Ok((copied, duplicated))
    }

    /// Carry the live container's records that are still in the store into
    /// `out`, taking flags and description from the store. With `dup` set,
    /// persisted records of its first entry are also written, re-keyed to
    /// the second entry, into the duplicates container.
    fn copy_live(
        &self,
        out: &mut Container,
        mut dup: Option<(&mut Container, (Uuid, Uuid))>,
        passphrase: &SecretString,
        cleanup: bool,
        progress: &mut dyn Progress,
    ) -> PwatResult<Vec<AttachmentRecord>> {
        let mut input = self.open_live(passphrase)?;
        let mut copied = Vec::new();

        let result = (|| -> PwatResult<()> {
            while let Some(disk) = input.read_pre()? {
                let mut kept = match self.store.find(&disk.attmt_uuid) {
                    None => {
                        debug!(attmt_uuid = %disk.attmt_uuid, "record no longer in store, dropped");
                        None
                    }
                    Some(current) if cleanup && current.is_deleted() => {
                        debug!(attmt_uuid = %disk.attmt_uuid, "purging deleted record");
                        None
                    }
                    Some(current) => {
                        let mut merged = disk.clone();
                        merged.flags = current.flags;
                        merged.description = current.description.clone();
                        Some((merged, current.is_deleted()))
                    }
                };
                let mut twin = match (&kept, dup.as_ref()) {
                    (Some((merged, false)), Some((_, (from, to)))) if merged.entry_uuid == *from => {
                        Some(rekeyed(merged, *to))
                    }
                    _ => None,
                };

                if let Some((merged, _)) = &kept {
                    out.write_pre(merged)?;
                }
                if let (Some(t), Some((d, _))) = (&twin, dup.as_mut()) {
                    d.write_pre(t)?;
                }

                let mut done = 0u64;
                loop {
                    let chunk = input.read_data(kept.is_none())?;
                    if let Some(data) = chunk.data.as_deref() {
                        out.write_data(data, chunk.last)?;
                        if let (Some(_), Some((d, _))) = (&twin, dup.as_mut()) {
                            d.write_data(data, chunk.last)?;
                        }
                    }
                    if let Some((merged, _)) = &kept {
                        done += merged.blksize as u64;
                        let event = ProgressEvent::new(ProgressFunction::ProcessFile)
                            .record(merged)
                            .percent(done, merged.uncsize as u64);
                        report(progress, event)?;
                    }
                    if chunk.last {
                        break;
                    }
                }

                let mut post = disk;
                input.read_post(&mut post)?;
                if let Some((mut merged, _)) = kept.take() {
                    take_post(&mut merged, &post);
                    out.write_post(&merged)?;
                    if let (Some(t), Some((d, _))) = (twin.as_mut(), dup.as_mut()) {
                        take_post(t, &post);
                        d.write_post(t)?;
                    }
                    copied.push(merged);
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                input.close()?;
                Ok(copied)
            }
            Err(e) => Err(input.authenticated(e)),
        }
    }

    /// Copy every record of the container at `path` into `out` unchanged.
    fn append_container(
        &self,
        out: &mut Container,
        path: &Path,
        passphrase: &SecretString,
        progress: &mut dyn Progress,
    ) -> PwatResult<Vec<AttachmentRecord>> {
        let mut input = Container::for_read(path)?;
        input.open(passphrase)?;
        let mut appended = Vec::new();

        let result = (|| -> PwatResult<()> {
            self.check_owner(input.header())?;
            while let Some(mut record) = input.read_pre()? {
                out.write_pre(&record)?;
                let mut done = 0u64;
                loop {
                    let chunk = input.read_data(false)?;
                    out.write_data(chunk_bytes(&chunk.data), chunk.last)?;
                    done += record.blksize as u64;
                    let event = ProgressEvent::new(ProgressFunction::ProcessFile)
                        .record(&record)
                        .percent(done, record.uncsize as u64);
                    report(progress, event)?;
                    if chunk.last {
                        break;
                    }
                }
                input.read_post(&mut record)?;
                out.write_post(&record)?;
                appended.push(record);
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                input.close()?;
                Ok(appended)
            }
            Err(e) => Err(input.authenticated(e)),
        }
    }

    /// The store as it will be once the rewritten container is installed.
    fn next_store(&self, plan: &RewritePlan<'_>, done: Rewritten) -> AttachmentStore {
        let mut written: HashMap<Uuid, AttachmentRecord> = done
            .copied
            .into_iter()
            .chain(done.appended)
            .map(|r| (r.attmt_uuid, r))
            .collect();

        let mut next = AttachmentStore::new();
        for current in self.store.iter_all() {
            let purged = plan.cleanup && current.is_deleted();
            if let Some(mut record) = written.remove(&current.attmt_uuid) {
                record.uiflags = current.uiflags & !uiflags::CHANGED;
                next.add_attachment(record);
            } else if current.is_persisted() {
                if !purged {
                    warn!(attmt_uuid = %current.attmt_uuid, "record missing from container, dropped from store");
                }
            } else if !purged {
                next.add_attachment(current.clone());
            }
        }
        next.add_attachments(done.duplicated);
        next.add_attachments(done.imported);
        next
    }

    // ── Duplicate ─────────────────────────────────────────────────────────────

    /// Give `new_entry` a copy of every attachment of `old_entry`.
    ///
    /// Persisted attachments are copied inside the container (the payload is
    /// not recompressed) and the container is reinstalled. Attachments not
    /// yet written are cloned in memory as new attachments. Returns the new
    /// attachment uuids.
    pub fn duplicate(
        &mut self,
        passphrase: &SecretString,
        old_entry: Uuid,
        new_entry: Uuid,
        progress: &mut dyn Progress,
    ) -> PwatResult<Vec<Uuid>> {
        let mut new_uuids = Vec::new();
        let has_persisted = self
            .store
            .iter_all()
            .any(|r| r.entry_uuid == old_entry && r.is_persisted() && !r.is_deleted());

        if has_persisted && self.paths.live().exists() {
            let plan = RewritePlan {
                duplicate: Some((old_entry, new_entry)),
                ..Default::default()
            };
            let (next, _) = self.rewrite(passphrase, &plan, progress)?;
            new_uuids.extend(
                next.iter_all()
                    .filter(|r| r.entry_uuid == new_entry && !self.store.contains(&r.attmt_uuid))
                    .map(|r| r.attmt_uuid),
            );
            self.store = next;
        }

        let pending: Vec<AttachmentRecord> = self
            .store
            .iter_all()
            .filter(|r| r.entry_uuid == old_entry && !r.is_persisted() && !r.is_deleted())
            .map(|r| rekeyed(r, new_entry))
            .collect();
        new_uuids.extend(pending.iter().map(|r| r.attmt_uuid));
        self.store.add_attachments(pending);

        info!(%old_entry, %new_entry, count = new_uuids.len(), "attachments duplicated");
        Ok(new_uuids)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Report an event; `CancelAll` becomes `UserCancelled`.
pub(crate) fn report(progress: &mut dyn Progress, event: ProgressEvent<'_>) -> PwatResult<ProgressReply> {
    match progress.report(&event) {
        ProgressReply::CancelAll => Err(PwatError::UserCancelled),
        reply => Ok(reply),
    }
}

pub(crate) fn chunk_bytes(data: &Option<pwat_core::SecretBytes>) -> &[u8] {
    data.as_deref().map(Vec::as_slice).unwrap_or_default()
}

/// Compare a record's stored sizes and digests with a fresh computation.
pub(crate) fn check_digests(record: &AttachmentRecord, actual: &PayloadDigests) -> PwatResult<()> {
    let mismatch = |detail: &str| PwatError::DigestMismatch {
        attmt_uuid: record.attmt_uuid,
        detail: detail.to_string(),
    };
    if actual.uncsize != record.uncsize as u64 {
        return Err(mismatch(&format!(
            "uncompressed size {} != recorded {}",
            actual.uncsize, record.uncsize
        )));
    }
    if actual.cmpsize != record.cmpsize as u64 {
        return Err(mismatch(&format!(
            "compressed size {} != recorded {}",
            actual.cmpsize, record.cmpsize
        )));
    }
    if actual.crc != record.crc {
        return Err(mismatch("CRC32"));
    }
    if actual.odigest != record.odigest {
        return Err(mismatch("SHA-1 of original data"));
    }
    if actual.cdigest != record.cdigest {
        return Err(mismatch("SHA-1 of compressed data"));
    }
    Ok(())
}

pub(crate) fn take_post(into: &mut AttachmentRecord, from: &AttachmentRecord) {
    into.cmpsize = from.cmpsize;
    into.crc = from.crc;
    into.odigest = from.odigest;
    into.cdigest = from.cdigest;
}

/// A copy of `record` under a new uuid, owned by `entry_uuid`.
pub(crate) fn rekeyed(record: &AttachmentRecord, entry_uuid: Uuid) -> AttachmentRecord {
    AttachmentRecord {
        attmt_uuid: Uuid::new_v4(),
        entry_uuid,
        uiflags: 0,
        dtime: now(),
        ..record.clone()
    }
}

pub(crate) fn write_compressed(
    out: &mut Container,
    record: &mut AttachmentRecord,
    deflater: Deflater,
) -> PwatResult<()> {
    let digests = deflater.finish()?;
    record.cmpsize = u32::try_from(digests.cmpsize)
        .map_err(|_| PwatError::BadRecord(format!("{} compresses past 4 GiB", record.filename)))?;
    record.crc = digests.crc;
    record.odigest = digests.odigest;
    record.cdigest = digests.cdigest;
    out.write_post(record)
}

/// Compress the source file of a new record into `out`, filling in its
/// sizes, times and digests.
fn write_new_record(
    out: &mut Container,
    record: &mut AttachmentRecord,
    progress: &mut dyn Progress,
) -> PwatResult<()> {
    let source = record.source_path();
    let mut file = File::open(&source)?;
    let meta = file.metadata()?;
    let size = meta.len();
    record.uncsize = u32::try_from(size)
        .map_err(|_| PwatError::BadRecord(format!("{} is larger than 4 GiB", source.display())))?;

    let now = now();
    let modified = unix_time(meta.modified());
    if record.ctime == 0 {
        record.ctime = unix_time(meta.created()).or(modified).unwrap_or(now);
    }
    if record.atime == 0 {
        record.atime = unix_time(meta.accessed()).unwrap_or(now);
    }
    if record.mtime == 0 {
        record.mtime = modified.unwrap_or(now);
    }
    record.dtime = now;

    let mut deflater = Deflater::new(size);
    record.blksize = deflater.block_size();
    out.write_pre(record)?;

    let mut buf = Zeroizing::new(vec![0u8; record.blksize as usize]);
    let mut remaining = size;
    loop {
        let n = remaining.min(record.blksize as u64) as usize;
        file.read_exact(&mut buf[..n])?;
        let (compressed, last) = deflater.compress_chunk(&buf[..n])?;
        out.write_data(&compressed, last)?;
        remaining -= n as u64;

        let event = ProgressEvent::new(ProgressFunction::ProcessFile)
            .record(record)
            .percent(size - remaining, size);
        report(progress, event)?;
        if last {
            break;
        }
    }
    write_compressed(out, record, deflater)?;
    debug!(
        attmt_uuid = %record.attmt_uuid,
        file = %source.display(),
        uncsize = record.uncsize,
        cmpsize = record.cmpsize,
        "attachment stored"
    );
    Ok(())
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn unix_time(t: std::io::Result<SystemTime>) -> Option<i64> {
    t.ok().map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp())
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

fn current_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
}
