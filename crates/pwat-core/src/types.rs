use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Owned bytes that are scrubbed when dropped: decrypted field payloads,
/// compressed and decompressed attachment chunks.
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// SHA-1 digest length used for the original/compressed attachment digests
pub const SHA1_LEN: usize = 20;

/// Persisted attachment flags (`AttachmentRecord::flags`)
pub mod flags {
    /// Extract only to removable media
    pub const EXTRACT_TO_REMOVABLE: u8 = 0x80;
    /// Extracted copies must be erased by an erasure program
    pub const ERASURE_REQUIRED: u8 = 0x40;
    /// Extracted copies are erased when the database closes
    pub const ERASE_ON_CLOSE: u8 = 0x20;
}

/// In-memory only flags (`AttachmentRecord::uiflags`), never written to disk
pub mod uiflags {
    pub const CHANGED: u8 = 0x80;
    pub const DELETED: u8 = 0x40;
}

/// One attachment, as held in memory and as persisted in a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub attmt_uuid: Uuid,
    pub entry_uuid: Uuid,
    pub flags: u8,
    #[serde(skip)]
    pub uiflags: u8,
    pub uncsize: u32,
    pub blksize: u32,
    /// 0 until the record has been written to a container
    pub cmpsize: u32,
    pub crc: u32,
    pub odigest: [u8; SHA1_LEN],
    pub cdigest: [u8; SHA1_LEN],
    pub ctime: i64,
    pub atime: i64,
    pub mtime: i64,
    pub dtime: i64,
    pub filename: String,
    /// Directory the attachment was read from
    pub path: String,
    pub description: String,
}

impl AttachmentRecord {
    /// A new, not yet persisted attachment of `path/filename` for `entry_uuid`.
    pub fn new(entry_uuid: Uuid, path: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            attmt_uuid: Uuid::new_v4(),
            entry_uuid,
            path: path.into(),
            filename: filename.into(),
            ..Default::default()
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.cmpsize != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.uiflags & uiflags::DELETED != 0
    }

    pub fn is_changed(&self) -> bool {
        self.uiflags & uiflags::CHANGED != 0
    }

    pub fn source_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.path).join(&self.filename)
    }

    /// Compare everything that is persisted, ignoring `uiflags`.
    pub fn same_persisted(&self, other: &AttachmentRecord) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.uiflags = 0;
        b.uiflags = 0;
        a == b
    }
}

/// Container format version. Only the major number must match on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u8,
    pub minor: u8,
}

/// Decoded container header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub version: FormatVersion,
    pub file_uuid: Uuid,
    /// Database this container is bound to
    pub db_uuid: Uuid,
    /// Unix seconds
    pub last_saved: i64,
    pub last_saved_by: String,
    pub last_saved_on: String,
    pub last_saved_app: String,
    /// Key stretch iterations found in (or used for) the envelope
    pub iterations: u32,
}

/// Entry metadata supplied by the owning database
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryInfo {
    pub group: String,
    pub title: String,
    pub user: String,
}

impl EntryInfo {
    /// Placeholder shown for attachments whose entry is not in the database
    pub fn unknown() -> Self {
        Self {
            group: "?".into(),
            title: "?".into(),
            user: "?".into(),
        }
    }
}

/// Lookup into the external password-entry store.
pub trait EntryLookup {
    fn entry_info(&self, entry_uuid: &Uuid) -> Option<EntryInfo>;

    fn entry_exists(&self, entry_uuid: &Uuid) -> bool {
        self.entry_info(entry_uuid).is_some()
    }
}

/// An attachment paired with the owning entry's group/title/user.
#[derive(Debug, Clone)]
pub struct AttachmentRecordEx {
    pub record: AttachmentRecord,
    pub entry: EntryInfo,
}

// ── Progress protocol ─────────────────────────────────────────────────────────

/// Sub-operation a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressFunction {
    Start,
    ProcessFile,
    SearchFile,
    ExtractFile,
    ExportFile,
    Error,
    End,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent<'a> {
    pub function: ProgressFunction,
    pub record: Option<&'a AttachmentRecord>,
    /// Percent complete, `None` when indeterminate
    pub percent: Option<u8>,
    pub message: Option<&'a str>,
}

impl<'a> ProgressEvent<'a> {
    pub fn new(function: ProgressFunction) -> Self {
        Self {
            function,
            record: None,
            percent: None,
            message: None,
        }
    }

    pub fn record(mut self, record: &'a AttachmentRecord) -> Self {
        self.record = Some(record);
        self
    }

    pub fn percent(mut self, done: u64, total: u64) -> Self {
        let pct = if total == 0 {
            100
        } else {
            (done.min(total) * 100 / total) as u8
        };
        self.percent = Some(pct);
        self
    }

    pub fn message(mut self, message: &'a str) -> Self {
        self.message = Some(message);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressReply {
    Continue,
    /// Keep going but stop verifying digests
    CancelVerify,
    /// Abort the operation
    CancelAll,
}

/// Progress/cancel callback. Polled between chunks, never preemptive.
pub trait Progress {
    fn report(&mut self, event: &ProgressEvent<'_>) -> ProgressReply;
}

impl<F> Progress for F
where
    F: FnMut(&ProgressEvent<'_>) -> ProgressReply,
{
    fn report(&mut self, event: &ProgressEvent<'_>) -> ProgressReply {
        self(event)
    }
}

/// Progress sink that never cancels
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Progress for Silent {
    fn report(&mut self, _event: &ProgressEvent<'_>) -> ProgressReply {
        ProgressReply::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_unpersisted() {
        let entry = Uuid::new_v4();
        let rec = AttachmentRecord::new(entry, "/tmp", "a.txt");
        assert!(!rec.is_persisted());
        assert!(!rec.is_deleted());
        assert_eq!(rec.entry_uuid, entry);
        assert_eq!(rec.source_path(), std::path::PathBuf::from("/tmp/a.txt"));
    }

    #[test]
    fn same_persisted_ignores_uiflags() {
        let a = AttachmentRecord::new(Uuid::new_v4(), "/tmp", "a.txt");
        let mut b = a.clone();
        b.uiflags = uiflags::CHANGED | uiflags::DELETED;
        assert!(a.same_persisted(&b));
        b.description = "changed".into();
        assert!(!a.same_persisted(&b));
    }

    #[test]
    fn progress_percent_clamps() {
        assert_eq!(ProgressEvent::new(ProgressFunction::ProcessFile).percent(5, 10).percent, Some(50));
        assert_eq!(ProgressEvent::new(ProgressFunction::ProcessFile).percent(20, 10).percent, Some(100));
        assert_eq!(ProgressEvent::new(ProgressFunction::ProcessFile).percent(0, 0).percent, Some(100));
    }

    #[test]
    fn closures_are_progress_sinks() {
        let mut seen = 0;
        let mut sink = |_: &ProgressEvent<'_>| {
            seen += 1;
            ProgressReply::CancelVerify
        };
        let reply = sink.report(&ProgressEvent::new(ProgressFunction::Start));
        assert_eq!(reply, ProgressReply::CancelVerify);
        assert_eq!(seen, 1);
    }
}
