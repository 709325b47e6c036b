//! Integration test: add → write → read → extract through the manager
//!
//! Every test works on a throwaway directory holding a fake database path;
//! the container files are created next to it the same way a real
//! database's would be.

use pwat_chunks::sha1_of;
use pwat_container::{AttachmentFileManager, Container, ContainerFile, WriteOutcome};
use pwat_core::{
    AttachmentRecord, Progress, ProgressEvent, ProgressFunction, ProgressReply, PwatConfig, PwatError, Silent,
};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

fn pass() -> SecretString {
    SecretString::from("correct horse battery staple")
}

fn db_path(dir: &Path) -> PathBuf {
    dir.join("vault.psafe3")
}

fn manager(dir: &Path, db_uuid: Uuid) -> AttachmentFileManager {
    AttachmentFileManager::new(db_path(dir), db_uuid, &PwatConfig::default())
}

/// Deterministic bytes that do not compress to nothing
fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut x = seed | 1;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            x as u8
        })
        .collect()
}

fn write_source(dir: &Path, name: &str, content: &[u8]) -> AttachmentRecord {
    let src_dir = dir.join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    std::fs::write(src_dir.join(name), content).unwrap();
    AttachmentRecord::new(Uuid::nil(), src_dir.to_str().unwrap(), name)
}

fn attach(mgr: &mut AttachmentFileManager, entry: Uuid, dir: &Path, name: &str, content: &[u8]) -> Uuid {
    let mut record = write_source(dir, name, content);
    record.entry_uuid = entry;
    let uuid = record.attmt_uuid;
    mgr.store_mut().add_attachment(record);
    uuid
}

/// Compressed chunk lengths of `attmt_uuid`, read straight from the container
fn chunk_lengths(path: &Path, attmt_uuid: &Uuid) -> Vec<u32> {
    let mut container = Container::for_read(path).unwrap();
    container.open(&pass()).unwrap();
    let mut found = Vec::new();
    while let Some(mut record) = container.read_pre().unwrap() {
        let mut lengths = Vec::new();
        loop {
            let chunk = container.read_data(true).unwrap();
            lengths.push(chunk.len);
            if chunk.last {
                break;
            }
        }
        container.read_post(&mut record).unwrap();
        if record.attmt_uuid == *attmt_uuid {
            found = lengths;
        }
    }
    container.close().unwrap();
    found
}

fn extract(mgr: &mut AttachmentFileManager, attmt_uuid: &Uuid) -> Vec<u8> {
    let mut out = Vec::new();
    mgr.extract_to(&pass(), attmt_uuid, &mut out, &mut Silent)
        .expect("extract should succeed");
    out
}

#[test]
fn large_attachment_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let entry = Uuid::new_v4();
    let original = noise(500 * 1024, 7);

    let mut mgr = manager(tmp.path(), db);
    let attmt = attach(&mut mgr, entry, tmp.path(), "big.bin", &original);
    let outcome = mgr.write(&pass(), false, &mut Silent).expect("write should succeed");
    assert!(matches!(outcome, WriteOutcome::Installed { records: 1, .. }));
    assert!(mgr.container_path().exists());

    // A fresh manager sees exactly what was written
    let mut reader = manager(tmp.path(), db);
    let summary = reader.read(&pass(), true, &mut Silent).expect("read should succeed");
    assert_eq!(summary.records, 1);
    assert!(summary.verified);

    let record = reader.store().find(&attmt).expect("record loaded").clone();
    assert_eq!(record.entry_uuid, entry);
    assert_eq!(record.filename, "big.bin");
    assert_eq!(record.uncsize as usize, original.len());
    assert!(record.is_persisted());
    assert_eq!(record.blksize, 32 * 1024);
    assert_eq!(record.crc, crc32fast::hash(&original));
    assert_eq!(record.odigest, sha1_of(&original));
    assert_eq!(reader.header().unwrap().db_uuid, db);

    let lengths = chunk_lengths(&reader.container_path(), &attmt);
    assert_eq!(lengths.len(), 16);
    assert_eq!(lengths.iter().map(|&n| n as u64).sum::<u64>(), record.cmpsize as u64);

    assert_eq!(extract(&mut reader, &attmt), original);
}

#[test]
fn empty_attachment_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    let attmt = attach(&mut mgr, Uuid::new_v4(), tmp.path(), "empty.txt", b"");
    mgr.write(&pass(), false, &mut Silent).unwrap();

    let mut reader = manager(tmp.path(), db);
    reader.read(&pass(), true, &mut Silent).unwrap();
    assert_eq!(reader.store().find(&attmt).unwrap().uncsize, 0);
    assert!(extract(&mut reader, &attmt).is_empty());
}

#[test]
fn several_records_keep_their_payloads() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let entry = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);

    let a = attach(&mut mgr, entry, tmp.path(), "a.txt", b"first attachment");
    let b = attach(&mut mgr, entry, tmp.path(), "b.bin", &noise(40_000, 3));
    mgr.write(&pass(), false, &mut Silent).unwrap();

    // A second write appends to what is already there
    let c = attach(&mut mgr, Uuid::new_v4(), tmp.path(), "c.txt", b"third");
    mgr.write(&pass(), false, &mut Silent).unwrap();

    let mut reader = manager(tmp.path(), db);
    let summary = reader.read(&pass(), true, &mut Silent).unwrap();
    assert_eq!(summary.records, 3);
    assert_eq!(reader.store().has_attachments(&entry), 2);

    assert_eq!(extract(&mut reader, &c), b"third");
    assert_eq!(extract(&mut reader, &a), b"first attachment");
    assert_eq!(extract(&mut reader, &b), noise(40_000, 3));
}

#[test]
fn soft_delete_survives_until_cleanup() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let entry = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    let keep = attach(&mut mgr, entry, tmp.path(), "keep.txt", b"keep me");
    let gone = attach(&mut mgr, entry, tmp.path(), "drop.txt", b"drop me");
    mgr.write(&pass(), false, &mut Silent).unwrap();

    assert!(mgr.store_mut().mark_for_deletion(&gone));
    assert_eq!(mgr.store().has_attachments(&entry), 1);

    // Without cleanup a soft delete alone does not rewrite the container
    let outcome = mgr.write(&pass(), false, &mut Silent).unwrap();
    assert_eq!(outcome, WriteOutcome::Unchanged);
    let mut reader = manager(tmp.path(), db);
    assert_eq!(reader.read(&pass(), false, &mut Silent).unwrap().records, 2);

    let outcome = mgr.write(&pass(), true, &mut Silent).unwrap();
    assert!(matches!(outcome, WriteOutcome::Installed { records: 1, .. }));
    assert!(mgr.store().find(&gone).is_none());

    let mut reader = manager(tmp.path(), db);
    assert_eq!(reader.read(&pass(), true, &mut Silent).unwrap().records, 1);
    assert!(reader.store().contains(&keep));
}

#[test]
fn soft_deleted_record_is_carried_by_rewrite() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let entry = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    attach(&mut mgr, entry, tmp.path(), "keep.txt", b"keep me");
    let gone = attach(&mut mgr, entry, tmp.path(), "drop.txt", b"drop me");
    mgr.write(&pass(), false, &mut Silent).unwrap();
    assert!(mgr.store_mut().mark_for_deletion(&gone));

    // A new attachment forces a rewrite; without cleanup the deleted one is copied along
    attach(&mut mgr, entry, tmp.path(), "new.txt", b"new one");
    let outcome = mgr.write(&pass(), false, &mut Silent).unwrap();
    assert!(matches!(outcome, WriteOutcome::Installed { records: 3, .. }));
    assert!(mgr.store().find(&gone).unwrap().is_deleted());

    let mut reader = manager(tmp.path(), db);
    assert_eq!(reader.read(&pass(), true, &mut Silent).unwrap().records, 3);
    assert_eq!(extract(&mut reader, &gone), b"drop me");

    let outcome = mgr.write(&pass(), true, &mut Silent).unwrap();
    assert!(matches!(outcome, WriteOutcome::Installed { records: 2, .. }));
    let mut reader = manager(tmp.path(), db);
    assert_eq!(reader.read(&pass(), true, &mut Silent).unwrap().records, 2);
    assert!(!reader.store().contains(&gone));
}

#[test]
fn purging_everything_removes_container() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let entry = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    attach(&mut mgr, entry, tmp.path(), "only.txt", b"only one");
    mgr.write(&pass(), false, &mut Silent).unwrap();

    mgr.store_mut().mark_all_for_deletion(&entry);
    let outcome = mgr.write(&pass(), true, &mut Silent).unwrap();
    match outcome {
        WriteOutcome::Removed { backup } => assert!(backup.unwrap().exists()),
        other => panic!("expected Removed, got {other:?}"),
    }
    assert!(!mgr.container_path().exists());
    assert!(mgr.store().is_empty());

    let mut reader = manager(tmp.path(), db);
    assert_eq!(reader.read(&pass(), false, &mut Silent).unwrap().records, 0);
}

#[test]
fn changed_description_is_persisted() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    let attmt = attach(&mut mgr, Uuid::new_v4(), tmp.path(), "notes.txt", b"notes");
    mgr.write(&pass(), false, &mut Silent).unwrap();

    let mut edited = mgr.store().find(&attmt).unwrap().clone();
    edited.description = "tax return 2025".into();
    edited.flags = pwat_core::flags::ERASE_ON_CLOSE;
    assert!(mgr.store_mut().change_attachment(&edited));
    assert!(matches!(
        mgr.write(&pass(), false, &mut Silent).unwrap(),
        WriteOutcome::Installed { .. }
    ));
    assert!(!mgr.store().find(&attmt).unwrap().is_changed());

    let mut reader = manager(tmp.path(), db);
    reader.read(&pass(), true, &mut Silent).unwrap();
    let loaded = reader.store().find(&attmt).unwrap();
    assert_eq!(loaded.description, "tax return 2025");
    assert_eq!(loaded.flags, pwat_core::flags::ERASE_ON_CLOSE);
    assert_eq!(extract(&mut reader, &attmt), b"notes");
}

#[test]
fn duplicate_copies_persisted_and_pending() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let old_entry = Uuid::new_v4();
    let new_entry = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    let persisted = attach(&mut mgr, old_entry, tmp.path(), "saved.txt", b"already saved");
    mgr.write(&pass(), false, &mut Silent).unwrap();
    attach(&mut mgr, old_entry, tmp.path(), "pending.txt", b"not yet saved");

    let new_uuids = mgr.duplicate(&pass(), old_entry, new_entry, &mut Silent).unwrap();
    assert_eq!(new_uuids.len(), 2);
    assert_eq!(mgr.store().has_attachments(&new_entry), 2);
    assert!(!new_uuids.contains(&persisted));

    mgr.write(&pass(), false, &mut Silent).unwrap();
    let mut reader = manager(tmp.path(), db);
    assert_eq!(reader.read(&pass(), true, &mut Silent).unwrap().records, 4);
    for uuid in &new_uuids {
        let record = reader.store().find(uuid).unwrap().clone();
        assert_eq!(record.entry_uuid, new_entry);
        let expected: &[u8] = if record.filename == "saved.txt" {
            b"already saved"
        } else {
            b"not yet saved"
        };
        assert_eq!(extract(&mut reader, uuid), expected);
    }
}

#[test]
fn tampered_container_fails_integrity() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    attach(&mut mgr, Uuid::new_v4(), tmp.path(), "data.bin", &noise(20_000, 11));
    mgr.write(&pass(), false, &mut Silent).unwrap();

    let live = mgr.container_path();
    let mut bytes = std::fs::read(&live).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x5a;
    std::fs::write(&live, &bytes).unwrap();

    let mut reader = manager(tmp.path(), db);
    let err = reader.read(&pass(), false, &mut Silent).unwrap_err();
    assert!(matches!(err, PwatError::Integrity(_)), "got {err:?}");
}

#[test]
fn flipped_hmac_fails_integrity() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    let attmt = attach(&mut mgr, Uuid::new_v4(), tmp.path(), "data.bin", b"authentic");
    mgr.write(&pass(), false, &mut Silent).unwrap();

    let live = mgr.container_path();
    let mut bytes = std::fs::read(&live).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    std::fs::write(&live, &bytes).unwrap();

    let mut reader = manager(tmp.path(), db);
    let err = reader.read(&pass(), true, &mut Silent).unwrap_err();
    assert!(matches!(err, PwatError::Integrity(_)), "got {err:?}");

    // Extraction hands out bytes but refuses to close on a bad HMAC
    let mut session = mgr.open_extract(&pass()).unwrap();
    session.seek(&attmt, &mut Silent).unwrap();
    while session.pull_chunk(&mut Silent).unwrap().is_some() {}
    session.read_trailer().unwrap();
    assert!(matches!(session.close(), Err(PwatError::Integrity(_))));
}

#[test]
fn truncated_container_is_reported() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    attach(&mut mgr, Uuid::new_v4(), tmp.path(), "data.bin", &noise(5_000, 5));
    mgr.write(&pass(), false, &mut Silent).unwrap();

    let live = mgr.container_path();
    let bytes = std::fs::read(&live).unwrap();
    std::fs::write(&live, &bytes[..bytes.len() - 100]).unwrap();

    let mut reader = manager(tmp.path(), db);
    let err = reader.read(&pass(), false, &mut Silent).unwrap_err();
    assert!(matches!(err, PwatError::TruncatedStream(_)), "got {err:?}");
}

#[test]
fn wrong_passphrase_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    attach(&mut mgr, Uuid::new_v4(), tmp.path(), "a.txt", b"secret");
    mgr.write(&pass(), false, &mut Silent).unwrap();

    let mut reader = manager(tmp.path(), db);
    let err = reader
        .read(&SecretString::from("wrong"), false, &mut Silent)
        .unwrap_err();
    assert!(matches!(err, PwatError::WrongPassphrase));
    assert!(reader.store().is_empty());
}

#[test]
fn container_of_other_database_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    attach(&mut mgr, Uuid::new_v4(), tmp.path(), "a.txt", b"mine");
    mgr.write(&pass(), false, &mut Silent).unwrap();

    let other = Uuid::new_v4();
    let mut reader = manager(tmp.path(), other);
    match reader.read(&pass(), false, &mut Silent).unwrap_err() {
        PwatError::HeaderMismatch { expected, found } => {
            assert_eq!(expected, other);
            assert_eq!(found, db);
        }
        e => panic!("expected HeaderMismatch, got {e:?}"),
    }
}

struct CancelOn(ProgressFunction, ProgressReply);

impl Progress for CancelOn {
    fn report(&mut self, event: &ProgressEvent<'_>) -> ProgressReply {
        if event.function == self.0 {
            self.1
        } else {
            ProgressReply::Continue
        }
    }
}

#[test]
fn cancel_all_during_read_leaves_store_empty() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    attach(&mut mgr, Uuid::new_v4(), tmp.path(), "a.txt", b"aaaa");
    mgr.write(&pass(), false, &mut Silent).unwrap();

    let mut reader = manager(tmp.path(), db);
    let mut cancel = CancelOn(ProgressFunction::ProcessFile, ProgressReply::CancelAll);
    let err = reader.read(&pass(), true, &mut cancel).unwrap_err();
    assert!(matches!(err, PwatError::UserCancelled));
    assert!(reader.store().is_empty());
}

#[test]
fn cancel_verify_keeps_reading() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    attach(&mut mgr, Uuid::new_v4(), tmp.path(), "a.txt", b"aaaa");
    attach(&mut mgr, Uuid::new_v4(), tmp.path(), "b.txt", b"bbbb");
    mgr.write(&pass(), false, &mut Silent).unwrap();

    let mut reader = manager(tmp.path(), db);
    let mut stop_verify = CancelOn(ProgressFunction::ProcessFile, ProgressReply::CancelVerify);
    let summary = reader.read(&pass(), true, &mut stop_verify).unwrap();
    assert_eq!(summary.records, 2);
    assert!(!summary.verified);
}

#[test]
fn header_only_read_does_not_load_records() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let mut mgr = manager(tmp.path(), db);
    assert!(mgr.read_header_only(&pass()).unwrap().is_none());

    attach(&mut mgr, Uuid::new_v4(), tmp.path(), "a.txt", b"a");
    mgr.write(&pass(), false, &mut Silent).unwrap();

    let mut reader = manager(tmp.path(), db);
    let header = reader.read_header_only(&pass()).unwrap().unwrap();
    assert_eq!(header.db_uuid, db);
    assert_eq!((header.version.major, header.version.minor), (0x83, 0x01));
    assert!(reader.store().is_empty());
}
