//! Integration test: importing exported attachments into a database

use pwat_chunks::sha1_of;
use pwat_container::{AttachmentFileManager, ImportedAttachment, SkipReason};
use pwat_core::{AttachmentRecord, EntryInfo, EntryLookup, PwatConfig, SecretBytes, Silent};
use secrecy::SecretString;
use std::collections::HashMap;
use std::path::Path;
use tempfile::TempDir;
use uuid::Uuid;

fn pass() -> SecretString {
    SecretString::from("import test")
}

struct Entries(HashMap<Uuid, EntryInfo>);

impl Entries {
    fn with(uuids: &[Uuid]) -> Self {
        Self(
            uuids
                .iter()
                .map(|u| {
                    let info = EntryInfo {
                        group: "imported".into(),
                        title: u.to_string(),
                        user: "alice".into(),
                    };
                    (*u, info)
                })
                .collect(),
        )
    }
}

impl EntryLookup for Entries {
    fn entry_info(&self, entry_uuid: &Uuid) -> Option<EntryInfo> {
        self.0.get(entry_uuid).cloned()
    }
}

fn exported(entry: Uuid, name: &str, data: &[u8]) -> ImportedAttachment {
    let mut record = AttachmentRecord::new(entry, "/elsewhere", name);
    record.uncsize = data.len() as u32;
    record.crc = crc32fast::hash(data);
    record.odigest = sha1_of(data);
    record.mtime = 1_700_000_000;
    ImportedAttachment {
        record,
        data: SecretBytes::new(data.to_vec()),
    }
}

fn manager(dir: &Path, db: Uuid) -> AttachmentFileManager {
    AttachmentFileManager::new(dir.join("vault.psafe3"), db, &PwatConfig::default())
}

fn extract(mgr: &mut AttachmentFileManager, uuid: &Uuid) -> Vec<u8> {
    let mut out = Vec::new();
    mgr.extract_to(&pass(), uuid, &mut out, &mut Silent).unwrap();
    out
}

#[test]
fn import_into_empty_database() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let entry = Uuid::new_v4();
    let lookup = Entries::with(&[entry]);
    let mut mgr = manager(tmp.path(), db);

    let items = vec![
        exported(entry, "a.txt", b"imported alpha"),
        exported(entry, "b.txt", &[7u8; 30_000]),
    ];
    let report = mgr.import(&pass(), items, &lookup, &mut Silent).unwrap();
    assert_eq!(report.imported.len(), 2);
    assert!(report.skipped.is_empty());
    assert!(mgr.container_path().exists());
    assert!(mgr.stray_files().unwrap().is_empty());

    let mut reader = manager(tmp.path(), db);
    assert_eq!(reader.read(&pass(), true, &mut Silent).unwrap().records, 2);
    let first = reader.store().find(&report.imported[0]).unwrap().clone();
    assert_eq!(first.filename, "a.txt");
    assert_eq!(first.mtime, 1_700_000_000);
    assert!(first.dtime > 0);
    assert_eq!(extract(&mut reader, &report.imported[0]), b"imported alpha");
    assert_eq!(extract(&mut reader, &report.imported[1]), vec![7u8; 30_000]);
}

#[test]
fn import_keeps_existing_attachments() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let entry = Uuid::new_v4();
    let lookup = Entries::with(&[entry]);
    let mut mgr = manager(tmp.path(), db);

    let first = mgr
        .import(&pass(), vec![exported(entry, "old.txt", b"old")], &lookup, &mut Silent)
        .unwrap();
    let second = mgr
        .import(&pass(), vec![exported(entry, "new.txt", b"new")], &lookup, &mut Silent)
        .unwrap();
    assert_eq!(mgr.store().len(), 2);

    let mut reader = manager(tmp.path(), db);
    assert_eq!(reader.read(&pass(), true, &mut Silent).unwrap().records, 2);
    assert_eq!(extract(&mut reader, &first.imported[0]), b"old");
    assert_eq!(extract(&mut reader, &second.imported[0]), b"new");
}

#[test]
fn invalid_items_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let entry = Uuid::new_v4();
    let lookup = Entries::with(&[entry]);
    let mut mgr = manager(tmp.path(), db);

    let orphan = exported(Uuid::new_v4(), "orphan.txt", b"no entry");
    let mut wrong_size = exported(entry, "size.txt", b"sized");
    wrong_size.record.uncsize = 99;
    let mut wrong_crc = exported(entry, "crc.txt", b"checked");
    wrong_crc.record.crc ^= 0xffff;
    let good = exported(entry, "good.txt", b"fine");
    let good_uuid = good.record.attmt_uuid;

    let report = mgr
        .import(&pass(), vec![orphan, wrong_size, wrong_crc, good], &lookup, &mut Silent)
        .unwrap();
    assert_eq!(report.imported, vec![good_uuid]);
    let reasons: Vec<_> = report.skipped.iter().map(|s| s.reason.clone()).collect();
    assert_eq!(
        reasons,
        vec![
            SkipReason::EntryNotFound,
            SkipReason::SizeMismatch { recorded: 99, actual: 5 },
            SkipReason::DigestFailed,
        ]
    );
    assert_eq!(report.skipped[0].filename, "orphan.txt");
}

#[test]
fn nothing_valid_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let lookup = Entries::with(&[]);
    let mut mgr = manager(tmp.path(), db);

    let report = mgr
        .import(&pass(), vec![exported(Uuid::new_v4(), "x.txt", b"x")], &lookup, &mut Silent)
        .unwrap();
    assert!(report.imported.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert!(!mgr.container_path().exists());
    assert!(mgr.stray_files().unwrap().is_empty());
}

#[test]
fn colliding_uuid_is_replaced() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let entry = Uuid::new_v4();
    let lookup = Entries::with(&[entry]);
    let mut mgr = manager(tmp.path(), db);

    let original = exported(entry, "one.txt", b"one");
    let taken = original.record.attmt_uuid;
    mgr.import(&pass(), vec![original], &lookup, &mut Silent).unwrap();

    let mut again = exported(entry, "two.txt", b"two");
    again.record.attmt_uuid = taken;
    let report = mgr.import(&pass(), vec![again], &lookup, &mut Silent).unwrap();
    assert_eq!(report.imported.len(), 1);
    assert_ne!(report.imported[0], taken);

    let mut reader = manager(tmp.path(), db);
    assert_eq!(reader.read(&pass(), true, &mut Silent).unwrap().records, 2);
    assert_eq!(extract(&mut reader, &taken), b"one");
    assert_eq!(extract(&mut reader, &report.imported[0]), b"two");
}

#[test]
fn imported_records_join_entry_info() {
    let tmp = TempDir::new().unwrap();
    let db = Uuid::new_v4();
    let entry = Uuid::new_v4();
    let lookup = Entries::with(&[entry]);
    let mut mgr = manager(tmp.path(), db);
    mgr.import(&pass(), vec![exported(entry, "a.txt", b"a")], &lookup, &mut Silent)
        .unwrap();

    let joined = mgr.store().get_all_attachments_ex(&lookup);
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].entry.group, "imported");
    assert_eq!(joined[0].entry.user, "alice");
}
