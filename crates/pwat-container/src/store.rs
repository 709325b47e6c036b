//! In-memory attachment store, keyed by owning entry.
//!
//! Soft-deleted records stay in the store, so a later non-cleanup write can
//! still carry them, but they are hidden from every listing here.

use pwat_core::{uiflags, AttachmentRecord, AttachmentRecordEx, EntryInfo, EntryLookup};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct AttachmentStore {
    by_entry: BTreeMap<Uuid, Vec<AttachmentRecord>>,
}

impl AttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, soft-deleted ones included.
    pub fn len(&self) -> usize {
        self.by_entry.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entry.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_entry.clear();
    }

    /// Every record, soft-deleted ones included, grouped by entry.
    pub fn iter_all(&self) -> impl Iterator<Item = &AttachmentRecord> {
        self.by_entry.values().flatten()
    }

    fn visible(&self) -> impl Iterator<Item = &AttachmentRecord> {
        self.iter_all().filter(|r| !r.is_deleted())
    }

    pub fn contains(&self, attmt_uuid: &Uuid) -> bool {
        self.find(attmt_uuid).is_some()
    }

    pub fn find(&self, attmt_uuid: &Uuid) -> Option<&AttachmentRecord> {
        self.iter_all().find(|r| r.attmt_uuid == *attmt_uuid)
    }

    pub fn find_mut(&mut self, attmt_uuid: &Uuid) -> Option<&mut AttachmentRecord> {
        self.by_entry
            .values_mut()
            .flatten()
            .find(|r| r.attmt_uuid == *attmt_uuid)
    }

    pub fn add_attachment(&mut self, record: AttachmentRecord) {
        self.by_entry.entry(record.entry_uuid).or_default().push(record);
    }

    pub fn add_attachments(&mut self, records: impl IntoIterator<Item = AttachmentRecord>) {
        for record in records {
            self.add_attachment(record);
        }
    }

    /// Take the user-editable fields (flags, description) from `record`.
    /// Returns false if no record has its uuid.
    pub fn change_attachment(&mut self, record: &AttachmentRecord) -> bool {
        match self.find_mut(&record.attmt_uuid) {
            Some(existing) => {
                existing.flags = record.flags;
                existing.description = record.description.clone();
                existing.uiflags |= uiflags::CHANGED;
                true
            }
            None => false,
        }
    }

    pub fn mark_for_deletion(&mut self, attmt_uuid: &Uuid) -> bool {
        self.set_deleted(attmt_uuid, true)
    }

    pub fn unmark_for_deletion(&mut self, attmt_uuid: &Uuid) -> bool {
        self.set_deleted(attmt_uuid, false)
    }

    fn set_deleted(&mut self, attmt_uuid: &Uuid, deleted: bool) -> bool {
        match self.find_mut(attmt_uuid) {
            Some(r) => {
                set_flag(r, deleted);
                true
            }
            None => false,
        }
    }

    /// Returns the number of records of `entry_uuid` that were marked.
    pub fn mark_all_for_deletion(&mut self, entry_uuid: &Uuid) -> usize {
        self.set_entry_deleted(entry_uuid, true)
    }

    pub fn unmark_all_for_deletion(&mut self, entry_uuid: &Uuid) -> usize {
        self.set_entry_deleted(entry_uuid, false)
    }

    fn set_entry_deleted(&mut self, entry_uuid: &Uuid, deleted: bool) -> usize {
        self.by_entry
            .get_mut(entry_uuid)
            .map(|records| {
                records.iter_mut().for_each(|r| set_flag(r, deleted));
                records.len()
            })
            .unwrap_or(0)
    }

    /// Number of visible attachments of an entry.
    pub fn has_attachments(&self, entry_uuid: &Uuid) -> usize {
        self.by_entry
            .get(entry_uuid)
            .map(|records| records.iter().filter(|r| !r.is_deleted()).count())
            .unwrap_or(0)
    }

    pub fn get_attachments(&self, entry_uuid: &Uuid) -> Vec<AttachmentRecord> {
        self.by_entry
            .get(entry_uuid)
            .map(|records| records.iter().filter(|r| !r.is_deleted()).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_all_attachments(&self) -> Vec<AttachmentRecord> {
        self.visible().cloned().collect()
    }

    /// Visible attachments joined with their entry's group/title/user.
    /// Records whose entry is unknown get `?` placeholders.
    pub fn get_all_attachments_ex(&self, lookup: &dyn EntryLookup) -> Vec<AttachmentRecordEx> {
        self.visible()
            .map(|r| AttachmentRecordEx {
                record: r.clone(),
                entry: lookup
                    .entry_info(&r.entry_uuid)
                    .unwrap_or_else(EntryInfo::unknown),
            })
            .collect()
    }

    /// Replace the records of `entry_uuid`. The new records are flagged as
    /// changed so the next write rewrites the container.
    pub fn set_attachments(&mut self, entry_uuid: Uuid, records: Vec<AttachmentRecord>) {
        let records: Vec<AttachmentRecord> = records
            .into_iter()
            .map(|mut r| {
                r.entry_uuid = entry_uuid;
                r.uiflags |= uiflags::CHANGED;
                r
            })
            .collect();
        if records.is_empty() {
            self.by_entry.remove(&entry_uuid);
        } else {
            self.by_entry.insert(entry_uuid, records);
        }
    }

    pub fn attachment_uuids(&self) -> Vec<Uuid> {
        self.visible().map(|r| r.attmt_uuid).collect()
    }

    pub fn filter(&self, filter: &AttachmentFilter) -> Vec<AttachmentRecord> {
        self.visible().filter(|r| filter.matches(r)).cloned().collect()
    }

    /// Drop a record outright (not a soft delete).
    pub fn remove(&mut self, attmt_uuid: &Uuid) -> Option<AttachmentRecord> {
        let (entry, index) = self.by_entry.iter().find_map(|(entry, records)| {
            records
                .iter()
                .position(|r| r.attmt_uuid == *attmt_uuid)
                .map(|i| (*entry, i))
        })?;
        let records = self.by_entry.get_mut(&entry)?;
        let removed = records.remove(index);
        if records.is_empty() {
            self.by_entry.remove(&entry);
        }
        Some(removed)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&AttachmentRecord) -> bool) {
        self.by_entry.retain(|_, records| {
            records.retain(|r| keep(r));
            !records.is_empty()
        });
    }
}

fn set_flag(record: &mut AttachmentRecord, deleted: bool) {
    if deleted {
        record.uiflags |= uiflags::DELETED;
    } else {
        record.uiflags &= !uiflags::DELETED;
    }
}

/// Substring criteria for listing attachments. Unset criteria match
/// everything.
#[derive(Debug, Clone, Default)]
pub struct AttachmentFilter {
    pub entry_uuid: Option<Uuid>,
    pub filename: Option<String>,
    pub path: Option<String>,
    pub description: Option<String>,
    pub case_sensitive: bool,
}

impl AttachmentFilter {
    pub fn matches(&self, record: &AttachmentRecord) -> bool {
        if self.entry_uuid.is_some_and(|e| e != record.entry_uuid) {
            return false;
        }
        self.text_matches(self.filename.as_deref(), &record.filename)
            && self.text_matches(self.path.as_deref(), &record.path)
            && self.text_matches(self.description.as_deref(), &record.description)
    }

    fn text_matches(&self, needle: Option<&str>, haystack: &str) -> bool {
        match needle {
            None => true,
            Some(n) if self.case_sensitive => haystack.contains(n),
            Some(n) => haystack.to_lowercase().contains(&n.to_lowercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(entry: Uuid, name: &str) -> AttachmentRecord {
        AttachmentRecord::new(entry, "/docs", name)
    }

    #[test]
    fn soft_delete_hides_but_keeps() {
        let entry = Uuid::new_v4();
        let mut store = AttachmentStore::new();
        let a = rec(entry, "a.txt");
        let b = rec(entry, "b.txt");
        store.add_attachments([a.clone(), b.clone()]);
        assert_eq!(store.has_attachments(&entry), 2);

        assert!(store.mark_for_deletion(&a.attmt_uuid));
        assert_eq!(store.has_attachments(&entry), 1);
        assert_eq!(store.get_attachments(&entry), vec![b.clone()]);
        assert_eq!(store.attachment_uuids(), vec![b.attmt_uuid]);
        assert_eq!(store.len(), 2);
        assert!(store.find(&a.attmt_uuid).unwrap().is_deleted());

        assert!(store.unmark_for_deletion(&a.attmt_uuid));
        assert_eq!(store.has_attachments(&entry), 2);
        assert!(!store.mark_for_deletion(&Uuid::new_v4()));
    }

    #[test]
    fn entry_wide_deletion() {
        let (e1, e2) = (Uuid::new_v4(), Uuid::new_v4());
        let mut store = AttachmentStore::new();
        store.add_attachments([rec(e1, "a"), rec(e1, "b"), rec(e2, "c")]);
        assert_eq!(store.mark_all_for_deletion(&e1), 2);
        assert_eq!(store.get_all_attachments().len(), 1);
        assert_eq!(store.unmark_all_for_deletion(&e1), 2);
        assert_eq!(store.get_all_attachments().len(), 3);
        assert_eq!(store.mark_all_for_deletion(&Uuid::new_v4()), 0);
    }

    #[test]
    fn change_updates_editable_fields_only() {
        let entry = Uuid::new_v4();
        let mut store = AttachmentStore::new();
        let original = rec(entry, "a.txt");
        store.add_attachment(original.clone());

        let mut edited = original.clone();
        edited.description = "new description".into();
        edited.flags = pwat_core::flags::EXTRACT_TO_REMOVABLE;
        edited.filename = "renamed.txt".into();
        assert!(store.change_attachment(&edited));

        let stored = store.find(&original.attmt_uuid).unwrap();
        assert_eq!(stored.description, "new description");
        assert_eq!(stored.flags, pwat_core::flags::EXTRACT_TO_REMOVABLE);
        assert_eq!(stored.filename, "a.txt");
        assert!(stored.is_changed());
    }

    #[test]
    fn set_attachments_replaces_entry() {
        let entry = Uuid::new_v4();
        let mut store = AttachmentStore::new();
        store.add_attachments([rec(entry, "a"), rec(entry, "b")]);
        store.set_attachments(entry, vec![rec(Uuid::nil(), "c")]);
        let now = store.get_attachments(&entry);
        assert_eq!(now.len(), 1);
        assert_eq!(now[0].entry_uuid, entry);
        assert!(now[0].is_changed());
        store.set_attachments(entry, Vec::new());
        assert!(store.is_empty());
    }

    #[test]
    fn filter_by_criteria() {
        let (e1, e2) = (Uuid::new_v4(), Uuid::new_v4());
        let mut store = AttachmentStore::new();
        let mut tax = rec(e1, "Tax-2023.PDF");
        tax.description = "annual return".into();
        store.add_attachments([tax, rec(e1, "photo.jpg"), rec(e2, "tax-notes.txt")]);

        let f = AttachmentFilter {
            filename: Some("tax".into()),
            ..Default::default()
        };
        assert_eq!(store.filter(&f).len(), 2);

        let f = AttachmentFilter {
            filename: Some("tax".into()),
            case_sensitive: true,
            ..Default::default()
        };
        assert_eq!(store.filter(&f).len(), 1);

        let f = AttachmentFilter {
            entry_uuid: Some(e1),
            description: Some("RETURN".into()),
            ..Default::default()
        };
        let found = store.filter(&f);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].filename, "Tax-2023.PDF");
    }

    #[test]
    fn listing_with_entry_info() {
        struct Lookup(Uuid);
        impl EntryLookup for Lookup {
            fn entry_info(&self, entry_uuid: &Uuid) -> Option<EntryInfo> {
                (*entry_uuid == self.0).then(|| EntryInfo {
                    group: "Bank".into(),
                    title: "Checking".into(),
                    user: "me".into(),
                })
            }
        }
        let (known, orphan) = (Uuid::new_v4(), Uuid::new_v4());
        let mut store = AttachmentStore::new();
        store.add_attachments([rec(known, "a"), rec(orphan, "b")]);
        let mut ex = store.get_all_attachments_ex(&Lookup(known));
        ex.sort_by(|a, b| a.record.filename.cmp(&b.record.filename));
        assert_eq!(ex[0].entry.title, "Checking");
        assert_eq!(ex[1].entry.group, "?");
        assert_eq!(ex[1].entry, EntryInfo::unknown());
    }

    #[test]
    fn remove_and_retain() {
        let entry = Uuid::new_v4();
        let mut store = AttachmentStore::new();
        let a = rec(entry, "a");
        store.add_attachments([a.clone(), rec(entry, "b")]);
        assert_eq!(store.remove(&a.attmt_uuid).unwrap().filename, "a");
        assert!(store.remove(&a.attmt_uuid).is_none());
        store.retain(|r| r.filename != "b");
        assert!(store.is_empty());
    }
}
