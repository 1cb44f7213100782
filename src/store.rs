//! In-memory application table with the deduplication and merge invariants.
//!
//! A batch loads a [`RecordStore`] from the database, mutates it through `&mut`
//! access only, and hands it back to [`crate::db::Database::save`] in one
//! transaction.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashSet};

use crate::models::{excerpt, ApplicationRecord, ClassifiedResponse, DiscoveredPosting, IdentityKey};

/// Characters of message content kept in a record's notes.
pub const NOTES_PREVIEW_CHARS: usize = 300;

/// Tracks identity keys already present so repeated discoveries are recognised.
#[derive(Debug, Default, Clone)]
pub struct Deduplicator {
    seen: HashSet<IdentityKey>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the key and reports whether it was new.
    pub fn admit(&mut self, key: IdentityKey) -> bool {
        self.seen.insert(key)
    }
}

#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<ApplicationRecord>,
    dedup: Deduplicator,
    responded: BTreeSet<usize>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from persisted rows. Rows sharing a key (edited by hand, say)
    /// are kept as they are; the key is simply known.
    pub fn from_records(records: Vec<ApplicationRecord>) -> Self {
        let mut dedup = Deduplicator::new();
        for record in &records {
            dedup.admit(record.identity_key());
        }
        Self {
            records,
            dedup,
            responded: BTreeSet::new(),
        }
    }

    pub fn records(&self) -> &[ApplicationRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&ApplicationRecord> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends every posting whose identity key is not yet stored. The first
    /// record with a key wins; later discoveries never touch it.
    pub fn ingest(&mut self, postings: &[DiscoveredPosting]) -> usize {
        let mut added = 0;
        for posting in postings {
            if !self.dedup.admit(posting.identity_key()) {
                tracing::debug!(title = %posting.title, company = %posting.company, "already tracked");
                continue;
            }
            self.records.push(ApplicationRecord::from_posting(posting));
            added += 1;
        }
        added
    }

    /// Indices of records waiting for a recruiter answer, in table order.
    pub fn open_records(&self) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.is_open())
            .map(|(index, _)| index)
            .collect()
    }

    /// Attaches a response to the record at `index`. Returns `false` without
    /// touching anything when the record already has a response or does not exist.
    pub fn apply_match(&mut self, index: usize, response: &ClassifiedResponse, matched_at: NaiveDate) -> bool {
        let Some(record) = self.records.get_mut(index) else {
            return false;
        };
        if record.is_response_closed() {
            return false;
        }

        record.recruiter_response = Some(response.response_type.label().to_string());
        record.response_date = Some(matched_at);
        record.notes = format_notes(response);
        self.responded.insert(index);
        true
    }

    /// Records never persisted yet, in table order.
    pub(crate) fn pending_inserts(&self) -> impl Iterator<Item = &ApplicationRecord> {
        self.records.iter().filter(|record| record.id.is_none())
    }

    /// Hands out row ids to unsaved records, in the order of `pending_inserts`.
    /// A record whose key another run stored first gets that row's id.
    pub(crate) fn assign_ids(&mut self, ids: &[i64]) {
        let unsaved = self.records.iter_mut().filter(|record| record.id.is_none());
        for (record, id) in unsaved.zip(ids) {
            record.id = Some(*id);
        }
    }

    /// Persisted records whose response columns changed during this batch.
    pub(crate) fn pending_updates(&self) -> impl Iterator<Item = &ApplicationRecord> {
        self.responded
            .iter()
            .filter_map(|index| self.records.get(*index))
            .filter(|record| record.id.is_some())
    }

    pub(crate) fn mark_saved(&mut self) {
        self.responded.clear();
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.responded.is_empty() || self.records.iter().any(|record| record.id.is_none())
    }
}

fn format_notes(response: &ClassifiedResponse) -> String {
    format!(
        "From: {}\nSubject: {}\nType: {}\nContent Preview: {}...",
        response.sender,
        response.subject,
        response.response_type.label(),
        excerpt(&response.content_excerpt, NOTES_PREVIEW_CHARS)
    )
}
