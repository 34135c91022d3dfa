//! Optimistic overlay.
//!
//! Tentative records written on behalf of in-flight mutations are journaled
//! per key. Reads see the committed record with the journal snapshot laid
//! over it; rolling back a mutation removes exactly its entries and replays
//! what is left.

use crate::cache::{remove_reachable, Removed};
use crate::error::Result;
use crate::key::like_pattern;
use crate::record::{ChangedKeys, MutationId, Record};
use std::collections::{BTreeMap, HashMap};

/// History of optimistic writes to one key.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordJournal {
    snapshot: Record,
    history: Vec<Record>,
}

impl RecordJournal {
    pub fn new(record: Record) -> Self {
        let mut journal = RecordJournal {
            snapshot: Record::new(record.key.clone()),
            history: Vec::new(),
        };
        journal.commit(record);
        journal
    }

    /// Field-by-field overlay of the history, later entries winning.
    pub fn snapshot(&self) -> &Record {
        &self.snapshot
    }

    pub fn history(&self) -> &[Record] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Append one write and overlay it on the snapshot.
    pub fn commit(&mut self, record: Record) -> ChangedKeys {
        let (snapshot, changed) = self.snapshot.merged_with(&record, None);
        self.snapshot = snapshot;
        self.history.push(record);
        changed
    }

    /// Drop the entries of one mutation and replay the rest.
    ///
    /// Returns the field paths of the dropped entries, empty when the
    /// mutation never touched this key.
    pub fn revert(&mut self, id: MutationId) -> ChangedKeys {
        let mut changed = ChangedKeys::new();
        self.history.retain(|entry| {
            if entry.mutation_id == Some(id) {
                changed.extend(entry.field_keys());
                false
            } else {
                true
            }
        });
        if changed.is_empty() {
            return changed;
        }

        let mut snapshot = Record::new(self.snapshot.key.clone());
        for entry in &self.history {
            snapshot = snapshot.merged_with(entry, None).0;
        }
        self.snapshot = snapshot;
        changed
    }
}

/// Journals of every key with pending optimistic writes.
#[derive(Clone, Debug, Default)]
pub struct OptimisticCache {
    journals: HashMap<String, RecordJournal>,
}

impl OptimisticCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.journals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journals.is_empty()
    }

    pub fn journal(&self, key: &str) -> Option<&RecordJournal> {
        self.journals.get(key)
    }

    /// Journal one tentative record. It must carry its mutation id.
    pub fn merge_optimistic(&mut self, record: Record) -> ChangedKeys {
        let key = record.key.as_str().to_string();
        debug!(
            "✓ Optimistic MERGE {} (mutation {:?})",
            key,
            record.mutation_id.map(|id| id.to_string())
        );
        match self.journals.get_mut(&key) {
            Some(journal) => journal.commit(record),
            None => {
                let journal = RecordJournal::new(record);
                let changed = journal.snapshot.field_keys();
                self.journals.insert(key, journal);
                changed
            }
        }
    }

    /// Remove every entry written by `id`. Unknown ids are a no-op.
    pub fn rollback(&mut self, id: MutationId) -> ChangedKeys {
        let mut changed = ChangedKeys::new();
        self.journals.retain(|_, journal| {
            changed.extend(journal.revert(id));
            !journal.is_empty()
        });
        debug!("✓ Optimistic ROLLBACK {} -> {} fields", id, changed.len());
        changed
    }

    /// Lay the journal snapshot of `key` over the committed record.
    pub fn overlay(&self, key: &str, committed: Option<Record>) -> Option<Record> {
        let Some(journal) = self.journals.get(key) else {
            return committed;
        };
        match committed {
            Some(record) => Some(record.merged_with(&journal.snapshot, None).0),
            None => Some(journal.snapshot.clone()),
        }
    }

    /// Drop journals of `key` and, with `cascade`, of every key its snapshot reaches.
    pub fn remove(&mut self, key: &str, cascade: bool) -> Removed {
        // Infallible take, so the result is always Ok.
        remove_reachable(key, cascade, |k| {
            Ok(self.journals.remove(k).map(|journal| journal.snapshot))
        })
        .unwrap_or_default()
    }

    /// Drop journals whose key matches a `LIKE` pattern.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for an invalid pattern.
    pub fn remove_matching(&mut self, pattern: &str) -> Result<Removed> {
        let regex = like_pattern(pattern)?;
        let mut removed = Removed::default();
        self.journals.retain(|key, journal| {
            if regex.is_match(key) {
                removed.absorb(&journal.snapshot);
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    pub fn clear(&mut self) -> Removed {
        let mut removed = Removed::default();
        for journal in self.journals.values() {
            removed.absorb(&journal.snapshot);
        }
        self.journals.clear();
        removed
    }

    /// Snapshot of every journaled key.
    pub fn dump(&self) -> BTreeMap<String, Record> {
        self.journals
            .iter()
            .map(|(key, journal)| (key.clone(), journal.snapshot.clone()))
            .collect()
    }
}
