//! Physical index entries.
//!
//! Every entry remembers when it was added and removed, so a lookup at an older
//! snapshot answers the way the index looked at that point.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::error::{Result, lock_err};
use crate::types::{CommitSeq, ElementId, EntrySpan, IndexEntryRecord, IndexKey};

type KeyBytes = Vec<u8>;
type Postings = HashMap<ElementId, IndexEntryRecord>;

#[derive(Debug, Default)]
pub struct IndexEntries {
    entries: RwLock<HashMap<String, HashMap<KeyBytes, Postings>>>,
}

impl IndexEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hydrate(&self, records: Vec<IndexEntryRecord>) -> Result<()> {
        self.install(records)
    }

    /// Elements whose entry under `key` is visible at `snapshot`.
    pub fn lookup(&self, index: &str, key: &IndexKey, snapshot: CommitSeq) -> Result<HashSet<ElementId>> {
        let key_bytes = key.encode()?;
        let entries = self.entries.read().map_err(lock_err)?;
        Ok(entries
            .get(index)
            .and_then(|keys| keys.get(&key_bytes))
            .map(|postings| {
                postings
                    .values()
                    .filter(|r| r.spans.iter().any(|s| s.is_visible_at(snapshot)))
                    .map(|r| r.element)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Elements currently holding a live entry under `key`.
    pub fn live_elements(&self, index: &str, key: &IndexKey) -> Result<Vec<ElementId>> {
        let key_bytes = key.encode()?;
        let entries = self.entries.read().map_err(lock_err)?;
        Ok(entries
            .get(index)
            .and_then(|keys| keys.get(&key_bytes))
            .map(|postings| {
                postings
                    .values()
                    .filter(|r| r.spans.last().is_some_and(EntrySpan::is_live))
                    .map(|r| r.element)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Every record of `index` with a live entry.
    pub fn live_records(&self, index: &str) -> Result<Vec<IndexEntryRecord>> {
        let entries = self.entries.read().map_err(lock_err)?;
        Ok(entries
            .get(index)
            .map(|keys| {
                keys.values()
                    .flat_map(|postings| postings.values())
                    .filter(|r| r.spans.last().is_some_and(EntrySpan::is_live))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Number of entries of `index` visible at `snapshot`.
    pub fn count_visible(&self, index: &str, snapshot: CommitSeq) -> Result<usize> {
        let entries = self.entries.read().map_err(lock_err)?;
        Ok(entries
            .get(index)
            .map(|keys| {
                keys.values()
                    .flat_map(|postings| postings.values())
                    .filter(|r| r.spans.iter().any(|s| s.is_visible_at(snapshot)))
                    .count()
            })
            .unwrap_or(0))
    }

    /// The record that results from adding an entry at `seq`, or `None` if it is already live.
    pub fn prepare_add(
        &self,
        index: &str,
        key: &IndexKey,
        element: ElementId,
        seq: CommitSeq,
    ) -> Result<Option<IndexEntryRecord>> {
        let mut record = self.current(index, key, element)?.unwrap_or(IndexEntryRecord {
            index: index.to_string(),
            key: key.clone(),
            element,
            spans: Vec::new(),
        });
        if record.spans.last().is_some_and(EntrySpan::is_live) {
            return Ok(None);
        }
        record.spans.push(EntrySpan {
            added: seq,
            removed: None,
        });
        Ok(Some(record))
    }

    /// The record that results from closing the live entry at `seq`, or `None` if there is none.
    pub fn prepare_remove(
        &self,
        index: &str,
        key: &IndexKey,
        element: ElementId,
        seq: CommitSeq,
    ) -> Result<Option<IndexEntryRecord>> {
        let Some(mut record) = self.current(index, key, element)? else {
            return Ok(None);
        };
        match record.spans.last_mut() {
            Some(span) if span.is_live() => span.removed = Some(seq),
            _ => return Ok(None),
        }
        Ok(Some(record))
    }

    /// Replaces the stored records with `records`.
    pub fn install(&self, records: Vec<IndexEntryRecord>) -> Result<()> {
        let mut entries = self.entries.write().map_err(lock_err)?;
        for record in records {
            let key_bytes = record.key.encode()?;
            entries
                .entry(record.index.clone())
                .or_default()
                .entry(key_bytes)
                .or_default()
                .insert(record.element, record);
        }
        Ok(())
    }

    pub fn drop_index(&self, index: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(lock_err)?;
        entries.remove(index);
        Ok(())
    }

    fn current(&self, index: &str, key: &IndexKey, element: ElementId) -> Result<Option<IndexEntryRecord>> {
        let key_bytes = key.encode()?;
        let entries = self.entries.read().map_err(lock_err)?;
        Ok(entries
            .get(index)
            .and_then(|keys| keys.get(&key_bytes))
            .and_then(|postings| postings.get(&element))
            .cloned())
    }
}
