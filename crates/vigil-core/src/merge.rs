//! Merge and deduplication rules for usage records.
//!
//! The same rules apply wherever two records claim the same application:
//! folding live sessions into persisted rollups for a report, or folding
//! duplicate views of one still-open session. Records merge when their
//! canonical keys match; how durations combine depends on whether the
//! two sides are disjoint spans or two snapshots of one session.

use std::collections::HashMap;

use uuid::Uuid;

use crate::record::UsageRecord;

/// How durations combine when two records merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// The records cover disjoint spans: durations add.
    DisjointSum,
    /// The records are two views of one still-open session: take the
    /// larger, never the sum.
    SameSessionMax,
}

/// Folds `incoming` into `existing`.
///
/// Duration combines per `strategy`; the earlier start wins; an open end
/// on either side keeps the merged record open; identity hints (title,
/// pid, handle, raw process name) are last-writer-wins by update time.
/// The merged record is focused if either side was; callers that hold
/// other records must route the grant through their focus transition so
/// the flag is cleared everywhere else.
pub fn merge_into(existing: &mut UsageRecord, incoming: &UsageRecord, strategy: MergeStrategy) {
    existing.duration_ms = match strategy {
        MergeStrategy::DisjointSum => existing.duration_ms.saturating_add(incoming.duration_ms),
        MergeStrategy::SameSessionMax => existing.duration_ms.max(incoming.duration_ms),
    };

    existing.started_at = existing.started_at.min(incoming.started_at);
    existing.date = existing.date.min(incoming.date);
    existing.ended_at = match (existing.ended_at, incoming.ended_at) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    };

    if incoming.updated_at >= existing.updated_at {
        existing.window_title.clone_from(&incoming.window_title);
        existing.process_name.clone_from(&incoming.process_name);
        existing.pid = incoming.pid;
        existing.handle = incoming.handle;
    }

    if incoming.is_focused() {
        existing.set_focus(true);
    }
    existing.absorb_focus_history(incoming);
    existing.is_idle = existing.is_idle && incoming.is_idle;
    existing.updated_at = existing.updated_at.max(incoming.updated_at);
}

/// A collection of usage records indexed by canonical key.
///
/// `upsert` is the only mutation: it merges records sharing an id with
/// [`MergeStrategy::SameSessionMax`] and records sharing only a key with
/// [`MergeStrategy::DisjointSum`]. When a record arrives under a new
/// canonical identity (re-resolution), the old entry is moved, its key
/// re-derived from the merged record, and the index updated without loss
/// or duplication.
#[derive(Debug, Default)]
pub struct RecordIndex {
    by_key: HashMap<String, UsageRecord>,
    key_of: HashMap<Uuid, String>,
}

impl RecordIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or merges a record.
    pub fn upsert(&mut self, incoming: UsageRecord) {
        let mut incoming = incoming;

        // A known id arriving under a different key means the session
        // was re-canonicalized. Fold the old entry into the incoming
        // view first so the move cannot double-count its time.
        if let Some(old_key) = self.key_of.get(&incoming.id).cloned() {
            if old_key != incoming.name.key() {
                self.key_of.remove(&incoming.id);
                if let Some(mut moved) = self.by_key.remove(&old_key) {
                    moved.name = incoming.name.clone();
                    merge_into(&mut moved, &incoming, MergeStrategy::SameSessionMax);
                    incoming = moved;
                }
            }
        }

        let new_key = incoming.name.key().to_string();
        let merged = match self.by_key.remove(&new_key) {
            Some(mut existing) => {
                // Same session when the ids match or the entry already
                // absorbed this session earlier.
                let same_session = existing.id == incoming.id
                    || self.key_of.get(&incoming.id).is_some_and(|k| *k == new_key);
                let strategy = if same_session {
                    MergeStrategy::SameSessionMax
                } else {
                    MergeStrategy::DisjointSum
                };
                merge_into(&mut existing, &incoming, strategy);
                self.key_of
                    .insert(incoming.id, existing.name.key().to_string());
                existing
            }
            None => incoming,
        };

        let focused_id = merged.is_focused().then_some(merged.id);
        self.reinsert(merged);
        if let Some(id) = focused_id {
            self.clear_focus_except(id);
        }
    }

    /// Re-derives the key from the record and stores it under that key.
    fn reinsert(&mut self, record: UsageRecord) {
        let key = record.name.key().to_string();
        self.key_of.insert(record.id, key.clone());
        match self.by_key.remove(&key) {
            Some(mut existing) if existing.id != record.id => {
                // Moving an entry can land it on an occupied key; fold
                // the two disjoint entries together.
                merge_into(&mut existing, &record, MergeStrategy::DisjointSum);
                self.key_of.insert(record.id, existing.name.key().to_string());
                self.by_key.insert(key, existing);
            }
            _ => {
                self.by_key.insert(key, record);
            }
        }
    }

    /// The single place focus exclusivity is restored after merges.
    fn clear_focus_except(&mut self, id: Uuid) {
        for record in self.by_key.values_mut() {
            if record.id != id {
                record.set_focus(false);
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&UsageRecord> {
        self.by_key.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Total accumulated duration across all entries.
    #[must_use]
    pub fn total_ms(&self) -> i64 {
        self.by_key.values().map(|r| r.duration_ms).sum()
    }

    pub fn records(&self) -> impl Iterator<Item = &UsageRecord> {
        self.by_key.values()
    }

    #[must_use]
    pub fn into_records(self) -> Vec<UsageRecord> {
        self.by_key.into_values().collect()
    }
}
