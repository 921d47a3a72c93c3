//! Per-conversation ordered, id-deduplicated record windows.
//!
//! Invariant after every operation: records are sorted ascending by
//! `(ordering_time, id)` and no two records share an id. All merges are
//! idempotent, so retried or duplicated deliveries never change a window twice.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::models::{ConversationKey, MessageId, MessageRecord};

/// Pagination metadata carried alongside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowMeta {
    pub total_known: u64,
    pub has_more_older: bool,
}

/// The materialized slice of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationWindow {
    conversation_key: ConversationKey,
    records: Vec<MessageRecord>,
    meta: WindowMeta,
}

impl ConversationWindow {
    pub fn new(conversation_key: ConversationKey) -> Self {
        Self {
            conversation_key,
            records: Vec::new(),
            meta: WindowMeta::default(),
        }
    }

    pub fn conversation_key(&self) -> &ConversationKey {
        &self.conversation_key
    }

    pub fn records(&self) -> &[MessageRecord] {
        &self.records
    }

    pub fn meta(&self) -> WindowMeta {
        self.meta
    }

    pub fn total_known(&self) -> u64 {
        self.meta.total_known
    }

    pub fn has_more_older(&self) -> bool {
        self.meta.has_more_older
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.position(id).is_some()
    }

    pub fn position(&self, id: MessageId) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    pub fn get(&self, id: MessageId) -> Option<&MessageRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn first_id(&self) -> Option<MessageId> {
        self.records.first().map(|r| r.id)
    }

    pub fn last_id(&self) -> Option<MessageId> {
        self.records.last().map(|r| r.id)
    }

    /// Merge `incoming` keeping only ids not already present. Returns the number added.
    fn merge(&mut self, incoming: Vec<MessageRecord>) -> usize {
        let mut seen: HashSet<MessageId> = self.records.iter().map(|r| r.id).collect();
        let fresh: Vec<MessageRecord> = incoming
            .into_iter()
            .filter(|r| seen.insert(r.id))
            .collect();

        let added = fresh.len();
        if added == 0 {
            return 0;
        }

        self.records.extend(fresh);
        self.records.sort_by_key(MessageRecord::sort_key);
        added
    }
}

/// Sort and dedup a batch in isolation (first occurrence of an id wins).
fn canonicalize(records: Vec<MessageRecord>) -> Vec<MessageRecord> {
    let mut seen = HashSet::new();
    let mut out: Vec<MessageRecord> = records.into_iter().filter(|r| seen.insert(r.id)).collect();
    out.sort_by_key(MessageRecord::sort_key);
    out
}

/// Single source of truth for materialized windows, keyed by conversation.
#[derive(Debug, Default)]
pub struct WindowStore {
    windows: HashMap<ConversationKey, ConversationWindow>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ConversationKey) -> Option<&ConversationWindow> {
        self.windows.get(key)
    }

    pub fn contains(&self, key: &ConversationKey) -> bool {
        self.windows.contains_key(key)
    }

    /// Full reload: discard whatever was held for `key`.
    pub fn replace(
        &mut self,
        key: &ConversationKey,
        records: Vec<MessageRecord>,
        meta: WindowMeta,
    ) -> &ConversationWindow {
        let window = ConversationWindow {
            conversation_key: key.clone(),
            records: canonicalize(records),
            meta,
        };
        self.windows.insert(key.clone(), window);
        &self.windows[key]
    }

    /// Merge an older page at the head. Returns the number of records added.
    pub fn prepend_older(&mut self, key: &ConversationKey, older: Vec<MessageRecord>) -> usize {
        self.window_mut(key).merge(older)
    }

    /// Merge newer records at the tail. Returns the number of records added.
    pub fn append_newer(&mut self, key: &ConversationKey, newer: Vec<MessageRecord>) -> usize {
        self.window_mut(key).merge(newer)
    }

    /// Point update for edits/resets. No-op (returns false) when `id` is absent.
    ///
    /// The replacement keeps the original id. If its ordering time moved, the
    /// window is re-sorted so the order invariant still holds.
    pub fn replace_one(
        &mut self,
        key: &ConversationKey,
        id: MessageId,
        mut record: MessageRecord,
    ) -> bool {
        let Some(window) = self.windows.get_mut(key) else {
            return false;
        };
        let Some(index) = window.position(id) else {
            return false;
        };

        record.id = id;
        window.records[index] = record;

        let in_order = window
            .records
            .windows(2)
            .skip(index.saturating_sub(1))
            .take(2)
            .all(|pair| pair[0].sort_key() < pair[1].sort_key());
        if !in_order {
            window.records.sort_by_key(MessageRecord::sort_key);
        }
        true
    }

    pub fn set_meta(&mut self, key: &ConversationKey, meta: WindowMeta) {
        self.window_mut(key).meta = meta;
    }

    pub fn update_meta(&mut self, key: &ConversationKey, f: impl FnOnce(&mut WindowMeta)) {
        f(&mut self.window_mut(key).meta);
    }

    /// Remove and return the window (used when a context session saves it).
    pub fn take(&mut self, key: &ConversationKey) -> Option<ConversationWindow> {
        self.windows.remove(key)
    }

    /// Put a previously taken window back verbatim.
    pub fn restore(&mut self, window: ConversationWindow) {
        self.windows.insert(window.conversation_key.clone(), window);
    }

    pub fn remove(&mut self, key: &ConversationKey) {
        self.windows.remove(key);
    }

    fn window_mut(&mut self, key: &ConversationKey) -> &mut ConversationWindow {
        self.windows
            .entry(key.clone())
            .or_insert_with(|| ConversationWindow::new(key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessagePayload, RenderKind};

    fn rec(id: MessageId, t: i64) -> MessageRecord {
        MessageRecord {
            id,
            ordering_time: t,
            create_time: t,
            render_kind: RenderKind::Text,
            is_outgoing: false,
            sender_id: "peer".into(),
            payload: MessagePayload::default(),
        }
    }

    fn key() -> ConversationKey {
        ConversationKey::new("me", "peer")
    }

    fn assert_invariant(window: &ConversationWindow) {
        let ids: HashSet<_> = window.records().iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), window.len(), "duplicate ids in window");
        assert!(window
            .records()
            .windows(2)
            .all(|p| p[0].sort_key() < p[1].sort_key()));
    }

    #[test]
    fn test_prepend_drops_existing_ids() {
        let mut store = WindowStore::new();
        store.replace(&key(), vec![rec(1, 10), rec(2, 20), rec(3, 30)], WindowMeta::default());

        let added = store.prepend_older(&key(), vec![rec(1, 10), rec(0, 5)]);
        assert_eq!(added, 1);
        assert_eq!(store.get(&key()).unwrap().ids(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_merges_are_idempotent() {
        let mut store = WindowStore::new();
        store.replace(&key(), vec![rec(10, 100)], WindowMeta::default());

        let page = vec![rec(7, 70), rec(8, 80), rec(9, 90)];
        assert_eq!(store.prepend_older(&key(), page.clone()), 3);
        let once = store.get(&key()).unwrap().clone();
        assert_eq!(store.prepend_older(&key(), page), 0);
        assert_eq!(store.get(&key()).unwrap(), &once);

        let tail = vec![rec(11, 110), rec(12, 120)];
        assert_eq!(store.append_newer(&key(), tail.clone()), 2);
        assert_eq!(store.append_newer(&key(), tail), 0);
        assert_eq!(store.get(&key()).unwrap().ids(), vec![7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_overlapping_batches_keep_invariant() {
        let mut store = WindowStore::new();
        store.replace(&key(), vec![rec(5, 50), rec(6, 60)], WindowMeta::default());

        store.prepend_older(&key(), vec![rec(4, 40), rec(5, 50), rec(3, 30), rec(3, 30)]);
        store.append_newer(&key(), vec![rec(6, 60), rec(8, 80), rec(7, 70)]);
        store.append_newer(&key(), vec![rec(2, 20)]);
        store.prepend_older(&key(), vec![rec(9, 90)]);

        let window = store.get(&key()).unwrap();
        assert_invariant(window);
        assert_eq!(window.ids(), vec![2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let mut store = WindowStore::new();
        store.replace(&key(), vec![rec(3, 100), rec(1, 100)], WindowMeta::default());
        store.append_newer(&key(), vec![rec(2, 100)]);
        assert_eq!(store.get(&key()).unwrap().ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_replace_one() {
        let mut store = WindowStore::new();
        store.replace(&key(), vec![rec(1, 10), rec(2, 20), rec(3, 30)], WindowMeta::default());

        let mut edited = rec(2, 20);
        edited.payload.text = "edited".into();
        assert!(store.replace_one(&key(), 2, edited));
        let window = store.get(&key()).unwrap();
        assert_eq!(window.get(2).unwrap().payload.text, "edited");
        assert_eq!(window.ids(), vec![1, 2, 3]);

        // Absent id is a no-op
        assert!(!store.replace_one(&key(), 99, rec(99, 5)));
        assert_eq!(store.get(&key()).unwrap().len(), 3);

        // A moved ordering time is re-sorted
        assert!(store.replace_one(&key(), 1, rec(1, 40)));
        let window = store.get(&key()).unwrap();
        assert_eq!(window.ids(), vec![2, 3, 1]);
        assert_invariant(window);
    }

    #[test]
    fn test_replace_discards_prior_window() {
        let mut store = WindowStore::new();
        store.replace(&key(), vec![rec(1, 10)], WindowMeta { total_known: 1, has_more_older: false });
        let window = store.replace(
            &key(),
            vec![rec(5, 50), rec(4, 40), rec(5, 50)],
            WindowMeta { total_known: 9, has_more_older: true },
        );
        assert_eq!(window.ids(), vec![4, 5]);
        assert_eq!(window.total_known(), 9);
        assert!(window.has_more_older());
    }

    #[test]
    fn test_take_and_restore_verbatim() {
        let mut store = WindowStore::new();
        let meta = WindowMeta { total_known: 3, has_more_older: true };
        store.replace(&key(), vec![rec(1, 10), rec(2, 20), rec(3, 30)], meta);

        let saved = store.take(&key()).unwrap();
        store.replace(&key(), vec![rec(50, 500)], WindowMeta::default());
        store.restore(saved.clone());
        assert_eq!(store.get(&key()).unwrap(), &saved);
    }

    mod proptest_window {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Merge {
            Older(Vec<(MessageId, i64)>),
            Newer(Vec<(MessageId, i64)>),
        }

        fn batch() -> impl Strategy<Value = Vec<(MessageId, i64)>> {
            // Narrow id range so batches overlap often
            prop::collection::vec((0..40i64, 0..200i64), 0..12)
        }

        fn merge() -> impl Strategy<Value = Merge> {
            prop_oneof![batch().prop_map(Merge::Older), batch().prop_map(Merge::Newer)]
        }

        fn records(batch: &[(MessageId, i64)]) -> Vec<MessageRecord> {
            batch.iter().map(|&(id, t)| rec(id, t)).collect()
        }

        fn apply(store: &mut WindowStore, merge: &Merge) -> usize {
            match merge {
                Merge::Older(batch) => store.prepend_older(&key(), records(batch)),
                Merge::Newer(batch) => store.append_newer(&key(), records(batch)),
            }
        }

        fn check(window: &ConversationWindow) -> Result<(), TestCaseError> {
            let ids: HashSet<_> = window.records().iter().map(|r| r.id).collect();
            prop_assert_eq!(ids.len(), window.len());
            prop_assert!(window
                .records()
                .windows(2)
                .all(|p| p[0].sort_key() < p[1].sort_key()));
            Ok(())
        }

        proptest! {
            #[test]
            fn prop_merges_keep_ids_unique_and_sorted(
                initial in batch(),
                merges in prop::collection::vec(merge(), 1..20),
            ) {
                let mut store = WindowStore::new();
                store.replace(&key(), records(&initial), WindowMeta::default());
                check(store.get(&key()).unwrap())?;

                for merge in &merges {
                    let before = store.get(&key()).unwrap().len();
                    let added = apply(&mut store, merge);
                    let window = store.get(&key()).unwrap();
                    prop_assert_eq!(window.len(), before + added);
                    check(window)?;
                }
            }

            #[test]
            fn prop_reapplying_a_batch_changes_nothing(
                initial in batch(),
                merges in prop::collection::vec(merge(), 1..20),
            ) {
                let mut store = WindowStore::new();
                store.replace(&key(), records(&initial), WindowMeta::default());

                for merge in &merges {
                    apply(&mut store, merge);
                    let once = store.get(&key()).unwrap().clone();
                    prop_assert_eq!(apply(&mut store, merge), 0);
                    prop_assert_eq!(store.get(&key()).unwrap(), &once);
                }
            }

            #[test]
            fn prop_every_merged_id_is_present(
                merges in prop::collection::vec(merge(), 1..20),
            ) {
                let mut store = WindowStore::new();
                let mut expected = HashSet::new();
                for merge in &merges {
                    let (Merge::Older(batch) | Merge::Newer(batch)) = merge;
                    expected.extend(batch.iter().map(|&(id, _)| id));
                    apply(&mut store, merge);
                }
                let window = store.get(&key()).map(|w| w.ids()).unwrap_or_default();
                let held: HashSet<_> = window.into_iter().collect();
                prop_assert_eq!(held, expected);
            }
        }
    }
}
