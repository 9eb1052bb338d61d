use crate::core::{RemoteRowId, TrackedItem};
use im::HashMap as ImHashMap;

/// A mirror slot: the item plus its local insertion sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorEntry {
    pub seq: u64,
    pub item: TrackedItem,
}

impl MirrorEntry {
    /// The same entry as the remote store now holds it.
    pub fn confirmed(&self, row_id: &str) -> Self {
        let mut entry = self.clone();
        entry.item.remote_row_id = RemoteRowId::Assigned(row_id.to_string());
        entry
    }
}

/// In-process copy of one owner's collection, keyed by item id.
///
/// Snapshots share structure, so capturing the whole mirror for a rollback is cheap.
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    entries: ImHashMap<String, MirrorEntry>,
    next_seq: u64,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.entries.contains_key(item_id)
    }

    pub fn get(&self, item_id: &str) -> Option<&MirrorEntry> {
        self.entries.get(item_id)
    }

    /// Appends `item` at the end of the insertion order, replacing any entry with the same id.
    pub fn insert(&mut self, item: TrackedItem) -> MirrorEntry {
        self.next_seq += 1;
        let entry = MirrorEntry {
            seq: self.next_seq,
            item,
        };
        self.entries.insert(entry.item.item_id.clone(), entry.clone());
        entry
    }

    pub fn remove(&mut self, item_id: &str) -> Option<MirrorEntry> {
        self.entries.remove(item_id)
    }

    /// Mutates an entry in place. Returns the prior entry.
    pub fn update(
        &mut self,
        item_id: &str,
        apply: impl FnOnce(&mut TrackedItem),
    ) -> Option<MirrorEntry> {
        let entry = self.entries.get_mut(item_id)?;
        let prior = entry.clone();
        apply(&mut entry.item);
        Some(prior)
    }

    /// Forces the slot for `item_id` to `state`. Returns whether anything changed.
    pub fn set(&mut self, item_id: &str, state: Option<MirrorEntry>) -> bool {
        if self.entries.get(item_id) == state.as_ref() {
            return false;
        }
        match state {
            Some(entry) => {
                self.next_seq = self.next_seq.max(entry.seq);
                self.entries.insert(item_id.to_string(), entry);
            }
            None => {
                self.entries.remove(item_id);
            }
        }
        true
    }

    /// Replaces the content with freshly listed rows. Later duplicates of an item id are dropped.
    pub fn replace_all(&mut self, items: Vec<TrackedItem>) {
        self.entries = ImHashMap::new();
        for item in items {
            if !self.contains(&item.item_id) {
                self.insert(item);
            }
        }
    }

    /// Empties the mirror, returning what it held.
    pub fn take(&mut self) -> ImHashMap<String, MirrorEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn clear(&mut self) {
        self.entries = ImHashMap::new();
    }

    /// Items in insertion order.
    pub fn items(&self) -> Vec<TrackedItem> {
        let mut entries: Vec<&MirrorEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.item.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DisplayFields, ItemDraft};

    fn item(id: &str) -> TrackedItem {
        TrackedItem::pending("u1", ItemDraft::new(id, DisplayFields::new(id, 10.0)))
    }

    fn ids(mirror: &Mirror) -> Vec<String> {
        mirror.items().into_iter().map(|item| item.item_id).collect()
    }

    #[test]
    fn restore_keeps_original_position() {
        let mut mirror = Mirror::new();
        mirror.insert(item("a"));
        mirror.insert(item("b"));
        mirror.insert(item("c"));

        let removed = mirror.remove("b");
        assert_eq!(ids(&mirror), vec!["a", "c"]);

        assert!(mirror.set("b", removed));
        assert_eq!(ids(&mirror), vec!["a", "b", "c"]);

        mirror.insert(item("d"));
        assert_eq!(ids(&mirror), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn set_reports_changes() {
        let mut mirror = Mirror::new();
        let entry = mirror.insert(item("a"));
        assert!(!mirror.set("a", Some(entry.clone())));

        let confirmed = entry.confirmed("row-1");
        assert!(mirror.set("a", Some(confirmed)));
        assert_eq!(mirror.get("a").unwrap().item.remote_row_id.assigned(), Some("row-1"));

        assert!(mirror.set("a", None));
        assert!(!mirror.set("a", None));
    }

    #[test]
    fn replace_all_drops_duplicate_ids() {
        let mut mirror = Mirror::new();
        mirror.insert(item("stale"));
        let mut dup = item("a");
        dup.quantity = 5;
        mirror.replace_all(vec![item("a"), item("b"), dup]);

        assert_eq!(ids(&mirror), vec!["a", "b"]);
        assert_eq!(mirror.get("a").unwrap().item.quantity, 1);
    }

    #[test]
    fn take_leaves_snapshot_intact() {
        let mut mirror = Mirror::new();
        mirror.insert(item("a"));
        let snapshot = mirror.take();
        assert!(mirror.is_empty());
        assert_eq!(snapshot.len(), 1);

        let prior = mirror.update("a", |tracked| tracked.quantity = 2);
        assert!(prior.is_none());
    }
}
