use crate::models::EntityKind;
use dashmap::DashMap;
use rustc_hash::{FxBuildHasher, FxHashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

const FIRST_ID: i64 = 1;

struct KindIds {
    ids: DashMap<String, i64, FxBuildHasher>,
    next: AtomicI64,
}

impl KindIds {
    fn new() -> Self {
        Self {
            ids: DashMap::with_hasher(FxBuildHasher),
            next: AtomicI64::new(FIRST_ID),
        }
    }
}

/// Maps source-store string ids to target surrogate keys, one counter per
/// entity kind.
///
/// A registry belongs to one job run. Lookups and allocations may come from
/// several threads; the entry lock of the per-kind map makes
/// check-then-allocate atomic for a given source id.
pub struct IdRegistry {
    kinds: [KindIds; 3],
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IdRegistry {
    pub fn new() -> Self {
        Self {
            kinds: [KindIds::new(), KindIds::new(), KindIds::new()],
        }
    }

    fn kind(&self, kind: EntityKind) -> &KindIds {
        &self.kinds[kind.index()]
    }

    /// Returns the existing target id for `source_id`, allocating the next
    /// one for `kind` on first sight.
    pub fn get_or_create(&self, kind: EntityKind, source_id: &str) -> i64 {
        let slot = self.kind(kind);
        if let Some(id) = slot.ids.get(source_id) {
            return *id;
        }
        *slot
            .ids
            .entry(source_id.to_owned())
            .or_insert_with(|| {
                let id = slot.next.fetch_add(1, Ordering::SeqCst);
                debug!(%kind, source_id, target_id = id, "Allocated target id");
                id
            })
    }

    /// Pure lookup, never allocates.
    pub fn get(&self, kind: EntityKind, source_id: &str) -> Option<i64> {
        self.kind(kind).ids.get(source_id).map(|id| *id)
    }

    /// Drops every mapping and resets every counter to its initial value.
    pub fn clear(&self) {
        for slot in &self.kinds {
            slot.ids.clear();
            slot.next.store(FIRST_ID, Ordering::SeqCst);
        }
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.kind(kind).ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.iter().all(|slot| slot.ids.is_empty())
    }

    /// The id the next allocation of `kind` would hand out.
    pub fn next_id(&self, kind: EntityKind) -> i64 {
        self.kind(kind).next.load(Ordering::SeqCst)
    }

    pub fn export(&self, kind: EntityKind) -> FxHashMap<String, i64> {
        self.kind(kind)
            .ids
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Replaces the state of `kind` with previously exported mappings.
    pub fn restore(&self, kind: EntityKind, ids: FxHashMap<String, i64>, next: i64) {
        let slot = self.kind(kind);
        slot.ids.clear();
        let floor = ids.values().max().map_or(FIRST_ID, |max| max + 1);
        for (source_id, target_id) in ids {
            slot.ids.insert(source_id, target_id);
        }
        slot.next.store(next.max(floor), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn first_allocation_is_one() {
        let registry = IdRegistry::new();
        assert_eq!(registry.get_or_create(EntityKind::Author, "mongo-author-1"), 1);
    }

    #[test]
    fn same_source_id_maps_to_same_target_id() {
        let registry = IdRegistry::new();
        let first = registry.get_or_create(EntityKind::Book, "b");
        let second = registry.get_or_create(EntityKind::Book, "b");
        assert_eq!(first, second);
        assert_eq!(registry.len(EntityKind::Book), 1);
    }

    #[test]
    fn distinct_ids_increase_in_first_call_order() {
        let registry = IdRegistry::new();
        assert_eq!(registry.get_or_create(EntityKind::Genre, "g3"), 1);
        assert_eq!(registry.get_or_create(EntityKind::Genre, "g1"), 2);
        assert_eq!(registry.get_or_create(EntityKind::Genre, "g3"), 1);
        assert_eq!(registry.get_or_create(EntityKind::Genre, "g2"), 3);
    }

    #[test]
    fn counters_are_independent_per_kind() {
        let registry = IdRegistry::new();
        registry.get_or_create(EntityKind::Author, "a1");
        registry.get_or_create(EntityKind::Author, "a2");
        assert_eq!(registry.get_or_create(EntityKind::Genre, "g1"), 1);
        assert_eq!(registry.get_or_create(EntityKind::Book, "a1"), 1);
        assert_eq!(registry.next_id(EntityKind::Author), 3);
    }

    #[test]
    fn get_never_allocates() {
        let registry = IdRegistry::new();
        assert_eq!(registry.get(EntityKind::Book, "missing"), None);
        assert!(registry.is_empty());
        assert_eq!(registry.get_or_create(EntityKind::Book, "missing"), 1);
        assert_eq!(registry.get(EntityKind::Book, "missing"), Some(1));
    }

    #[test]
    fn clear_resets_counters_and_mappings() {
        let registry = IdRegistry::new();
        for kind in EntityKind::ALL {
            registry.get_or_create(kind, "x");
            registry.get_or_create(kind, "y");
        }
        registry.clear();
        assert!(registry.is_empty());
        for kind in EntityKind::ALL {
            assert_eq!(registry.get(kind, "y"), None);
            assert_eq!(registry.get_or_create(kind, "y"), 1);
        }
    }

    #[test]
    fn concurrent_callers_get_unique_stable_ids() {
        let registry = IdRegistry::new();
        let per_thread: Vec<Vec<i64>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..200)
                            .map(|i| registry.get_or_create(EntityKind::Book, &format!("book-{i}")))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for ids in &per_thread[1..] {
            assert_eq!(ids, &per_thread[0]);
        }
        let unique: HashSet<i64> = per_thread[0].iter().copied().collect();
        assert_eq!(unique.len(), 200);
        assert_eq!(unique, (1..=200).collect::<HashSet<i64>>());
    }

    #[test]
    fn restore_keeps_counter_ahead_of_existing_ids() {
        let registry = IdRegistry::new();
        let ids: FxHashMap<String, i64> =
            [("a".to_string(), 4), ("b".to_string(), 7)].into_iter().collect();
        registry.restore(EntityKind::Author, ids, 2);
        assert_eq!(registry.get(EntityKind::Author, "b"), Some(7));
        assert_eq!(registry.get_or_create(EntityKind::Author, "c"), 8);
    }

    #[test]
    fn export_round_trips_through_restore() {
        let registry = IdRegistry::new();
        registry.get_or_create(EntityKind::Genre, "g1");
        registry.get_or_create(EntityKind::Genre, "g2");

        let copy = IdRegistry::new();
        copy.restore(
            EntityKind::Genre,
            registry.export(EntityKind::Genre),
            registry.next_id(EntityKind::Genre),
        );
        assert_eq!(copy.get(EntityKind::Genre, "g2"), Some(2));
        assert_eq!(copy.next_id(EntityKind::Genre), 3);
    }
}
