//! Bounded per-viewport LRU store of rendered surfaces

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use lru::LruCache;

use super::request::{Stamp, WriteOutcome};
use super::types::{Dimensions, PageVariant, SharedSurface};
use super::viewport::ViewportId;
use super::{BYTES_PER_PIXEL, DEFAULT_MEMORY_BUDGET, MAX_PAGES_PER_VIEWPORT, MIN_PAGES_PER_VIEWPORT};

/// How many pages each slot may hold
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// Fixed page count per slot
    Pages(NonZeroUsize),
    /// Total byte budget split evenly across slots
    MemoryBudget(usize),
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self::MemoryBudget(DEFAULT_MEMORY_BUDGET)
    }
}

impl CapacityPolicy {
    /// Page capacity of one slot at the given dimensions
    #[must_use]
    pub fn pages_for(&self, dims: Dimensions, slot_count: usize) -> NonZeroUsize {
        let pages = match *self {
            CapacityPolicy::Pages(pages) => return pages,
            CapacityPolicy::MemoryBudget(_) if dims.is_empty() => MAX_PAGES_PER_VIEWPORT,
            CapacityPolicy::MemoryBudget(budget) => {
                let per_slot = budget / slot_count.max(1);
                let per_page = dims.pixel_count() * BYTES_PER_PIXEL;
                (per_slot / per_page).clamp(MIN_PAGES_PER_VIEWPORT, MAX_PAGES_PER_VIEWPORT)
            }
        };
        NonZeroUsize::new(pages).unwrap_or(NonZeroUsize::MIN)
    }
}

/// A stored surface plus the dimensions it was rendered for
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub surface: SharedSurface,
    pub dims: Dimensions,
}

/// Counters for diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub stale_writes: u64,
    /// Pixel memory held by stored surfaces
    pub bytes: usize,
}

struct Slot {
    stamp: Stamp,
    /// Whether background prerendering may write here
    prerender: bool,
    pages: LruCache<usize, CacheEntry>,
}

/// Rendered surfaces keyed by storage slot and page.
///
/// Each slot is an independent LRU bounded by the capacity policy, so
/// inserting into a full slot evicts its least recently accessed page.
/// Every configuration change clears the slot and bumps its generation;
/// writes carrying an older stamp are rejected.
pub struct SurfaceStore {
    slots: HashMap<ViewportId, Slot>,
    policy: CapacityPolicy,
    next_generation: u64,
    stats: StoreStats,
}

impl SurfaceStore {
    #[must_use]
    pub fn new(policy: CapacityPolicy) -> Self {
        Self {
            slots: HashMap::new(),
            policy,
            next_generation: 1,
            stats: StoreStats::default(),
        }
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Add an empty, unsized slot
    pub fn create_slot(&mut self, slot: ViewportId, variant: PageVariant) {
        let generation = self.bump_generation();
        let stamp = Stamp {
            generation,
            dims: Dimensions::default(),
            variant,
        };
        let capacity = self.policy.pages_for(stamp.dims, self.slots.len() + 1);
        self.slots.insert(
            slot,
            Slot {
                stamp,
                prerender: false,
                pages: LruCache::new(capacity),
            },
        );
        self.recompute_capacities();
    }

    /// Drop a slot and everything stored in it
    pub fn remove_slot(&mut self, slot: &str) -> bool {
        let removed = self.slots.remove(slot).is_some();
        if removed {
            self.recompute_capacities();
        }
        removed
    }

    /// Move a slot to a new key, keeping its entries
    pub fn rekey(&mut self, from: &str, to: ViewportId) {
        if let Some(moved) = self.slots.remove(from) {
            debug!("Moving surfaces of {from} to {to}");
            self.slots.insert(to, moved);
        }
    }

    #[must_use]
    pub fn has_slot(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    /// Current configuration of a slot
    #[must_use]
    pub fn stamp(&self, slot: &str) -> Option<Stamp> {
        self.slots.get(slot).map(|s| s.stamp)
    }

    /// Mark exactly `slots` as open to background prerender writes
    pub fn set_prerender_slots(&mut self, slots: &[ViewportId]) {
        for (key, slot) in &mut self.slots {
            slot.prerender = slots.contains(key);
        }
    }

    /// Whether a background render under `stamp` would still be stored
    #[must_use]
    pub fn accepts_prerender(&self, slot: &str, stamp: &Stamp) -> bool {
        self.slots
            .get(slot)
            .is_some_and(|s| s.prerender && s.stamp == *stamp)
    }

    /// Get a surface, promoting it in the slot's LRU order
    pub fn get(&mut self, slot: &str, page: usize) -> Option<SharedSurface> {
        let entry = self.slots.get_mut(slot)?.pages.get(&page).cloned();
        match entry {
            Some(entry) => {
                self.stats.hits += 1;
                Some(entry.surface)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Check for a page without touching LRU order or counters
    #[must_use]
    pub fn contains(&self, slot: &str, page: usize) -> bool {
        self.slots
            .get(slot)
            .is_some_and(|s| s.pages.contains(&page))
    }

    /// Store a surface rendered under `stamp`.
    ///
    /// Rejected when the slot's configuration moved on since the stamp was taken.
    pub fn put(
        &mut self,
        slot: &str,
        page: usize,
        surface: SharedSurface,
        stamp: &Stamp,
    ) -> WriteOutcome {
        let Some(target) = self.slots.get_mut(slot).filter(|s| s.stamp == *stamp) else {
            self.stats.stale_writes += 1;
            return WriteOutcome::Stale;
        };

        let entry = CacheEntry {
            surface,
            dims: stamp.dims,
        };
        if let Some((evicted, _)) = target.pages.push(page, entry) {
            if evicted != page {
                self.stats.evictions += 1;
            }
        }
        WriteOutcome::Stored
    }

    /// Store a background render.
    ///
    /// Also rejected when prerendering was switched off for the slot.
    pub fn put_prerendered(
        &mut self,
        slot: &str,
        page: usize,
        surface: SharedSurface,
        stamp: &Stamp,
    ) -> WriteOutcome {
        if !self.slots.get(slot).is_some_and(|s| s.prerender) {
            self.stats.stale_writes += 1;
            return WriteOutcome::Stale;
        }
        self.put(slot, page, surface, stamp)
    }

    /// Drop all entries of a slot; in-flight renders for it become stale
    pub fn invalidate(&mut self, slot: &str) -> usize {
        let generation = self.bump_generation();
        let Some(target) = self.slots.get_mut(slot) else {
            return 0;
        };
        let dropped = target.pages.len();
        target.pages.clear();
        target.stamp.generation = generation;
        dropped
    }

    /// Drop every entry of every slot
    pub fn invalidate_all(&mut self) {
        let slots: Vec<ViewportId> = self.slots.keys().cloned().collect();
        for slot in slots {
            self.invalidate(slot.as_str());
        }
    }

    /// Record new dimensions; invalidates the slot if they changed
    pub fn resize(&mut self, slot: &str, dims: Dimensions) -> bool {
        let Some(current) = self.stamp(slot) else {
            return false;
        };
        if current.dims == dims {
            return false;
        }
        if let Some(target) = self.slots.get_mut(slot) {
            target.stamp.dims = dims;
        }
        self.invalidate(slot);
        self.recompute_capacities();
        true
    }

    /// Record a new variant; invalidates the slot if it changed
    pub fn set_variant(&mut self, slot: &str, variant: PageVariant) -> bool {
        let Some(target) = self.slots.get_mut(slot) else {
            return false;
        };
        if target.stamp.variant == variant {
            return false;
        }
        target.stamp.variant = variant;
        self.invalidate(slot);
        true
    }

    fn recompute_capacities(&mut self) {
        let slot_count = self.slots.len();
        let mut evicted = 0;
        for slot in self.slots.values_mut() {
            let capacity = self.policy.pages_for(slot.stamp.dims, slot_count);
            if slot.pages.cap() != capacity {
                let before = slot.pages.len();
                slot.pages.resize(capacity);
                evicted += before - slot.pages.len();
            }
        }
        self.stats.evictions += evicted as u64;
    }

    pub fn set_policy(&mut self, policy: CapacityPolicy) {
        self.policy = policy;
        self.recompute_capacities();
    }

    #[must_use]
    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    /// Number of pages stored for a slot
    #[must_use]
    pub fn len(&self, slot: &str) -> usize {
        self.slots.get(slot).map_or(0, |s| s.pages.len())
    }

    /// Page capacity of a slot
    #[must_use]
    pub fn capacity(&self, slot: &str) -> Option<usize> {
        self.slots.get(slot).map(|s| s.pages.cap().get())
    }

    /// Cached pages of a slot, most recently accessed first
    #[must_use]
    pub fn pages(&self, slot: &str) -> Vec<usize> {
        self.slots
            .get(slot)
            .map(|s| s.pages.iter().map(|(page, _)| *page).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn total_entries(&self) -> usize {
        self.slots.values().map(|s| s.pages.len()).sum()
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let bytes = self
            .slots
            .values()
            .flat_map(|s| s.pages.iter())
            .map(|(_, entry)| entry.surface.memory_size())
            .sum();
        StoreStats {
            entries: self.total_entries(),
            bytes,
            ..self.stats
        }
    }
}

/// Lock a shared store, recovering from a poisoned mutex
pub(crate) fn lock_store(store: &Mutex<SurfaceStore>) -> MutexGuard<'_, SurfaceStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for SurfaceStore {
    fn default() -> Self {
        Self::new(CapacityPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::types::Surface;
    use super::*;

    fn pages(n: usize) -> CapacityPolicy {
        CapacityPolicy::Pages(NonZeroUsize::new(n).unwrap())
    }

    fn sized_store(policy: CapacityPolicy) -> (SurfaceStore, Stamp) {
        let mut store = SurfaceStore::new(policy);
        store.create_slot(ViewportId::new("c_da"), PageVariant::Full);
        store.resize("c_da", Dimensions::new(8, 6));
        let stamp = store.stamp("c_da").unwrap();
        (store, stamp)
    }

    fn surface(seed: u8) -> SharedSurface {
        Arc::new(Surface::new(vec![seed; 8 * 6 * 4], 8, 6))
    }

    #[test]
    fn put_then_get_returns_same_surface() {
        let (mut store, stamp) = sized_store(pages(4));
        let stored = surface(7);

        assert_eq!(
            store.put("c_da", 3, stored.clone(), &stamp),
            WriteOutcome::Stored
        );

        let fetched = store.get("c_da", 3).unwrap();
        assert!(Arc::ptr_eq(&fetched, &stored));
        assert_eq!(store.stats().hits, 1);
    }

    #[test]
    fn eviction_follows_access_not_insertion() {
        let (mut store, stamp) = sized_store(pages(2));
        store.put("c_da", 0, surface(0), &stamp);
        store.put("c_da", 1, surface(1), &stamp);

        // Touch page 0 so page 1 becomes least recently accessed
        assert!(store.get("c_da", 0).is_some());
        store.put("c_da", 2, surface(2), &stamp);

        assert!(store.contains("c_da", 0));
        assert!(!store.contains("c_da", 1));
        assert!(store.contains("c_da", 2));
        assert_eq!(store.len("c_da"), 2);
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn overwriting_a_page_is_not_an_eviction() {
        let (mut store, stamp) = sized_store(pages(2));
        store.put("c_da", 0, surface(0), &stamp);
        store.put("c_da", 0, surface(9), &stamp);

        assert_eq!(store.len("c_da"), 1);
        assert_eq!(store.stats().evictions, 0);
        assert_eq!(store.get("c_da", 0).unwrap().pixels[0], 9);
    }

    #[test]
    fn resize_clears_entries_and_rejects_old_stamp() {
        let (mut store, stamp) = sized_store(pages(4));
        store.put("c_da", 1, surface(1), &stamp);

        assert!(store.resize("c_da", Dimensions::new(16, 12)));
        assert!(store.get("c_da", 1).is_none());

        assert_eq!(
            store.put("c_da", 1, surface(1), &stamp),
            WriteOutcome::Stale
        );
        assert!(!store.contains("c_da", 1));
        assert_eq!(store.stats().stale_writes, 1);
    }

    #[test]
    fn resize_to_same_dimensions_keeps_entries() {
        let (mut store, stamp) = sized_store(pages(4));
        store.put("c_da", 1, surface(1), &stamp);

        assert!(!store.resize("c_da", Dimensions::new(8, 6)));
        assert!(store.contains("c_da", 1));
    }

    #[test]
    fn variant_change_invalidates() {
        let (mut store, stamp) = sized_store(pages(4));
        store.put("c_da", 1, surface(1), &stamp);

        assert!(store.set_variant("c_da", PageVariant::NotesHalf));
        assert!(!store.contains("c_da", 1));
        assert_eq!(
            store.stamp("c_da").unwrap().variant,
            PageVariant::NotesHalf
        );
        assert!(!store.set_variant("c_da", PageVariant::NotesHalf));
    }

    #[test]
    fn write_to_missing_slot_is_stale() {
        let mut store = SurfaceStore::new(pages(4));
        let stamp = Stamp {
            generation: 1,
            dims: Dimensions::new(1, 1),
            variant: PageVariant::Full,
        };
        assert_eq!(store.put("nope", 0, surface(0), &stamp), WriteOutcome::Stale);
    }

    #[test]
    fn rekey_moves_entries() {
        let (mut store, stamp) = sized_store(pages(4));
        store.put("c_da", 2, surface(2), &stamp);

        store.rekey("c_da", ViewportId::new("a_da"));
        assert!(!store.has_slot("c_da"));
        assert!(store.contains("a_da", 2));
    }

    #[test]
    fn memory_budget_derives_capacity_from_surface_size() {
        // 100 pages of 10x10 RGBA fit into the budget
        let policy = CapacityPolicy::MemoryBudget(100 * 10 * 10 * 4);
        assert_eq!(policy.pages_for(Dimensions::new(10, 10), 1).get(), 100);
        assert_eq!(policy.pages_for(Dimensions::new(10, 10), 2).get(), 50);

        // Tiny budgets still keep the whole prerender window
        assert_eq!(
            policy.pages_for(Dimensions::new(1000, 1000), 1).get(),
            MIN_PAGES_PER_VIEWPORT
        );
        // Unsized slots hold nothing yet, capacity is irrelevant but bounded
        assert_eq!(
            policy.pages_for(Dimensions::default(), 1).get(),
            MAX_PAGES_PER_VIEWPORT
        );
    }

    #[test]
    fn growing_a_viewport_shrinks_budget_capacity() {
        let budget = MIN_PAGES_PER_VIEWPORT * 2 * 10 * 10 * 4;
        let mut store = SurfaceStore::new(CapacityPolicy::MemoryBudget(budget));
        store.create_slot(ViewportId::new("c_da"), PageVariant::Full);
        store.resize("c_da", Dimensions::new(10, 10));
        assert_eq!(store.capacity("c_da"), Some(MIN_PAGES_PER_VIEWPORT * 2));

        store.create_slot(ViewportId::new("p_da"), PageVariant::Full);
        assert_eq!(store.capacity("c_da"), Some(MIN_PAGES_PER_VIEWPORT));
    }

    #[test]
    fn background_writes_need_prerender_flag() {
        let (mut store, stamp) = sized_store(pages(4));
        assert!(!store.accepts_prerender("c_da", &stamp));
        assert_eq!(
            store.put_prerendered("c_da", 1, surface(1), &stamp),
            WriteOutcome::Stale
        );

        store.set_prerender_slots(&[ViewportId::new("c_da")]);
        assert!(store.accepts_prerender("c_da", &stamp));
        assert_eq!(
            store.put_prerendered("c_da", 1, surface(1), &stamp),
            WriteOutcome::Stored
        );

        store.set_prerender_slots(&[]);
        assert_eq!(
            store.put_prerendered("c_da", 2, surface(2), &stamp),
            WriteOutcome::Stale
        );
        // Foreground writes and earlier entries are unaffected
        assert_eq!(store.put("c_da", 3, surface(3), &stamp), WriteOutcome::Stored);
        assert!(store.contains("c_da", 1));
        assert_eq!(store.stats().stale_writes, 2);
    }

    #[test]
    fn stats_count_pixel_memory() {
        let (mut store, stamp) = sized_store(pages(4));
        store.put("c_da", 0, surface(0), &stamp);
        store.put("c_da", 1, surface(1), &stamp);
        assert_eq!(store.stats().bytes, 2 * 8 * 6 * 4);

        store.invalidate("c_da");
        assert_eq!(store.stats().bytes, 0);
    }

    #[test]
    fn shrinking_capacity_evicts_least_recent() {
        let (mut store, stamp) = sized_store(pages(4));
        for page in 0..4 {
            store.put("c_da", page, surface(page as u8), &stamp);
        }

        store.set_policy(pages(2));
        assert_eq!(store.pages("c_da"), vec![3, 2]);
        assert_eq!(store.stats().evictions, 2);
    }
}
