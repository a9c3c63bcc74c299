//! a [FrameStore] is a recency-ordered cache of decoded frames which uses the byte size of the frames to decide when to
//! evict, and never evicts a frame that is pinned.
//!
//! This is implemented as a vec-backed linked list, running from the least to the most recently touched record, plus
//! an auxiliary hash-based index from `(owner, frame)` to the slot.  The index only speeds up lookups; eviction order is
//! always read off the list.
use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use log::{debug, trace};

use crate::*;

/// The slot a record lives in, plus how many times that slot had been reused when the record went in.
///
/// Once the record is freed its slot may go to another frame; the generation tells the two apart, so an id that
/// outlived its record is reported as [CacheError::StaleRecord] instead of reaching the new one.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct RecordId {
    slot: usize,
    generation: u64,
}

/// A pin on a record of a [FrameStore], returned by [FrameStore::create] and [FrameStore::lookup_and_pin].
///
/// Dropping this does not release the pin; pass [PinnedFrame::id] to [FrameStore::unpin] exactly once.
#[derive(Debug)]
#[must_use = "the pin must be released with FrameStore::unpin"]
pub struct PinnedFrame<P> {
    id: RecordId,
    payload: Arc<P>,
}

impl<P> PinnedFrame<P> {
    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn payload(&self) -> &Arc<P> {
        &self.payload
    }
}

struct OccupiedEntry<P> {
    record: FrameRecord<P>,
    generation: u64,
    /// Towards the oldest record.
    prev: Option<usize>,
    /// Towards the newest record.
    next: Option<usize>,
}

struct EmptyEntry {
    next_empty: Option<usize>,
    /// Generation the next record put in this slot gets.
    generation: u64,
}

enum StoreEntry<P> {
    /// This entry is empty, possibly with a pointer at the next empty entry.
    Empty(EmptyEntry),
    /// This entry is occupied, and doubly linked to the previous and next entry.
    Occupied(OccupiedEntry<P>),
}

impl<P> StoreEntry<P> {
    fn as_occupied_mut(&mut self) -> &mut OccupiedEntry<P> {
        match self {
            Self::Occupied(ref mut x) => x,
            _ => panic!("Entry should be occupied"),
        }
    }

    fn as_occupied(&self) -> &OccupiedEntry<P> {
        match self {
            Self::Occupied(ref x) => x,
            _ => panic!("Entry should be occupied"),
        }
    }

    fn as_empty_mut(&mut self) -> &mut EmptyEntry {
        match self {
            StoreEntry::Empty(ref mut x) => x,
            _ => panic!("Entry should be empty"),
        }
    }
}

pub struct FrameStore<P> {
    entries: Vec<StoreEntry<P>>,
    /// Slots of records which still have an owner.  Detached records are only reachable through the list.
    index: HashMap<(OwnerKey, i64), usize, RandomState>,
    /// At what size do we start evicting?
    budget_bytes: u64,
    /// Current size of everything in the store, pinned or not.
    used_bytes: u64,
    policy: EvictionPolicy,
    oldest: Option<usize>,
    /// The most recently touched record.  Its frame index is the playhead for [EvictionPolicy::LruPlayback].
    newest: Option<usize>,
    empty_head: Option<usize>,
    len: usize,
    notifier: ChangeNotifier,
}

impl<P> FrameStore<P> {
    pub fn new(budget_bytes: u64, policy: EvictionPolicy) -> FrameStore<P> {
        FrameStore {
            entries: Default::default(),
            index: Default::default(),
            budget_bytes,
            used_bytes: 0,
            policy,
            oldest: None,
            newest: None,
            empty_head: None,
            len: 0,
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn with_config(config: &FrameCacheConfig) -> FrameStore<P> {
        FrameStore::new(config.budget_bytes, config.policy)
    }

    /// Entirely unlink an occupied index from the list.
    fn unlink_index(&mut self, index: usize) {
        let (prev, next) = {
            let e = self.entries[index].as_occupied_mut();
            let links = (e.prev, e.next);
            e.prev = None;
            e.next = None;
            links
        };

        match prev {
            Some(p) => self.entries[p].as_occupied_mut().next = next,
            None => self.oldest = next,
        }
        match next {
            Some(n) => self.entries[n].as_occupied_mut().prev = prev,
            None => self.newest = prev,
        }
    }

    /// Link an occupied but unlinked index in as the newest record.
    fn link_newest(&mut self, index: usize) {
        let old_newest = self.newest;
        self.entries[index].as_occupied_mut().prev = old_newest;
        match old_newest {
            Some(n) => self.entries[n].as_occupied_mut().next = Some(index),
            // If there's no newest this is the only record, so it is the oldest as well.
            None => self.oldest = Some(index),
        }
        self.newest = Some(index);
    }

    /// Given the index of an occupied entry, make it the most recent item.
    fn make_most_recent(&mut self, index: usize) {
        if self.newest == Some(index) {
            return;
        }
        self.unlink_index(index);
        self.link_newest(index);
    }

    /// Make a specific index of the store become empty, returning the record that was there.
    fn become_empty(&mut self, index: usize) -> FrameRecord<P> {
        self.unlink_index(index);
        let generation = self.entries[index].as_occupied().generation + 1;
        let old = std::mem::replace(
            &mut self.entries[index],
            StoreEntry::Empty(EmptyEntry {
                next_empty: self.empty_head,
                generation,
            }),
        );
        self.empty_head = Some(index);
        match old {
            StoreEntry::Occupied(OccupiedEntry { record, .. }) => {
                if let Some(owner) = record.owner_key() {
                    self.index.remove(&(owner, record.frame_index()));
                }
                self.used_bytes -= record.bytes();
                self.len -= 1;
                record
            }
            _ => panic!("Should have been occupied"),
        }
    }

    /// Find an available empty index, or make one if necessary.  Returns the index and its generation.
    fn find_empty(&mut self) -> (usize, u64) {
        if let Some(e) = self.empty_head {
            let empty = self.entries[e].as_empty_mut();
            self.empty_head = empty.next_empty;
            return (e, empty.generation);
        }

        self.entries.push(StoreEntry::Empty(EmptyEntry {
            next_empty: None,
            generation: 0,
        }));
        (self.entries.len() - 1, 0)
    }

    /// The entry behind an id, if the record it was handed out for is still there.
    fn entry_for(&self, id: RecordId) -> Option<&OccupiedEntry<P>> {
        match self.entries.get(id.slot) {
            Some(StoreEntry::Occupied(e)) if e.generation == id.generation => Some(e),
            _ => None,
        }
    }

    fn entry_for_mut(&mut self, id: RecordId) -> Option<&mut OccupiedEntry<P>> {
        match self.entries.get_mut(id.slot) {
            Some(StoreEntry::Occupied(e)) if e.generation == id.generation => Some(e),
            _ => None,
        }
    }

    fn id_of(&self, index: usize) -> RecordId {
        RecordId {
            slot: index,
            generation: self.entries[index].as_occupied().generation,
        }
    }

    /// Take a record away from its owner: free it if nobody holds it, otherwise detach it so that lookups can't find it
    /// and let it be evicted later.  Returns whether the record was freed.
    fn retire(&mut self, index: usize) -> bool {
        if self.entries[index].as_occupied().record.is_evictable() {
            self.become_empty(index);
            return true;
        }

        let record = &mut self.entries[index].as_occupied_mut().record;
        if let Some(owner) = record.owner_key() {
            self.index.remove(&(owner, record.frame_index()));
        }
        record.detach_owner();
        false
    }

    /// Slots from oldest to newest.
    fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        let mut ind = self.oldest;
        std::iter::from_fn(move || {
            let cur = ind?;
            ind = self.entries[cur].as_occupied().next;
            Some(cur)
        })
    }

    /// Add a frame to the store, returning the creator's pin on it.
    ///
    /// If the frame was already cached for this owner, the old record is retired first as [FrameStore::invalidate_owner]
    /// would: freed if unpinned, otherwise detached.
    pub fn create(&mut self, payload: P, owner_key: OwnerKey, frame_index: i64) -> PinnedFrame<P>
    where
        P: ByteSize,
    {
        if let Some(existing) = self.index.get(&(owner_key, frame_index)).copied() {
            debug!("Replacing cached frame {} of {}", frame_index, owner_key);
            self.retire(existing);
        }

        let bytes = payload.byte_size();
        let record = FrameRecord::new(payload, owner_key, frame_index, bytes);
        let payload = record.payload().clone();
        let (ind, generation) = self.find_empty();
        self.entries[ind] = StoreEntry::Occupied(OccupiedEntry {
            record,
            generation,
            prev: None,
            next: None,
        });
        self.link_newest(ind);
        self.index.insert((owner_key, frame_index), ind);
        self.used_bytes += bytes;
        self.len += 1;
        trace!(
            "Cached frame {} of {} ({} bytes, {}/{} used)",
            frame_index,
            owner_key,
            bytes,
            self.used_bytes,
            self.budget_bytes
        );

        if self.used_bytes > self.budget_bytes {
            self.purge();
        }
        self.notifier.notify();

        PinnedFrame {
            id: RecordId {
                slot: ind,
                generation,
            },
            payload,
        }
    }

    /// Find a frame and pin it, making it the most recently used.  Never allocates or evicts.
    pub fn lookup_and_pin(
        &mut self,
        owner_key: OwnerKey,
        frame_index: i64,
    ) -> Option<PinnedFrame<P>> {
        let ind = *self.index.get(&(owner_key, frame_index))?;
        self.make_most_recent(ind);
        let payload = self.entries[ind].as_occupied_mut().record.pin();
        trace!("Cache hit for frame {} of {}", frame_index, owner_key);
        Some(PinnedFrame {
            id: self.id_of(ind),
            payload,
        })
    }

    /// Take another pin on a record somebody already holds.  Unlike a lookup, this doesn't count as touching the frame.
    pub fn pin(&mut self, id: RecordId) -> Result<PinnedFrame<P>, CacheError> {
        match self.entry_for_mut(id) {
            Some(e) if !e.record.is_evictable() => Ok(PinnedFrame {
                id,
                payload: e.record.pin(),
            }),
            _ => Err(CacheError::StaleRecord(id)),
        }
    }

    /// Release a pin.  This never evicts, even if the store is over budget; the record goes at the next purge.
    pub fn unpin(&mut self, id: RecordId) -> Result<(), CacheError> {
        match self.entry_for_mut(id) {
            Some(e) => e.record.unpin(),
            None => Err(CacheError::StaleRecord(id)),
        }
    }

    /// Drop every frame of a source.  Frames still pinned are detached instead, and go away once released.
    pub fn invalidate_owner(&mut self, owner_key: OwnerKey) {
        let matching = self
            .slots()
            .filter(|i| self.entries[*i].as_occupied().record.owner_key() == Some(owner_key))
            .collect::<Vec<_>>();

        let mut freed = 0;
        for i in matching.iter() {
            if self.retire(*i) {
                freed += 1;
            }
        }
        debug!(
            "Invalidated {}: freed {} frames, detached {}",
            owner_key,
            freed,
            matching.len() - freed
        );

        self.notifier.notify();
    }

    /// Free every unpinned frame, whatever its owner and whatever the budget.
    pub fn sweep_unused(&mut self) {
        let unused = self
            .slots()
            .filter(|i| self.entries[*i].as_occupied().record.is_evictable())
            .collect::<Vec<_>>();
        for i in unused.iter() {
            self.become_empty(*i);
        }
        debug!("Swept {} unused frames", unused.len());

        self.notifier.notify();
    }

    /// Frame indices cached for a source, pinned or not, in ascending order.
    pub fn cached_frames(&self, owner_key: OwnerKey) -> Vec<i64> {
        let mut out = self
            .iter()
            .filter(|r| r.owner_key() == Some(owner_key))
            .map(|r| r.frame_index())
            .collect::<Vec<_>>();
        out.sort_unstable();
        out
    }

    /// Change the budget and purge, even if the store already fits.
    pub fn set_budget(&mut self, budget_bytes: u64) {
        self.budget_bytes = budget_bytes;
        self.purge();
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    /// Takes effect on the next purge.
    pub fn set_policy(&mut self, policy: EvictionPolicy) {
        self.policy = policy;
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn usage_bytes(&self) -> u64 {
        self.used_bytes
    }

    /// Bytes held on behalf of one source.  Detached records count towards no source.
    pub fn usage_bytes_for(&self, owner_key: OwnerKey) -> u64 {
        self.iter()
            .filter(|r| r.owner_key() == Some(owner_key))
            .map(|r| r.bytes())
            .sum()
    }

    /// Evict unpinned records until the store fits its budget or nothing else can go.
    ///
    /// If every record is pinned the store may stay over budget; that is expected.
    pub fn purge(&mut self) {
        let mut evicted = 0;

        if self.policy == EvictionPolicy::LruPlayback {
            if let Some(newest) = self.newest {
                let playhead = self.entries[newest].as_occupied().record.frame_index();
                evicted += self.evict_while_over_budget(|r| r.frame_index() < playhead);
            }
        }
        evicted += self.evict_while_over_budget(|_| true);

        debug!(
            "Purged {} frames ({}), {}/{} bytes used",
            evicted, self.policy, self.used_bytes, self.budget_bytes
        );
        self.notifier.notify();
    }

    /// Walk from the oldest record, evicting unpinned records accepted by `eligible` while we are over budget.
    fn evict_while_over_budget(&mut self, eligible: impl Fn(&FrameRecord<P>) -> bool) -> usize {
        let mut evicted = 0;
        let mut cursor = self.oldest;

        while let Some(ind) = cursor {
            if self.used_bytes <= self.budget_bytes {
                break;
            }

            let entry = self.entries[ind].as_occupied();
            cursor = entry.next;
            if entry.record.is_evictable() && eligible(&entry.record) {
                self.become_empty(ind);
                evicted += 1;
            }
        }

        evicted
    }

    pub fn subscribe(&mut self, listener: impl FnMut() + Send + 'static) -> SubscriptionId {
        self.notifier.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Look at the record behind a pin.
    pub fn record(&self, id: RecordId) -> Option<&FrameRecord<P>> {
        self.entry_for(id).map(|e| &e.record)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterator visiting records from least to most recently touched.
    pub fn iter(&self) -> impl Iterator<Item = &FrameRecord<P>> {
        self.slots()
            .map(move |i| &self.entries[i].as_occupied().record)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    use lru::LruCache;
    use proptest::prelude::*;

    #[derive(Debug)]
    struct Frame {
        value: u64,
        size: u64,
    }

    impl ByteSize for Frame {
        fn byte_size(&self) -> u64 {
            self.size
        }
    }

    fn frame(size: u64) -> Frame {
        Frame { value: 0, size }
    }

    const X: OwnerKey = OwnerKey::new(1);
    const Y: OwnerKey = OwnerKey::new(2);

    fn check_accounting(store: &FrameStore<Frame>) {
        let sum: u64 = store.iter().map(|r| r.bytes()).sum();
        assert_eq!(store.usage_bytes(), sum);
        assert_eq!(store.iter().count(), store.len());
    }

    /// Create a frame and immediately drop the creator's pin.
    fn put(store: &mut FrameStore<Frame>, owner: OwnerKey, index: i64, size: u64) {
        let pinned = store.create(frame(size), owner, index);
        store.unpin(pinned.id()).unwrap();
        check_accounting(store);
    }

    fn count_notifications(store: &mut FrameStore<Frame>) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        store.subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_budget_scenario() {
        let mut store = FrameStore::new(1000, EvictionPolicy::Lru);
        put(&mut store, X, 1, 400);
        assert_eq!(store.usage_bytes(), 400);
        put(&mut store, X, 2, 400);
        assert_eq!(store.usage_bytes(), 800);

        // The third frame is still pinned by its creator when the purge runs, so frame 1 goes.
        let third = store.create(frame(400), X, 3);
        assert_eq!(store.usage_bytes(), 800);
        assert_eq!(store.cached_frames(X), vec![2, 3]);
        store.unpin(third.id()).unwrap();
        check_accounting(&store);
    }

    /// Frames 6 then 1 are touched, then 5 becomes the playhead.  Only one eviction is needed.
    fn playback_bias(policy: EvictionPolicy) -> Vec<i64> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut store = FrameStore::new(250, policy);
        put(&mut store, X, 6, 100);
        put(&mut store, X, 1, 100);
        put(&mut store, X, 5, 100);
        check_accounting(&store);
        assert_eq!(store.usage_bytes(), 200);
        store.cached_frames(X)
    }

    #[test]
    fn test_playback_evicts_behind_playhead() {
        assert_eq!(playback_bias(EvictionPolicy::LruPlayback), vec![5, 6]);
    }

    #[test]
    fn test_lru_evicts_oldest() {
        assert_eq!(playback_bias(EvictionPolicy::Lru), vec![1, 5]);
    }

    #[test]
    fn test_playback_falls_back_to_lru() {
        let mut store = FrameStore::new(1000, EvictionPolicy::LruPlayback);
        put(&mut store, X, 8, 300);
        put(&mut store, X, 9, 300);
        put(&mut store, X, 2, 300);
        put(&mut store, X, 1, 300);

        // Playhead is 1 and nothing is behind it, so this is plain Lru: 8 is the oldest.
        assert_eq!(store.cached_frames(X), vec![1, 2, 9]);

        // Touching 2 moves the playhead there, which puts 1 behind it even though 9 is older.
        store.lookup_and_pin(X, 2).map(|p| store.unpin(p.id()));
        store.set_budget(600);
        assert_eq!(store.cached_frames(X), vec![2, 9]);

        store.set_budget(300);
        assert_eq!(store.cached_frames(X), vec![2]);
        check_accounting(&store);
    }

    #[test]
    fn test_lookup_pins_and_refreshes() {
        let mut store = FrameStore::new(1000, EvictionPolicy::Lru);
        let created = store.create(frame(10), X, 4);
        let found = store.lookup_and_pin(X, 4).expect("Should find the frame");
        assert!(Arc::ptr_eq(created.payload(), found.payload()));
        assert_eq!(created.id(), found.id());
        assert_eq!(store.record(found.id()).unwrap().pin_count(), 2);

        assert!(store.lookup_and_pin(X, 5).is_none());
        assert!(store.lookup_and_pin(Y, 4).is_none());

        put(&mut store, X, 5, 10);
        store.lookup_and_pin(X, 4).map(|p| store.unpin(p.id()));
        let order = store.iter().map(|r| r.frame_index()).collect::<Vec<_>>();
        assert_eq!(order, vec![5, 4]);
    }

    #[test]
    fn test_pinned_frames_survive_purge() {
        let mut store = FrameStore::new(100, EvictionPolicy::Lru);
        let a = store.create(frame(80), X, 1);
        let b = store.create(frame(80), X, 2);

        // Everything is pinned, so we stay over budget.
        assert_eq!(store.usage_bytes(), 160);
        assert_eq!(store.cached_frames(X), vec![1, 2]);

        // Unpinning doesn't evict on its own.
        store.unpin(a.id()).unwrap();
        assert_eq!(store.usage_bytes(), 160);

        store.purge();
        assert_eq!(store.cached_frames(X), vec![2]);
        store.unpin(b.id()).unwrap();
        check_accounting(&store);
    }

    #[test]
    fn test_invalidate_detaches_pinned() {
        let mut store = FrameStore::new(1000, EvictionPolicy::Lru);
        put(&mut store, X, 1, 10);
        put(&mut store, Y, 1, 20);
        let held = store.create(frame(30), X, 2);

        store.invalidate_owner(X);
        assert!(store.lookup_and_pin(X, 1).is_none());
        assert!(store.lookup_and_pin(X, 2).is_none());
        assert!(store.cached_frames(X).is_empty());
        assert_eq!(store.usage_bytes_for(X), 0);

        // The pinned one is still there for its holder, and still counts.
        let record = store.record(held.id()).unwrap();
        assert_eq!(record.owner_key(), None);
        assert_eq!(record.pin_count(), 1);
        assert!(Arc::ptr_eq(record.payload(), held.payload()));
        assert_eq!(store.usage_bytes(), 50);
        assert_eq!(store.len(), 2);

        store.unpin(held.id()).unwrap();
        assert_eq!(store.usage_bytes(), 50);
        store.sweep_unused();
        assert!(store.is_empty());
        check_accounting(&store);
    }

    #[test]
    fn test_detached_frames_are_purged() {
        let mut store = FrameStore::new(1000, EvictionPolicy::LruPlayback);
        let held = store.create(frame(400), X, 1);
        store.invalidate_owner(X);
        store.unpin(held.id()).unwrap();
        put(&mut store, Y, 2, 400);

        // The detached frame is behind the playhead and the oldest; it goes first.
        store.set_budget(500);
        assert_eq!(store.len(), 1);
        assert_eq!(store.cached_frames(Y), vec![2]);
        check_accounting(&store);
    }

    #[test]
    fn test_recreate_replaces() {
        let mut store = FrameStore::new(1000, EvictionPolicy::Lru);
        put(&mut store, X, 1, 10);
        put(&mut store, X, 1, 20);
        assert_eq!(store.len(), 1);
        assert_eq!(store.usage_bytes(), 20);

        // If the old copy is pinned it is only detached.
        let old = store.lookup_and_pin(X, 1).unwrap();
        let new = store.create(frame(30), X, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.cached_frames(X), vec![1]);
        assert_eq!(store.record(old.id()).unwrap().owner_key(), None);
        let found = store.lookup_and_pin(X, 1).unwrap();
        assert!(Arc::ptr_eq(found.payload(), new.payload()));
        for id in [old.id(), new.id(), found.id()].iter() {
            store.unpin(*id).unwrap();
        }
        check_accounting(&store);
    }

    #[test]
    fn test_sweep_ignores_budget_and_pins() {
        let mut store = FrameStore::new(1000, EvictionPolicy::Lru);
        put(&mut store, X, 1, 10);
        put(&mut store, Y, 1, 10);
        let held = store.create(frame(10), Y, 2);
        store.sweep_unused();
        assert_eq!(store.len(), 1);
        assert_eq!(store.cached_frames(Y), vec![2]);
        store.unpin(held.id()).unwrap();
    }

    #[test]
    fn test_usage_per_owner() {
        let mut store = FrameStore::new(1000, EvictionPolicy::Lru);
        put(&mut store, X, 3, 10);
        put(&mut store, X, 1, 15);
        put(&mut store, Y, 2, 100);
        assert_eq!(store.usage_bytes_for(X), 25);
        assert_eq!(store.usage_bytes_for(Y), 100);
        assert_eq!(store.usage_bytes(), 125);
        assert_eq!(store.cached_frames(X), vec![1, 3]);
    }

    #[test]
    fn test_policy_change_waits_for_purge() {
        let mut store = FrameStore::new(250, EvictionPolicy::Lru);
        put(&mut store, X, 6, 100);
        put(&mut store, X, 1, 100);
        store.set_policy(EvictionPolicy::LruPlayback);
        assert_eq!(store.policy(), EvictionPolicy::LruPlayback);
        assert_eq!(store.cached_frames(X), vec![1, 6]);
        put(&mut store, X, 5, 100);
        assert_eq!(store.cached_frames(X), vec![5, 6]);
    }

    #[test]
    fn test_unpin_errors() {
        let mut store = FrameStore::new(1000, EvictionPolicy::Lru);
        let p = store.create(frame(1), X, 1);
        store.unpin(p.id()).unwrap();
        assert!(matches!(
            store.unpin(p.id()),
            Err(CacheError::PinUnderflow { frame_index: 1 })
        ));

        store.sweep_unused();
        assert!(matches!(
            store.unpin(p.id()),
            Err(CacheError::StaleRecord(_))
        ));

        // The freed slot goes to the next frame; the old id must not reach it.
        let reused = store.create(frame(2), X, 7);
        assert_eq!(reused.id().slot, p.id().slot);
        assert_ne!(reused.id(), p.id());
        assert!(matches!(
            store.unpin(p.id()),
            Err(CacheError::StaleRecord(_))
        ));
        assert!(matches!(store.pin(p.id()), Err(CacheError::StaleRecord(_))));
        assert!(store.record(p.id()).is_none());
        assert_eq!(store.record(reused.id()).unwrap().pin_count(), 1);

        // So the creator's pin still protects it.
        store.set_budget(0);
        assert_eq!(store.cached_frames(X), vec![7]);
        store.unpin(reused.id()).unwrap();
        store.purge();
        assert!(store.is_empty());
    }

    #[test]
    fn test_extra_pin_does_not_touch() {
        let mut store = FrameStore::new(1000, EvictionPolicy::Lru);
        let held = store.create(frame(10), X, 1);
        put(&mut store, X, 2, 10);

        let extra = store.pin(held.id()).unwrap();
        assert_eq!(store.record(held.id()).unwrap().pin_count(), 2);
        let order = store.iter().map(|r| r.frame_index()).collect::<Vec<_>>();
        assert_eq!(order, vec![1, 2]);

        store.unpin(extra.id()).unwrap();
        store.unpin(held.id()).unwrap();
        // Nobody holds it any more, so there is nothing to add a pin to.
        assert!(matches!(store.pin(held.id()), Err(CacheError::StaleRecord(_))));
    }

    #[test]
    fn test_notifications() {
        let mut store = FrameStore::new(100, EvictionPolicy::Lru);
        let count = count_notifications(&mut store);

        put(&mut store, X, 1, 60);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Going over budget purges, which notifies on its own.
        put(&mut store, X, 2, 60);
        assert_eq!(count.load(Ordering::SeqCst), 3);

        // Lookups and unpins are silent.
        store.lookup_and_pin(X, 2).map(|p| store.unpin(p.id()));
        assert_eq!(count.load(Ordering::SeqCst), 3);

        store.set_budget(1000);
        assert_eq!(count.load(Ordering::SeqCst), 4);
        store.invalidate_owner(Y);
        assert_eq!(count.load(Ordering::SeqCst), 5);
        store.sweep_unused();
        assert_eq!(count.load(Ordering::SeqCst), 6);
        store.purge();
        assert_eq!(count.load(Ordering::SeqCst), 7);
    }

    /// Simple helper to build proptest strategies so that we can test the unit-sized case against [LruCache].
    #[derive(Copy, Clone, Debug, Ord, Eq, PartialOrd, PartialEq)]
    enum CacheCommand {
        Put(u64, u64),
        Get(u64),
        Delete(u64),
    }

    fn cache_command_strat(
        max_key: std::ops::Range<u64>,
        max_value: std::ops::Range<u64>,
    ) -> prop::strategy::BoxedStrategy<CacheCommand> {
        proptest::prop_oneof![
            max_key.clone().prop_map(CacheCommand::Get),
            (max_key.clone(), max_value).prop_map(|(x, y)| CacheCommand::Put(x, y)),
            max_key.prop_map(CacheCommand::Delete),
        ]
        .boxed()
    }

    // With every frame costing one byte and nothing held pinned, the Lru policy keyed by one frame per owner behaves
    // exactly like a bounded [LruCache].
    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..Default::default()
        })]
        #[test]
        fn test_against_lru_cache_bounded(
            bound in 1..100u64,
            commands in prop::collection::vec(cache_command_strat(0..50, 0..10000), 0..2000)
        ) {
            let mut known_good = LruCache::<u64, u64>::new(bound as usize);
            let mut ours = FrameStore::<Frame>::new(bound, EvictionPolicy::Lru);

            for c in commands {
                use CacheCommand::*;

                match c {
                    Get(k) => {
                        let left: Option<u64> = known_good.get(&k).cloned();
                        let right: Option<u64> = ours.lookup_and_pin(OwnerKey::new(k), 0).map(|p| {
                            ours.unpin(p.id()).unwrap();
                            p.payload().value
                        });
                        prop_assert_eq!(left, right);
                    },
                    Put(k, v) => {
                        known_good.put(k, v);
                        let p = ours.create(Frame { value: v, size: 1 }, OwnerKey::new(k), 0);
                        ours.unpin(p.id()).unwrap();
                    },
                    Delete(k) => {
                        let left = known_good.pop(&k).is_some();
                        let right = !ours.cached_frames(OwnerKey::new(k)).is_empty();
                        prop_assert_eq!(left, right);
                        ours.invalidate_owner(OwnerKey::new(k));
                    },
                }

                let mut good_state = known_good.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>();
                good_state.sort_unstable();
                let mut our_state = ours
                    .iter()
                    .map(|r| (r.owner_key().expect("Nothing is detached").get(), r.payload().value))
                    .collect::<Vec<_>>();
                our_state.sort_unstable();
                prop_assert_eq!(&good_state, &our_state);
                prop_assert_eq!(good_state.len() as u64, ours.usage_bytes());
            }
        }

        #[test]
        fn test_pressure_respects_budget_and_pins(
            budget in 0..2000u64,
            playback in any::<bool>(),
            creates in prop::collection::vec((0..4u64, -20..20i64, 0..500u64, any::<bool>()), 0..200)
        ) {
            let policy = if playback { EvictionPolicy::LruPlayback } else { EvictionPolicy::Lru };
            let mut store = FrameStore::<Frame>::new(budget, policy);
            let mut held = vec![];

            for (owner, index, size, keep) in creates {
                let p = store.create(frame(size), OwnerKey::new(owner), index);

                let sum: u64 = store.iter().map(|r| r.bytes()).sum();
                prop_assert_eq!(store.usage_bytes(), sum);
                prop_assert!(
                    store.usage_bytes() <= budget || store.iter().all(|r| !r.is_evictable())
                );

                if keep {
                    held.push(p.id());
                } else {
                    store.unpin(p.id()).unwrap();
                }
                // Held records are never freed out from under us.
                for id in held.iter() {
                    prop_assert!(store.record(*id).map(|r| r.pin_count() > 0).unwrap_or(false));
                }
            }

            for id in held.drain(..) {
                store.unpin(id).unwrap();
            }
            store.sweep_unused();
            prop_assert!(store.is_empty());
            prop_assert_eq!(store.usage_bytes(), 0);
        }
    }
}
