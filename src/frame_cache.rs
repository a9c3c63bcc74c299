//! The [FrameCache] is the shareable front end of a [FrameStore].
//!
//! Producers (decoders) and consumers (renderers) each get a clone of the same cache, and every operation runs under a
//! single lock for its whole duration: purge has to see the pin counts and the recency order of every record at once,
//! so there is no finer-grained locking to be had.
//!
//! Frames come back as [FrameHandle]s.  A handle keeps its frame pinned until it is dropped, so a frame can never be
//! evicted while something is painting it and a pin can never be released twice.
//!
//! Listeners registered with [FrameCache::subscribe] run while the lock is held; they must not call back into the
//! cache.
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{error, trace};

use crate::*;

/// A pinned frame.  Dropping the handle releases the pin.
pub struct FrameHandle<P> {
    store: Arc<Mutex<FrameStore<P>>>,
    id: RecordId,
    frame_index: i64,
    payload: Arc<P>,
}

impl<P> FrameHandle<P> {
    fn new(
        store: Arc<Mutex<FrameStore<P>>>,
        pinned: PinnedFrame<P>,
        frame_index: i64,
    ) -> FrameHandle<P> {
        FrameHandle {
            store,
            id: pinned.id(),
            frame_index,
            payload: pinned.payload().clone(),
        }
    }

    pub fn frame_index(&self) -> i64 {
        self.frame_index
    }

    pub fn payload(&self) -> &Arc<P> {
        &self.payload
    }
}

impl<P> Deref for FrameHandle<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.payload
    }
}

impl<P> Clone for FrameHandle<P> {
    /// Take another pin on the same frame.
    fn clone(&self) -> Self {
        let pinned = self
            .store
            .lock()
            .unwrap()
            .pin(self.id)
            .expect("A live handle always holds a pin on its record");
        FrameHandle::new(self.store.clone(), pinned, self.frame_index)
    }
}

impl<P> Drop for FrameHandle<P> {
    fn drop(&mut self) {
        // Don't give up on the pin just because some other thread panicked; the store is still consistent between
        // calls.
        let res = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unpin(self.id);

        if let Err(e) = res {
            error!("Unable to release the pin on frame {}: {}", self.frame_index, e);
            if cfg!(debug_assertions) && !std::thread::panicking() {
                panic!("Unable to release the pin on frame {}: {}", self.frame_index, e);
            }
        }
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for FrameHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHandle")
            .field("id", &self.id)
            .field("frame_index", &self.frame_index)
            .field("payload", &self.payload)
            .finish()
    }
}

type DecodingGuards = HashMap<(OwnerKey, i64), Arc<Mutex<()>>, ahash::RandomState>;

pub struct FrameCache<P> {
    store: Arc<Mutex<FrameStore<P>>>,
    /// Mutexes that stop multiple threads trying to decode the same frame.
    decoding_guards: Arc<Mutex<DecodingGuards>>,
}

impl<P> Clone for FrameCache<P> {
    fn clone(&self) -> Self {
        FrameCache {
            store: self.store.clone(),
            decoding_guards: self.decoding_guards.clone(),
        }
    }
}

impl<P: ByteSize> FrameCache<P> {
    pub fn new(config: FrameCacheConfig) -> FrameCache<P> {
        FrameCache::from_store(FrameStore::with_config(&config))
    }

    pub fn from_store(store: FrameStore<P>) -> FrameCache<P> {
        FrameCache {
            store: Arc::new(Mutex::new(store)),
            decoding_guards: Default::default(),
        }
    }

    fn lock(&self) -> MutexGuard<FrameStore<P>> {
        self.store.lock().unwrap()
    }

    /// Insert a decoded frame, returning a handle that keeps it pinned.
    pub fn create(&self, payload: P, owner_key: OwnerKey, frame_index: i64) -> FrameHandle<P> {
        let pinned = self.lock().create(payload, owner_key, frame_index);
        FrameHandle::new(self.store.clone(), pinned, frame_index)
    }

    /// Find a frame in the cache, returning `None` if it isn't currently cached.
    pub fn lookup_and_pin(&self, owner_key: OwnerKey, frame_index: i64) -> Option<FrameHandle<P>> {
        let pinned = self.lock().lookup_and_pin(owner_key, frame_index)?;
        Some(FrameHandle::new(self.store.clone(), pinned, frame_index))
    }

    /// Get a frame from the cache, decoding and caching it if it isn't present.
    ///
    /// The decoder runs without the cache lock held, so other users of the cache aren't blocked behind it.  Threads
    /// asking for the same frame wait on each other instead, and only the first one decodes.
    pub fn get_or_decode<D>(
        &self,
        decoder: &D,
        owner_key: OwnerKey,
        frame_index: i64,
    ) -> Result<FrameHandle<P>, DecodeError<D::Error>>
    where
        D: FrameDecoder<Output = P>,
    {
        if let Some(x) = self.lookup_and_pin(owner_key, frame_index) {
            return Ok(x);
        }

        // Stop any other threads from trying to decode this frame, and make them wait on this thread to finish.
        let mutex = {
            let mut guard_inner = self.decoding_guards.lock().unwrap();
            let tmp = guard_inner
                .entry((owner_key, frame_index))
                .or_insert_with(|| Arc::new(Mutex::new(())));
            (*tmp).clone()
        };
        let _guard: MutexGuard<()> = mutex.lock().unwrap();

        // Somebody else may have finished decoding it while we waited.
        if let Some(x) = self.lookup_and_pin(owner_key, frame_index) {
            return Ok(x);
        }

        trace!("Cache miss for frame {} of {}, decoding", frame_index, owner_key);
        let decoded = decoder
            .decode(owner_key, frame_index)
            .map_err(|source| DecodeError {
                frame_index,
                source,
            })?;
        Ok(self.create(decoded, owner_key, frame_index))
    }

    /// Drop every frame of a source, e.g. because the file was closed or reloaded.
    ///
    /// Frames that are still held stay valid for their holders but can no longer be found.
    pub fn invalidate_owner(&self, owner_key: OwnerKey) {
        self.lock().invalidate_owner(owner_key);
        self.decoding_guards
            .lock()
            .unwrap()
            .retain(|(owner, _), _| *owner != owner_key);
    }

    /// Free every frame nobody is holding.
    pub fn sweep_unused(&self) {
        self.lock().sweep_unused()
    }

    pub fn cached_frames(&self, owner_key: OwnerKey) -> Vec<i64> {
        self.lock().cached_frames(owner_key)
    }

    pub fn set_budget(&self, budget_bytes: u64) {
        self.lock().set_budget(budget_bytes)
    }

    pub fn budget_bytes(&self) -> u64 {
        self.lock().budget_bytes()
    }

    pub fn set_policy(&self, policy: EvictionPolicy) {
        self.lock().set_policy(policy)
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.lock().policy()
    }

    pub fn usage_bytes(&self) -> u64 {
        self.lock().usage_bytes()
    }

    pub fn usage_bytes_for(&self, owner_key: OwnerKey) -> u64 {
        self.lock().usage_bytes_for(owner_key)
    }

    pub fn purge(&self) {
        self.lock().purge()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn subscribe(&self, listener: impl FnMut() + Send + 'static) -> SubscriptionId {
        self.lock().subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().unsubscribe(id)
    }
}
