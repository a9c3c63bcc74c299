//! Identifiers for the sources (files, sequences, streams) whose frames live in the cache.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Groups the cached frames belonging to one source.
///
/// Keys are opaque to the cache; it only ever compares them.  A record which has been detached from its source holds
/// no key at all (`None` on [crate::FrameRecord::owner_key]).
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OwnerKey(u64);

impl OwnerKey {
    pub const fn new(raw: u64) -> OwnerKey {
        OwnerKey(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// Hands out fresh [OwnerKey]s, typically one per opened source.
///
/// Keys are never reused by the same allocator, so a reloaded file gets a new key and can't see frames cached for its
/// previous incarnation.
#[derive(Debug, Default)]
pub struct OwnerKeyAllocator {
    next: AtomicU64,
}

impl OwnerKeyAllocator {
    pub fn new() -> OwnerKeyAllocator {
        Default::default()
    }

    pub fn allocate(&self) -> OwnerKey {
        OwnerKey(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
