//! A cache of decoded frames for interactive playback, intended for smallish numbers of large images.
//!
//! Decoding a frame of an image sequence is expensive, and a viewer which is scrubbing back and forth over a sequence
//! will ask for the same frames over and over.  At the same time the decoded frames are large, so the cache must stay
//! under a byte budget, and it must never free a buffer which something is still painting.  This crate provides:
//!
//! [FrameStore] is the low-level building block: a recency-ordered collection of frames keyed by an [OwnerKey] (one
//! per open source) and a frame index.  Every frame carries a pin count, and only unpinned frames can be evicted.  When
//! the total byte size goes over the budget, the store purges according to its [EvictionPolicy]:
//!
//! - [EvictionPolicy::Lru] evicts the least recently touched unpinned frames first.
//! - [EvictionPolicy::LruPlayback] first evicts unpinned frames behind the "playhead", which is taken to be the frame
//!   index of the most recently touched frame, and only then falls back to plain Lru.  Under forward playback this keeps
//!   read-ahead frames alive at the expense of frames that have already been shown.
//!
//! Pins on a [FrameStore] are manual.  The higher level piece is [FrameCache], a cheaply clonable, lock-protected
//! front end which hands out [FrameHandle]s: guards that deref to the payload and release their pin when dropped.
//!
//! Payloads report their size through [ByteSize].  Anything interested in the occupancy of the cache (for example a
//! colored band on a scrub bar) can [FrameCache::subscribe] to be told when the cache changes.
mod config;
mod error;
mod frame_cache;
mod frame_record;
mod frame_store;
mod notify;
mod owner_key;
mod policy;
mod traits;

pub use config::*;
pub use error::*;
pub use frame_cache::*;
pub use frame_record::*;
pub use frame_store::*;
pub use notify::*;
pub use owner_key::*;
pub use policy::*;
pub use traits::*;
