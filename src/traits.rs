//! The [ByteSize] trait lets the cache account for payloads without knowing their layout, and the [FrameDecoder]
//! trait produces payloads on a cache miss.
use std::sync::Arc;

use crate::OwnerKey;

/// Report the in-memory footprint of a cached payload, in bytes.
///
/// The store queries this exactly once per payload, when the payload is inserted, and uses the answer for all of its
/// accounting.
pub trait ByteSize {
    fn byte_size(&self) -> u64;
}

impl ByteSize for Vec<u8> {
    fn byte_size(&self) -> u64 {
        self.len() as u64
    }
}

impl ByteSize for Box<[u8]> {
    fn byte_size(&self) -> u64 {
        self.len() as u64
    }
}

impl<T: ByteSize> ByteSize for Box<T> {
    fn byte_size(&self) -> u64 {
        (**self).byte_size()
    }
}

impl<T: ByteSize> ByteSize for Arc<T> {
    fn byte_size(&self) -> u64 {
        (**self).byte_size()
    }
}

/// A `FrameDecoder` knows how to produce the decoded representation of one frame of a source.
///
/// The output type must be sync in order to enable the cache to hand it out behind `Arc`.
pub trait FrameDecoder {
    type Output: ByteSize + Send + Sync;
    type Error: std::error::Error + 'static;

    fn decode(&self, owner: OwnerKey, frame_index: i64) -> Result<Self::Output, Self::Error>;
}
