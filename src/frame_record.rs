//! A cell holding one decoded frame, the key it was cached under, and how many users are currently holding it.
use std::sync::Arc;

use crate::{CacheError, OwnerKey};

#[derive(Debug)]
pub struct FrameRecord<P> {
    payload: Arc<P>,
    /// `None` once the owning source has been invalidated while this record was still pinned.
    owner_key: Option<OwnerKey>,
    frame_index: i64,
    pin_count: u32,
    /// Size of the payload, measured once on insertion.
    bytes: u64,
}

impl<P> FrameRecord<P> {
    /// Build a record holding the creator's pin.
    pub(crate) fn new(
        payload: P,
        owner_key: OwnerKey,
        frame_index: i64,
        bytes: u64,
    ) -> FrameRecord<P> {
        FrameRecord {
            payload: Arc::new(payload),
            owner_key: Some(owner_key),
            frame_index,
            pin_count: 1,
            bytes,
        }
    }

    /// Take a pin, returning a reference to the contents.
    pub fn pin(&mut self) -> Arc<P> {
        self.pin_count += 1;
        self.payload.clone()
    }

    /// Release a pin.  Releasing a pin nobody holds is a bug in the caller and is reported rather than clamped.
    pub fn unpin(&mut self) -> Result<(), CacheError> {
        self.pin_count = self
            .pin_count
            .checked_sub(1)
            .ok_or(CacheError::PinUnderflow {
                frame_index: self.frame_index,
            })?;
        Ok(())
    }

    /// Forget which source this record belongs to.  Existing holders keep a valid payload.
    pub fn detach_owner(&mut self) {
        self.owner_key = None;
    }

    pub fn is_evictable(&self) -> bool {
        self.pin_count == 0
    }

    pub fn payload(&self) -> &Arc<P> {
        &self.payload
    }

    pub fn owner_key(&self) -> Option<OwnerKey> {
        self.owner_key
    }

    pub fn frame_index(&self) -> i64 {
        self.frame_index
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}
