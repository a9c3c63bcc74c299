use crate::RecordId;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A record was unpinned more times than it was pinned.
    #[error("frame {frame_index} was unpinned more times than it was pinned")]
    PinUnderflow { frame_index: i64 },
    #[error("no record is stored at {0:?}")]
    StaleRecord(RecordId),
    #[error("unknown eviction policy {0:?}")]
    UnknownPolicy(String),
}

/// Returned by [crate::FrameCache::get_or_decode] when the decoder fails.
#[derive(Debug, thiserror::Error)]
#[error("unable to decode frame {frame_index}")]
pub struct DecodeError<E: std::error::Error + 'static> {
    pub frame_index: i64,
    #[source]
    pub source: E,
}
