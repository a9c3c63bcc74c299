//! The eviction strategies consulted when the cache purges.
use std::fmt;
use std::str::FromStr;

use crate::CacheError;

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum EvictionPolicy {
    /// Evict the least recently touched unpinned frames.
    Lru,
    /// Evict unpinned frames behind the playhead first, then fall back to [EvictionPolicy::Lru].
    ///
    /// The playhead is the frame index of the most recently touched frame.
    LruPlayback,
}

impl EvictionPolicy {
    pub const ALL: [EvictionPolicy; 2] = [EvictionPolicy::Lru, EvictionPolicy::LruPlayback];

    /// Human readable label, suitable for a preferences menu.
    pub fn label(self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::LruPlayback => "LRU + Playback",
        }
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::LruPlayback
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EvictionPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(p) = EvictionPolicy::ALL
            .iter()
            .find(|p| p.label().eq_ignore_ascii_case(trimmed))
        {
            return Ok(*p);
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lru-playback" | "lru_playback" => Ok(EvictionPolicy::LruPlayback),
            _ => Err(CacheError::UnknownPolicy(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_parse_back() {
        for p in EvictionPolicy::ALL.iter() {
            assert_eq!(p.to_string().parse::<EvictionPolicy>().unwrap(), *p);
        }
        assert_eq!(
            "lru-playback".parse::<EvictionPolicy>().unwrap(),
            EvictionPolicy::LruPlayback
        );
        assert_eq!(" lru ".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lru);
    }

    #[test]
    fn test_unknown_label() {
        match "mru".parse::<EvictionPolicy>() {
            Err(CacheError::UnknownPolicy(s)) => assert_eq!(s, "mru"),
            other => panic!("Should not parse: {:?}", other),
        }
    }

    #[test]
    fn test_default_is_playback() {
        assert_eq!(EvictionPolicy::default(), EvictionPolicy::LruPlayback);
    }
}
