use crate::EvictionPolicy;

pub const MEGABYTE: u64 = 1024 * 1024;

/// The cache sizes offered to users, in megabytes.
pub const BUDGET_PRESETS_MB: [u64; 12] = [
    200, 400, 600, 800, 1000, 2000, 3000, 4000, 5000, 6000, 7000, 8000,
];

pub const DEFAULT_BUDGET_BYTES: u64 = BUDGET_PRESETS_MB[4] * MEGABYTE;

#[derive(Clone, Debug, derive_builder::Builder)]
pub struct FrameCacheConfig {
    /// Total size of the decoded frames we are willing to keep, in bytes.
    #[builder(default = "DEFAULT_BUDGET_BYTES")]
    pub budget_bytes: u64,
    #[builder(default)]
    pub policy: EvictionPolicy,
}

impl Default for FrameCacheConfig {
    fn default() -> Self {
        FrameCacheConfig {
            budget_bytes: DEFAULT_BUDGET_BYTES,
            policy: Default::default(),
        }
    }
}
