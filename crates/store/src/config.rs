//! Retention configuration.

/// Version retention policy for the multi-store.
///
/// After a bumped commit at height `h`, the height `h - 1 - keep_recent`
/// is scheduled for deletion (when positive), unless `keep_every` is
/// non-zero and the height is a multiple of it. Scheduled heights are
/// deleted in batch whenever the committed version is a multiple of
/// `interval`. An `interval` of zero disables pruning entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruningOptions {
    /// Number of recent heights kept ahead of the pruning point.
    pub keep_recent: u64,
    /// Heights divisible by this are retained as snapshot heights
    /// (0 = retain none).
    pub keep_every: u64,
    /// Commit-count period between pruning executions (0 = never prune).
    pub interval: u64,
}

impl PruningOptions {
    /// Keep every version forever.
    pub fn nothing() -> Self {
        Self {
            keep_recent: 0,
            keep_every: 0,
            interval: 0,
        }
    }

    /// Sensible production policy: a deep recent window, pruned in batches.
    pub fn default_policy() -> Self {
        Self {
            keep_recent: 362_880,
            keep_every: 0,
            interval: 10,
        }
    }

    /// Keep almost nothing beyond the working tip.
    pub fn everything() -> Self {
        Self {
            keep_recent: 2,
            keep_every: 0,
            interval: 10,
        }
    }

    /// Whether this policy ever prunes.
    pub fn is_enabled(&self) -> bool {
        self.interval > 0
    }
}

impl Default for PruningOptions {
    fn default() -> Self {
        Self::nothing()
    }
}
