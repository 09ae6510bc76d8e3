/// Sync configuration: timeouts, retry bounds and backoff.
use std::time::Duration;

/// How long a block request may stay unanswered.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Grace period before a duplicate in-flight request is force-terminated.
pub const CLEANUP_DELAY: Duration = Duration::from_secs(120);

/// Delay between attempts when no seed node is reachable.
pub const RETRY_DELAY: Duration = Duration::from_secs(10);

/// Attempts before reporting that no seed node is available.
pub const MAX_RETRY_ATTEMPTS: u32 = 12;

/// Base delay while the trusted source lags behind the ledger. Attempt `n`
/// waits `n² × base`.
pub const SOURCE_NOT_SYNCED_BASE_DELAY: Duration = Duration::from_secs(60);

pub const MAX_SOURCE_NOT_SYNCED_ATTEMPTS: u32 = 5;

/// Consecutive catch-up passes without progress before giving up until the
/// next push or restart.
pub const MAX_STALLED_PASSES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub request_timeout: Duration,
    pub cleanup_delay: Duration,
    pub retry_delay: Duration,
    pub max_retry_attempts: u32,
    pub source_not_synced_base_delay: Duration,
    pub max_source_not_synced_attempts: u32,
    pub max_stalled_passes: u32,
}

impl SyncConfig {
    /// Backoff before the `attempt`-th (1-based) head re-query.
    pub fn source_not_synced_delay(&self, attempt: u32) -> Duration {
        self.source_not_synced_base_delay * attempt.saturating_mul(attempt)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
            cleanup_delay: CLEANUP_DELAY,
            retry_delay: RETRY_DELAY,
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            source_not_synced_base_delay: SOURCE_NOT_SYNCED_BASE_DELAY,
            max_source_not_synced_attempts: MAX_SOURCE_NOT_SYNCED_ATTEMPTS,
            max_stalled_passes: MAX_STALLED_PASSES,
        }
    }
}
