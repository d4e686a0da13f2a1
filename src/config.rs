//! Timing and retry policy, grouped so tests can inject shorter values.

use std::time::Duration;

/// Maximum number of `CreateConnection` attempts for a single request before
/// giving up ([Vol 3] Part C, Section 9.3.11 governs the underlying retry
/// rationale; the count itself is host policy).
pub const MAX_CONNECTION_ATTEMPTS: u8 = 3;

/// Per-attempt back-off delay, indexed by `attempt - 1` (0-based retry
/// number). The third and final attempt is never delayed further.
pub const RETRY_BACKOFF: [Duration; 3] =
    [Duration::from_secs(0), Duration::from_secs(2), Duration::from_secs(4)];

/// Injectable timing policy for the peer cache and LE connection manager.
///
/// Splitting this out of hardcoded constants resolves the Open Question
/// about the relationship between cache expiry and request timeouts: callers
/// that want `request timeout > cache timeout` to hold as an explicit
/// invariant can construct a `GapConfig` that guarantees it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GapConfig {
    /// How long a temporary peer survives without a "tickle" before it is
    /// removed from the cache.
    pub cache_timeout: Duration,
    /// Scan timeout for a single `Connect` request's discovery phase.
    pub le_general_cep_scan_timeout: Duration,
    /// Timeout for the HCI `LE Create Connection` command itself.
    pub le_create_connection_timeout: Duration,
    /// Delay after a central-role connection completes before issuing a
    /// connection parameter update.
    pub le_connection_pause_central: Duration,
    /// Delay after a peripheral-role connection completes before issuing a
    /// connection parameter update.
    pub le_connection_pause_peripheral: Duration,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            cache_timeout: Duration::from_secs(60),
            le_general_cep_scan_timeout: Duration::from_secs(30),
            le_create_connection_timeout: Duration::from_secs(20),
            le_connection_pause_central: Duration::from_secs(1),
            le_connection_pause_peripheral: Duration::from_secs(5),
        }
    }
}
