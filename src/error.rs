//! Crate-wide error taxonomy.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by GAP core operations.
///
/// Every user-visible callback receives one of these as its failure variant;
/// callers never observe partial state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The peer is unknown, not connectable, or not of the requested
    /// technology.
    #[error("peer not found")]
    NotFound,
    /// A `PairingDelegate` is required but none is registered.
    #[error("not ready: no pairing delegate registered")]
    NotReady,
    /// The request was superseded or torn down before completion.
    #[error("operation canceled")]
    Canceled,
    /// A scan, connection, or interrogation timer expired.
    #[error("operation timed out")]
    TimedOut,
    /// An HCI command failed or an interrogation step failed.
    #[error("operation failed")]
    Failed,
    /// The existing key does not meet the request's security requirements.
    #[error("insufficient security")]
    InsufficientSecurity,
    /// The underlying link was lost before the operation completed.
    #[error("link disconnected")]
    LinkDisconnected,
    /// An event was received outside of its legal state transitions.
    #[error("operation not supported in current state")]
    NotSupported,
    /// Bonding data violated a persisted-state invariant.
    #[error("invalid bonding data")]
    InvalidBondingData,
}
