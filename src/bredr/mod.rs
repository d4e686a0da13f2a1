//! BR/EDR Secure Simple Pairing: the event-driven state machine that drives
//! one link's pairing sequence while consulting a [`PairingDelegate`] for
//! user interaction.
//!
//! [`PairingDelegate`]: crate::security::PairingDelegate

mod pairing;

pub use pairing::{BrEdrLinkController, BrEdrPairingState, PairingRole, State};
