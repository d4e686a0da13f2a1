//! The canonical in-memory peer registry: identity, technology, connection
//! state, and bonding.

mod bonding;
mod cache;

pub use bonding::{BondingData, LinkKey, LinkKeyType, PairingData};
pub use cache::{PeerCache, PeerCacheEvent};

use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::addr::{AddressType, DeviceAddress};
use crate::security::SecurityProperties;

/// Opaque stable identifier assigned by the cache, independent of address.
/// Survives address privacy refresh.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PeerId(u64);

impl PeerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({:#x})", self.0)
    }
}

/// Which transport(s) a peer has been observed on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum Technology {
    Classic,
    LowEnergy,
    DualMode,
}

/// Per-transport connection state. Transitions are driven exclusively by the
/// connection managers, never by external callers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, strum::Display)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Initializing,
    Connected,
}

/// LE-specific peer attributes.
#[derive(Clone, Debug, Default)]
pub struct LowEnergyData {
    pub connection_state: ConnectionState,
    pub advertising_data: Vec<u8>,
    pub rssi: Option<i8>,
    pub bond_data: Option<PairingData>,
    pub preferred_connection_parameters: Option<ConnectionParameters>,
    pub features: Option<u64>,
    pub should_auto_connect: bool,
}

impl LowEnergyData {
    #[must_use]
    pub fn is_bonded(&self) -> bool {
        self.bond_data.is_some()
    }
}

/// BR/EDR-specific peer attributes.
#[derive(Clone, Debug, Default)]
pub struct BrEdrData {
    pub connection_state: ConnectionState,
    pub device_class: Option<u32>,
    pub eir_data: Vec<u8>,
    pub link_key: Option<LinkKey>,
    pub bonded_services: Vec<crate::uuid::Uuid>,
}

impl BrEdrData {
    #[must_use]
    pub fn is_bonded(&self) -> bool {
        self.link_key.is_some()
    }
}

/// LE connection parameters ([Vol 4] Part E, Section 7.8.12).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConnectionParameters {
    pub interval_min: Duration,
    pub interval_max: Duration,
    pub peripheral_latency: u16,
    pub supervision_timeout: Duration,
}

/// The central peer record. Owned exclusively by [`PeerCache`]; every other
/// component holds a stable [`PeerId`], never a reference across suspension.
#[derive(Clone, Debug)]
pub struct Peer {
    id: PeerId,
    address: DeviceAddress,
    identity_known: bool,
    pub name: Option<String>,
    pub appearance: Option<u16>,
    pub hci_version: Option<u8>,
    pub manufacturer: Option<u16>,
    pub le: Option<LowEnergyData>,
    pub bredr: Option<BrEdrData>,
    temporary: bool,
}

impl Peer {
    pub(crate) fn new(address: DeviceAddress, connectable: bool) -> Self {
        let identity_known = !matches!(
            address.addr_type(),
            AddressType::LeRandom | AddressType::LeAnonymous
        );
        let mut p = Self {
            id: PeerId::next(),
            address,
            identity_known,
            name: None,
            appearance: None,
            hci_version: None,
            manufacturer: None,
            le: None,
            bredr: None,
            temporary: true,
        };
        if address.addr_type().is_le() {
            p.le = Some(LowEnergyData::default());
        } else {
            p.bredr = Some(BrEdrData::default());
        }
        let _ = connectable; // connectability is tracked by the manager, not stored here
        p
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> PeerId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn address(&self) -> DeviceAddress {
        self.address
    }

    #[inline]
    #[must_use]
    pub const fn identity_known(&self) -> bool {
        self.identity_known
    }

    #[must_use]
    pub fn technology(&self) -> Technology {
        match (self.le.is_some(), self.bredr.is_some()) {
            (true, true) => Technology::DualMode,
            (true, false) => Technology::LowEnergy,
            (false, true) => Technology::Classic,
            (false, false) => unreachable!("peer always has at least one transport record"),
        }
    }

    /// A peer is bonded iff either sub-record holds a persistent key.
    #[must_use]
    pub fn is_bonded(&self) -> bool {
        self.le.as_ref().is_some_and(LowEnergyData::is_bonded)
            || self.bredr.as_ref().is_some_and(BrEdrData::is_bonded)
    }

    /// Whether either transport is in a non-`NotConnected` state.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state() != ConnectionState::NotConnected
    }

    /// The "most connected" state across both transports, used to decide
    /// whether the peer may be expired.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        let le = self.le.as_ref().map_or(ConnectionState::NotConnected, |d| d.connection_state);
        let bredr = self.bredr.as_ref().map_or(ConnectionState::NotConnected, |d| d.connection_state);
        match (le, bredr) {
            (ConnectionState::Connected, _) | (_, ConnectionState::Connected) => ConnectionState::Connected,
            (ConnectionState::Initializing, _) | (_, ConnectionState::Initializing) => ConnectionState::Initializing,
            _ => ConnectionState::NotConnected,
        }
    }

    #[inline]
    #[must_use]
    pub const fn temporary(&self) -> bool {
        self.temporary
    }

    /// Recomputes `temporary` from the invariants: a bonded peer, or one
    /// that is not `NotConnected`, is never temporary; otherwise (e.g. on
    /// returning to `NotConnected` without ever bonding) it becomes
    /// temporary again and resumes the expiry countdown.
    pub(crate) fn recompute_temporary(&mut self) {
        self.temporary = !(self.is_bonded() || self.is_connected());
    }

    pub(crate) fn upgrade_to_dual_mode(&mut self, other_type: AddressType) {
        match other_type {
            AddressType::LePublic | AddressType::LeRandom => {
                self.le.get_or_insert_with(LowEnergyData::default);
            }
            AddressType::BrEdr => {
                self.bredr.get_or_insert_with(BrEdrData::default);
            }
            AddressType::LeAnonymous => {}
        }
    }

    pub(crate) fn resolve_identity(&mut self, identity: DeviceAddress) {
        self.address = identity;
        self.identity_known = true;
    }

    /// Overrides the assigned id with one restored from persisted storage.
    pub(crate) fn force_id(&mut self, id: PeerId) {
        self.id = id;
    }
}

/// A derived security properties summary for a stored key, independent of
/// transport.
#[must_use]
pub fn key_security(authenticated: bool, secure_connections: bool) -> SecurityProperties {
    use crate::security::SecurityLevel;
    let level = match (authenticated, secure_connections) {
        (true, true) => SecurityLevel::SecureAuthenticated,
        (true, false) => SecurityLevel::Authenticated,
        (false, _) => SecurityLevel::Encrypted,
    };
    SecurityProperties::new(level)
}
