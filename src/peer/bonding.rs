//! Persisted bonding data layout, consumed from (not defined by) external
//! bond storage.

use crate::addr::DeviceAddress;
use crate::security::Irk;

/// BR/EDR link key type, used to derive [`crate::security::SecurityProperties`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkKeyType {
    CombinationKey,
    DebugCombinationKey,
    UnauthenticatedCombinationKeyP192,
    AuthenticatedCombinationKeyP192,
    ChangedCombinationKey,
    UnauthenticatedCombinationKeyP256,
    AuthenticatedCombinationKeyP256,
}

impl LinkKeyType {
    /// Whether a key of this type is authenticated (MITM-protected).
    #[must_use]
    pub const fn authenticated(self) -> bool {
        matches!(
            self,
            Self::AuthenticatedCombinationKeyP192 | Self::AuthenticatedCombinationKeyP256
        )
    }

    /// Whether a key of this type was derived via Secure Connections.
    #[must_use]
    pub const fn secure_connections(self) -> bool {
        matches!(self, Self::UnauthenticatedCombinationKeyP256 | Self::AuthenticatedCombinationKeyP256)
    }

    /// Debug Combination keys are never acceptable.
    #[must_use]
    pub const fn is_debug(self) -> bool {
        matches!(self, Self::DebugCombinationKey)
    }
}

/// A stored BR/EDR link key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkKey {
    pub value: [u8; 16],
    pub key_type: LinkKeyType,
}

/// LE pairing data persisted after a successful bond.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PairingData {
    pub peer_ltk: Option<[u8; 16]>,
    pub local_ltk: Option<[u8; 16]>,
    pub irk: Option<[u8; 16]>,
    pub identity_address: Option<DeviceAddress>,
    pub csrk: Option<[u8; 16]>,
    pub cross_transport_key: Option<[u8; 16]>,
}

impl PairingData {
    /// Returns the [`Irk`] wrapper, if one is present.
    #[must_use]
    pub fn irk(&self) -> Option<Irk> {
        self.irk.map(Irk)
    }

    /// At least one of `{peer_ltk, local_ltk, csrk}` must be present for an
    /// LE bond; an IRK without an identity address is rejected.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let has_key = self.peer_ltk.is_some() || self.local_ltk.is_some() || self.csrk.is_some();
        let irk_ok = self.irk.is_none() || self.identity_address.is_some();
        has_key && irk_ok
    }
}

/// Full persisted record for a bonded peer, as read from external storage.
#[derive(Clone, Debug, Default)]
pub struct BondingData {
    pub identifier: Option<crate::peer::PeerId>,
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub le_pairing_data: Option<PairingData>,
    pub bredr_link_key: Option<LinkKey>,
    pub bredr_services: Vec<crate::uuid::Uuid>,
}

impl BondingData {
    /// Validates the record per the persisted-state rules: at least one
    /// sub-record must be present, and any LE pairing data must itself be
    /// internally valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.le_pairing_data.is_none() && self.bredr_link_key.is_none() {
            return false;
        }
        match &self.le_pairing_data {
            Some(p) => p.is_valid(),
            None => true,
        }
    }
}
