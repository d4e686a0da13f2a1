//! Device addresses and dual-mode address aliasing.

use std::fmt::{self, Debug, Display, Formatter};

/// Address type ([Vol 6] Part B, Section 1.3; [Vol 2] Part B, Section 6.2).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, strum::Display)]
#[non_exhaustive]
pub enum AddressType {
    /// BR/EDR `BD_ADDR`.
    #[default]
    BrEdr,
    /// LE public device address.
    LePublic,
    /// LE random device address (static, non-resolvable, or resolvable).
    LeRandom,
    /// LE anonymous advertiser (no address present in the PDU).
    LeAnonymous,
}

impl AddressType {
    /// Returns whether `self` and `other` are the dual-mode alias pair used
    /// by a controller to expose the same physical radio on both transports.
    #[inline]
    #[must_use]
    pub const fn aliases(self, other: Self) -> bool {
        matches!(
            (self, other),
            (Self::BrEdr, Self::LePublic) | (Self::LePublic, Self::BrEdr)
        )
    }

    /// Returns whether this address type belongs to the LE transport.
    #[inline]
    #[must_use]
    pub const fn is_le(self) -> bool {
        matches!(self, Self::LePublic | Self::LeRandom | Self::LeAnonymous)
    }
}

/// A Bluetooth device address: an address type paired with a 48-bit value.
///
/// Two addresses of alias types ([`AddressType::aliases`]) with identical
/// bytes refer to the same physical device on a dual-mode controller; cache
/// lookups must treat them as equivalent.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeviceAddress {
    typ: AddressType,
    value: [u8; 6],
}

impl DeviceAddress {
    /// Creates a new device address from a big-endian `BD_ADDR`-order byte
    /// array (most significant octet first, matching human-readable
    /// `AA:BB:CC:DD:EE:FF` notation).
    #[inline]
    #[must_use]
    pub const fn new(typ: AddressType, value: [u8; 6]) -> Self {
        Self { typ, value }
    }

    /// Returns the address type.
    #[inline]
    #[must_use]
    pub const fn addr_type(&self) -> AddressType {
        self.typ
    }

    /// Returns the raw 48-bit value.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> [u8; 6] {
        self.value
    }

    /// Returns whether this address is a resolvable private address
    /// candidate, i.e. an `LeRandom` address whose top two bits of the most
    /// significant octet are `01` ([Vol 6] Part B, Section 1.3.2.2).
    #[must_use]
    pub fn is_resolvable_private(&self) -> bool {
        self.typ == AddressType::LeRandom && (self.value[0] >> 6) == 0b01
    }

    /// Returns the identity resolving "hash" (the lower 3 octets) and
    /// "prand" (the upper 3 octets) halves of a resolvable private address,
    /// per [Vol 6] Part B, Section 1.3.2.3. Returns `None` if this is not an
    /// RPA candidate.
    #[must_use]
    pub fn rpa_halves(&self) -> Option<([u8; 3], [u8; 3])> {
        self.is_resolvable_private().then(|| {
            let mut prand = [0u8; 3];
            let mut hash = [0u8; 3];
            prand.copy_from_slice(&self.value[0..3]);
            hash.copy_from_slice(&self.value[3..6]);
            (prand, hash)
        })
    }

    /// Returns the address that aliases `self` under dual-mode reconciliation
    /// (BR/EDR <-> LE public), or `None` for address types with no alias.
    #[must_use]
    pub fn alias(&self) -> Option<Self> {
        match self.typ {
            AddressType::BrEdr => Some(Self::new(AddressType::LePublic, self.value)),
            AddressType::LePublic => Some(Self::new(AddressType::BrEdr, self.value)),
            AddressType::LeRandom | AddressType::LeAnonymous => None,
        }
    }

    /// Returns whether `self` and `other` identify the same physical device,
    /// either because they are equal or because their types alias.
    #[must_use]
    pub fn identifies_same_device(&self, other: &Self) -> bool {
        self.value == other.value && (self.typ == other.typ || self.typ.aliases(other.typ))
    }
}

impl Debug for DeviceAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X} ({})",
            self.value[0],
            self.value[1],
            self.value[2],
            self.value[3],
            self.value[4],
            self.value[5],
            self.typ
        )
    }
}

impl Display for DeviceAddress {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}
