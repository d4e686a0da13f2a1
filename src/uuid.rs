//! 16-, 32-, or 128-bit UUIDs ([Vol 3] Part B, Section 2.5.1) and the
//! assigned numbers needed to identify the GAP and GATT services read during
//! LE interrogation.
//!
//! Ported from the host stack's Bluetooth SIG assigned-numbers tables; only
//! the identifiers this core actually references (GAP/GATT service and
//! characteristic UUIDs) are kept narrow, the rest reused verbatim.

#![allow(clippy::use_self)]

use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::num::{NonZeroU128, NonZeroU16};

const SHIFT: u32 = u128::BITS - u32::BITS;
const BASE: u128 = 0x0000_0000_0000_1000_8000_00805F9B34FB;
const MASK_16: u128 = !((u16::MAX as u128) << SHIFT);
const MASK_32: u128 = !((u32::MAX as u128) << SHIFT);

/// 16-, 32-, or 128-bit UUID.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid(NonZeroU128);

impl Uuid {
    /// Creates a UUID from a `u128`.
    #[inline]
    #[must_use]
    pub const fn new(v: u128) -> Option<Self> {
        match NonZeroU128::new(v) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Converts an assigned 16-bit Bluetooth SIG UUID to `u16`.
    #[inline]
    #[must_use]
    pub fn as_u16(self) -> Option<u16> {
        #[allow(clippy::cast_possible_truncation)]
        let v = (self.0.get() >> SHIFT) as u16;
        (self.0.get() & MASK_16 == BASE && v > 0).then_some(v)
    }

    /// Converts an assigned 32-bit Bluetooth SIG UUID to `u32`.
    #[inline]
    #[must_use]
    pub fn as_u32(self) -> Option<u32> {
        let v = (self.0.get() >> SHIFT) as u32;
        (self.0.get() & MASK_32 == BASE && v > u32::from(u16::MAX)).then_some(v)
    }
}

impl From<Uuid16> for Uuid {
    #[inline]
    fn from(u: Uuid16) -> Self {
        u.as_uuid()
    }
}

impl Debug for Uuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(v) = self.as_u16() {
            write!(f, "{v:#06X}")
        } else if let Some(v) = self.as_u32() {
            write!(f, "{v:#010X}")
        } else {
            let v = self.0.get();
            write!(
                f,
                "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
                (v >> 96) as u32,
                (v >> 80) as u16,
                (v >> 64) as u16,
                (v >> 48) as u16,
                (v & ((1 << 48) - 1)) as u64
            )
        }
    }
}

impl Display for Uuid {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl From<Uuid> for u128 {
    #[inline]
    fn from(u: Uuid) -> Self {
        u.0.get()
    }
}

/// 16-bit Bluetooth SIG UUID.
#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid16(NonZeroU16);

impl Uuid16 {
    /// Creates an assigned 16-bit SIG UUID from a `u16`.
    ///
    /// # Panics
    ///
    /// Panics if `v` is 0.
    #[inline(always)]
    #[must_use]
    pub const fn sig(v: u16) -> Self {
        assert!(v != 0);
        // SAFETY: v != 0
        Self(unsafe { NonZeroU16::new_unchecked(v) })
    }

    /// Returns the 128-bit UUID representation.
    #[inline]
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        // SAFETY: always non-zero
        unsafe { Uuid(NonZeroU128::new_unchecked((self.0.get() as u128) << SHIFT | BASE)) }
    }
}

impl Debug for Uuid16 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.0.get())
    }
}

impl Display for Uuid16 {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

#[allow(clippy::derive_hash_xor_eq)]
impl Hash for Uuid16 {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_uuid().hash(state);
    }
}

impl From<Uuid16> for u16 {
    #[inline]
    fn from(u: Uuid16) -> Self {
        u.0.get()
    }
}

/// GATT service identifiers relevant to GAP interrogation ([Assigned
/// Numbers] Section 3.4).
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, num_enum::IntoPrimitive, strum::Display)]
#[non_exhaustive]
#[repr(u16)]
pub enum GattServiceId {
    GenericAccess = 0x1800,
    GenericAttribute = 0x1801,
    DeviceInformation = 0x180A,
}

/// GAP service characteristics read during LE interrogation ([Assigned
/// Numbers] Section 3.8).
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, num_enum::IntoPrimitive, strum::Display)]
#[non_exhaustive]
#[repr(u16)]
pub enum CharacteristicId {
    DeviceName = 0x2A00,
    Appearance = 0x2A01,
    PeripheralPreferredConnectionParameters = 0x2A04,
    CentralAddressResolution = 0x2AA6,
}

macro_rules! sig_enum {
    ($($t:ty)*) => {$(
        impl $t {
            /// Returns the `Uuid16` representation of the variant.
            #[inline]
            #[must_use]
            pub const fn uuid16(self) -> Uuid16 {
                Uuid16::sig(self as _)
            }
        }

        impl From<$t> for Uuid {
            #[inline]
            fn from(v: $t) -> Self {
                v.uuid16().as_uuid()
            }
        }

        impl From<$t> for Uuid16 {
            #[inline]
            fn from(v: $t) -> Self {
                v.uuid16()
            }
        }
    )*}
}
sig_enum! { GattServiceId CharacteristicId }
