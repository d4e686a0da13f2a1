//! The narrow slice of HCI types this core reasons about: status codes,
//! connection handles, and LE feature flags. Command/event wire encoding
//! belongs to the (externally supplied) transport.

use bitflags::bitflags;

/// HCI status codes ([Vol 1] Part F, Section 1.3). Only the subset this core
/// inspects directly is named; controllers may report any value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, num_enum::FromPrimitive, strum::Display)]
#[non_exhaustive]
#[repr(u8)]
pub enum Status {
    Success = 0x00,
    UnknownConnectionIdentifier = 0x02,
    AuthenticationFailure = 0x05,
    PinOrKeyMissing = 0x06,
    ConnectionTimeout = 0x08,
    PageTimeout = 0x04,
    ConnectionRejectedDueToSecurityReasons = 0x0E,
    ConnectionAcceptTimeoutExceeded = 0x10,
    RemoteUserTerminatedConnection = 0x13,
    ConnectionTerminatedByLocalHost = 0x16,
    #[num_enum(default)]
    UnspecifiedError = 0x1F,
    InsufficientSecurity = 0x2F,
    UnsupportedRemoteFeature = 0x1A,
    /// The special retry-triggering status ([Vol 4] Part E, Section 1.2).
    ConnectionFailedToBeEstablished = 0x3E,
}

impl Status {
    #[inline]
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Device connection role ([Vol 4] Part E, Sections 7.7.65.1 and 7.7.65.10).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Central,
    Peripheral,
}

/// Connection handle ([Vol 4] Part E, Section 5.4.2).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct ConnHandle(u16);

impl ConnHandle {
    #[inline]
    #[must_use]
    pub const fn new(h: u16) -> Self {
        Self(h)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

bitflags! {
    /// LE feature mask ([Vol 6] Part B, Section 4.6). Only the bits this
    /// core branches on are named.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct LeFeatures: u64 {
        /// Remote supports the `LE Connection Update` procedure rather than
        /// requiring the L2CAP signaling fallback.
        const CONNECTION_PARAMETERS_REQUEST_PROCEDURE = 1 << 7;
    }
}
