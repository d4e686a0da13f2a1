//! Security level model and the capability interfaces consumed from the
//! (externally supplied) Security Manager and pairing UI.

use std::fmt::Debug;

use crate::addr::DeviceAddress;
use crate::error::Result;
use crate::peer::PeerId;

/// Security level of a link or stored key ([Vol 3] Part C, Section 5.2.2.8).
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd, strum::Display)]
pub enum SecurityLevel {
    /// No encryption.
    #[default]
    NoSecurity,
    /// Encrypted, but the key was not generated through an authenticated
    /// exchange.
    Encrypted,
    /// Encrypted with an authenticated (MITM-protected) key.
    Authenticated,
    /// Encrypted with an authenticated key generated via LE/BR-EDR Secure
    /// Connections.
    SecureAuthenticated,
}

impl SecurityLevel {
    /// Returns whether `self` satisfies a requirement of `required`.
    #[inline]
    #[must_use]
    pub fn satisfies(self, required: Self) -> bool {
        self >= required
    }
}

/// Properties of a derived link key or active link, used to decide whether a
/// stored key satisfies a pairing request's requirements.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SecurityProperties {
    pub level: SecurityLevel,
    pub encrypted: bool,
    pub authenticated: bool,
    pub secure_connections: bool,
}

impl SecurityProperties {
    #[must_use]
    pub const fn new(level: SecurityLevel) -> Self {
        let authenticated = matches!(
            level,
            SecurityLevel::Authenticated | SecurityLevel::SecureAuthenticated
        );
        let secure_connections = matches!(level, SecurityLevel::SecureAuthenticated);
        Self { level, encrypted: !matches!(level, SecurityLevel::NoSecurity), authenticated, secure_connections }
    }

    #[inline]
    #[must_use]
    pub fn meets(self, required: SecurityLevel) -> bool {
        self.level.satisfies(required)
    }
}

/// IO capability exchanged during Simple Pairing ([Vol 3] Part C, Section
/// 5.2.2.6, Table 5.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum IoCapability {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    NoInputNoOutput,
    KeyboardDisplay,
}

/// Opaque 128-bit Identity Resolving Key. The actual AES-based `ah()`
/// resolution function lives in the Security Manager; the cache only stores
/// and looks up by this key via [`PrivacyResolver`].
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Irk(pub [u8; 16]);

impl Debug for Irk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Irk(..)")
    }
}

/// Capability for resolving whether a Resolvable Private Address was
/// generated from a given IRK. Backed by the Security Manager's `ah()`
/// function, which is out of scope for this core.
pub trait PrivacyResolver: Debug + Send + Sync {
    /// Returns whether `rpa` resolves under `irk`.
    fn resolves(&self, irk: &Irk, rpa: &DeviceAddress) -> bool;
}

/// BR/EDR pairing action the local host must take, derived from the IO
/// capability matrix ([Vol 3] Part C, Section 5.2.2.6, Table 5.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PairingAction {
    /// No user interaction required; the controller completes pairing
    /// automatically.
    Automatic,
    /// Ask the user to accept or reject pairing with no passkey displayed.
    GetConsent,
    /// Generate and display a passkey on the local device.
    DisplayPasskey,
    /// Display a passkey and ask the user to confirm it matches the peer's.
    ComparePasskey,
    /// Ask the user to enter a passkey displayed on the peer.
    RequestPasskey,
}

/// Controller event the pairing state machine expects next, given a computed
/// [`PairingAction`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExpectedEvent {
    UserConfirmationRequest,
    UserPasskeyRequest,
    UserPasskeyNotification,
}

/// Plug-in interface for user interaction during pairing.
#[allow(unused_variables)]
pub trait PairingDelegate: Debug + Send + Sync {
    /// The delegate's IO capability.
    fn io_capability(&self) -> IoCapability;

    /// Ask the user to accept or reject pairing (no passkey shown).
    fn confirm_pairing(&self, peer: PeerId, cb: Box<dyn FnOnce(bool) + Send>);

    /// Display `value` to the user, who confirms it matches what is shown on
    /// the peer (`method == ComparePasskey`) or simply acknowledges it
    /// (`method == DisplayPasskey`).
    fn display_passkey(
        &self,
        peer: PeerId,
        value: u32,
        method: PairingAction,
        cb: Box<dyn FnOnce(bool) + Send>,
    );

    /// Ask the user to enter a passkey displayed on the peer.
    fn request_passkey(&self, peer: PeerId, cb: Box<dyn FnOnce(Option<u32>) + Send>);

    /// Notifies the delegate that pairing with `peer` completed.
    fn complete_pairing(&self, peer: PeerId, result: Result<()>);
}

/// Capability for upgrading the security of an established link, supplied by
/// the (external) Security Manager.
#[async_trait::async_trait]
pub trait SecurityManager: Debug + Send + Sync {
    /// Current security level of the link.
    fn current_level(&self) -> SecurityLevel;

    /// Requests an upgrade to at least `level`, invoking `cb` with the
    /// outcome once the upgrade (or failure) is final.
    async fn pair(&self, level: SecurityLevel) -> Result<SecurityProperties>;
}
