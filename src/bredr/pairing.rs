//! Per-link Secure Simple Pairing state machine ([Vol 3] Part C, Section
//! 5.2.2). Unlike the LE connection manager's task-driven pipeline, this is a
//! purely synchronous, event-driven state machine: every `on_*` method is a
//! direct response to one HCI event and returns (or replies) before the next
//! event may be processed.

use std::fmt::Debug;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::addr::DeviceAddress;
use crate::error::{Error, Result};
use crate::hci::{ConnHandle, Status};
use crate::peer::{key_security, LinkKey, PeerCache, PeerId};
use crate::security::{
    ExpectedEvent, IoCapability, PairingAction, PairingDelegate, SecurityLevel, SecurityProperties,
};
use crate::SyncMutex;

/// States of the per-link pairing state machine ([Vol 3] Part C, Section
/// 5.2.2). `Failed` is terminal; every other state but `Idle` is transient,
/// reachable only while a pairing attempt is in progress.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum State {
    Idle,
    InitiatorWaitLinkKeyRequest,
    InitiatorWaitIoCapRequest,
    InitiatorWaitIoCapResponse,
    ResponderWaitIoCapRequest,
    WaitUserConfirmationRequest,
    WaitUserPasskeyRequest,
    WaitUserPasskeyNotification,
    WaitPairingComplete,
    WaitLinkKey,
    InitiatorWaitAuthComplete,
    WaitEncryption,
    Failed,
}

/// Which side of the pairing exchange this link is playing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PairingRole {
    Initiator,
    Responder,
}

/// State local to one in-progress pairing attempt. Dropped (via
/// `current_pairing = None`) whenever the state machine returns to `Idle` or
/// `Failed`.
#[derive(Debug, Default)]
struct CurrentPairing {
    role: Option<PairingRole>,
    local_iocap: Option<IoCapability>,
    peer_iocap: Option<IoCapability>,
    action: Option<PairingAction>,
    expected_event: Option<ExpectedEvent>,
    /// Whether the *computed* pairing, once it yields a link key, is
    /// expected to be authenticated. Checked against the key actually
    /// reported in `OnLinkKeyNotification`.
    authenticated: Option<bool>,
    security_properties: Option<SecurityProperties>,
}

impl CurrentPairing {
    fn new(role: PairingRole) -> Self {
        Self { role: Some(role), ..Default::default() }
    }
}

type StatusCb = Box<dyn FnOnce(Result<SecurityProperties>) + Send>;

/// A queued security-upgrade request: a required level and the callback to
/// notify once the in-progress (or about-to-start) pairing resolves.
struct PendingRequest {
    level: SecurityLevel,
    cb: StatusCb,
}

/// Capability for the handful of controller replies this state machine
/// issues as a *consequence* of user interaction rather than as a direct
/// return value: requesting authentication, acking a user prompt, and
/// enabling encryption. Stands in for the HCI transport and the link's
/// connector state, the same way [`crate::le::HciConnector`] does for LE.
pub trait BrEdrLinkController: Debug + Send + Sync {
    /// Issues `HCI_Authentication_Requested` for this link.
    fn request_authentication(&self, handle: ConnHandle);

    /// Replies to a `User Confirmation Request` (or, for
    /// [`PairingAction::Automatic`]/[`PairingAction::GetConsent`], the
    /// controller's implicit equivalent) with the user's accept/reject
    /// decision.
    fn reply_user_confirmation(&self, handle: ConnHandle, accept: bool);

    /// Replies to a `User Passkey Request` with the entered passkey, or a
    /// negative reply if the user canceled.
    fn reply_user_passkey(&self, handle: ConnHandle, passkey: Option<u32>);

    /// Issues `HCI_Set_Connection_Encryption` (or equivalent) for this link.
    fn request_encryption(&self, handle: ConnHandle, enable: bool);
}

/// IO-cap matrix action for the initiator role ([Vol 3] Part C, Section
/// 5.2.2.6, Table 5.3). `KeyboardDisplay` is treated as equivalent to
/// `DisplayYesNo` for this matrix, matching how hosts commonly collapse the
/// two display-and-confirm capabilities.
fn initiator_action(initiator: IoCapability, responder: IoCapability) -> PairingAction {
    use IoCapability::{DisplayOnly, DisplayYesNo, KeyboardDisplay, KeyboardOnly, NoInputNoOutput};
    let initiator_displays = matches!(initiator, DisplayYesNo | KeyboardDisplay);
    let responder_displays = matches!(responder, DisplayYesNo | KeyboardDisplay);
    if initiator == NoInputNoOutput || responder == NoInputNoOutput {
        return if initiator_displays && responder == NoInputNoOutput {
            PairingAction::GetConsent
        } else {
            PairingAction::Automatic
        };
    }
    if initiator == KeyboardOnly {
        return PairingAction::RequestPasskey;
    }
    if responder == KeyboardOnly {
        return PairingAction::DisplayPasskey;
    }
    if responder == DisplayOnly {
        return if initiator_displays { PairingAction::ComparePasskey } else { PairingAction::Automatic };
    }
    if initiator_displays && responder_displays {
        return PairingAction::ComparePasskey;
    }
    PairingAction::DisplayPasskey
}

/// Responder-role action: the initiator matrix with roles swapped, plus one
/// special case the spec calls out explicitly.
fn responder_action(initiator: IoCapability, responder: IoCapability) -> PairingAction {
    if initiator == IoCapability::NoInputNoOutput && responder == IoCapability::KeyboardOnly {
        return PairingAction::GetConsent;
    }
    initiator_action(responder, initiator)
}

/// The controller event the action implies ([Vol 3] Part C, Section 5.2.2.6):
/// `Automatic`/`GetConsent`/`ComparePasskey` all surface as a User
/// Confirmation Request (auto-confirmed by the controller in the first
/// case); `DisplayPasskey` as a Passkey Notification; `RequestPasskey` as a
/// Passkey Request.
fn expected_event(action: PairingAction) -> ExpectedEvent {
    match action {
        PairingAction::Automatic | PairingAction::GetConsent | PairingAction::ComparePasskey => {
            ExpectedEvent::UserConfirmationRequest
        }
        PairingAction::DisplayPasskey => ExpectedEvent::UserPasskeyNotification,
        PairingAction::RequestPasskey => ExpectedEvent::UserPasskeyRequest,
    }
}

/// Whether pairing with this IO-cap pair is authenticated (MITM-protected):
/// neither side is `NoInputNoOutput`, and at least one side can display a
/// value for confirmation or accept keyboard entry.
fn authenticated(a: IoCapability, b: IoCapability) -> bool {
    use IoCapability::{DisplayYesNo, KeyboardDisplay, KeyboardOnly, NoInputNoOutput};
    let displays_or_enters =
        |c: IoCapability| matches!(c, DisplayYesNo | KeyboardOnly | KeyboardDisplay);
    a != NoInputNoOutput && b != NoInputNoOutput && (displays_or_enters(a) || displays_or_enters(b))
}

/// Drives Simple Pairing for one BR/EDR link from the controller's event
/// stream, consulting a [`PairingDelegate`] for user interaction and
/// supporting multiple concurrently queued security-upgrade requests.
pub struct BrEdrPairingState {
    peer: PeerId,
    address: DeviceAddress,
    handle: ConnHandle,
    state: State,
    current_pairing: Option<CurrentPairing>,
    pending: Vec<PendingRequest>,
    delegate: Option<Arc<dyn PairingDelegate>>,
    controller: Arc<dyn BrEdrLinkController>,
    cache: Arc<SyncMutex<PeerCache>>,
}

impl Debug for BrEdrPairingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrEdrPairingState")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl BrEdrPairingState {
    /// Creates a new, `Idle` pairing state machine for the link identified
    /// by `peer`/`address`/`handle`.
    #[must_use]
    pub fn new(
        peer: PeerId,
        address: DeviceAddress,
        handle: ConnHandle,
        controller: Arc<dyn BrEdrLinkController>,
        cache: Arc<SyncMutex<PeerCache>>,
        delegate: Option<Arc<dyn PairingDelegate>>,
    ) -> Self {
        Self { peer, address, handle, state: State::Idle, current_pairing: None, pending: Vec::new(), delegate, controller, cache }
    }

    /// Current state, for diagnostics and tests.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Registers (or clears) the pairing delegate. A delegate registered
    /// after a `NotReady` failure allows a later `InitiatePairing` to
    /// succeed without needing to reconstruct the state machine.
    pub fn set_pairing_delegate(&mut self, delegate: Option<Arc<dyn PairingDelegate>>) {
        self.delegate = delegate;
    }

    fn cached_link_key(&self) -> Option<LinkKey> {
        self.cache.lock().find_by_id(self.peer)?.bredr.as_ref()?.link_key
    }

    fn key_properties(key: LinkKey) -> SecurityProperties {
        key_security(key.key_type.authenticated(), key.key_type.secure_connections())
    }

    fn max_pending_requirement(&self) -> SecurityLevel {
        self.pending.iter().map(|p| p.level).max().unwrap_or_default()
    }

    /// Initiates pairing to satisfy `requirements`. If an existing key
    /// already meets it, `cb` fires synchronously and the state machine
    /// remains `Idle`; otherwise the request is queued and Simple Pairing
    /// begins.
    pub fn initiate_pairing(&mut self, requirements: SecurityLevel, cb: StatusCb) {
        if self.state == State::Idle {
            if let Some(props) = self.cached_link_key().map(Self::key_properties) {
                if props.meets(requirements) {
                    cb(Ok(props));
                    return;
                }
            }
            self.pending.push(PendingRequest { level: requirements, cb });
            self.current_pairing = Some(CurrentPairing::new(PairingRole::Initiator));
            self.state = State::InitiatorWaitLinkKeyRequest;
            debug!(peer = ?self.peer, "initiating pairing, requesting authentication");
            self.controller.request_authentication(self.handle);
            return;
        }
        trace!(peer = ?self.peer, state = ?self.state, "pairing already in progress, queueing request");
        self.pending.push(PendingRequest { level: requirements, cb });
    }

    /// Responds to `HCI_Link_Key_Request`. From `Idle` this is passive
    /// authentication (or the implicit start of a responder-role pairing, if
    /// no key is on file); from `InitiatorWaitLinkKeyRequest`, a returned key
    /// must also meet the queued requirement or Simple Pairing is forced.
    pub fn on_link_key_request(&mut self, _addr: DeviceAddress) -> Option<LinkKey> {
        let key = self.cached_link_key();
        match self.state {
            State::Idle => {
                if key.is_some() {
                    return key;
                }
                self.current_pairing = Some(CurrentPairing::new(PairingRole::Responder));
                self.state = State::ResponderWaitIoCapRequest;
                None
            }
            State::InitiatorWaitLinkKeyRequest => {
                if let Some(k) = key {
                    if Self::key_properties(k).meets(self.max_pending_requirement()) {
                        self.state = State::InitiatorWaitAuthComplete;
                        return Some(k);
                    }
                }
                self.state = State::InitiatorWaitIoCapRequest;
                None
            }
            _ => {
                self.unexpected_event("OnLinkKeyRequest");
                None
            }
        }
    }

    /// Responds to `HCI_IO_Capability_Request` with the delegate's IO
    /// capability, or `None` (forcing a negative reply) if no delegate is
    /// registered.
    pub fn on_io_capability_request(&mut self) -> Option<IoCapability> {
        match self.state {
            State::InitiatorWaitIoCapRequest | State::ResponderWaitIoCapRequest => {
                let Some(delegate) = self.delegate.clone() else {
                    warn!(peer = ?self.peer, "no pairing delegate registered, returning to idle");
                    self.not_ready();
                    return None;
                };
                let cap = delegate.io_capability();
                self.current_pairing.get_or_insert_with(|| CurrentPairing::new(PairingRole::Responder)).local_iocap = Some(cap);
                if self.state == State::InitiatorWaitIoCapRequest {
                    self.state = State::InitiatorWaitIoCapResponse;
                }
                Some(cap)
            }
            _ => {
                self.unexpected_event("OnIoCapabilityRequest");
                None
            }
        }
    }

    /// Records the peer's IO capability from `HCI_IO_Capability_Response`
    /// and computes the pairing action and expected next event from the
    /// IO-cap matrix.
    pub fn on_io_capability_response(&mut self, peer_iocap: IoCapability) {
        match self.state {
            State::InitiatorWaitIoCapResponse => self.compute_action(peer_iocap, true),
            State::ResponderWaitIoCapRequest => {
                let needs_local = self.current_pairing.as_ref().map_or(true, |p| p.local_iocap.is_none());
                if needs_local {
                    let Some(delegate) = self.delegate.clone() else {
                        warn!(peer = ?self.peer, "no pairing delegate registered, returning to idle");
                        self.not_ready();
                        return;
                    };
                    let cap = delegate.io_capability();
                    self.current_pairing.get_or_insert_with(|| CurrentPairing::new(PairingRole::Responder)).local_iocap = Some(cap);
                }
                self.compute_action(peer_iocap, false);
            }
            _ => self.unexpected_event("OnIoCapabilityResponse"),
        }
    }

    fn compute_action(&mut self, peer_iocap: IoCapability, is_initiator: bool) {
        let Some(pairing) = self.current_pairing.as_mut() else {
            return self.unexpected_event("OnIoCapabilityResponse");
        };
        let local = pairing.local_iocap.expect("local IO capability fetched before action is computed");
        pairing.peer_iocap = Some(peer_iocap);
        let (initiator_cap, responder_cap) = if is_initiator { (local, peer_iocap) } else { (peer_iocap, local) };
        let action =
            if is_initiator { initiator_action(initiator_cap, responder_cap) } else { responder_action(initiator_cap, responder_cap) };
        let event = expected_event(action);
        pairing.action = Some(action);
        pairing.expected_event = Some(event);
        pairing.authenticated = Some(authenticated(initiator_cap, responder_cap));
        debug!(peer = ?self.peer, ?action, ?event, "computed pairing action");
        self.state = match event {
            ExpectedEvent::UserConfirmationRequest => State::WaitUserConfirmationRequest,
            ExpectedEvent::UserPasskeyRequest => State::WaitUserPasskeyRequest,
            ExpectedEvent::UserPasskeyNotification => State::WaitUserPasskeyNotification,
        };
    }

    /// Handles `HCI_User_Confirmation_Request`, dispatching to the delegate
    /// per the computed action and replying through the
    /// [`BrEdrLinkController`] once the user decides.
    pub fn on_user_confirmation_request(&mut self, value: u32) {
        if self.state != State::WaitUserConfirmationRequest {
            return self.unexpected_event("OnUserConfirmationRequest");
        }
        let action = self.current_pairing.as_ref().and_then(|p| p.action);
        let controller = Arc::clone(&self.controller);
        let handle = self.handle;
        match action {
            Some(PairingAction::Automatic) => controller.reply_user_confirmation(handle, true),
            Some(PairingAction::GetConsent) => {
                let Some(delegate) = self.delegate.clone() else { return self.not_ready() };
                delegate.confirm_pairing(self.peer, Box::new(move |accept| controller.reply_user_confirmation(handle, accept)));
            }
            Some(PairingAction::ComparePasskey) => {
                let Some(delegate) = self.delegate.clone() else { return self.not_ready() };
                delegate.display_passkey(
                    self.peer,
                    value,
                    PairingAction::ComparePasskey,
                    Box::new(move |accept| controller.reply_user_confirmation(handle, accept)),
                );
            }
            _ => return self.unexpected_event("OnUserConfirmationRequest"),
        }
        self.state = State::WaitPairingComplete;
    }

    /// Handles `HCI_User_Passkey_Request` (the action must be
    /// `RequestPasskey`).
    pub fn on_user_passkey_request(&mut self) {
        if self.state != State::WaitUserPasskeyRequest {
            return self.unexpected_event("OnUserPasskeyRequest");
        }
        let Some(delegate) = self.delegate.clone() else { return self.not_ready() };
        let controller = Arc::clone(&self.controller);
        let handle = self.handle;
        delegate.request_passkey(self.peer, Box::new(move |passkey| controller.reply_user_passkey(handle, passkey)));
        self.state = State::WaitPairingComplete;
    }

    /// Handles `HCI_User_Passkey_Notification` (the action must be
    /// `DisplayPasskey`). Informational only: the controller expects no
    /// reply.
    pub fn on_user_passkey_notification(&mut self, value: u32) {
        if self.state != State::WaitUserPasskeyNotification {
            return self.unexpected_event("OnUserPasskeyNotification");
        }
        if let Some(delegate) = self.delegate.clone() {
            delegate.display_passkey(self.peer, value, PairingAction::DisplayPasskey, Box::new(|_| {}));
        }
        self.state = State::WaitPairingComplete;
    }

    /// Handles `HCI_Simple_Pairing_Complete`.
    pub fn on_simple_pairing_complete(&mut self, status: Status) {
        if self.state != State::WaitPairingComplete {
            return self.unexpected_event("OnSimplePairingComplete");
        }
        if !status.is_ok() {
            return self.fail(Error::Failed);
        }
        self.state = State::WaitLinkKey;
    }

    /// Handles `HCI_Link_Key_Notification`. Rejects Debug Combination keys
    /// and keys whose authenticated property doesn't match what the IO-cap
    /// matrix computed, stores an acceptable key on the peer, and advances
    /// to authentication (initiator) or straight to encryption (responder).
    pub fn on_link_key_notification(&mut self, key: LinkKey) {
        if self.state != State::WaitLinkKey {
            return self.unexpected_event("OnLinkKeyNotification");
        }
        if key.key_type.is_debug() {
            warn!(peer = ?self.peer, "rejecting Debug Combination key");
            return self.fail(Error::InsufficientSecurity);
        }
        let props = Self::key_properties(key);
        if props.level == SecurityLevel::NoSecurity {
            return self.fail(Error::InsufficientSecurity);
        }
        let expected_authenticated = self.current_pairing.as_ref().and_then(|p| p.authenticated).unwrap_or(false);
        if key.key_type.authenticated() != expected_authenticated {
            warn!(peer = ?self.peer, "link key authenticated property does not match IO-cap expectation");
            return self.fail(Error::InsufficientSecurity);
        }
        self.cache.lock().store_bredr_bond(self.address, key);
        let role = self.current_pairing.as_ref().and_then(|p| p.role);
        if let Some(pairing) = self.current_pairing.as_mut() {
            pairing.security_properties = Some(props);
        }
        match role {
            Some(PairingRole::Initiator) => self.state = State::InitiatorWaitAuthComplete,
            Some(PairingRole::Responder) | None => {
                self.controller.request_encryption(self.handle, true);
                self.state = State::WaitEncryption;
            }
        }
    }

    /// Handles `HCI_Authentication_Complete` (initiator role only).
    pub fn on_authentication_complete(&mut self, status: Status) {
        if self.state != State::InitiatorWaitAuthComplete {
            return self.unexpected_event("OnAuthenticationComplete");
        }
        if !status.is_ok() {
            return self.fail(Error::Failed);
        }
        self.controller.request_encryption(self.handle, true);
        self.state = State::WaitEncryption;
    }

    /// Handles `HCI_Encryption_Change`, ignored outside `WaitEncryption`.
    /// Treats any non-success status, or encryption failing to come up, as a
    /// failure; this also covers a Secure Connections link's encryption
    /// going from on to off, which must never be treated as anything but a
    /// failure.
    pub fn on_encryption_change(&mut self, status: Status, enabled: bool) {
        if self.state != State::WaitEncryption {
            return;
        }
        if !status.is_ok() || !enabled {
            return self.fail(Error::Failed);
        }
        let props = self.current_pairing.take().and_then(|p| p.security_properties).unwrap_or_default();
        debug!(peer = ?self.peer, ?props, "pairing complete");
        self.state = State::Idle;
        self.resolve_pending(Ok(props));
    }

    fn not_ready(&mut self) {
        self.state = State::Idle;
        self.current_pairing = None;
        self.resolve_pending(Err(Error::NotReady));
    }

    fn fail(&mut self, err: Error) {
        self.state = State::Failed;
        self.current_pairing = None;
        self.resolve_pending(Err(err));
    }

    fn unexpected_event(&mut self, event: &'static str) {
        warn!(peer = ?self.peer, state = ?self.state, event, "pairing event outside its legal state transitions");
        self.fail(Error::NotSupported);
    }

    fn resolve_pending(&mut self, result: Result<SecurityProperties>) {
        let pending = std::mem::take(&mut self.pending);
        for req in pending {
            match &result {
                Ok(props) if props.meets(req.level) => (req.cb)(Ok(*props)),
                Ok(_) => (req.cb)(Err(Error::InsufficientSecurity)),
                Err(e) => (req.cb)(Err(*e)),
            }
        }
    }
}

impl Drop for BrEdrPairingState {
    /// The link is gone: every pending pair-requester is signaled
    /// `LinkDisconnected` rather than left hanging.
    fn drop(&mut self) {
        for req in self.pending.drain(..) {
            (req.cb)(Err(Error::LinkDisconnected));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::AddressType;
    use crate::config::GapConfig;
    use crate::peer::LinkKeyType;
    use crate::security::{Irk, PrivacyResolver};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug)]
    struct NullResolver;
    impl PrivacyResolver for NullResolver {
        fn resolves(&self, _irk: &Irk, _rpa: &DeviceAddress) -> bool {
            false
        }
    }

    #[derive(Debug, Default)]
    struct FakeController {
        confirmations: StdMutex<Vec<(ConnHandle, bool)>>,
        passkeys: StdMutex<Vec<(ConnHandle, Option<u32>)>>,
        encryption_requests: StdMutex<Vec<(ConnHandle, bool)>>,
        auth_requests: StdMutex<Vec<ConnHandle>>,
    }

    impl BrEdrLinkController for FakeController {
        fn request_authentication(&self, handle: ConnHandle) {
            self.auth_requests.lock().unwrap().push(handle);
        }
        fn reply_user_confirmation(&self, handle: ConnHandle, accept: bool) {
            self.confirmations.lock().unwrap().push((handle, accept));
        }
        fn reply_user_passkey(&self, handle: ConnHandle, passkey: Option<u32>) {
            self.passkeys.lock().unwrap().push((handle, passkey));
        }
        fn request_encryption(&self, handle: ConnHandle, enable: bool) {
            self.encryption_requests.lock().unwrap().push((handle, enable));
        }
    }

    #[derive(Debug)]
    struct FakeDelegate {
        io_capability: IoCapability,
    }

    impl PairingDelegate for FakeDelegate {
        fn io_capability(&self) -> IoCapability {
            self.io_capability
        }
        fn confirm_pairing(&self, _peer: PeerId, cb: Box<dyn FnOnce(bool) + Send>) {
            cb(true);
        }
        fn display_passkey(&self, _peer: PeerId, _value: u32, _method: PairingAction, cb: Box<dyn FnOnce(bool) + Send>) {
            cb(true);
        }
        fn request_passkey(&self, _peer: PeerId, cb: Box<dyn FnOnce(Option<u32>) + Send>) {
            cb(Some(123_456));
        }
        fn complete_pairing(&self, _peer: PeerId, _result: Result<()>) {}
    }

    fn harness(iocap: IoCapability) -> (BrEdrPairingState, Arc<FakeController>, Arc<SyncMutex<PeerCache>>, PeerId) {
        let cache = Arc::new(SyncMutex::new(PeerCache::new(&GapConfig::default(), Box::new(NullResolver))));
        let addr = DeviceAddress::new(AddressType::BrEdr, [1; 6]);
        let peer = cache.lock().new_peer(addr, true).unwrap();
        let controller = Arc::new(FakeController::default());
        let delegate = Arc::new(FakeDelegate { io_capability: iocap });
        let state =
            BrEdrPairingState::new(peer, addr, ConnHandle::new(1), Arc::clone(&controller) as _, Arc::clone(&cache), Some(delegate));
        (state, controller, cache, peer)
    }

    #[test]
    fn display_yes_no_both_sides_compares_passkey_and_authenticates() {
        let (mut s, controller, _cache, _peer) = harness(IoCapability::DisplayYesNo);
        s.initiate_pairing(SecurityLevel::Authenticated, Box::new(|_| {}));
        assert_eq!(s.state(), State::InitiatorWaitLinkKeyRequest);
        assert_eq!(controller.auth_requests.lock().unwrap().len(), 1);

        assert_eq!(s.on_link_key_request(s.address), None);
        assert_eq!(s.state(), State::InitiatorWaitIoCapRequest);

        assert_eq!(s.on_io_capability_request(), Some(IoCapability::DisplayYesNo));
        assert_eq!(s.state(), State::InitiatorWaitIoCapResponse);

        s.on_io_capability_response(IoCapability::DisplayYesNo);
        assert_eq!(s.state(), State::WaitUserConfirmationRequest);
        let pairing = s.current_pairing.as_ref().unwrap();
        assert_eq!(pairing.action, Some(PairingAction::ComparePasskey));
        assert_eq!(pairing.expected_event, Some(ExpectedEvent::UserConfirmationRequest));
        assert_eq!(pairing.authenticated, Some(true));

        s.on_user_confirmation_request(123_456);
        assert_eq!(s.state(), State::WaitPairingComplete);
        assert_eq!(controller.confirmations.lock().unwrap().as_slice(), &[(ConnHandle::new(1), true)]);

        s.on_simple_pairing_complete(Status::Success);
        assert_eq!(s.state(), State::WaitLinkKey);

        let key = LinkKey { value: [0; 16], key_type: LinkKeyType::AuthenticatedCombinationKeyP256 };
        s.on_link_key_notification(key);
        assert_eq!(s.state(), State::InitiatorWaitAuthComplete);

        s.on_authentication_complete(Status::Success);
        assert_eq!(s.state(), State::WaitEncryption);
        assert_eq!(controller.encryption_requests.lock().unwrap().as_slice(), &[(ConnHandle::new(1), true)]);

        s.on_encryption_change(Status::Success, true);
        assert_eq!(s.state(), State::Idle);
    }

    #[test]
    fn debug_combination_key_is_rejected() {
        let (mut s, _controller, _cache, _peer) = harness(IoCapability::NoInputNoOutput);
        let seen = Arc::new(StdMutex::new(None));
        let seen2 = Arc::clone(&seen);
        s.initiate_pairing(SecurityLevel::Encrypted, Box::new(move |r| *seen2.lock().unwrap() = Some(r)));
        s.on_link_key_request(s.address);
        s.on_io_capability_request();
        s.on_io_capability_response(IoCapability::NoInputNoOutput);
        assert_eq!(s.state(), State::WaitUserConfirmationRequest);
        s.on_user_confirmation_request(0);
        s.on_simple_pairing_complete(Status::Success);
        let key = LinkKey { value: [0; 16], key_type: LinkKeyType::DebugCombinationKey };
        s.on_link_key_notification(key);
        assert_eq!(s.state(), State::Failed);
        assert!(matches!(seen.lock().unwrap().take(), Some(Err(Error::InsufficientSecurity))));
    }

    #[test]
    fn initiator_action_display_only_responder_row() {
        assert_eq!(initiator_action(IoCapability::DisplayYesNo, IoCapability::DisplayOnly), PairingAction::ComparePasskey);
        assert_eq!(initiator_action(IoCapability::DisplayOnly, IoCapability::DisplayOnly), PairingAction::Automatic);
        assert_eq!(initiator_action(IoCapability::DisplayOnly, IoCapability::DisplayYesNo), PairingAction::DisplayPasskey);
    }

    #[test]
    fn no_delegate_returns_to_idle_not_failed() {
        let cache = Arc::new(SyncMutex::new(PeerCache::new(&GapConfig::default(), Box::new(NullResolver))));
        let addr = DeviceAddress::new(AddressType::BrEdr, [2; 6]);
        let peer = cache.lock().new_peer(addr, true).unwrap();
        let controller = Arc::new(FakeController::default());
        let mut s = BrEdrPairingState::new(peer, addr, ConnHandle::new(2), controller, cache, None);
        let seen = Arc::new(StdMutex::new(None));
        let seen2 = Arc::clone(&seen);
        s.initiate_pairing(SecurityLevel::Encrypted, Box::new(move |r| *seen2.lock().unwrap() = Some(r)));
        s.on_link_key_request(addr);
        assert!(s.on_io_capability_request().is_none());
        assert_eq!(s.state(), State::Idle);
        assert!(matches!(seen.lock().unwrap().take(), Some(Err(Error::NotReady))));
    }

    #[test]
    fn existing_key_meeting_requirements_resolves_synchronously() {
        let (mut s, controller, cache, peer) = harness(IoCapability::DisplayYesNo);
        let key = LinkKey { value: [0; 16], key_type: LinkKeyType::AuthenticatedCombinationKeyP256 };
        cache.lock().store_bredr_bond(s.address, key);
        let seen = Arc::new(StdMutex::new(None));
        let seen2 = Arc::clone(&seen);
        s.initiate_pairing(SecurityLevel::Authenticated, Box::new(move |r| *seen2.lock().unwrap() = Some(r)));
        assert_eq!(s.state(), State::Idle);
        assert!(controller.auth_requests.lock().unwrap().is_empty());
        assert!(matches!(seen.lock().unwrap().take(), Some(Ok(_))));
        let _ = peer;
    }

    #[test]
    fn unexpected_event_fails_and_notifies_pending() {
        let (mut s, _controller, _cache, _peer) = harness(IoCapability::DisplayYesNo);
        let seen = Arc::new(StdMutex::new(None));
        let seen2 = Arc::clone(&seen);
        s.initiate_pairing(SecurityLevel::Authenticated, Box::new(move |r| *seen2.lock().unwrap() = Some(r)));
        // OnAuthenticationComplete is illegal from InitiatorWaitLinkKeyRequest.
        s.on_authentication_complete(Status::Success);
        assert_eq!(s.state(), State::Failed);
        assert!(matches!(seen.lock().unwrap().take(), Some(Err(Error::NotSupported))));
    }

    #[test]
    fn dropping_state_machine_signals_link_disconnected() {
        let (mut s, _controller, _cache, _peer) = harness(IoCapability::DisplayYesNo);
        let seen = Arc::new(StdMutex::new(None));
        let seen2 = Arc::clone(&seen);
        s.initiate_pairing(SecurityLevel::Authenticated, Box::new(move |r| *seen2.lock().unwrap() = Some(r)));
        drop(s);
        assert!(matches!(seen.lock().unwrap().take(), Some(Err(Error::LinkDisconnected))));
    }
}
