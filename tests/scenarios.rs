//! End-to-end scenarios against fake transport/GATT/security collaborators,
//! one per item in the GAP core's scenario list.

use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use btgap::addr::{AddressType, DeviceAddress};
use btgap::config::GapConfig;
use btgap::error::{Error, Result};
use btgap::hci::{ConnHandle, LeFeatures, Role, Status};
use btgap::le::{
    ConnectFailure, ConnectOptions, ConnectedLink, Discovery, GapServiceReadout, GattClient,
    HciConnector, L2capSignaling, LeConnectionManager, RemoteVersion, SecurityMode,
};
use btgap::peer::{ConnectionState, LinkKey, LinkKeyType, PairingData, PeerCache};
use btgap::security::{
    Irk, PairingAction, PairingDelegate, PrivacyResolver, SecurityLevel, SecurityManager,
    SecurityProperties,
};
use btgap::uuid::Uuid;
use btgap::bredr::{BrEdrLinkController, BrEdrPairingState, State};

#[derive(Debug)]
struct NullResolver;
impl PrivacyResolver for NullResolver {
    fn resolves(&self, _irk: &Irk, _rpa: &DeviceAddress) -> bool {
        false
    }
}

/// A connector whose per-call behavior is configured before each connect
/// attempt, and which counts every command it's issued.
#[derive(Debug, Default)]
struct FakeConnector {
    next_handle: AtomicU16,
    create_connection_calls: AtomicUsize,
    read_remote_version_calls: AtomicUsize,
    await_disconnection_calls: AtomicUsize,
    disconnected: StdMutex<Vec<ConnHandle>>,
    /// If set, every `read_remote_version` call fails with this status
    /// instead of succeeding.
    interrogation_failure: Option<Status>,
    /// If set, `read_remote_version` signals `started` and then waits on
    /// `resume` before returning, so a test can race a `disconnect()` against
    /// an in-flight interrogation.
    interrogation_gate: Option<Arc<InterrogationGate>>,
}

#[derive(Debug, Default)]
struct InterrogationGate {
    started: tokio::sync::Notify,
    resume: tokio::sync::Notify,
}

#[async_trait]
impl HciConnector for FakeConnector {
    async fn create_connection(
        &self,
        addr: DeviceAddress,
        _cancel: CancellationToken,
    ) -> std::result::Result<ConnectedLink, ConnectFailure> {
        self.create_connection_calls.fetch_add(1, Ordering::SeqCst);
        let handle = ConnHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        Ok(ConnectedLink { handle, role: Role::Central, address: addr })
    }

    async fn cancel_create_connection(&self, _addr: DeviceAddress) {}

    async fn disconnect(&self, handle: ConnHandle) -> Result<()> {
        self.disconnected.lock().unwrap().push(handle);
        Ok(())
    }

    async fn await_disconnection(&self, _handle: ConnHandle) {
        self.await_disconnection_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn read_remote_version(
        &self,
        _handle: ConnHandle,
    ) -> std::result::Result<RemoteVersion, ConnectFailure> {
        self.read_remote_version_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.interrogation_gate {
            gate.started.notify_one();
            gate.resume.notified().await;
        }
        if let Some(status) = self.interrogation_failure {
            return Err(ConnectFailure::Status(status));
        }
        Ok(RemoteVersion { hci_version: 10, manufacturer: 0x004C })
    }

    async fn read_remote_features(
        &self,
        _handle: ConnHandle,
    ) -> std::result::Result<LeFeatures, ConnectFailure> {
        Ok(LeFeatures::empty())
    }

    async fn connection_update(
        &self,
        _handle: ConnHandle,
        _params: btgap::peer::ConnectionParameters,
    ) -> std::result::Result<(), Status> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FakeDiscovery;

#[async_trait]
impl Discovery for FakeDiscovery {
    async fn find(&self, _target: DeviceAddress, _timeout: Duration, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FakeGatt;

#[async_trait]
impl GattClient for FakeGatt {
    async fn read_gap_service(&self, _handle: ConnHandle) -> GapServiceReadout {
        GapServiceReadout::default()
    }

    async fn discover_service(&self, _handle: ConnHandle, _uuid: Uuid) {}
}

#[derive(Debug, Default)]
struct FakeL2cap;

#[async_trait]
impl L2capSignaling for FakeL2cap {
    async fn connection_parameter_update_request(&self, _handle: ConnHandle, _params: btgap::peer::ConnectionParameters) {}
}

/// Reports whatever level was queued via `queue()` from the next `pair()`
/// call, for setting up links at distinct security levels per peer.
#[derive(Debug, Default)]
struct FakeSecurityManager {
    next: AsyncMutex<SecurityLevel>,
}

impl FakeSecurityManager {
    async fn queue(&self, level: SecurityLevel) {
        *self.next.lock().await = level;
    }
}

#[async_trait]
impl SecurityManager for FakeSecurityManager {
    fn current_level(&self) -> SecurityLevel {
        SecurityLevel::NoSecurity
    }

    async fn pair(&self, _level: SecurityLevel) -> Result<SecurityProperties> {
        let level = *self.next.lock().await;
        Ok(SecurityProperties::new(level))
    }
}

fn manager(
    cache: Arc<parking_lot::Mutex<PeerCache>>,
    hci: Arc<FakeConnector>,
    security: Arc<FakeSecurityManager>,
) -> LeConnectionManager {
    LeConnectionManager::new(
        cache,
        hci,
        Arc::new(FakeDiscovery),
        Arc::new(FakeGatt),
        Arc::new(FakeL2cap),
        security,
        GapConfig::default(),
    )
}

fn le_addr(last: u8) -> DeviceAddress {
    DeviceAddress::new(AddressType::LePublic, [0x01, 0x00, 0, 0, 0, last])
}

/// S1: a bonded peer with background scanning active connects via a single
/// `CreateConnection` when `Connect` is issued in auto-connect mode (standing
/// in for "a directed advertisement from that address was observed"), and
/// ends up `Connected` and no longer temporary.
#[tokio::test]
async fn s1_le_auto_connect_of_bonded_peer() {
    let cache = Arc::new(parking_lot::Mutex::new(PeerCache::new(&GapConfig::default(), Box::new(NullResolver))));
    let addr = le_addr(1);
    let id = cache.lock().new_peer(addr, true).unwrap();
    let bond = PairingData { peer_ltk: Some([1; 16]), local_ltk: Some([2; 16]), ..Default::default() };
    assert!(cache.lock().store_low_energy_bond(id, bond));

    let hci = Arc::new(FakeConnector::default());
    let mgr = manager(Arc::clone(&cache), Arc::clone(&hci), Arc::new(FakeSecurityManager::default()));

    let handle = mgr.connect(id, ConnectOptions { auto_connect: true, ..Default::default() }).await.unwrap();

    assert_eq!(hci.create_connection_calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.peer_id(), id);
    let peer = cache.lock().find_by_id(id).unwrap().clone();
    assert_eq!(peer.connection_state(), ConnectionState::Connected);
    assert!(!peer.temporary());
}

/// S2: an explicit `Disconnect` clears `should_auto_connect`; a subsequent
/// explicit `Connect` that succeeds restores it.
#[tokio::test]
async fn s2_explicit_disconnect_disables_auto_connect() {
    let cache = Arc::new(parking_lot::Mutex::new(PeerCache::new(&GapConfig::default(), Box::new(NullResolver))));
    let addr = le_addr(2);
    let id = cache.lock().new_peer(addr, true).unwrap();

    let hci = Arc::new(FakeConnector::default());
    let mgr = manager(Arc::clone(&cache), Arc::clone(&hci), Arc::new(FakeSecurityManager::default()));

    let _handle = mgr.connect(id, ConnectOptions { auto_connect: true, ..Default::default() }).await.unwrap();
    assert!(cache.lock().find_by_id(id).unwrap().le.as_ref().unwrap().should_auto_connect);

    assert!(mgr.disconnect(id).await);
    assert!(!cache.lock().find_by_id(id).unwrap().le.as_ref().unwrap().should_auto_connect);

    let _handle = mgr.connect(id, ConnectOptions::default()).await.unwrap();
    assert!(cache.lock().find_by_id(id).unwrap().le.as_ref().unwrap().should_auto_connect);
}

/// S3: interrogation repeatedly fails with `0x3E Connection Failed to be
/// Established`; the manager retries with the configured backoff and gives
/// up with `Failed` after the maximum attempt count.
#[tokio::test(start_paused = true)]
async fn s3_retry_on_connection_failed_to_be_established() {
    let cache = Arc::new(parking_lot::Mutex::new(PeerCache::new(&GapConfig::default(), Box::new(NullResolver))));
    let addr = le_addr(3);
    let id = cache.lock().new_peer(addr, true).unwrap();

    let hci = Arc::new(FakeConnector {
        interrogation_failure: Some(Status::ConnectionFailedToBeEstablished),
        ..Default::default()
    });
    let mgr = manager(Arc::clone(&cache), Arc::clone(&hci), Arc::new(FakeSecurityManager::default()));

    let result = mgr.connect(id, ConnectOptions { auto_connect: true, ..Default::default() }).await;

    assert!(matches!(result, Err(Error::Failed)));
    assert_eq!(hci.create_connection_calls.load(Ordering::SeqCst), 3);
    assert_eq!(hci.read_remote_version_calls.load(Ordering::SeqCst), 3);
    assert_eq!(hci.await_disconnection_calls.load(Ordering::SeqCst), 3);
}

/// A `Disconnect` landing while interrogation is in flight must not leave an
/// orphaned `LeConnection` behind once interrogation completes: the pipeline
/// has to notice the request is gone and tear the link down instead of
/// finalizing it.
#[tokio::test]
async fn disconnect_mid_interrogation_tears_down_orphaned_link() {
    let cache = Arc::new(parking_lot::Mutex::new(PeerCache::new(&GapConfig::default(), Box::new(NullResolver))));
    let addr = le_addr(4);
    let id = cache.lock().new_peer(addr, true).unwrap();

    let gate = Arc::new(InterrogationGate::default());
    let hci = Arc::new(FakeConnector { interrogation_gate: Some(Arc::clone(&gate)), ..Default::default() });
    let mgr = Arc::new(manager(Arc::clone(&cache), Arc::clone(&hci), Arc::new(FakeSecurityManager::default())));

    let connect_mgr = Arc::clone(&mgr);
    let connect = tokio::spawn(async move {
        connect_mgr.connect(id, ConnectOptions { auto_connect: true, ..Default::default() }).await
    });

    gate.started.notified().await;
    assert!(mgr.disconnect(id).await);
    gate.resume.notify_one();

    let result = connect.await.unwrap();
    assert!(matches!(result, Err(Error::Canceled)));

    // The link that was being interrogated gets torn down rather than kept.
    assert_eq!(hci.disconnected.lock().unwrap().as_slice(), &[ConnHandle::new(0)]);
    // No `LeConnection` was ever inserted for it.
    assert!(matches!(mgr.pair(id, SecurityLevel::NoSecurity).await, Err(Error::NotFound)));
}

/// S4: a peer created under its BR/EDR address, then observed advertising
/// under the aliasing LE public address, reconciles to a single dual-mode
/// peer addressable either way.
#[test]
fn s4_dual_mode_upgrade() {
    let mut cache = PeerCache::new(&GapConfig::default(), Box::new(NullResolver));
    let bredr = DeviceAddress::new(AddressType::BrEdr, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    let id = cache.new_peer(bredr, true).unwrap();

    let le = DeviceAddress::new(AddressType::LePublic, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    let observed = cache.ingest_advertising_data(le, vec![], Some(-40));

    assert_eq!(observed, id);
    assert_eq!(cache.find_by_address(bredr).unwrap().id(), id);
    assert_eq!(cache.find_by_address(le).unwrap().id(), id);
    assert_eq!(cache.find_by_address(bredr).unwrap().address(), bredr);
    assert_eq!(cache.peer_count(), 1);
}

#[derive(Debug, Default)]
struct FakeLinkController {
    confirmations: StdMutex<Vec<(ConnHandle, bool)>>,
    encryption_requests: StdMutex<Vec<(ConnHandle, bool)>>,
    auth_requests: StdMutex<Vec<ConnHandle>>,
}

impl BrEdrLinkController for FakeLinkController {
    fn request_authentication(&self, handle: ConnHandle) {
        self.auth_requests.lock().unwrap().push(handle);
    }
    fn reply_user_confirmation(&self, handle: ConnHandle, accept: bool) {
        self.confirmations.lock().unwrap().push((handle, accept));
    }
    fn reply_user_passkey(&self, _handle: ConnHandle, _passkey: Option<u32>) {}
    fn request_encryption(&self, handle: ConnHandle, enable: bool) {
        self.encryption_requests.lock().unwrap().push((handle, enable));
    }
}

#[derive(Debug)]
struct DisplayYesNoDelegate;

impl PairingDelegate for DisplayYesNoDelegate {
    fn io_capability(&self) -> btgap::security::IoCapability {
        btgap::security::IoCapability::DisplayYesNo
    }
    fn confirm_pairing(&self, _peer: btgap::peer::PeerId, cb: Box<dyn FnOnce(bool) + Send>) {
        cb(true);
    }
    fn display_passkey(
        &self,
        _peer: btgap::peer::PeerId,
        _value: u32,
        _method: PairingAction,
        cb: Box<dyn FnOnce(bool) + Send>,
    ) {
        cb(true);
    }
    fn request_passkey(&self, _peer: btgap::peer::PeerId, cb: Box<dyn FnOnce(Option<u32>) + Send>) {
        cb(None);
    }
    fn complete_pairing(&self, _peer: btgap::peer::PeerId, _result: Result<()>) {}
}

/// S5: `DisplayYesNo` on both sides negotiates `ComparePasskey` over a
/// `UserConfirmationRequest`, ends up authenticated, and accepts the
/// resulting link key, bringing the link to `SecureAuthenticated`.
#[test]
fn s5_bredr_pairing_success_display_yes_no_both_sides() {
    let cache = Arc::new(parking_lot::Mutex::new(PeerCache::new(&GapConfig::default(), Box::new(NullResolver))));
    let addr = DeviceAddress::new(AddressType::BrEdr, [9; 6]);
    let peer = cache.lock().new_peer(addr, true).unwrap();
    let controller = Arc::new(FakeLinkController::default());
    let handle = ConnHandle::new(7);

    let mut state = BrEdrPairingState::new(
        peer,
        addr,
        handle,
        Arc::clone(&controller) as Arc<dyn BrEdrLinkController>,
        Arc::clone(&cache),
        Some(Arc::new(DisplayYesNoDelegate)),
    );

    let result = Arc::new(StdMutex::new(None));
    let result2 = Arc::clone(&result);
    state.initiate_pairing(SecurityLevel::Authenticated, Box::new(move |r| *result2.lock().unwrap() = Some(r)));

    assert_eq!(state.on_link_key_request(addr), None);
    assert_eq!(state.on_io_capability_request(), Some(btgap::security::IoCapability::DisplayYesNo));
    state.on_io_capability_response(btgap::security::IoCapability::DisplayYesNo);
    assert_eq!(state.state(), State::WaitUserConfirmationRequest);

    state.on_user_confirmation_request(554_321);
    assert_eq!(controller.confirmations.lock().unwrap().as_slice(), &[(handle, true)]);

    state.on_simple_pairing_complete(Status::Success);
    let key = LinkKey { value: [0; 16], key_type: LinkKeyType::AuthenticatedCombinationKeyP256 };
    state.on_link_key_notification(key);
    assert_eq!(controller.auth_requests.lock().unwrap().len(), 1);

    state.on_authentication_complete(Status::Success);
    assert_eq!(controller.encryption_requests.lock().unwrap().as_slice(), &[(handle, true)]);

    state.on_encryption_change(Status::Success, true);
    assert_eq!(state.state(), State::Idle);

    let props = result.lock().unwrap().take().unwrap().unwrap();
    assert_eq!(props.level, SecurityLevel::SecureAuthenticated);
    assert!(props.authenticated);
    assert!(cache.lock().find_by_id(peer).unwrap().bredr.as_ref().unwrap().link_key.is_some());
}

/// S6: applying `SecureConnectionsOnly` disconnects every active link whose
/// security level is neither `NoSecurity` nor `SecureAuthenticated`, leaving
/// the others untouched.
#[tokio::test]
async fn s6_secure_connections_only_culls_insufficient_links() {
    let cache = Arc::new(parking_lot::Mutex::new(PeerCache::new(&GapConfig::default(), Box::new(NullResolver))));
    let hci = Arc::new(FakeConnector::default());
    let security = Arc::new(FakeSecurityManager::default());
    let mgr = manager(Arc::clone(&cache), Arc::clone(&hci), Arc::clone(&security));

    let no_security = cache.lock().new_peer(le_addr(10), true).unwrap();
    let encrypted = cache.lock().new_peer(le_addr(11), true).unwrap();
    let secure = cache.lock().new_peer(le_addr(12), true).unwrap();

    let _h1 = mgr.connect(no_security, ConnectOptions { auto_connect: true, ..Default::default() }).await.unwrap();
    let _h2 = mgr.connect(encrypted, ConnectOptions { auto_connect: true, ..Default::default() }).await.unwrap();
    let _h3 = mgr.connect(secure, ConnectOptions { auto_connect: true, ..Default::default() }).await.unwrap();

    security.queue(SecurityLevel::Encrypted).await;
    mgr.pair(encrypted, SecurityLevel::Encrypted).await.unwrap();
    security.queue(SecurityLevel::SecureAuthenticated).await;
    mgr.pair(secure, SecurityLevel::SecureAuthenticated).await.unwrap();

    mgr.set_security_mode(SecurityMode::SecureConnectionsOnly).await;

    assert_eq!(hci.disconnected.lock().unwrap().len(), 1);
    assert_eq!(cache.lock().find_by_id(no_security).unwrap().connection_state(), ConnectionState::Connected);
    assert_eq!(cache.lock().find_by_id(encrypted).unwrap().connection_state(), ConnectionState::NotConnected);
    assert_eq!(cache.lock().find_by_id(secure).unwrap().connection_state(), ConnectionState::Connected);
}
