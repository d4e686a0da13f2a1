//! Serializes `Connect`/`Disconnect` and drives the
//! scan -> connect -> interrogate -> notify pipeline for LE peers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::addr::DeviceAddress;
use crate::config::{GapConfig, RETRY_BACKOFF};
use crate::error::{Error, Result};
use crate::hci::{ConnHandle, LeFeatures, Role, Status};
use crate::peer::{ConnectionParameters, ConnectionState, PeerId};
use crate::security::{SecurityLevel, SecurityManager};
use crate::uuid::Uuid;
use crate::SyncMutex;

use super::connection::{LeConnection, LeConnectionHandle};
use super::request::{BondableMode, ConnectOptions, LeConnectionRequest};

/// Security policy applied to all links.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SecurityMode {
    /// Individual links may be at any security level.
    Mode1,
    /// Every active link must be either unencrypted or fully secure; links
    /// that are merely `Encrypted` or `Authenticated` are disconnected.
    SecureConnectionsOnly,
}

/// Remote version information read during interrogation
/// ([Vol 4] Part E, Section 7.1.23).
#[derive(Clone, Copy, Debug)]
pub struct RemoteVersion {
    pub hci_version: u8,
    pub manufacturer: u16,
}

/// A link accepted or established by the HCI transport, ready for
/// interrogation.
#[derive(Clone, Copy, Debug)]
pub struct ConnectedLink {
    pub handle: ConnHandle,
    pub role: Role,
    pub address: DeviceAddress,
}

/// Failure from an HCI command issued during the connect/interrogate
/// pipeline, distinguishing the retry-triggering status from everything
/// else.
#[derive(Clone, Copy, Debug)]
pub enum ConnectFailure {
    /// The command completed with this non-success status.
    Status(Status),
    /// The request was canceled via its [`CancellationToken`].
    Canceled,
    /// Any other transport failure.
    Other,
}

impl From<ConnectFailure> for Error {
    fn from(f: ConnectFailure) -> Self {
        match f {
            ConnectFailure::Canceled => Self::Canceled,
            ConnectFailure::Status(_) | ConnectFailure::Other => Self::Failed,
        }
    }
}

/// GAP service values read over GATT once a central-role link is up. Missing
/// characteristics are non-fatal and simply leave a field `None`.
#[derive(Clone, Debug, Default)]
pub struct GapServiceReadout {
    pub name: Option<String>,
    pub appearance: Option<u16>,
    pub preferred_connection_parameters: Option<ConnectionParameters>,
}

/// Capability for issuing connection-lifecycle HCI commands and reading
/// interrogation replies. Stands in for the HCI transport and `Adapter`'s
/// connector state machine.
#[async_trait]
pub trait HciConnector: std::fmt::Debug + Send + Sync {
    /// Issues `LE Create Connection` and resolves once the corresponding
    /// `LE Connection Complete` event arrives, or the token is canceled.
    async fn create_connection(
        &self,
        addr: DeviceAddress,
        cancel: CancellationToken,
    ) -> std::result::Result<ConnectedLink, ConnectFailure>;

    /// Cancels an in-flight `CreateConnection` for `addr` only.
    async fn cancel_create_connection(&self, addr: DeviceAddress);

    /// Issues `Disconnect` and waits for `Disconnection Complete`.
    async fn disconnect(&self, handle: ConnHandle) -> Result<()>;

    /// Waits for `Disconnection Complete` without issuing `Disconnect`,
    /// used when a handle must be torn down before a 0x3E retry.
    async fn await_disconnection(&self, handle: ConnHandle);

    /// `Read Remote Version Information`.
    async fn read_remote_version(&self, handle: ConnHandle) -> std::result::Result<RemoteVersion, ConnectFailure>;

    /// `LE Read Remote Features`.
    async fn read_remote_features(&self, handle: ConnHandle) -> std::result::Result<LeFeatures, ConnectFailure>;

    /// `LE Connection Update`. `Err` distinguishes `UnsupportedRemoteFeature`
    /// (triggers the L2CAP fallback) from any other status (logged, ignored).
    async fn connection_update(&self, handle: ConnHandle, params: ConnectionParameters) -> std::result::Result<(), Status>;
}

/// Capability for passive discovery, used to find a peer's address before
/// issuing `CreateConnection` (skipped for `auto_connect` requests).
#[async_trait]
pub trait Discovery: std::fmt::Debug + Send + Sync {
    /// Resolves once a connectable advertisement from `target` is observed,
    /// or fails with `TimedOut`/`Canceled`.
    async fn find(&self, target: DeviceAddress, timeout: Duration, cancel: CancellationToken) -> Result<()>;
}

/// Capability for reading the GAP service and discovering additional
/// services over GATT.
#[async_trait]
pub trait GattClient: std::fmt::Debug + Send + Sync {
    /// Reads Device Name, Appearance, and Peripheral Preferred Connection
    /// Parameters. Best-effort: absent fields mean the characteristic was
    /// missing or unreadable, not a pipeline failure.
    async fn read_gap_service(&self, handle: ConnHandle) -> GapServiceReadout;

    /// Triggers discovery of an additional service, fire-and-forget.
    async fn discover_service(&self, handle: ConnHandle, uuid: Uuid);
}

/// Capability for the L2CAP signaling fallback to the `LE Connection Update`
/// command.
#[async_trait]
pub trait L2capSignaling: std::fmt::Debug + Send + Sync {
    /// Sends a Connection Parameter Update Request over the signaling
    /// channel.
    async fn connection_parameter_update_request(&self, handle: ConnHandle, params: ConnectionParameters);
}

struct Inner {
    connections: HashMap<PeerId, LeConnection>,
    requests: HashMap<PeerId, LeConnectionRequest>,
    security_mode: SecurityMode,
}

/// The concurrent state machine serializing LE `Connect`/`Disconnect`,
/// owning every active [`LeConnection`], and driving the
/// scan -> connect -> interrogate -> notify pipeline.
pub struct LeConnectionManager {
    inner: Arc<SyncMutex<Inner>>,
    cache: Arc<SyncMutex<crate::peer::PeerCache>>,
    hci: Arc<dyn HciConnector>,
    discovery: Arc<dyn Discovery>,
    gatt: Arc<dyn GattClient>,
    l2cap: Arc<dyn L2capSignaling>,
    security: Arc<dyn SecurityManager>,
    config: GapConfig,
    connect_slot: Arc<Semaphore>,
    scan_slot: Arc<Semaphore>,
    release_tx: mpsc::UnboundedSender<PeerId>,
}

impl std::fmt::Debug for LeConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LeConnectionManager")
            .field("connections", &inner.connections.len())
            .field("requests", &inner.requests.len())
            .field("security_mode", &inner.security_mode)
            .finish_non_exhaustive()
    }
}

impl LeConnectionManager {
    /// Constructs a manager over the given peer cache and transport
    /// collaborators, and spawns the background task that tears down links
    /// whose last reference handle was dropped.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<SyncMutex<crate::peer::PeerCache>>,
        hci: Arc<dyn HciConnector>,
        discovery: Arc<dyn Discovery>,
        gatt: Arc<dyn GattClient>,
        l2cap: Arc<dyn L2capSignaling>,
        security: Arc<dyn SecurityManager>,
        config: GapConfig,
    ) -> Self {
        let (release_tx, mut release_rx) = mpsc::unbounded_channel::<PeerId>();
        let inner = Arc::new(SyncMutex::new(Inner {
            connections: HashMap::new(),
            requests: HashMap::new(),
            security_mode: SecurityMode::Mode1,
        }));
        let this = Self {
            inner: Arc::clone(&inner),
            cache,
            hci,
            discovery,
            gatt,
            l2cap,
            security,
            config,
            connect_slot: Arc::new(Semaphore::new(1)),
            scan_slot: Arc::new(Semaphore::new(1)),
            release_tx,
        };
        let reaper_hci = Arc::clone(&this.hci);
        let reaper_cache = Arc::clone(&this.cache);
        tokio::spawn(async move {
            debug!("LE link reaper task started");
            while let Some(peer) = release_rx.recv().await {
                let handle = {
                    let mut i = inner.lock();
                    let Some(conn) = i.connections.get(&peer) else { continue };
                    if conn.refcount.load(std::sync::atomic::Ordering::Acquire) != 0 {
                        continue;
                    }
                    let conn = i.connections.remove(&peer).expect("checked above");
                    conn.handle
                };
                debug!(?peer, "last reference dropped, disconnecting");
                if let Err(e) = reaper_hci.disconnect(handle).await {
                    warn!(?peer, %e, "disconnect after last reference failed");
                }
                let address = reaper_cache.lock().find_by_id(peer).map(crate::peer::Peer::address);
                if let Some(address) = address {
                    reaper_cache.lock().set_connection_state(address, ConnectionState::NotConnected);
                }
            }
            debug!("LE link reaper task terminating");
        });
        this
    }

    fn make_handle(&self, peer: PeerId, refcount: &Arc<std::sync::atomic::AtomicUsize>) -> LeConnectionHandle {
        LeConnectionHandle::new(peer, Arc::clone(refcount), self.release_tx.clone())
    }

    /// Resolves a peer to a connectable LE address, or `NotFound`.
    fn le_address(&self, peer: PeerId) -> Result<DeviceAddress> {
        let cache = self.cache.lock();
        let p = cache.find_by_id(peer).ok_or(Error::NotFound)?;
        if p.le.is_none() {
            return Err(Error::NotFound);
        }
        Ok(p.address())
    }

    /// Connects to `peer`, or joins an already-pending or already-connected
    /// attempt for it.
    pub async fn connect(&self, peer: PeerId, options: ConnectOptions) -> Result<LeConnectionHandle> {
        let address = self.le_address(peer)?;
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock();
            if let Some(conn) = inner.connections.get(&peer) {
                let handle = self.make_handle(peer, &conn.refcount);
                let _ = tx.send(Ok(handle));
            } else if let Some(req) = inner.requests.get_mut(&peer) {
                req.replies.push(tx);
            } else {
                inner.requests.insert(peer, LeConnectionRequest::new(address, options.clone(), tx));
                drop(inner);
                self.spawn_pipeline(peer, address, options);
            }
        }
        rx.await.map_err(|_| Error::Canceled)?
    }

    /// Cancels a pending request, tears down an active connection, or
    /// no-ops on an unknown peer (returning `true`).
    pub async fn disconnect(&self, peer: PeerId) -> bool {
        let handle = {
            let mut inner = self.inner.lock();
            if let Some(req) = inner.requests.remove(&peer) {
                req.cancel.cancel();
                drop(inner);
                req.resolve_all(|| Err(Error::Canceled));
                return true;
            }
            match inner.connections.remove(&peer) {
                Some(conn) => conn.handle,
                None => return true,
            }
        };
        self.cache.lock().set_auto_connect_for_intentional_disconnect(peer);
        if let Err(e) = self.hci.disconnect(handle).await {
            warn!(?peer, %e, "explicit disconnect failed");
        }
        let address = self.cache.lock().find_by_id(peer).map(crate::peer::Peer::address);
        if let Some(address) = address {
            self.cache.lock().set_connection_state(address, ConnectionState::NotConnected);
        }
        true
    }

    /// Accepts a link already established by the controller (peripheral
    /// role), running the same interrogation pipeline as an outbound
    /// connect.
    pub async fn register_remote_initiated_link(
        &self,
        link: ConnectedLink,
        bondable_mode: BondableMode,
    ) -> Result<LeConnectionHandle> {
        self.cache.lock().set_connection_state(link.address, ConnectionState::Initializing);
        self.finalize(link, bondable_mode).await
    }

    /// Upgrades the security of an existing connection.
    pub async fn pair(&self, peer: PeerId, level: SecurityLevel) -> Result<crate::security::SecurityProperties> {
        if !self.inner.lock().connections.contains_key(&peer) {
            return Err(Error::NotFound);
        }
        let props = self.security.pair(level).await?;
        if let Some(conn) = self.inner.lock().connections.get_mut(&peer) {
            conn.security_level = props.level;
        }
        Ok(props)
    }

    /// Applies a security policy, disconnecting any active link that no
    /// longer satisfies it.
    pub async fn set_security_mode(&self, mode: SecurityMode) {
        let culled: Vec<(PeerId, ConnHandle)> = {
            let mut inner = self.inner.lock();
            inner.security_mode = mode;
            if mode != SecurityMode::SecureConnectionsOnly {
                return;
            }
            inner
                .connections
                .iter()
                .filter(|(_, c)| {
                    !matches!(c.security_level, SecurityLevel::NoSecurity | SecurityLevel::SecureAuthenticated)
                })
                .map(|(&peer, c)| (peer, c.handle))
                .collect()
        };
        for (peer, handle) in culled {
            debug!(?peer, "disconnecting link insufficient for SecureConnectionsOnly");
            self.inner.lock().connections.remove(&peer);
            if let Err(e) = self.hci.disconnect(handle).await {
                warn!(?peer, %e, "security-mode disconnect failed");
            }
            if let Some(address) = self.cache.lock().find_by_id(peer).map(crate::peer::Peer::address) {
                self.cache.lock().set_connection_state(address, ConnectionState::NotConnected);
            }
        }
    }

    fn spawn_pipeline(&self, peer: PeerId, address: DeviceAddress, options: ConnectOptions) {
        let inner = Arc::clone(&self.inner);
        let cache = Arc::clone(&self.cache);
        let hci = Arc::clone(&self.hci);
        let discovery = Arc::clone(&self.discovery);
        let gatt = Arc::clone(&self.gatt);
        let l2cap = Arc::clone(&self.l2cap);
        let config = self.config;
        let connect_slot = Arc::clone(&self.connect_slot);
        let scan_slot = Arc::clone(&self.scan_slot);
        let release_tx = self.release_tx.clone();
        tokio::spawn(async move {
            run_pipeline(PipelineCtx {
                peer,
                address,
                options,
                inner,
                cache,
                hci,
                discovery,
                gatt,
                l2cap,
                config,
                connect_slot,
                scan_slot,
                release_tx,
            })
            .await;
        });
    }

    async fn finalize(&self, link: ConnectedLink, bondable_mode: BondableMode) -> Result<LeConnectionHandle> {
        let _version = self.hci.read_remote_version(link.handle).await.map_err(Error::from)?;
        let remote_features = self.hci.read_remote_features(link.handle).await.map_err(Error::from)?;
        if link.role == Role::Central {
            let readout = self.gatt.read_gap_service(link.handle).await;
            trace!(?readout, "read GAP service");
        }
        let ctx = FinalizeCtx { inner: Arc::clone(&self.inner), cache: Arc::clone(&self.cache) };
        let (peer, refcount) = finalize_connection(ctx, link, bondable_mode).await?;
        schedule_parameter_update(
            Arc::clone(&self.hci),
            Arc::clone(&self.l2cap),
            Arc::clone(&self.cache),
            peer,
            link,
            remote_features,
            self.config,
        );
        Ok(LeConnectionHandle::new(peer, refcount, self.release_tx.clone()))
    }
}

struct PipelineCtx {
    peer: PeerId,
    address: DeviceAddress,
    options: ConnectOptions,
    inner: Arc<SyncMutex<Inner>>,
    cache: Arc<SyncMutex<crate::peer::PeerCache>>,
    hci: Arc<dyn HciConnector>,
    discovery: Arc<dyn Discovery>,
    gatt: Arc<dyn GattClient>,
    l2cap: Arc<dyn L2capSignaling>,
    config: GapConfig,
    connect_slot: Arc<Semaphore>,
    scan_slot: Arc<Semaphore>,
    release_tx: mpsc::UnboundedSender<PeerId>,
}

/// Drives one `LeConnectionRequest` from creation through to fan-out,
/// including scan, retry, and interrogation.
async fn run_pipeline(ctx: PipelineCtx) {
    let PipelineCtx { peer, address, options, inner, cache, hci, discovery, gatt, l2cap, config, connect_slot, scan_slot, release_tx } = ctx;
    cache.lock().set_connection_state(address, ConnectionState::Initializing);
    let cancel = inner.lock().requests.get(&peer).map(|r| r.cancel.clone());
    let Some(cancel) = cancel else { return };

    'attempts: loop {
        let attempt = inner.lock().requests.get(&peer).map_or(0, |r| r.attempt);
        if attempt == 0 {
            return; // request was canceled/removed concurrently
        }
        if !options.auto_connect && attempt == 1 {
            let Ok(_permit) = scan_slot.acquire().await else { return };
            trace!(?peer, "starting discovery");
            match discovery.find(address, config.le_general_cep_scan_timeout, cancel.clone()).await {
                Ok(()) => {}
                Err(e) => return finish_request(&inner, &cache, peer, Err(e), None).await,
            }
        }

        let link = {
            let Ok(_permit) = connect_slot.acquire().await else { return };
            hci.create_connection(address, cancel.clone()).await
        };
        let link = match link {
            Ok(link) => link,
            Err(ConnectFailure::Status(Status::ConnectionFailedToBeEstablished)) => {
                if retry(&inner, peer, attempt).await {
                    continue 'attempts;
                }
                return finish_request(&inner, &cache, peer, Err(Error::Failed), Some(Status::ConnectionFailedToBeEstablished)).await;
            }
            Err(e) => {
                let status = connect_failure_status(&e);
                return finish_request(&inner, &cache, peer, Err(e.into()), status).await;
            }
        };

        match interrogate(&hci, &gatt, link, options.service_uuid).await {
            Ok(features) => {
                if !inner.lock().requests.contains_key(&peer) {
                    debug!(?peer, "connect request canceled mid-interrogation, tearing down link");
                    if let Err(e) = hci.disconnect(link.handle).await {
                        warn!(?peer, %e, "teardown after mid-interrogation cancel failed");
                    }
                    return;
                }
                let result = finalize_connection(
                    FinalizeCtx { inner: Arc::clone(&inner), cache: Arc::clone(&cache) },
                    link,
                    options.bondable_mode,
                )
                .await;
                if let Ok((peer, _)) = result {
                    schedule_parameter_update(Arc::clone(&hci), Arc::clone(&l2cap), Arc::clone(&cache), peer, link, features, config);
                }
                return finish_request_with_handles(&inner, &cache, peer, result, &release_tx).await;
            }
            Err(ConnectFailure::Status(Status::ConnectionFailedToBeEstablished)) => {
                hci.await_disconnection(link.handle).await;
                if retry(&inner, peer, attempt).await {
                    continue 'attempts;
                }
                return finish_request(&inner, &cache, peer, Err(Error::Failed), Some(Status::ConnectionFailedToBeEstablished)).await;
            }
            Err(e) => {
                let status = connect_failure_status(&e);
                return finish_request(&inner, &cache, peer, Err(e.into()), status).await;
            }
        }
    }
}

async fn retry(inner: &SyncMutex<Inner>, peer: PeerId, attempt: u8) -> bool {
    let can_retry = {
        let mut i = inner.lock();
        let Some(req) = i.requests.get_mut(&peer) else { return false };
        if !req.may_retry() {
            return false;
        }
        req.attempt += 1;
        true
    };
    if can_retry {
        let delay = RETRY_BACKOFF[usize::from(attempt).min(RETRY_BACKOFF.len() - 1)];
        tokio::time::sleep(delay).await;
    }
    can_retry
}

async fn interrogate(
    hci: &Arc<dyn HciConnector>,
    gatt: &Arc<dyn GattClient>,
    link: ConnectedLink,
    service_uuid: Option<Uuid>,
) -> std::result::Result<LeFeatures, ConnectFailure> {
    let _version = hci.read_remote_version(link.handle).await?;
    let features = hci.read_remote_features(link.handle).await?;
    if link.role == Role::Central {
        let readout = gatt.read_gap_service(link.handle).await;
        trace!(?readout, "read GAP service");
    }
    if let Some(uuid) = service_uuid {
        gatt.discover_service(link.handle, uuid).await;
    }
    Ok(features)
}

/// Schedules the central/peripheral pause timer; on expiry, prefers `LE
/// Connection Update` and falls back to L2CAP signaling only when the
/// controller reports `UnsupportedRemoteFeature`.
fn schedule_parameter_update(
    hci: Arc<dyn HciConnector>,
    l2cap: Arc<dyn L2capSignaling>,
    cache: Arc<SyncMutex<crate::peer::PeerCache>>,
    peer: PeerId,
    link: ConnectedLink,
    features: LeFeatures,
    config: GapConfig,
) {
    let pause = if link.role == Role::Central { config.le_connection_pause_central } else { config.le_connection_pause_peripheral };
    tokio::spawn(async move {
        tokio::time::sleep(pause).await;
        let params = cache
            .lock()
            .find_by_id(peer)
            .and_then(|p| p.le.as_ref())
            .and_then(|le| le.preferred_connection_parameters)
            .unwrap_or_default();
        if features.contains(LeFeatures::CONNECTION_PARAMETERS_REQUEST_PROCEDURE) {
            match hci.connection_update(link.handle, params).await {
                Ok(()) => return,
                Err(Status::UnsupportedRemoteFeature) => {}
                Err(status) => {
                    debug!(?status, "LE Connection Update Complete: logging and continuing");
                    return;
                }
            }
        }
        l2cap.connection_parameter_update_request(link.handle, params).await;
    });
}

struct FinalizeCtx {
    inner: Arc<SyncMutex<Inner>>,
    cache: Arc<SyncMutex<crate::peer::PeerCache>>,
}

/// Reconciles the cache, records the [`LeConnection`], and returns its
/// `PeerId` and shared refcount so the caller can mint handles.
async fn finalize_connection(
    ctx: FinalizeCtx,
    link: ConnectedLink,
    bondable_mode: BondableMode,
) -> Result<(PeerId, Arc<std::sync::atomic::AtomicUsize>)> {
    let peer = ctx.cache.lock().set_connection_state(link.address, ConnectionState::Connected);
    ctx.cache.lock().set_auto_connect_for_successful_connection(peer);
    let conn = LeConnection::new(link.handle, link.role, bondable_mode);
    let refcount = Arc::clone(&conn.refcount);
    ctx.inner.lock().connections.insert(peer, conn);
    Ok((peer, refcount))
}

/// Statuses that, following a *successful auto-connect attempt*, clear the
/// peer's `should_auto_connect` flag. User-initiated and remote-initiated
/// failures outside this set leave the flag untouched.
fn clears_auto_connect(status: Option<Status>) -> bool {
    matches!(
        status,
        Some(
            Status::ConnectionTimeout
                | Status::ConnectionRejectedDueToSecurityReasons
                | Status::ConnectionAcceptTimeoutExceeded
                | Status::ConnectionTerminatedByLocalHost
                | Status::ConnectionFailedToBeEstablished
        )
    )
}

/// Extracts the raw HCI status from a [`ConnectFailure`], if any, for
/// [`clears_auto_connect`].
const fn connect_failure_status(f: &ConnectFailure) -> Option<Status> {
    match f {
        ConnectFailure::Status(s) => Some(*s),
        ConnectFailure::Canceled | ConnectFailure::Other => None,
    }
}

async fn finish_request(
    inner: &SyncMutex<Inner>,
    cache: &SyncMutex<crate::peer::PeerCache>,
    peer: PeerId,
    result: Result<()>,
    status: Option<Status>,
) {
    debug_assert!(result.is_err());
    let req = inner.lock().requests.remove(&peer);
    if let Some(req) = req {
        on_connect_attempt_failed(cache, peer, req.options.auto_connect, status);
        let err = result.unwrap_err();
        req.resolve_all(|| Err(err));
    }
}

async fn finish_request_with_handles(
    inner: &SyncMutex<Inner>,
    cache: &SyncMutex<crate::peer::PeerCache>,
    peer: PeerId,
    result: Result<(PeerId, Arc<std::sync::atomic::AtomicUsize>)>,
    release_tx: &mpsc::UnboundedSender<PeerId>,
) {
    let req = inner.lock().requests.remove(&peer);
    let Some(req) = req else { return };
    match result {
        Ok((peer, refcount)) => {
            req.resolve_all(|| Ok(LeConnectionHandle::new(peer, Arc::clone(&refcount), release_tx.clone())));
        }
        Err(e) => {
            on_connect_attempt_failed(cache, peer, req.options.auto_connect, None);
            req.resolve_all(|| Err(e));
        }
    }
}

/// Clears `should_auto_connect` after a failed attempt, if it was an
/// auto-connect attempt that failed with one of the statuses
/// [`clears_auto_connect`] names, and the cache still has the peer.
fn on_connect_attempt_failed(cache: &SyncMutex<crate::peer::PeerCache>, peer: PeerId, was_auto_connect: bool, status: Option<Status>) {
    let mut cache = cache.lock();
    if let Some(address) = cache.find_by_id(peer).map(crate::peer::Peer::address) {
        cache.set_connection_state(address, ConnectionState::NotConnected);
    }
    let was_auto_connect = was_auto_connect && clears_auto_connect(status);
    if was_auto_connect {
        cache.set_auto_connect_for_intentional_disconnect(peer);
    }
}
