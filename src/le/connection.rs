//! The active LE link object and its reference-counted external handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::hci::{ConnHandle, Role};
use crate::peer::PeerId;
use crate::security::SecurityLevel;

use super::request::BondableMode;

/// A reference to an active LE connection. Cloning increments the link's
/// reference count; dropping the last clone notifies the owning
/// [`super::manager::LeConnectionManager`], which disconnects the link after
/// a grace period if no new reference arrives.
pub struct LeConnectionHandle {
    peer: PeerId,
    refcount: Arc<AtomicUsize>,
    release_tx: mpsc::UnboundedSender<PeerId>,
}

impl LeConnectionHandle {
    /// Mints a new handle against a connection's shared reference count.
    pub(crate) fn new(peer: PeerId, refcount: Arc<AtomicUsize>, release_tx: mpsc::UnboundedSender<PeerId>) -> Self {
        refcount.fetch_add(1, Ordering::AcqRel);
        Self { peer, refcount, release_tx }
    }

    /// The peer this handle refers to.
    #[inline]
    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.peer
    }
}

impl Clone for LeConnectionHandle {
    fn clone(&self) -> Self {
        self.refcount.fetch_add(1, Ordering::AcqRel);
        Self { peer: self.peer, refcount: Arc::clone(&self.refcount), release_tx: self.release_tx.clone() }
    }
}

impl std::fmt::Debug for LeConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeConnectionHandle").field("peer", &self.peer).finish_non_exhaustive()
    }
}

impl Drop for LeConnectionHandle {
    fn drop(&mut self) {
        if self.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _ = self.release_tx.send(self.peer);
        }
    }
}

/// One established LE link, owned exclusively by the connection manager.
pub(crate) struct LeConnection {
    pub handle: ConnHandle,
    pub role: Role,
    pub bondable_mode: BondableMode,
    pub security_level: SecurityLevel,
    pub refcount: Arc<AtomicUsize>,
    /// Cancels the pending parameter-update pause timer, if one is running.
    pub pause_timer: Option<CancellationToken>,
}

impl LeConnection {
    pub fn new(handle: ConnHandle, role: Role, bondable_mode: BondableMode) -> Self {
        Self {
            handle,
            role,
            bondable_mode,
            security_level: SecurityLevel::NoSecurity,
            refcount: Arc::new(AtomicUsize::new(0)),
            pause_timer: None,
        }
    }
}
