//! A pending outbound `Connect` intent for one peer.

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::addr::DeviceAddress;
use crate::config::MAX_CONNECTION_ATTEMPTS;
use crate::error::Result;
use crate::uuid::Uuid;

use super::connection::LeConnectionHandle;

/// Whether a new link should be bondable.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BondableMode {
    #[default]
    Bondable,
    NonBondable,
}

/// Options controlling a `Connect` request.
#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    pub bondable_mode: BondableMode,
    /// Service discovered (in addition to the GAP service) once connected.
    pub service_uuid: Option<Uuid>,
    /// Skip the scan phase and issue `CreateConnection` directly.
    pub auto_connect: bool,
}

pub(crate) type ConnectReply = oneshot::Sender<Result<LeConnectionHandle>>;

/// A pending connection attempt. Multiple `Connect` calls for the same peer
/// merge into one request; every queued reply is resolved together.
pub(crate) struct LeConnectionRequest {
    pub address: DeviceAddress,
    pub options: ConnectOptions,
    pub replies: Vec<ConnectReply>,
    pub attempt: u8,
    pub cancel: CancellationToken,
}

impl LeConnectionRequest {
    pub fn new(address: DeviceAddress, options: ConnectOptions, reply: ConnectReply) -> Self {
        Self { address, options, replies: vec![reply], attempt: 1, cancel: CancellationToken::new() }
    }

    /// Whether another `CreateConnection` attempt is still permitted.
    pub fn may_retry(&self) -> bool {
        self.attempt < MAX_CONNECTION_ATTEMPTS
    }

    /// Resolves every queued reply with the same result. Handles for
    /// duplicate callers are minted by the caller before invoking this, since
    /// each reply needs its own reference-counted handle on success.
    pub fn resolve_all(self, mut result: impl FnMut() -> Result<LeConnectionHandle>) {
        for reply in self.replies {
            let _ = reply.send(result());
        }
    }
}
