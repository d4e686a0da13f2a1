//! The in-memory peer registry: identity resolution, dual-mode reconciliation,
//! bonding, and temporary-entry expiry.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::addr::{AddressType, DeviceAddress};
use crate::config::GapConfig;
use crate::security::{Irk, PrivacyResolver};

use super::bonding::{BondingData, LinkKey, PairingData};
use super::{ConnectionState, Peer, PeerId};

/// Event emitted by [`PeerCache`] to registered listeners.
#[derive(Clone, Debug)]
pub enum PeerCacheEvent {
    /// A peer was created, or one of its fields changed.
    Updated(PeerId),
    /// A peer transitioned from not-bonded to bonded.
    Bonded(PeerId),
}

struct Entry {
    peer: Peer,
    /// `None` for a peer that can never expire (currently connected, or
    /// bonded); `Some` holds the deadline for the next expiry check.
    expires_at: Option<tokio::time::Instant>,
}

/// A registered `(IRK, identity address)` pair, consulted by
/// [`PeerCache::find_by_address`] to resolve Resolvable Private Addresses.
struct ResolvingEntry {
    irk: Irk,
    identity: DeviceAddress,
    owner: PeerId,
}

/// The canonical in-memory registry of every remote device the host has seen.
///
/// Single-threaded by design: every method takes `&mut self`, matching the
/// "no internal locks, mutate only between suspension points" model the
/// connection managers are built on.
pub struct PeerCache {
    peers: HashMap<PeerId, Entry>,
    by_address: HashMap<DeviceAddress, PeerId>,
    resolving_list: Vec<ResolvingEntry>,
    cache_timeout: Duration,
    resolver: Box<dyn PrivacyResolver>,
    listeners: Vec<Box<dyn FnMut(PeerCacheEvent)>>,
}

impl std::fmt::Debug for PeerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerCache")
            .field("peers", &self.peers.len())
            .field("resolving_list", &self.resolving_list.len())
            .finish_non_exhaustive()
    }
}

impl PeerCache {
    /// Creates an empty cache, using `resolver` to resolve Resolvable Private
    /// Addresses against bonded IRKs.
    #[must_use]
    pub fn new(config: &GapConfig, resolver: Box<dyn PrivacyResolver>) -> Self {
        Self {
            peers: HashMap::new(),
            by_address: HashMap::new(),
            resolving_list: Vec::new(),
            cache_timeout: config.cache_timeout,
            resolver,
            listeners: Vec::new(),
        }
    }

    /// Registers a listener invoked for every [`PeerCacheEvent`]. Listeners
    /// are never invoked reentrantly from within another listener call.
    pub fn on_event(&mut self, listener: impl FnMut(PeerCacheEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Total number of peers currently cached.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of cached peers that are bonded.
    #[must_use]
    pub fn bonded_count(&self) -> usize {
        self.peers.values().filter(|e| e.peer.is_bonded()).count()
    }

    /// Creates a fresh peer at `address`. Fails if an alias of `address`
    /// already exists with an incompatible technology (i.e. the existing
    /// entry already has a sub-record for the transport `address` implies).
    pub fn new_peer(&mut self, address: DeviceAddress, connectable: bool) -> Option<PeerId> {
        if self.by_address.contains_key(&address) {
            return None;
        }
        if let Some(alias) = address.alias() {
            if let Some(&existing) = self.by_address.get(&alias) {
                let entry = self.peers.get(&existing).expect("by_address is consistent");
                let has_record = if address.addr_type().is_le() {
                    entry.peer.le.is_some()
                } else {
                    entry.peer.bredr.is_some()
                };
                if has_record {
                    return None;
                }
            }
        }
        let peer = Peer::new(address, connectable);
        let id = peer.id();
        self.insert(peer);
        self.tickle(id);
        self.emit(PeerCacheEvent::Updated(id));
        Some(id)
    }

    fn insert(&mut self, peer: Peer) {
        let id = peer.id();
        self.by_address.insert(peer.address(), id);
        self.peers.insert(id, Entry { peer, expires_at: None });
    }

    /// Looks up a peer by stable id.
    #[must_use]
    pub fn find_by_id(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id).map(|e| &e.peer)
    }

    /// Looks up a peer by stable id, for in-place mutation. Callers that
    /// mutate a field that is a "tickle" trigger must call
    /// [`PeerCache::tickle`] (and emit an update) themselves afterward.
    pub fn find_by_id_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id).map(|e| &mut e.peer)
    }

    /// Looks up a peer by address, consulting the IRK resolving list if
    /// `addr` is a Resolvable Private Address that does not match any stored
    /// address directly.
    #[must_use]
    pub fn find_by_address(&self, addr: DeviceAddress) -> Option<&Peer> {
        if let Some(&id) = self.by_address.get(&addr) {
            return self.peers.get(&id).map(|e| &e.peer);
        }
        if addr.addr_type() == AddressType::LeRandom && addr.is_resolvable_private() {
            let owner = self
                .resolving_list
                .iter()
                .find(|r| self.resolver.resolves(&r.irk, &addr))?
                .owner;
            return self.peers.get(&owner).map(|e| &e.peer);
        }
        None
    }

    /// Iterates all cached peers.
    pub fn for_each(&self, mut visitor: impl FnMut(&Peer)) {
        for entry in self.peers.values() {
            visitor(&entry.peer);
        }
    }

    /// Restores a bonded peer from persisted storage. Does not emit
    /// [`PeerCacheEvent::Bonded`] — the peer is bonded from the moment it
    /// enters the cache, not as a transition.
    pub fn add_bonded_peer(&mut self, data: BondingData) -> bool {
        if !data.is_valid() {
            warn!("rejected bonding data for {}: failed validation", data.address);
            return false;
        }
        if self.by_address.contains_key(&data.address) {
            return false;
        }
        if let Some(id) = data.identifier {
            if self.peers.contains_key(&id) {
                return false;
            }
        }
        let connectable = true;
        let mut peer = Peer::new(data.address, connectable);
        if let Some(id) = data.identifier {
            peer.force_id(id);
        }
        peer.name = data.name;
        if let Some(pairing) = data.le_pairing_data.clone() {
            let le = peer.le.get_or_insert_with(super::LowEnergyData::default);
            le.bond_data = Some(pairing);
        }
        if let Some(key) = data.bredr_link_key {
            let bredr = peer.bredr.get_or_insert_with(super::BrEdrData::default);
            bredr.link_key = Some(key);
            bredr.bonded_services = data.bredr_services;
        }
        peer.recompute_temporary();
        let id = peer.id();
        if let Some(irk) = data.le_pairing_data.as_ref().and_then(PairingData::irk) {
            let identity = data.le_pairing_data.as_ref().and_then(|p| p.identity_address).unwrap_or(data.address);
            self.register_irk(id, irk, identity);
        }
        self.insert(peer);
        debug!(?id, "restored bonded peer");
        true
    }

    /// Promotes a connected LE peer to bonded, storing `data` and registering
    /// its IRK (if any) in the resolving list. Emits [`PeerCacheEvent::Bonded`].
    pub fn store_low_energy_bond(&mut self, id: PeerId, data: PairingData) -> bool {
        if !data.is_valid() {
            warn!(?id, "rejected LE bond data: failed validation");
            return false;
        }
        let irk = data.irk().zip(data.identity_address);
        let Some(entry) = self.peers.get_mut(&id) else { return false };
        let was_bonded = entry.peer.is_bonded();
        let le = entry.peer.le.get_or_insert_with(super::LowEnergyData::default);
        le.bond_data = Some(data);
        entry.peer.recompute_temporary();
        if let Some((irk, identity)) = irk {
            self.register_irk(id, irk, identity);
        }
        self.tickle(id);
        self.emit(PeerCacheEvent::Updated(id));
        if !was_bonded {
            self.emit(PeerCacheEvent::Bonded(id));
        }
        true
    }

    /// Promotes a connected BR/EDR peer to bonded. Emits
    /// [`PeerCacheEvent::Bonded`].
    pub fn store_bredr_bond(&mut self, address: DeviceAddress, key: LinkKey) -> bool {
        let Some(&id) = self.by_address.get(&address) else { return false };
        let Some(entry) = self.peers.get_mut(&id) else { return false };
        let was_bonded = entry.peer.is_bonded();
        let bredr = entry.peer.bredr.get_or_insert_with(super::BrEdrData::default);
        bredr.link_key = Some(key);
        entry.peer.recompute_temporary();
        self.tickle(id);
        self.emit(PeerCacheEvent::Updated(id));
        if !was_bonded {
            self.emit(PeerCacheEvent::Bonded(id));
        }
        true
    }

    /// Clears `should_auto_connect` following an intentional disconnect.
    pub fn set_auto_connect_for_intentional_disconnect(&mut self, id: PeerId) {
        if let Some(entry) = self.peers.get_mut(&id) {
            if let Some(le) = entry.peer.le.as_mut() {
                le.should_auto_connect = false;
            }
        }
    }

    /// Sets `should_auto_connect` following a successful connection.
    pub fn set_auto_connect_for_successful_connection(&mut self, id: PeerId) {
        if let Some(entry) = self.peers.get_mut(&id) {
            if let Some(le) = entry.peer.le.as_mut() {
                le.should_auto_connect = true;
            }
        }
    }

    /// Removes a peer that is not connected on either transport. Returns
    /// `false` if the peer does not exist or is still connected.
    pub fn remove_disconnected_peer(&mut self, id: PeerId) -> bool {
        let Some(entry) = self.peers.get(&id) else { return false };
        if entry.peer.is_connected() {
            return false;
        }
        let address = entry.peer.address();
        self.peers.remove(&id);
        self.by_address.remove(&address);
        if let Some(alias) = address.alias() {
            // An aliased entry under the other transport's address type
            // should not linger if this was the only record pointing at it.
            if self.by_address.get(&alias) == Some(&id) {
                self.by_address.remove(&alias);
            }
        }
        self.resolving_list.retain(|r| r.owner != id);
        trace!(?id, "removed disconnected peer");
        true
    }

    /// Updates a peer's connection state for one transport, reconciling
    /// dual-mode identity if `address` is a previously-unseen alias of an
    /// existing peer, and re-running the temporary/expiry computation.
    ///
    /// Returns the affected peer's id.
    pub fn set_connection_state(&mut self, address: DeviceAddress, state: ConnectionState) -> PeerId {
        let id = self.reconcile(address, true);
        let entry = self.peers.get_mut(&id).expect("reconcile always inserts");
        let record_state = if address.addr_type().is_le() {
            &mut entry.peer.le.get_or_insert_with(super::LowEnergyData::default).connection_state
        } else {
            &mut entry.peer.bredr.get_or_insert_with(super::BrEdrData::default).connection_state
        };
        *record_state = state;
        entry.peer.recompute_temporary();
        self.tickle(id);
        self.emit(PeerCacheEvent::Updated(id));
        id
    }

    /// Ingests newly observed advertising data for an LE peer, creating it if
    /// unseen, reconciling dual-mode identity, tickling expiry, and setting
    /// `name`/`appearance` from the advertisement if it carries them.
    pub fn ingest_advertising_data(&mut self, address: DeviceAddress, data: Vec<u8>, rssi: Option<i8>) -> PeerId {
        let (name, appearance) = crate::adv::parse_name_and_appearance(&data);
        let id = self.reconcile(address, true);
        let entry = self.peers.get_mut(&id).expect("reconcile always inserts");
        let le = entry.peer.le.get_or_insert_with(super::LowEnergyData::default);
        le.advertising_data = data;
        le.rssi = rssi;
        if let Some(name) = name {
            entry.peer.name = Some(name);
        }
        if let Some(appearance) = appearance {
            entry.peer.appearance = Some(appearance);
        }
        self.tickle(id);
        self.emit(PeerCacheEvent::Updated(id));
        id
    }

    /// Ingests a BR/EDR inquiry result's Extended Inquiry Response data,
    /// creating the peer if unseen, reconciling dual-mode identity, tickling
    /// expiry, and setting `name` from the EIR data if present.
    pub fn ingest_eir_data(&mut self, address: DeviceAddress, device_class: Option<u32>, eir_data: Vec<u8>) -> PeerId {
        let (name, _appearance) = crate::adv::parse_name_and_appearance(&eir_data);
        let id = self.reconcile(address, true);
        let entry = self.peers.get_mut(&id).expect("reconcile always inserts");
        let bredr = entry.peer.bredr.get_or_insert_with(super::BrEdrData::default);
        bredr.eir_data = eir_data;
        if device_class.is_some() {
            bredr.device_class = device_class;
        }
        if let Some(name) = name {
            entry.peer.name = Some(name);
        }
        self.tickle(id);
        self.emit(PeerCacheEvent::Updated(id));
        id
    }

    /// Sets a peer's name directly (e.g. from `HCI Remote Name Request
    /// Complete`), tickling expiry. Returns `false` if the peer is unknown.
    pub fn set_name(&mut self, id: PeerId, name: String) -> bool {
        let Some(entry) = self.peers.get_mut(&id) else { return false };
        entry.peer.name = Some(name);
        self.tickle(id);
        self.emit(PeerCacheEvent::Updated(id));
        true
    }

    /// Resolves the identity address of an RPA-addressed peer once it is
    /// discovered (either via bonding or a fresh IRK exchange), folding any
    /// existing entry at the identity address into this one.
    pub fn resolve_identity(&mut self, id: PeerId, identity: DeviceAddress) {
        if let Some(entry) = self.peers.get_mut(&id) {
            let old = entry.peer.address();
            entry.peer.resolve_identity(identity);
            self.by_address.remove(&old);
            self.by_address.insert(identity, id);
            self.tickle(id);
            self.emit(PeerCacheEvent::Updated(id));
        }
    }

    fn register_irk(&mut self, owner: PeerId, irk: Irk, identity: DeviceAddress) {
        self.resolving_list.retain(|r| r.owner != owner);
        self.resolving_list.push(ResolvingEntry { irk, identity, owner });
    }

    /// Finds or creates the peer identified by `address`, upgrading an
    /// existing alias to dual-mode in place rather than creating a second
    /// peer. `connectable` only matters for creation.
    fn reconcile(&mut self, address: DeviceAddress, connectable: bool) -> PeerId {
        if let Some(&id) = self.by_address.get(&address) {
            return id;
        }
        if let Some(alias) = address.alias() {
            if let Some(&id) = self.by_address.get(&alias) {
                let entry = self.peers.get_mut(&id).expect("by_address is consistent");
                entry.peer.upgrade_to_dual_mode(address.addr_type());
                self.by_address.insert(address, id);
                debug!(?id, %address, "upgraded peer to dual-mode");
                return id;
            }
        }
        let peer = Peer::new(address, connectable);
        let id = peer.id();
        self.insert(peer);
        id
    }

    /// Marks a peer as recently active, resetting its expiry countdown if it
    /// is still eligible for expiry (temporary and not connected).
    fn tickle(&mut self, id: PeerId) {
        let Some(entry) = self.peers.get_mut(&id) else { return };
        entry.expires_at = entry
            .peer
            .temporary()
            .then(|| tokio::time::Instant::now() + self.cache_timeout);
    }

    /// Removes every temporary peer whose expiry deadline has passed. Driven
    /// by the owning executor on a timer; never called reentrantly from
    /// within a listener callback.
    pub fn expire(&mut self) {
        let now = tokio::time::Instant::now();
        let expired: Vec<PeerId> = self
            .peers
            .iter()
            .filter_map(|(&id, e)| (e.expires_at.is_some_and(|t| t <= now)).then_some(id))
            .collect();
        for id in expired {
            debug!(?id, "expired temporary peer");
            self.remove_disconnected_peer(id);
        }
    }

    fn emit(&mut self, event: PeerCacheEvent) {
        // Listeners may remove themselves or otherwise mutate `self.listeners`
        // through interior state, but never while we hold a borrow on it: we
        // take the vector out for the duration of the call so a listener
        // tearing down the cache mid-callback cannot reenter `emit`.
        let mut listeners = std::mem::take(&mut self.listeners);
        for listener in &mut listeners {
            listener(event.clone());
        }
        self.listeners = listeners;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::PrivacyResolver;

    #[derive(Debug)]
    struct NullResolver;
    impl PrivacyResolver for NullResolver {
        fn resolves(&self, _irk: &Irk, _rpa: &DeviceAddress) -> bool {
            false
        }
    }

    #[derive(Debug)]
    struct AlwaysResolver(Irk);
    impl PrivacyResolver for AlwaysResolver {
        fn resolves(&self, irk: &Irk, rpa: &DeviceAddress) -> bool {
            irk.0 == self.0 .0 && rpa.is_resolvable_private()
        }
    }

    fn cache() -> PeerCache {
        PeerCache::new(&GapConfig::default(), Box::new(NullResolver))
    }

    #[test]
    fn new_peer_then_find_by_address_round_trips() {
        let mut c = cache();
        let addr = DeviceAddress::new(AddressType::LePublic, [1; 6]);
        let id = c.new_peer(addr, true).unwrap();
        assert_eq!(c.find_by_address(addr).unwrap().id(), id);
        assert_eq!(c.find_by_id(id).unwrap().address(), addr);
    }

    #[test]
    fn dual_mode_upgrade_reuses_peer() {
        let mut c = cache();
        let bredr = DeviceAddress::new(AddressType::BrEdr, [0xAA; 6]);
        let id = c.new_peer(bredr, true).unwrap();
        let le = DeviceAddress::new(AddressType::LePublic, [0xAA; 6]);
        let observed = c.ingest_advertising_data(le, vec![], None);
        assert_eq!(observed, id);
        let peer = c.find_by_address(le).unwrap();
        assert_eq!(peer.technology(), super::super::Technology::DualMode);
        assert_eq!(peer.address(), bredr);
    }

    #[test]
    fn bonded_peer_is_never_temporary() {
        let mut c = cache();
        let addr = DeviceAddress::new(AddressType::LePublic, [2; 6]);
        let id = c.new_peer(addr, true).unwrap();
        assert!(c.find_by_id(id).unwrap().temporary());
        let pairing = PairingData { peer_ltk: Some([0; 16]), ..Default::default() };
        assert!(c.store_low_energy_bond(id, pairing));
        assert!(!c.find_by_id(id).unwrap().temporary());
        assert!(c.find_by_id(id).unwrap().is_bonded());
    }

    #[test]
    fn irk_resolves_rpa_to_bonded_peer() {
        let irk = Irk([7; 16]);
        let mut c = PeerCache::new(&GapConfig::default(), Box::new(AlwaysResolver(irk)));
        let identity = DeviceAddress::new(AddressType::LePublic, [9; 6]);
        let id = c.new_peer(identity, true).unwrap();
        let pairing = PairingData {
            peer_ltk: Some([0; 16]),
            irk: Some(irk.0),
            identity_address: Some(identity),
            ..Default::default()
        };
        assert!(c.store_low_energy_bond(id, pairing));
        let rpa = DeviceAddress::new(AddressType::LeRandom, [0b0100_0000, 1, 2, 3, 4, 5]);
        assert_eq!(c.find_by_address(rpa).unwrap().id(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn temporary_peer_expires_after_timeout() {
        let mut c = cache();
        let addr = DeviceAddress::new(AddressType::LePublic, [3; 6]);
        let id = c.new_peer(addr, true).unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        c.expire();
        assert!(c.find_by_id(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn connected_peer_survives_cache_timeout() {
        let mut c = cache();
        let addr = DeviceAddress::new(AddressType::LePublic, [4; 6]);
        let id = c.set_connection_state(addr, ConnectionState::Connected);
        tokio::time::advance(Duration::from_secs(61)).await;
        c.expire();
        assert!(c.find_by_id(id).is_some());
    }

    #[test]
    fn remove_disconnected_peer_rejects_connected() {
        let mut c = cache();
        let addr = DeviceAddress::new(AddressType::LePublic, [5; 6]);
        let id = c.set_connection_state(addr, ConnectionState::Connected);
        assert!(!c.remove_disconnected_peer(id));
        c.set_connection_state(addr, ConnectionState::NotConnected);
        assert!(c.remove_disconnected_peer(id));
    }
}
