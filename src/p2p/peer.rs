//! Peer management
//!
//! Tracks misbehaviour points, denylisting, request latency and the chain
//! metadata each peer last advertised. Shared between the chain handle, the
//! sync coordinator and the liveness service.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chain::ChainMetadata;

/// Points for sending malformed data (bad encoding, invalid proofs)
pub const MALFORMED_PENALTY: u32 = 25;

/// Points for a block that fails consensus validation
pub const INVALID_BLOCK_PENALTY: u32 = 10;

/// Points for failing a request (timeout, wrong response)
pub const UNRESPONSIVE_PENALTY: u32 = 5;

/// Peer identifier, normally the remote socket address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connected,
    Disconnected,
    /// Denylisted for misbehaviour; nothing from it is accepted
    Denylisted,
}

/// Information about a peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: PeerId,
    pub state: PeerState,
    pub last_seen: Instant,
    pub misbehaviour_score: u32,
    /// Smoothed round-trip time of answered requests
    pub latency: Option<Duration>,
    /// Chain metadata from the last liveness probe
    pub metadata: Option<ChainMetadata>,
}

impl PeerInfo {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            state: PeerState::Connected,
            last_seen: Instant::now(),
            misbehaviour_score: 0,
            latency: None,
            metadata: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_denylisted(&self) -> bool {
        self.state == PeerState::Denylisted
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Peer manager
#[derive(Debug)]
pub struct PeerManager {
    peers: RwLock<HashMap<PeerId, PeerInfo>>,
    /// Misbehaviour score at which a peer is denylisted
    denylist_threshold: u32,
}

impl PeerManager {
    pub fn new(denylist_threshold: u32) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            denylist_threshold,
        }
    }

    /// Register a peer, or mark a known one connected again. Denylisted
    /// peers stay denylisted.
    pub fn add_peer(&self, id: PeerId) {
        let mut peers = self.peers.write();
        let peer = peers
            .entry(id.clone())
            .or_insert_with(|| PeerInfo::new(id));
        if !peer.is_denylisted() {
            peer.state = PeerState::Connected;
        }
        peer.touch();
    }

    pub fn peer_disconnected(&self, id: &PeerId) {
        if let Some(peer) = self.peers.write().get_mut(id) {
            if !peer.is_denylisted() {
                peer.state = PeerState::Disconnected;
            }
        }
    }

    pub fn peer(&self, id: &PeerId) -> Option<PeerInfo> {
        self.peers.read().get(id).cloned()
    }

    pub fn is_denylisted(&self, id: &PeerId) -> bool {
        self.peers
            .read()
            .get(id)
            .map_or(false, PeerInfo::is_denylisted)
    }

    pub fn denylist(&self, id: &PeerId, reason: &str) {
        let mut peers = self.peers.write();
        let peer = peers
            .entry(id.clone())
            .or_insert_with(|| PeerInfo::new(id.clone()));
        peer.state = PeerState::Denylisted;
        peer.misbehaviour_score = peer.misbehaviour_score.max(self.denylist_threshold);
        warn!(peer = %id, reason, "Peer denylisted");
    }

    /// Add misbehaviour points. Returns true if the peer is now denylisted.
    pub fn record_misbehaviour(&self, id: &PeerId, points: u32) -> bool {
        let mut peers = self.peers.write();
        let peer = peers
            .entry(id.clone())
            .or_insert_with(|| PeerInfo::new(id.clone()));
        peer.misbehaviour_score = peer.misbehaviour_score.saturating_add(points);
        debug!(peer = %id, score = peer.misbehaviour_score, "Misbehaviour recorded");
        if peer.misbehaviour_score >= self.denylist_threshold && !peer.is_denylisted() {
            peer.state = PeerState::Denylisted;
            warn!(peer = %id, score = peer.misbehaviour_score, "Peer denylisted");
        }
        peer.is_denylisted()
    }

    /// Fold a new round-trip sample into the peer's latency
    pub fn record_latency(&self, id: &PeerId, sample: Duration) {
        if let Some(peer) = self.peers.write().get_mut(id) {
            peer.latency = Some(match peer.latency {
                Some(previous) => (previous * 3 + sample) / 4,
                None => sample,
            });
            peer.touch();
        }
    }

    pub fn update_metadata(&self, id: &PeerId, metadata: ChainMetadata) {
        if let Some(peer) = self.peers.write().get_mut(id) {
            peer.metadata = Some(metadata);
            peer.touch();
        }
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .peers
            .read()
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .map(|p| p.id.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Connected peers with known metadata, best first: most accumulated
    /// work, then lowest latency
    pub fn sync_candidates(&self) -> Vec<(PeerId, ChainMetadata)> {
        let peers = self.peers.read();
        let mut candidates: Vec<&PeerInfo> = peers
            .values()
            .filter(|p| p.state == PeerState::Connected && p.metadata.is_some())
            .collect();
        candidates.sort_by(|a, b| {
            let work = |p: &PeerInfo| p.metadata.as_ref().map_or(0, ChainMetadata::total_work);
            work(b)
                .cmp(&work(a))
                .then_with(|| {
                    a.latency
                        .unwrap_or(Duration::MAX)
                        .cmp(&b.latency.unwrap_or(Duration::MAX))
                })
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates
            .into_iter()
            .filter_map(|p| p.metadata.clone().map(|m| (p.id.clone(), m)))
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.peers
            .read()
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .count()
    }

    pub fn known_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Forget disconnected peers not heard from within `timeout`
    pub fn remove_stale_peers(&self, timeout: Duration) {
        self.peers
            .write()
            .retain(|_, p| p.state != PeerState::Disconnected || !p.is_stale(timeout));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::AccumulatedDifficulty;
    use crate::crypto::Hash;

    fn metadata(primary: u64, secondary: u64) -> ChainMetadata {
        ChainMetadata {
            height: 10,
            best_hash: Hash::zero(),
            accumulated: AccumulatedDifficulty { primary, secondary },
            genesis_hash: Hash::zero(),
            pruned_height: 0,
        }
    }

    #[test]
    fn test_add_peer() {
        let pm = PeerManager::new(100);
        pm.add_peer(PeerId::new("a"));
        pm.add_peer(PeerId::new("a"));
        assert_eq!(pm.known_count(), 1);
        assert_eq!(pm.connected_count(), 1);
    }

    #[test]
    fn test_misbehaviour_denylists_at_threshold() {
        let pm = PeerManager::new(50);
        let id = PeerId::new("a");
        pm.add_peer(id.clone());
        assert!(!pm.record_misbehaviour(&id, MALFORMED_PENALTY));
        assert!(pm.record_misbehaviour(&id, MALFORMED_PENALTY));
        assert!(pm.is_denylisted(&id));
        assert_eq!(pm.connected_count(), 0);

        // Reconnecting does not lift the denylist
        pm.add_peer(id.clone());
        assert!(pm.is_denylisted(&id));
    }

    #[test]
    fn test_sync_candidates_ordering() {
        let pm = PeerManager::new(100);
        for name in ["slow", "fast", "weak"] {
            pm.add_peer(PeerId::new(name));
        }
        pm.update_metadata(&PeerId::new("slow"), metadata(100, 100));
        pm.update_metadata(&PeerId::new("fast"), metadata(100, 100));
        pm.update_metadata(&PeerId::new("weak"), metadata(10, 10));
        pm.record_latency(&PeerId::new("slow"), Duration::from_millis(400));
        pm.record_latency(&PeerId::new("fast"), Duration::from_millis(20));

        let order: Vec<String> = pm.sync_candidates().into_iter().map(|(id, _)| id.0).collect();
        assert_eq!(order, vec!["fast", "slow", "weak"]);
    }

    #[test]
    fn test_latency_is_smoothed() {
        let pm = PeerManager::new(100);
        let id = PeerId::new("a");
        pm.add_peer(id.clone());
        pm.record_latency(&id, Duration::from_millis(100));
        pm.record_latency(&id, Duration::from_millis(500));
        assert_eq!(pm.peer(&id).unwrap().latency, Some(Duration::from_millis(200)));
    }
}
