//! Live peer bookkeeping.

use std::collections::{BTreeMap, HashMap, HashSet};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use weft_core::NodeId;

use crate::error::{P2pError, P2pResult};
use crate::peer::{ConnId, PeerCommand, PeerInfo};
use crate::protocol::Frame;

/// A live, handshaken peer.
#[derive(Clone)]
pub struct PeerHandle {
    /// The connection currently carrying this peer.
    pub conn: ConnId,
    /// Handshake details.
    pub info: PeerInfo,
    /// Command channel into the peer task.
    pub command_tx: mpsc::UnboundedSender<PeerCommand>,
}

/// All live peers plus in-flight outbound attempts.
///
/// Keyed by identifier; at most one live connection exists per remote
/// node. The ordered map gives a deterministic iteration order, which
/// the router relies on for next-hop selection.
#[derive(Default)]
pub struct PeerRegistry {
    peers: BTreeMap<NodeId, PeerHandle>,
    /// Gossip-initiated dials, keyed by the target identifier.
    connecting_ids: HashMap<NodeId, AbortHandle>,
    /// Bootstrap dials, keyed by the dialed URL (identifier unknown).
    connecting_urls: HashSet<String>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live peer.
    pub fn add(&mut self, handle: PeerHandle) -> P2pResult<()> {
        let id = handle.info.id;
        if self.peers.contains_key(&id) {
            return Err(P2pError::DuplicateIdentifier(id));
        }
        self.peers.insert(id, handle);
        Ok(())
    }

    /// Replace the connection backing a live peer. The previous handle is
    /// returned so the caller can close it.
    pub fn replace(&mut self, handle: PeerHandle) -> Option<PeerHandle> {
        self.peers.insert(handle.info.id, handle)
    }

    /// Remove a peer. Safe to call for identifiers that are not present.
    pub fn remove(&mut self, id: &NodeId) -> Option<PeerHandle> {
        self.peers.remove(id)
    }

    /// Look up a live peer.
    pub fn get(&self, id: &NodeId) -> Option<&PeerHandle> {
        self.peers.get(id)
    }

    /// Number of live peers.
    pub fn count(&self) -> usize {
        self.peers.len()
    }

    /// All live peers, in identifier order.
    pub fn snapshot(&self) -> Vec<PeerHandle> {
        self.peers.values().cloned().collect()
    }

    /// The connected peer with the lowest identifier, skipping `exclude`.
    pub fn first_hop(&self, exclude: Option<&NodeId>) -> Option<&PeerHandle> {
        self.peers
            .values()
            .find(|handle| Some(&handle.info.id) != exclude)
    }

    /// Queue a frame to a live peer. On failure the frame is handed back
    /// so the caller can re-route it: the peer may be unknown, or its
    /// task may have stopped before the disconnect report was processed.
    pub fn send_to(&self, id: &NodeId, frame: Frame) -> Result<(), Frame> {
        let handle = match self.peers.get(id) {
            Some(handle) => handle,
            None => return Err(frame),
        };
        match handle.command_tx.send(PeerCommand::Send(frame)) {
            Ok(()) => Ok(()),
            Err(dropped) => match dropped.0 {
                PeerCommand::Send(frame) => Err(frame),
                PeerCommand::Disconnect => Ok(()),
            },
        }
    }

    /// Record a gossip dial toward a known identifier.
    pub fn start_connect_id(&mut self, id: NodeId, abort: AbortHandle) {
        self.connecting_ids.insert(id, abort);
    }

    /// Clear a gossip dial record, returning its abort handle.
    pub fn finish_connect_id(&mut self, id: &NodeId) -> Option<AbortHandle> {
        self.connecting_ids.remove(id)
    }

    /// Whether a gossip dial toward `id` is in flight.
    pub fn is_connecting_to(&self, id: &NodeId) -> bool {
        self.connecting_ids.contains_key(id)
    }

    /// Record a bootstrap dial toward a URL.
    pub fn start_connect_url(&mut self, url: &str) {
        self.connecting_urls.insert(url.to_string());
    }

    /// Clear a bootstrap dial record.
    pub fn finish_connect_url(&mut self, url: &str) {
        self.connecting_urls.remove(url);
    }

    /// Whether any dial toward `url` is in flight.
    pub fn is_dialing(&self, url: &str) -> bool {
        self.connecting_urls.contains(url)
    }

    /// Take every in-flight dial record, for shutdown.
    pub fn drain_connecting(&mut self) -> Vec<AbortHandle> {
        self.connecting_urls.clear();
        self.connecting_ids.drain().map(|(_, abort)| abort).collect()
    }
}
