//! Membership gossip bookkeeping.
//!
//! Every node spreads the identifiers and URLs it knows so that peers of
//! peers find each other and the overlay converges toward a full mesh.
//! Three rules keep the exchange tidy:
//!
//! - An entry is sent to a given peer at most once, in either direction:
//!   once a peer has reported an identifier to us, we never echo it back.
//! - Entries without a URL are never advertised; nobody could dial them,
//!   and routing does not need them.
//! - Between two dialable nodes, the entry flows only to the one with
//!   the *lower* identifier, making it the designated dialer. A peer
//!   with no listener of its own must always dial, so it receives every
//!   entry. Either way exactly one side of any pair ever dials, so two
//!   nodes cannot discover each other simultaneously and race to
//!   connect in both directions at once.
//!
//! The state here is pure bookkeeping; the node loop decides when to
//! actually dial.

use std::collections::{HashMap, HashSet};

use weft_core::NodeId;

use crate::protocol::DirectoryEntry;

/// What this node knows about overlay membership.
#[derive(Default)]
pub struct GossipState {
    /// Every identifier ever heard of, with its URL when one is known.
    known: HashMap<NodeId, Option<String>>,
    /// Per live peer, the identifiers already sent to or received from it.
    exchanged: HashMap<NodeId, HashSet<NodeId>>,
}

impl GossipState {
    /// Create empty gossip state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer we are now directly connected to.
    pub fn note_peer(&mut self, id: NodeId, url: Option<String>) {
        let slot = self.known.entry(id).or_insert(None);
        if url.is_some() {
            *slot = url;
        }
    }

    /// Record an entry reported by `from`. Returns `true` when the
    /// identifier was previously unknown.
    pub fn record_entry(&mut self, from: &NodeId, entry: &DirectoryEntry) -> bool {
        self.exchanged.entry(*from).or_default().insert(entry.id);
        let newly_known = !self.known.contains_key(&entry.id);
        let slot = self.known.entry(entry.id).or_insert(None);
        if entry.url.is_some() {
            *slot = entry.url.clone();
        }
        newly_known
    }

    /// Directory fragment for a newly registered peer: every dialable
    /// entry the peer is designated to dial and has not seen from us
    /// yet. `peer_dials_all` is set for peers without a listener. The
    /// returned entries are marked as exchanged.
    pub fn fragment_for(&mut self, peer: &NodeId, peer_dials_all: bool) -> Vec<DirectoryEntry> {
        let seen = self.exchanged.entry(*peer).or_default();
        let mut entries = Vec::new();
        for (id, url) in &self.known {
            let designated = peer_dials_all || peer < id;
            if url.is_none() || id == peer || !designated || seen.contains(id) {
                continue;
            }
            entries.push(DirectoryEntry {
                id: *id,
                url: url.clone(),
            });
        }
        entries.sort_by_key(|entry| entry.id);
        for entry in &entries {
            seen.insert(entry.id);
        }
        entries
    }

    /// Existing peers that should hear about a newly registered peer:
    /// its designated dialers among them that have not seen it yet.
    /// `peers` carries each existing peer with its "dials everything"
    /// flag. The reported pairs are marked as exchanged.
    pub fn advert_targets(
        &mut self,
        entry: &DirectoryEntry,
        peers: &[(NodeId, bool)],
    ) -> Vec<NodeId> {
        if entry.url.is_none() {
            return Vec::new();
        }
        let mut targets = Vec::new();
        for (peer, dials_all) in peers {
            if *peer == entry.id || (!*dials_all && *peer >= entry.id) {
                continue;
            }
            let seen = self.exchanged.entry(*peer).or_default();
            if seen.insert(entry.id) {
                targets.push(*peer);
            }
        }
        targets
    }

    /// Stop tracking exchange state for a disconnected peer. What we
    /// learned about the overlay stays.
    pub fn drop_peer(&mut self, id: &NodeId) {
        self.exchanged.remove(id);
    }

    /// Known URL for an identifier, if any.
    pub fn url_of(&self, id: &NodeId) -> Option<&str> {
        self.known.get(id).and_then(|url| url.as_deref())
    }
}
