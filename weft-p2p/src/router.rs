//! Relay routing and pending-delivery queues.

use std::collections::{HashMap, VecDeque};

use weft_core::NodeId;

use crate::config::MAX_RELAY_HOPS;
use crate::protocol::Frame;
use crate::registry::PeerRegistry;

/// Where a data frame should go next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The destination is a direct peer.
    Direct(NodeId),
    /// Forward through this peer and let it route onward.
    Hop(NodeId),
    /// No usable peer right now; hold the frame.
    Queue,
}

/// Pick the next hop for a frame addressed to `dst`.
///
/// A direct peer always wins. Otherwise the connected peer with the
/// lowest identifier is chosen, which keeps the decision deterministic
/// for a given peer set. `arrival` is the peer a forwarded frame came
/// from; it is never picked, so a two-node loop cannot form.
pub fn pick_route(registry: &PeerRegistry, dst: &NodeId, arrival: Option<&NodeId>) -> Route {
    if registry.get(dst).is_some() {
        return Route::Direct(*dst);
    }
    match registry.first_hop(arrival) {
        Some(handle) => Route::Hop(handle.info.id),
        None => Route::Queue,
    }
}

/// Account for one relay hop before forwarding a data frame.
///
/// `Ok` carries the frame with one hop less. `Err` means the budget is
/// spent: the frame is handed back with a fresh budget so it can wait
/// in a pending queue for the topology to change. Without the budget a
/// frame addressed to an absent node would circulate a cyclic mesh
/// forever, since each node only excludes the link it arrived on.
pub fn spend_hop(frame: Frame) -> Result<Frame, Frame> {
    match frame {
        Frame::Data {
            src,
            dst,
            payload,
            ttl,
        } => match ttl.checked_sub(1) {
            Some(ttl) => Ok(Frame::Data {
                src,
                dst,
                payload,
                ttl,
            }),
            None => Err(Frame::Data {
                src,
                dst,
                payload,
                ttl: MAX_RELAY_HOPS,
            }),
        },
        other => Ok(other),
    }
}

/// Frames waiting for a route, per destination, in send order.
#[derive(Default)]
pub struct Router {
    pending: HashMap<NodeId, VecDeque<Frame>>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a data frame until a route to its destination appears.
    pub fn enqueue(&mut self, frame: Frame) {
        if let Frame::Data { dst, .. } = &frame {
            self.pending.entry(*dst).or_default().push_back(frame);
        }
    }

    /// Drain every queue that can now be routed. Returns `(next hop,
    /// frame)` pairs in original send order per destination.
    pub fn flush_ready(&mut self, registry: &PeerRegistry) -> Vec<(NodeId, Frame)> {
        let mut out = Vec::new();
        let destinations: Vec<NodeId> = self.pending.keys().copied().collect();
        for dst in destinations {
            let hop = match pick_route(registry, &dst, None) {
                Route::Direct(id) | Route::Hop(id) => id,
                Route::Queue => continue,
            };
            if let Some(queue) = self.pending.remove(&dst) {
                out.extend(queue.into_iter().map(|frame| (hop, frame)));
            }
        }
        out
    }

    /// Total number of frames waiting for a route.
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }
}
