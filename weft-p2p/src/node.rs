//! The node event loop.
//!
//! One task owns all membership, gossip and routing state and processes
//! commands from the client facade, inbound connections and peer events
//! strictly one at a time. No handler ever observes another handler's
//! half-applied state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use weft_core::NodeId;

use crate::client::Event;
use crate::config::{ClientConfig, MAX_RELAY_HOPS};
use crate::error::{P2pError, P2pResult};
use crate::gossip::GossipState;
use crate::peer::{self, ConnId, Direction, PeerCommand, PeerEvent, PeerInfo};
use crate::protocol::{DirectoryEntry, Frame};
use crate::registry::{PeerHandle, PeerRegistry};
use crate::router::{pick_route, spend_hop, Route, Router};
use crate::transport::{connector, listener, BoxedDuplex, ChannelFactory, Connection, Listener};

const PEER_EVENT_BUFFER: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Instructions from the client facade.
pub(crate) enum Command {
    Send { dst: NodeId, payload: Vec<u8> },
    Disconnect(NodeId),
    AdoptChannel(BoxedDuplex),
    Destroy(oneshot::Sender<()>),
}

/// What an in-flight outbound connection was started for.
enum Dial {
    /// A bootstrap URL; the remote identifier is unknown until handshake.
    Url(String),
    /// A gossip-discovered identifier.
    Target(NodeId),
}

pub(crate) struct Node {
    id: NodeId,
    listen_url: Option<String>,
    bootstrap: Vec<String>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    allow_insecure_tls: bool,
    transport: Option<Arc<dyn ChannelFactory>>,

    registry: PeerRegistry,
    gossip: GossipState,
    router: Router,

    peer_event_tx: mpsc::Sender<PeerEvent>,
    event_tx: mpsc::UnboundedSender<Event>,
    next_conn: u64,
    /// In-flight outbound attempts, by connection.
    dials: HashMap<ConnId, Dial>,
    /// Every connection task that has not reported its end yet.
    tasks: HashMap<ConnId, JoinHandle<()>>,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        listen_url: Option<String>,
        config: ClientConfig,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> (Self, mpsc::Receiver<PeerEvent>) {
        let (peer_event_tx, peer_event_rx) = mpsc::channel(PEER_EVENT_BUFFER);
        let node = Self {
            id,
            listen_url,
            bootstrap: config.bootstrap,
            connect_timeout: config.connect_timeout,
            handshake_timeout: config.handshake_timeout,
            allow_insecure_tls: config.allow_insecure_tls,
            transport: config.transport,
            registry: PeerRegistry::new(),
            gossip: GossipState::new(),
            router: Router::new(),
            peer_event_tx,
            event_tx,
            next_conn: 0,
            dials: HashMap::new(),
            tasks: HashMap::new(),
        };
        (node, peer_event_rx)
    }

    pub(crate) async fn run(
        mut self,
        listener: Option<Listener>,
        mut external: Option<mpsc::Receiver<BoxedDuplex>>,
        mut peer_event_rx: mpsc::Receiver<PeerEvent>,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        for url in std::mem::take(&mut self.bootstrap) {
            self.start_bootstrap_dial(url);
        }

        let mut destroy_ack = None;
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(Command::Destroy(ack)) => {
                        destroy_ack = Some(ack);
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = peer_event_rx.recv() => self.handle_peer_event(event),
                result = Self::accept_next(&listener) => match result {
                    Ok(stream) => self.spawn_inbound(Box::new(stream)),
                    Err(error) => tracing::warn!(%error, "listener accept failed"),
                },
                stream = Self::next_external(&mut external) => match stream {
                    Some(stream) => self.spawn_inbound(stream),
                    None => external = None,
                },
            }
        }

        self.shutdown().await;
        drop(listener);
        if let Some(ack) = destroy_ack {
            let _ = ack.send(());
        }
    }

    async fn accept_next(listener: &Option<Listener>) -> P2pResult<tokio::net::TcpStream> {
        match listener {
            Some(listener) => listener.accept().await,
            None => std::future::pending().await,
        }
    }

    async fn next_external(
        external: &mut Option<mpsc::Receiver<BoxedDuplex>>,
    ) -> Option<BoxedDuplex> {
        match external {
            Some(incoming) => incoming.recv().await,
            None => std::future::pending().await,
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { dst, payload } => {
                let frame = Frame::Data {
                    src: self.id,
                    dst,
                    payload,
                    ttl: MAX_RELAY_HOPS,
                };
                self.dispatch(frame, None);
            }
            Command::Disconnect(id) => {
                if let Some(handle) = self.registry.remove(&id) {
                    tracing::debug!(peer = %id, "disconnecting on request");
                    let _ = handle.command_tx.send(PeerCommand::Disconnect);
                    self.gossip.drop_peer(&id);
                }
            }
            Command::AdoptChannel(stream) => self.spawn_adopted(stream),
            // handled by the run loop before dispatching here
            Command::Destroy(_) => {}
        }
    }

    fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Connected {
                conn,
                info,
                command_tx,
            } => self.on_connected(conn, info, command_tx),
            PeerEvent::Frame { conn: _, id, frame } => self.on_frame(id, frame),
            PeerEvent::Disconnected { conn, id, reason } => self.on_disconnected(conn, id, reason),
            PeerEvent::HandshakeFailed { conn, url, error } => {
                self.on_handshake_failed(conn, url, error)
            }
        }
    }

    /// Route a data frame: directly, through a relay hop, or into the
    /// pending queue when no peer is usable.
    ///
    /// A chosen hop can already be dead when its task stopped but the
    /// disconnect event is still queued behind this one. The stale
    /// handle is evicted and routing retries, so the frame always ends
    /// up either sent or queued, never dropped.
    fn dispatch(&mut self, frame: Frame, arrival: Option<&NodeId>) {
        let dst = match &frame {
            Frame::Data { dst, .. } => *dst,
            _ => return,
        };
        let mut frame = frame;
        loop {
            let hop = match pick_route(&self.registry, &dst, arrival) {
                Route::Direct(hop) | Route::Hop(hop) => hop,
                Route::Queue => {
                    tracing::debug!(%dst, "no route, holding frame");
                    self.router.enqueue(frame);
                    return;
                }
            };
            match self.registry.send_to(&hop, frame) {
                Ok(()) => return,
                Err(returned) => {
                    tracing::debug!(%dst, %hop, "stale peer on route, retrying");
                    frame = returned;
                    self.registry.remove(&hop);
                    self.gossip.drop_peer(&hop);
                }
            }
        }
    }

    fn on_connected(
        &mut self,
        conn: ConnId,
        info: PeerInfo,
        command_tx: mpsc::UnboundedSender<PeerCommand>,
    ) {
        self.settle_dial(&conn);

        if info.id == self.id {
            tracing::debug!(%conn, "connected to own listener, dropping");
            let _ = command_tx.send(PeerCommand::Disconnect);
            return;
        }

        let handle = PeerHandle {
            conn,
            info,
            command_tx,
        };

        if let Some(existing) = self.registry.get(&handle.info.id) {
            // Simultaneous connects resolve the same way on both ends:
            // the surviving connection is the one dialed by the lower
            // identifier. Same-direction duplicates keep the incumbent.
            // An in-flight dial toward this identifier is never aborted
            // here: the remote may already have registered that link as
            // its only one, and killing it would bounce the peer there.
            // The losing connection is closed after handshake instead
            // and settles through this same resolution.
            let keeper = if self.id < handle.info.id {
                Direction::Outbound
            } else {
                Direction::Inbound
            };
            let existing_wins = existing.info.direction == keeper
                || existing.info.direction == handle.info.direction;
            if existing_wins {
                tracing::debug!(peer = %handle.info.id, %conn, "duplicate connection, closing");
                let _ = handle.command_tx.send(PeerCommand::Disconnect);
            } else {
                tracing::debug!(peer = %handle.info.id, %conn, "duplicate connection, replacing");
                if let Some(old) = self.registry.replace(handle) {
                    let _ = old.command_tx.send(PeerCommand::Disconnect);
                }
            }
            // the peer was already announced; nothing else changes
            return;
        }

        let id = handle.info.id;
        let url = handle.info.url.clone();
        if let Err(error) = self.registry.add(handle) {
            tracing::error!(%error, "peer registration raced");
            return;
        }
        tracing::info!(peer = %id, %conn, peers = self.registry.count(), "peer connected");

        self.gossip.note_peer(id, url.clone());
        let _ = self.event_tx.send(Event::Peer(id));

        // directory exchange with the newcomer
        let fragment = self.gossip.fragment_for(&id, url.is_none());
        if !fragment.is_empty() {
            let _ = self.registry.send_to(&id, Frame::Directory { entries: fragment });
        }

        // tell its designated dialers among the existing peers
        let peers: Vec<(NodeId, bool)> = self
            .registry
            .snapshot()
            .iter()
            .filter(|peer| peer.info.id != id)
            .map(|peer| (peer.info.id, peer.info.url.is_none()))
            .collect();
        let entry = DirectoryEntry { id, url };
        for target in self.gossip.advert_targets(&entry, &peers) {
            let frame = Frame::Directory {
                entries: vec![entry.clone()],
            };
            let _ = self.registry.send_to(&target, frame);
        }

        // queued traffic may be deliverable now; re-dispatch so a hop
        // that died in the meantime re-queues the frame instead of
        // losing it
        for (_hop, frame) in self.router.flush_ready(&self.registry) {
            self.dispatch(frame, None);
        }
    }

    fn on_frame(&mut self, from: NodeId, frame: Frame) {
        match frame {
            Frame::Data {
                src,
                dst,
                payload,
                ttl,
            } => {
                if dst == self.id {
                    tracing::trace!(%src, via = %from, bytes = payload.len(), "delivering");
                    let _ = self.event_tx.send(Event::Message { from: src, payload });
                } else {
                    let frame = Frame::Data {
                        src,
                        dst,
                        payload,
                        ttl,
                    };
                    match spend_hop(frame) {
                        Ok(forwarded) => {
                            tracing::trace!(%src, %dst, via = %from, "forwarding");
                            self.dispatch(forwarded, Some(&from));
                        }
                        Err(rested) => {
                            tracing::debug!(%src, %dst, via = %from, "hop budget spent, holding frame");
                            self.router.enqueue(rested);
                        }
                    }
                }
            }
            Frame::Directory { entries } => {
                for entry in entries {
                    if entry.id == self.id {
                        continue;
                    }
                    if self.gossip.record_entry(&from, &entry) {
                        tracing::debug!(peer = %from, learned = %entry.id, "directory entry");
                    }
                    self.consider_discovery_dial(entry.id);
                }
            }
            Frame::Hello { .. } => {
                tracing::debug!(peer = %from, "unexpected hello after handshake");
                if let Some(handle) = self.registry.get(&from) {
                    let _ = handle.command_tx.send(PeerCommand::Disconnect);
                }
            }
        }
    }

    fn on_disconnected(&mut self, conn: ConnId, id: NodeId, reason: String) {
        self.tasks.remove(&conn);
        let current = self.registry.get(&id).map(|handle| handle.conn);
        if current == Some(conn) {
            tracing::info!(peer = %id, %reason, peers = self.registry.count() - 1, "peer disconnected");
            self.registry.remove(&id);
            self.gossip.drop_peer(&id);
        }
        // otherwise a superseded connection ended; the live peer stands
    }

    fn on_handshake_failed(&mut self, conn: ConnId, url: Option<String>, error: P2pError) {
        self.tasks.remove(&conn);
        self.settle_dial(&conn);
        match url {
            Some(url) => {
                tracing::warn!(%url, %error, "outbound connection failed");
                let _ = self.event_tx.send(Event::Error(error));
            }
            None => tracing::debug!(%error, "inbound connection failed"),
        }
    }

    /// Dial a bootstrap URL unless one to the same address is in flight.
    fn start_bootstrap_dial(&mut self, url: String) {
        if self.registry.is_dialing(&url) {
            return;
        }
        self.registry.start_connect_url(&url);
        let conn = self.next_conn_id();
        self.dials.insert(conn, Dial::Url(url.clone()));
        self.spawn_dial(conn, url);
    }

    /// Dial a gossip-discovered identifier unless it is already live,
    /// being dialed by identifier, or being dialed by URL.
    fn consider_discovery_dial(&mut self, target: NodeId) {
        if self.registry.get(&target).is_some() || self.registry.is_connecting_to(&target) {
            return;
        }
        let url = match self.gossip.url_of(&target) {
            Some(url) => url.to_string(),
            None => return,
        };
        if self.registry.is_dialing(&url) {
            return;
        }
        tracing::debug!(%target, %url, "dialing discovered peer");
        let conn = self.next_conn_id();
        self.dials.insert(conn, Dial::Target(target));
        let abort = self.spawn_dial(conn, url);
        self.registry.start_connect_id(target, abort);
    }

    fn spawn_dial(&mut self, conn: ConnId, url: String) -> tokio::task::AbortHandle {
        let hello = self.hello();
        let connect_timeout = self.connect_timeout;
        let handshake_timeout = self.handshake_timeout;
        let allow_insecure_tls = self.allow_insecure_tls;
        let factory = self.transport.clone();
        let event_tx = self.peer_event_tx.clone();
        let task = tokio::spawn(async move {
            tracing::debug!(%conn, %url, "dialing");
            match connector::connect(&url, connect_timeout, allow_insecure_tls, factory.as_ref())
                .await
            {
                Ok(connection) => {
                    peer::run_peer(
                        conn,
                        Direction::Outbound,
                        Some(url),
                        connection,
                        hello,
                        handshake_timeout,
                        event_tx,
                    )
                    .await;
                }
                Err(error) => {
                    let _ = event_tx
                        .send(PeerEvent::HandshakeFailed {
                            conn,
                            url: Some(url),
                            error,
                        })
                        .await;
                }
            }
        });
        let abort = task.abort_handle();
        self.tasks.insert(conn, task);
        abort
    }

    fn spawn_inbound(&mut self, stream: BoxedDuplex) {
        let conn = self.next_conn_id();
        let hello = self.hello();
        let handshake_timeout = self.handshake_timeout;
        let event_tx = self.peer_event_tx.clone();
        let task = tokio::spawn(async move {
            match listener::upgrade(stream).await {
                Ok(Some(connection)) => {
                    peer::run_peer(
                        conn,
                        Direction::Inbound,
                        None,
                        connection,
                        hello,
                        handshake_timeout,
                        event_tx,
                    )
                    .await;
                }
                Ok(None) => tracing::debug!(%conn, "answered non-upgrade http request"),
                Err(error) => {
                    let _ = event_tx
                        .send(PeerEvent::HandshakeFailed {
                            conn,
                            url: None,
                            error,
                        })
                        .await;
                }
            }
        });
        self.tasks.insert(conn, task);
    }

    fn spawn_adopted(&mut self, stream: BoxedDuplex) {
        let conn = self.next_conn_id();
        let hello = self.hello();
        let handshake_timeout = self.handshake_timeout;
        let event_tx = self.peer_event_tx.clone();
        let connection = Connection::from_channel(stream);
        let task = tokio::spawn(async move {
            peer::run_peer(
                conn,
                Direction::Inbound,
                None,
                connection,
                hello,
                handshake_timeout,
                event_tx,
            )
            .await;
        });
        self.tasks.insert(conn, task);
    }

    fn settle_dial(&mut self, conn: &ConnId) {
        match self.dials.remove(conn) {
            Some(Dial::Url(url)) => self.registry.finish_connect_url(&url),
            Some(Dial::Target(target)) => {
                self.registry.finish_connect_id(&target);
            }
            None => {}
        }
    }

    fn hello(&self) -> Frame {
        Frame::Hello {
            id: self.id,
            listen_url: self.listen_url.clone(),
        }
    }

    fn next_conn_id(&mut self) -> ConnId {
        self.next_conn += 1;
        ConnId(self.next_conn)
    }

    async fn shutdown(&mut self) {
        tracing::info!(peers = self.registry.count(), "shutting down");
        for abort in self.registry.drain_connecting() {
            abort.abort();
        }
        for handle in self.registry.snapshot() {
            let _ = handle.command_tx.send(PeerCommand::Disconnect);
        }
        // dials that never handshook have nothing to say goodbye to
        for conn in self.dials.keys() {
            if let Some(task) = self.tasks.get(conn) {
                task.abort();
            }
        }
        self.dials.clear();
        let tasks: Vec<(ConnId, JoinHandle<()>)> = self.tasks.drain().collect();
        for (conn, mut task) in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::debug!(%conn, "connection task did not stop in time, aborting");
                task.abort();
            }
        }
    }
}
