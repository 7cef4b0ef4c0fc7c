//! Public client facade.

use tokio::sync::{mpsc, oneshot};

use weft_core::NodeId;

use crate::config::{ClientConfig, DEFAULT_HOST};
use crate::error::{P2pError, P2pResult};
use crate::node::{Command, Node};
use crate::transport::{Duplex, Listener};

/// Notifications delivered through [`Client::next_event`].
#[derive(Debug)]
pub enum Event {
    /// A new peer completed its handshake.
    Peer(NodeId),
    /// An application payload arrived. `from` is the originating node,
    /// which is not necessarily a direct peer.
    Message {
        /// Originating node.
        from: NodeId,
        /// Opaque application bytes.
        payload: Vec<u8>,
    },
    /// A non-fatal failure, such as a dial that did not work out.
    Error(P2pError),
}

/// A node in the overlay.
///
/// Starting a client spawns a background task owning all networking
/// state; the handle here is a thin channel front for it. Dropping the
/// handle shuts the node down, [`Client::destroy`] does so explicitly
/// and waits for connections to close.
pub struct Client {
    id: NodeId,
    listen_url: Option<String>,
    command_tx: mpsc::UnboundedSender<Command>,
    event_rx: mpsc::UnboundedReceiver<Event>,
}

impl Client {
    /// Start a node with the given configuration.
    ///
    /// Fails on invalid configuration or when the self-managed listener
    /// cannot bind. Bootstrap dials happen in the background; their
    /// failures arrive as [`Event::Error`].
    pub async fn start(mut config: ClientConfig) -> P2pResult<Client> {
        config.validate()?;
        let id = config.id.unwrap_or_else(NodeId::generate);

        let (external, external_url) = match config.server.take() {
            Some(server) => (Some(server.incoming), server.url),
            None => (None, None),
        };

        let listener = match config.port {
            Some(port) => {
                let host = config
                    .host
                    .clone()
                    .unwrap_or_else(|| DEFAULT_HOST.to_string());
                Some(Listener::bind(&host, port).await?)
            }
            None => None,
        };
        let listen_url = listener
            .as_ref()
            .map(|listener| listener.url().to_string())
            .or(external_url);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (node, peer_event_rx) = Node::new(id, listen_url.clone(), config, event_tx);
        tokio::spawn(node.run(listener, external, peer_event_rx, command_rx));

        tracing::info!(%id, url = ?listen_url, "client started");
        Ok(Client {
            id,
            listen_url,
            command_tx,
            event_rx,
        })
    }

    /// This node's identifier.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The URL this node advertises for inbound connections, if any.
    pub fn local_url(&self) -> Option<&str> {
        self.listen_url.as_deref()
    }

    /// Send a payload to a node anywhere in the overlay.
    ///
    /// Delivery is direct when the destination is a peer, relayed
    /// through a peer otherwise, and deferred until a peer appears when
    /// the node is currently alone. Sending to the own identifier is
    /// rejected immediately.
    pub fn send(&self, dst: &NodeId, payload: impl Into<Vec<u8>>) -> P2pResult<()> {
        if *dst == self.id {
            return Err(P2pError::InvalidDestination);
        }
        self.command_tx
            .send(Command::Send {
                dst: *dst,
                payload: payload.into(),
            })
            .map_err(|_| P2pError::Shutdown)
    }

    /// Close the connection to a direct peer, if there is one.
    pub fn disconnect(&self, id: &NodeId) -> P2pResult<()> {
        self.command_tx
            .send(Command::Disconnect(*id))
            .map_err(|_| P2pError::Shutdown)
    }

    /// Hand the node an established inbound byte channel, for transports
    /// negotiated out of band. The node runs the regular handshake on it.
    pub fn adopt_channel(&self, stream: impl Duplex + 'static) -> P2pResult<()> {
        self.command_tx
            .send(Command::AdoptChannel(Box::new(stream)))
            .map_err(|_| P2pError::Shutdown)
    }

    /// Receive the next notification. `None` after the node shut down.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.event_rx.recv().await
    }

    /// Shut the node down: close every connection, stop listening and
    /// detach from an external server without closing it. Idempotent;
    /// returns once shutdown is complete.
    pub async fn destroy(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command_tx.send(Command::Destroy(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}
