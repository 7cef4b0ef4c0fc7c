//! Per-connection task: identifier handshake and frame pumping.
//!
//! Each connection gets its own task. The task completes the handshake,
//! reports the peer to the node loop, then pumps frames in both
//! directions until the connection drops or the node tells it to stop.
//! All membership and routing decisions live in the node loop; the task
//! itself is dumb plumbing.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use weft_core::NodeId;

use crate::error::{P2pError, P2pResult};
use crate::protocol::Frame;
use crate::transport::Connection;

/// Identifies one connection for the lifetime of the node, independent of
/// which peer (if any) it ends up belonging to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Who initiated the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The remote dialed us.
    Inbound,
    /// We dialed the remote.
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Everything known about a handshaken peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// The peer's identifier.
    pub id: NodeId,
    /// Who initiated the connection.
    pub direction: Direction,
    /// Dialable URL for the peer, from its hello or from the URL we
    /// dialed. Absent for peers that accept no inbound connections.
    pub url: Option<String>,
    /// When the handshake completed.
    pub connected_at: Instant,
}

/// Instructions from the node loop to a peer task.
#[derive(Debug)]
pub enum PeerCommand {
    /// Write one frame to the connection.
    Send(Frame),
    /// Close the connection and end the task.
    Disconnect,
}

/// Reports from a peer task to the node loop.
pub enum PeerEvent {
    /// Handshake completed; the connection is live.
    Connected {
        /// The reporting connection.
        conn: ConnId,
        /// The handshaken peer.
        info: PeerInfo,
        /// Channel for sending commands to this task.
        command_tx: mpsc::UnboundedSender<PeerCommand>,
    },
    /// A frame arrived from a handshaken peer.
    Frame {
        /// The reporting connection.
        conn: ConnId,
        /// The peer that sent it.
        id: NodeId,
        /// The frame.
        frame: Frame,
    },
    /// The connection ended after a successful handshake.
    Disconnected {
        /// The reporting connection.
        conn: ConnId,
        /// The peer it belonged to.
        id: NodeId,
        /// Human-readable cause.
        reason: String,
    },
    /// The connection ended before the handshake completed.
    HandshakeFailed {
        /// The reporting connection.
        conn: ConnId,
        /// The URL we dialed, for outbound attempts.
        url: Option<String>,
        /// What went wrong.
        error: P2pError,
    },
}

/// Run one connection to completion.
///
/// `dial_url` is the URL we dialed for outbound connections; it doubles
/// as the peer's address when its hello advertises none.
pub async fn run_peer(
    conn: ConnId,
    direction: Direction,
    dial_url: Option<String>,
    mut connection: Connection,
    hello: Frame,
    handshake_timeout: Duration,
    event_tx: mpsc::Sender<PeerEvent>,
) {
    let (peer_id, listen_url) = match handshake(&mut connection, hello, handshake_timeout).await {
        Ok(result) => result,
        Err(error) => {
            tracing::debug!(%conn, %direction, ?dial_url, %error, "handshake failed");
            connection.close().await;
            let _ = event_tx
                .send(PeerEvent::HandshakeFailed {
                    conn,
                    url: dial_url,
                    error,
                })
                .await;
            return;
        }
    };

    let info = PeerInfo {
        id: peer_id,
        direction,
        url: listen_url.or(dial_url),
        connected_at: Instant::now(),
    };
    tracing::debug!(%conn, peer = %peer_id, %direction, "handshake complete");

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    if event_tx
        .send(PeerEvent::Connected {
            conn,
            info,
            command_tx,
        })
        .await
        .is_err()
    {
        connection.close().await;
        return;
    }

    let reason = pump(conn, peer_id, &mut connection, command_rx, &event_tx).await;
    connection.close().await;
    tracing::debug!(%conn, peer = %peer_id, %reason, "connection ended");
    let _ = event_tx
        .send(PeerEvent::Disconnected {
            conn,
            id: peer_id,
            reason,
        })
        .await;
}

/// Exchange hellos. Both sides send first and then read, so neither
/// blocks the other.
async fn handshake(
    connection: &mut Connection,
    hello: Frame,
    timeout: Duration,
) -> P2pResult<(NodeId, Option<String>)> {
    let exchange = async {
        connection.send_frame(hello).await?;
        match connection.next_frame().await {
            Some(Ok(Frame::Hello { id, listen_url })) => Ok((id, listen_url)),
            Some(Ok(other)) => Err(P2pError::Protocol(format!(
                "expected hello, got {}",
                other.name()
            ))),
            Some(Err(e)) => Err(e),
            None => Err(P2pError::Protocol("closed during handshake".into())),
        }
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| P2pError::HandshakeTimeout)?
}

async fn pump(
    conn: ConnId,
    peer_id: NodeId,
    connection: &mut Connection,
    mut command_rx: mpsc::UnboundedReceiver<PeerCommand>,
    event_tx: &mpsc::Sender<PeerEvent>,
) -> String {
    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(PeerCommand::Send(frame)) => {
                    if let Err(e) = connection.send_frame(frame).await {
                        break format!("write failed: {e}");
                    }
                }
                Some(PeerCommand::Disconnect) => break "disconnect requested".into(),
                None => break "node loop gone".into(),
            },
            frame = connection.next_frame() => match frame {
                Some(Ok(frame)) => {
                    let event = PeerEvent::Frame {
                        conn,
                        id: peer_id,
                        frame,
                    };
                    if event_tx.send(event).await.is_err() {
                        break "node loop gone".into();
                    }
                }
                Some(Err(e)) => break format!("read failed: {e}"),
                None => break "closed by peer".into(),
            },
        }
    }
}
