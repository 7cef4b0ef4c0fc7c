//! Transports: WebSocket client/server and caller-supplied byte channels.

pub mod channel;
pub mod connector;
pub mod listener;

pub use channel::ChannelFactory;
pub use connector::connect;
pub use listener::{ExternalServer, ExternalServerHandle, Listener};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::codec::Framed;

use weft_core::serialization;

use crate::error::{P2pError, P2pResult};
use crate::protocol::{Frame, FrameCodec};

/// A bidirectional byte stream usable as a peer transport.
pub trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Duplex for T {}

/// Owned, type-erased duplex stream.
pub type BoxedDuplex = Box<dyn Duplex>;

/// An established connection to a remote node, before or after handshake.
///
/// All variants expose the same frame-oriented interface; the peer task
/// never cares which transport carries the frames.
pub enum Connection {
    /// Outbound WebSocket, plain or TLS.
    WsClient(WebSocketStream<MaybeTlsStream<TcpStream>>),
    /// Inbound WebSocket accepted from a listener or external server.
    WsAccepted(WebSocketStream<BoxedDuplex>),
    /// Caller-supplied byte channel with length-prefixed framing.
    Channel(Framed<BoxedDuplex, FrameCodec>),
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transport = match self {
            Connection::WsClient(_) => "ws-client",
            Connection::WsAccepted(_) => "ws-accepted",
            Connection::Channel(_) => "channel",
        };
        write!(f, "Connection({transport})")
    }
}

impl Connection {
    /// Wrap a raw byte channel in the frame codec.
    pub fn from_channel(stream: BoxedDuplex) -> Self {
        Connection::Channel(Framed::new(stream, FrameCodec::new()))
    }

    /// Send one frame.
    pub async fn send_frame(&mut self, frame: Frame) -> P2pResult<()> {
        match self {
            Connection::WsClient(ws) => {
                let bytes = serialization::serialize(&frame)?;
                ws.send(Message::Binary(bytes)).await?;
            }
            Connection::WsAccepted(ws) => {
                let bytes = serialization::serialize(&frame)?;
                ws.send(Message::Binary(bytes)).await?;
            }
            Connection::Channel(framed) => framed.send(frame).await?,
        }
        Ok(())
    }

    /// Receive the next frame. `None` means the remote closed cleanly.
    pub async fn next_frame(&mut self) -> Option<P2pResult<Frame>> {
        match self {
            Connection::WsClient(ws) => next_ws_frame(ws).await,
            Connection::WsAccepted(ws) => next_ws_frame(ws).await,
            Connection::Channel(framed) => framed.next().await,
        }
    }

    /// Close the connection, ignoring errors on the way out.
    pub async fn close(&mut self) {
        match self {
            Connection::WsClient(ws) => {
                let _ = ws.close(None).await;
            }
            Connection::WsAccepted(ws) => {
                let _ = ws.close(None).await;
            }
            Connection::Channel(framed) => {
                let _ = framed.close().await;
            }
        }
    }
}

async fn next_ws_frame<S>(ws: &mut WebSocketStream<S>) -> Option<P2pResult<Frame>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    use tokio_tungstenite::tungstenite::Error as WsError;
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(bytes))) => {
                return Some(
                    serialization::deserialize(&bytes)
                        .map_err(|e| P2pError::Protocol(format!("malformed frame: {e}"))),
                );
            }
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(Message::Text(_))) => {
                return Some(Err(P2pError::Protocol("unexpected text frame".into())));
            }
            // ping/pong and raw frames are transport noise
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                return None;
            }
            Some(Err(e)) => return Some(Err(e.into())),
        }
    }
}
