//! Inbound connection acceptance.
//!
//! Two sources of inbound connections exist: a self-managed TCP listener
//! and an externally managed server that hands accepted streams to the
//! client. Both funnel through [`upgrade`], which answers plain HTTP
//! requests with `426 Upgrade Required` and completes the WebSocket
//! upgrade for everything else.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;

use crate::error::{P2pError, P2pResult};
use crate::transport::{BoxedDuplex, Connection};

const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Self-managed TCP listener for WebSocket upgrades.
pub struct Listener {
    tcp: TcpListener,
    url: String,
}

impl Listener {
    /// Bind on `host:port` and advertise `ws://host:<bound port>`.
    ///
    /// Port 0 binds an ephemeral port; the advertised URL always carries
    /// the actual one.
    pub async fn bind(host: &str, port: u16) -> P2pResult<Self> {
        let tcp = TcpListener::bind((host, port)).await?;
        let bound = tcp.local_addr()?;
        let url = format!("ws://{}:{}", host, bound.port());
        tracing::info!(%url, "listening for inbound connections");
        Ok(Self { tcp, url })
    }

    /// The advertised URL for this listener.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Accept the next raw TCP connection.
    pub async fn accept(&self) -> P2pResult<TcpStream> {
        let (stream, addr) = self.tcp.accept().await?;
        tracing::debug!(%addr, "accepted inbound tcp connection");
        Ok(stream)
    }
}

/// Receiving half of an externally managed server attachment.
///
/// Constructed with [`ExternalServer::channel`]; the caller keeps the
/// [`ExternalServerHandle`] and pushes every stream its own server
/// accepts. Destroying the client detaches from the server without
/// closing it.
pub struct ExternalServer {
    pub(crate) incoming: mpsc::Receiver<BoxedDuplex>,
    pub(crate) url: Option<String>,
}

/// Caller side of an external server attachment.
#[derive(Clone)]
pub struct ExternalServerHandle {
    tx: mpsc::Sender<BoxedDuplex>,
}

impl ExternalServer {
    /// Create an attachment pair. `url` is what the client advertises as
    /// its own address, when the server is reachable.
    pub fn channel(url: Option<String>) -> (ExternalServerHandle, ExternalServer) {
        let (tx, incoming) = mpsc::channel(16);
        (ExternalServerHandle { tx }, ExternalServer { incoming, url })
    }
}

impl ExternalServerHandle {
    /// Hand an accepted stream to the client. The stream may be plain TCP,
    /// TLS, or anything else bidirectional; the client drives the
    /// WebSocket upgrade on it.
    pub async fn push(&self, stream: impl super::Duplex + 'static) -> P2pResult<()> {
        self.tx
            .send(Box::new(stream))
            .await
            .map_err(|_| P2pError::Shutdown)
    }

    /// Whether a client is still attached and taking streams.
    pub fn is_attached(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Drive the HTTP upgrade on an accepted stream.
///
/// Returns `Ok(None)` when the request was not a WebSocket upgrade; such
/// requests get a plain `426` response and the stream is dropped.
pub async fn upgrade(mut stream: BoxedDuplex) -> P2pResult<Option<Connection>> {
    let mut head = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if head.len() > MAX_REQUEST_HEAD {
            reject(&mut stream).await;
            return Ok(None);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        head.extend_from_slice(&chunk[..n]);
    }

    if !is_upgrade_request(&head) {
        reject(&mut stream).await;
        return Ok(None);
    }

    let rewound: BoxedDuplex = Box::new(Rewind::new(head, stream));
    let ws = accept_async(rewound).await?;
    Ok(Some(Connection::WsAccepted(ws)))
}

async fn reject(stream: &mut BoxedDuplex) {
    let _ = stream.write_all(upgrade_required_response().as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn upgrade_required_response() -> String {
    let body = "Upgrade Required";
    format!(
        "HTTP/1.1 426 Upgrade Required\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )
}

fn is_upgrade_request(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    text.lines().skip(1).any(|line| {
        let mut parts = line.splitn(2, ':');
        matches!(
            (parts.next(), parts.next()),
            (Some(name), Some(value))
                if name.trim().eq_ignore_ascii_case("upgrade")
                    && value.to_ascii_lowercase().contains("websocket")
        )
    })
}

/// Replays already-consumed bytes before reading from the inner stream.
///
/// The upgrade sniffer consumes the request head; the WebSocket acceptor
/// needs to see it again.
struct Rewind<S> {
    prefix: Vec<u8>,
    pos: usize,
    inner: S,
}

impl<S> Rewind<S> {
    fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            pos: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.prefix.len() {
            let n = buf.remaining().min(this.prefix.len() - this.pos);
            buf.put_slice(&this.prefix[this.pos..this.pos + n]);
            this.pos += n;
            if this.pos == this.prefix.len() {
                this.prefix = Vec::new();
                this.pos = 0;
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
