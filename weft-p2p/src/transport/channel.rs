//! Caller-supplied transport channels.

use futures::future::BoxFuture;

use crate::transport::BoxedDuplex;

/// Opens outbound byte channels for URL schemes the built-in WebSocket
/// transport does not handle.
///
/// A factory is consulted for every dialed URL whose scheme is neither
/// `ws` nor `wss`. The returned stream carries length-prefixed frames; the
/// handshake and everything above it are identical to the WebSocket path.
///
/// Inbound channels are handed in out-of-band via
/// [`Client::adopt_channel`](crate::Client::adopt_channel).
pub trait ChannelFactory: Send + Sync {
    /// Open a channel to the given URL.
    fn open(&self, url: &str) -> BoxFuture<'static, std::io::Result<BoxedDuplex>>;
}
