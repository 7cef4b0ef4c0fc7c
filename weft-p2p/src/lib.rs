//! Peer-to-peer overlay networking.
//!
//! Nodes carry 20-byte identifiers, connect over WebSockets (or
//! caller-supplied byte channels), exchange identifiers in a handshake,
//! gossip membership toward a full mesh and relay payloads for nodes
//! that are not directly connected.
//!
//! ```no_run
//! use weft_p2p::{Client, ClientConfig, Event};
//!
//! # async fn example() -> weft_p2p::P2pResult<()> {
//! let node = Client::start(ClientConfig::new().with_port(0)).await?;
//! let mut other = Client::start(
//!     ClientConfig::new().with_bootstrap([node.local_url().unwrap()]),
//! )
//! .await?;
//!
//! if let Some(Event::Peer(id)) = other.next_event().await {
//!     other.send(&id, "hello")?;
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod gossip;
mod node;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod transport;

pub use client::{Client, Event};
pub use config::ClientConfig;
pub use error::{P2pError, P2pResult};
pub use transport::{ChannelFactory, ExternalServer, ExternalServerHandle};
pub use weft_core::{NodeId, ID_LEN};
