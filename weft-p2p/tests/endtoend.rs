//! End-to-end behavior of the overlay client: connect, message, queue,
//! relay, gossip, external servers and custom transports.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use weft_p2p::transport::BoxedDuplex;
use weft_p2p::{
    ChannelFactory, Client, ClientConfig, Event, ExternalServer, NodeId, P2pError,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);
const QUIET_WINDOW: Duration = Duration::from_millis(400);

fn fixed_id(fill: u8) -> NodeId {
    NodeId::from_bytes(&[fill; 20]).unwrap()
}

fn port_of(client: &Client) -> u16 {
    client
        .local_url()
        .expect("client has no listener")
        .rsplit(':')
        .next()
        .unwrap()
        .parse()
        .unwrap()
}

async fn expect_peer(client: &mut Client) -> NodeId {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match client.next_event().await {
                Some(Event::Peer(id)) => break id,
                Some(Event::Error(error)) => panic!("unexpected error event: {error}"),
                Some(Event::Message { .. }) => continue,
                None => panic!("client shut down while waiting for a peer"),
            }
        }
    })
    .await
    .expect("timed out waiting for a peer event")
}

async fn expect_peers(client: &mut Client, count: usize) -> HashSet<NodeId> {
    let mut seen = HashSet::new();
    while seen.len() < count {
        seen.insert(expect_peer(client).await);
    }
    seen
}

async fn expect_message(client: &mut Client) -> (NodeId, Vec<u8>) {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match client.next_event().await {
                Some(Event::Message { from, payload }) => break (from, payload),
                Some(Event::Peer(_)) => continue,
                Some(Event::Error(error)) => panic!("unexpected error event: {error}"),
                None => panic!("client shut down while waiting for a message"),
            }
        }
    })
    .await
    .expect("timed out waiting for a message")
}

/// Assert that no message arrives for a while. Peer events are allowed;
/// the mesh may still be converging.
async fn assert_no_message(client: &mut Client) {
    let outcome = tokio::time::timeout(QUIET_WINDOW, async {
        loop {
            match client.next_event().await {
                Some(Event::Message { from, .. }) => break from,
                Some(_) => continue,
                None => std::future::pending().await,
            }
        }
    })
    .await;
    if let Ok(from) = outcome {
        panic!("unexpected extra message from {from}");
    }
}

#[tokio::test]
async fn two_clients_connect_and_announce_each_other() {
    let mut host = Client::start(ClientConfig::new().with_port(0)).await.unwrap();
    let url = host.local_url().unwrap().to_string();
    let mut visitor = Client::start(ClientConfig::new().with_bootstrap([url]))
        .await
        .unwrap();

    assert_eq!(expect_peer(&mut visitor).await, host.id());
    assert_eq!(expect_peer(&mut host).await, visitor.id());

    host.destroy().await;
    visitor.destroy().await;
}

#[tokio::test]
async fn peers_exchange_messages_directly() {
    let mut host = Client::start(ClientConfig::new().with_port(0)).await.unwrap();
    let url = host.local_url().unwrap().to_string();
    let mut visitor = Client::start(ClientConfig::new().with_bootstrap([url]))
        .await
        .unwrap();

    let host_id = expect_peer(&mut visitor).await;
    visitor.send(&host_id, "ping").unwrap();

    let (from, payload) = expect_message(&mut host).await;
    assert_eq!(from, visitor.id());
    assert_eq!(payload, b"ping");

    host.send(&from, "pong").unwrap();
    let (from, payload) = expect_message(&mut visitor).await;
    assert_eq!(from, host.id());
    assert_eq!(payload, b"pong");

    host.destroy().await;
    visitor.destroy().await;
}

#[tokio::test]
async fn messages_sent_before_any_peer_are_queued_in_order() {
    let mut host = Client::start(
        ClientConfig::new().with_id(fixed_id(1)).with_port(0),
    )
    .await
    .unwrap();
    let url = host.local_url().unwrap().to_string();

    let sender = Client::start(
        ClientConfig::new()
            .with_id(fixed_id(2))
            .with_bootstrap([url]),
    )
    .await
    .unwrap();
    // fire before the bootstrap handshake can possibly have finished
    sender.send(&fixed_id(1), "first").unwrap();
    sender.send(&fixed_id(1), "second").unwrap();

    let (from, payload) = expect_message(&mut host).await;
    assert_eq!(from, fixed_id(2));
    assert_eq!(payload, b"first");
    let (_, payload) = expect_message(&mut host).await;
    assert_eq!(payload, b"second");

    host.destroy().await;
    sender.destroy().await;
}

#[tokio::test]
async fn listenerless_nodes_reach_each_other_through_a_relay() {
    let mut hub = Client::start(ClientConfig::new().with_port(0)).await.unwrap();
    let url = hub.local_url().unwrap().to_string();

    // neither edge node listens, so they can never connect directly and
    // every payload between them must go through the hub
    let mut left = Client::start(
        ClientConfig::new()
            .with_id(fixed_id(1))
            .with_bootstrap([url.clone()]),
    )
    .await
    .unwrap();
    let mut right = Client::start(
        ClientConfig::new()
            .with_id(fixed_id(3))
            .with_bootstrap([url]),
    )
    .await
    .unwrap();

    expect_peer(&mut left).await;
    expect_peer(&mut right).await;

    left.send(&fixed_id(3), "across the hub").unwrap();

    let (from, payload) = expect_message(&mut right).await;
    assert_eq!(from, fixed_id(1), "sender identity must survive the relay");
    assert_eq!(payload, b"across the hub");
    assert_no_message(&mut right).await;

    hub.destroy().await;
    left.destroy().await;
    right.destroy().await;
}

#[tokio::test]
async fn gossip_meshes_peers_of_peers_and_survives_losing_the_middle() {
    let mut hub = Client::start(
        ClientConfig::new().with_id(fixed_id(10)).with_port(0),
    )
    .await
    .unwrap();
    let url = hub.local_url().unwrap().to_string();

    let mut left = Client::start(
        ClientConfig::new()
            .with_id(fixed_id(20))
            .with_port(0)
            .with_bootstrap([url.clone()]),
    )
    .await
    .unwrap();
    let mut right = Client::start(
        ClientConfig::new()
            .with_id(fixed_id(30))
            .with_port(0)
            .with_bootstrap([url]),
    )
    .await
    .unwrap();

    // both edges bootstrap only to the hub, yet end up with two peers
    let left_peers = expect_peers(&mut left, 2).await;
    assert!(left_peers.contains(&fixed_id(10)));
    assert!(left_peers.contains(&fixed_id(30)));
    expect_peers(&mut right, 2).await;
    expect_peers(&mut hub, 2).await;

    // the direct edge-to-edge link outlives the node that introduced them
    left.disconnect(&fixed_id(10)).unwrap();
    left.send(&fixed_id(30), "still here").unwrap();

    let (from, payload) = expect_message(&mut right).await;
    assert_eq!(from, fixed_id(20));
    assert_eq!(payload, b"still here");

    hub.destroy().await;
    left.destroy().await;
    right.destroy().await;
}

#[tokio::test]
async fn supplied_identifier_is_used_verbatim() {
    let id = NodeId::from_bytes(&[0xab; 20]).unwrap();
    let mut host = Client::start(ClientConfig::new().with_port(0)).await.unwrap();
    let url = host.local_url().unwrap().to_string();

    let fixed = Client::start(
        ClientConfig::new().with_id(id).with_bootstrap([url]),
    )
    .await
    .unwrap();
    assert_eq!(fixed.id(), id);
    assert_eq!(expect_peer(&mut host).await, id);

    host.destroy().await;
    fixed.destroy().await;
}

#[tokio::test]
async fn custom_host_appears_in_the_advertised_url() {
    let client = Client::start(
        ClientConfig::new().with_port(0).with_host("127.0.0.1"),
    )
    .await
    .unwrap();
    assert!(client.local_url().unwrap().starts_with("ws://127.0.0.1:"));
    client.destroy().await;
}

#[tokio::test]
async fn plain_http_request_gets_upgrade_required() {
    let client = Client::start(
        ClientConfig::new().with_port(0).with_host("127.0.0.1"),
    )
    .await
    .unwrap();
    let port = port_of(&client);

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
    assert!(response.contains("Content-Type: text/plain"));
    assert!(response.contains("Content-Length: 16"));
    assert!(response.ends_with("Upgrade Required"));

    // the listener still takes websocket connections afterwards
    let mut visitor = Client::start(
        ClientConfig::new().with_bootstrap([client.local_url().unwrap()]),
    )
    .await
    .unwrap();
    assert_eq!(expect_peer(&mut visitor).await, client.id());

    client.destroy().await;
    visitor.destroy().await;
}

#[tokio::test]
async fn sending_to_the_own_identifier_is_rejected() {
    let client = Client::start(ClientConfig::new()).await.unwrap();
    let own = client.id();
    assert!(matches!(
        client.send(&own, "echo"),
        Err(P2pError::InvalidDestination)
    ));
    client.destroy().await;
}

#[tokio::test]
async fn unreachable_bootstrap_surfaces_an_error_event() {
    let mut client = Client::start(
        ClientConfig::new().with_bootstrap(["ws://127.0.0.1:9"]),
    )
    .await
    .unwrap();

    let event = tokio::time::timeout(EVENT_TIMEOUT, client.next_event())
        .await
        .expect("timed out waiting for the dial to fail")
        .unwrap();
    assert!(matches!(event, Event::Error(P2pError::Connect { .. })));
    client.destroy().await;
}

#[tokio::test]
async fn destroy_is_idempotent_and_ends_the_event_stream() {
    let mut host = Client::start(ClientConfig::new().with_port(0)).await.unwrap();
    let url = host.local_url().unwrap().to_string();
    let mut visitor = Client::start(ClientConfig::new().with_bootstrap([url]))
        .await
        .unwrap();
    expect_peer(&mut visitor).await;

    visitor.destroy().await;
    visitor.destroy().await;

    assert!(visitor.next_event().await.is_none());
    assert!(matches!(
        visitor.send(&host.id(), "too late"),
        Err(P2pError::Shutdown)
    ));

    host.destroy().await;
}

#[tokio::test]
async fn peer_event_refires_for_a_returning_identifier() {
    let mut host = Client::start(ClientConfig::new().with_port(0)).await.unwrap();
    let url = host.local_url().unwrap().to_string();
    let returning = fixed_id(42);

    let mut visitor = Client::start(
        ClientConfig::new()
            .with_id(returning)
            .with_bootstrap([url.clone()]),
    )
    .await
    .unwrap();
    expect_peer(&mut visitor).await;
    assert_eq!(expect_peer(&mut host).await, returning);

    visitor.destroy().await;
    // give the host time to observe the disconnect
    tokio::time::sleep(QUIET_WINDOW).await;

    let mut rejoined = Client::start(
        ClientConfig::new()
            .with_id(returning)
            .with_bootstrap([url]),
    )
    .await
    .unwrap();
    expect_peer(&mut rejoined).await;
    assert_eq!(expect_peer(&mut host).await, returning);

    rejoined.destroy().await;
    host.destroy().await;
}

#[tokio::test]
async fn externally_managed_server_carries_connections() {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = tcp.local_addr().unwrap().port();
    let url = format!("ws://127.0.0.1:{port}");

    let (handle, server) = ExternalServer::channel(Some(url.clone()));
    let pusher = handle.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = tcp.accept().await {
            let _ = pusher.push(stream).await;
        }
    });

    let mut attached = Client::start(ClientConfig::new().with_server(server))
        .await
        .unwrap();
    assert_eq!(attached.local_url(), Some(url.as_str()));

    let mut visitor = Client::start(ClientConfig::new().with_bootstrap([url.clone()]))
        .await
        .unwrap();
    assert_eq!(expect_peer(&mut visitor).await, attached.id());
    expect_peer(&mut attached).await;

    visitor.send(&attached.id(), "via external server").unwrap();
    let (_, payload) = expect_message(&mut attached).await;
    assert_eq!(payload, b"via external server");

    // non-upgrade requests over the external server get the same 426
    let mut raw = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    raw.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    raw.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 426 "));

    // destroying detaches from the server without closing it
    assert!(handle.is_attached());
    attached.destroy().await;
    assert!(!handle.is_attached());

    visitor.destroy().await;
}

#[tokio::test]
async fn tls_server_accepts_secure_visitors() {
    const CERT_PEM: &[u8] = include_bytes!("fixtures/cert.pem");
    const KEY_PEM: &[u8] = include_bytes!("fixtures/key.pem");

    let identity = native_tls::Identity::from_pkcs8(CERT_PEM, KEY_PEM).unwrap();
    let acceptor =
        tokio_native_tls::TlsAcceptor::from(native_tls::TlsAcceptor::new(identity).unwrap());

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = tcp.local_addr().unwrap().port();
    let url = format!("wss://localhost:{port}");

    let (handle, server) = ExternalServer::channel(Some(url.clone()));
    tokio::spawn(async move {
        while let Ok((stream, _)) = tcp.accept().await {
            let acceptor = acceptor.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                if let Ok(tls) = acceptor.accept(stream).await {
                    let _ = handle.push(tls).await;
                }
            });
        }
    });

    let mut secure = Client::start(ClientConfig::new().with_server(server))
        .await
        .unwrap();

    // the fixture certificate is self-signed, so verification is opted out
    let mut visitor = Client::start(
        ClientConfig::new()
            .with_bootstrap([url])
            .with_insecure_tls(),
    )
    .await
    .unwrap();

    assert_eq!(expect_peer(&mut visitor).await, secure.id());
    expect_peer(&mut secure).await;

    visitor.send(&secure.id(), "over tls").unwrap();
    let (_, payload) = expect_message(&mut secure).await;
    assert_eq!(payload, b"over tls");

    secure.destroy().await;
    visitor.destroy().await;
}

/// Hands out a pre-provisioned in-memory pipe for any dialed URL.
struct PipeFactory(Mutex<Option<tokio::io::DuplexStream>>);

impl ChannelFactory for PipeFactory {
    fn open(&self, _url: &str) -> BoxFuture<'static, io::Result<BoxedDuplex>> {
        let stream = self.0.lock().unwrap().take();
        Box::pin(async move {
            match stream {
                Some(stream) => Ok(Box::new(stream) as BoxedDuplex),
                None => Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "channel not provisioned",
                )),
            }
        })
    }
}

#[tokio::test]
async fn custom_channels_carry_the_whole_protocol() {
    let (left, right) = tokio::io::duplex(16 * 1024);
    let factory = Arc::new(PipeFactory(Mutex::new(Some(left))));

    let mut adopter = Client::start(ClientConfig::new().with_id(fixed_id(7)))
        .await
        .unwrap();
    adopter.adopt_channel(right).unwrap();

    let mut dialer = Client::start(
        ClientConfig::new()
            .with_id(fixed_id(8))
            .with_transport(factory)
            .with_bootstrap(["mem://adopter"]),
    )
    .await
    .unwrap();

    assert_eq!(expect_peer(&mut dialer).await, fixed_id(7));
    assert_eq!(expect_peer(&mut adopter).await, fixed_id(8));

    dialer.send(&fixed_id(7), "through the pipe").unwrap();
    let (from, payload) = expect_message(&mut adopter).await;
    assert_eq!(from, fixed_id(8));
    assert_eq!(payload, b"through the pipe");

    adopter.destroy().await;
    dialer.destroy().await;
}

#[tokio::test]
async fn fixed_port_pair_connects_and_messages() {
    let mut first = Client::start(
        ClientConfig::new().with_id(fixed_id(101)).with_port(8001),
    )
    .await
    .unwrap();
    assert_eq!(first.local_url(), Some("ws://localhost:8001"));

    let mut second = Client::start(
        ClientConfig::new()
            .with_id(fixed_id(102))
            .with_port(8002)
            .with_bootstrap(["ws://localhost:8001"]),
    )
    .await
    .unwrap();

    assert_eq!(expect_peer(&mut first).await, fixed_id(102));
    assert_eq!(expect_peer(&mut second).await, fixed_id(101));

    first.send(&fixed_id(102), "hello 8002").unwrap();
    let (_, payload) = expect_message(&mut second).await;
    assert_eq!(payload, b"hello 8002");

    first.destroy().await;
    second.destroy().await;
}
