//! Outbound connection establishment.

use std::sync::Arc;
use std::time::Duration;

use tokio_tungstenite::{connect_async_tls_with_config, Connector};

use crate::error::{P2pError, P2pResult};
use crate::transport::{ChannelFactory, Connection};

/// Dial `url` and return an established, not-yet-handshaken connection.
///
/// `ws://` and `wss://` URLs use the built-in WebSocket transport; any
/// other scheme is delegated to the configured channel factory. Every
/// failure mode (resolution, refusal, TLS, timeout, malformed URL) maps
/// to [`P2pError::Connect`].
pub async fn connect(
    url: &str,
    timeout: Duration,
    allow_insecure_tls: bool,
    factory: Option<&Arc<dyn ChannelFactory>>,
) -> P2pResult<Connection> {
    let scheme = url.split_once("://").map(|(scheme, _)| scheme);
    let attempt = async {
        match scheme {
            Some("ws") | Some("wss") => connect_ws(url, allow_insecure_tls).await,
            _ => match factory {
                Some(factory) => {
                    let stream = factory
                        .open(url)
                        .await
                        .map_err(|e| connect_error(url, e))?;
                    Ok(Connection::from_channel(stream))
                }
                None => Err(connect_error(url, "unsupported url scheme")),
            },
        }
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(connect_error(url, "timed out")),
    }
}

async fn connect_ws(url: &str, allow_insecure_tls: bool) -> P2pResult<Connection> {
    let connector = if allow_insecure_tls {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| connect_error(url, e))?;
        Some(Connector::NativeTls(tls))
    } else {
        None
    };

    let (ws, _response) = connect_async_tls_with_config(url, None, false, connector)
        .await
        .map_err(|e| connect_error(url, e))?;
    Ok(Connection::WsClient(ws))
}

fn connect_error(url: &str, reason: impl ToString) -> P2pError {
    P2pError::Connect {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
