use super::link::{RelayConnector, RelaySender};
use crate::error::TransportError;
use crate::event::{Event, RelayEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async, connect_async_tls_with_config,
    tungstenite::{error::ProtocolError, Error as WsError, Message},
    Connector, MaybeTlsStream, WebSocketStream,
};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relay connections over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    /// Accept self-signed relay certificates.
    pub insecure_tls: bool,
}

impl WsConnector {
    pub fn new(insecure_tls: bool) -> Self {
        Self { insecure_tls }
    }

    async fn dial(&self, url: &Url) -> Result<WsStream, TransportError> {
        let connect_err = |err: WsError| TransportError::Connect {
            url: url.to_string(),
            reason: err.to_string(),
        };
        if self.insecure_tls && url.scheme() == "wss" {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|err| TransportError::Tls(err.to_string()))?;
            let (stream, _) =
                connect_async_tls_with_config(url.as_str(), None, false, Some(Connector::NativeTls(tls)))
                    .await
                    .map_err(connect_err)?;
            Ok(stream)
        } else {
            let (stream, _) = connect_async(url.as_str()).await.map_err(connect_err)?;
            Ok(stream)
        }
    }
}

impl RelayConnector for WsConnector {
    fn open(&self, url: &Url, epoch: u64, events: mpsc::UnboundedSender<Event>) -> RelaySender {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let connector = self.clone();
        let url = url.clone();
        tokio::spawn(async move {
            let post = |event: RelayEvent| {
                let _ = events.send(Event::Relay { epoch, event });
            };
            match connector.dial(&url).await {
                Ok(stream) => {
                    tracing::debug!(target: "relay", url = %url, "relay websocket connected");
                    post(RelayEvent::Opened);
                    if let Err(reason) = pump(stream, rx, &post).await {
                        post(RelayEvent::Error(reason));
                    }
                }
                Err(err) => post(RelayEvent::Error(err.to_string())),
            }
            post(RelayEvent::Closed);
        });
        tx
    }
}

/// Shuttles frames until either side closes. Dropping the outbound sender closes the socket.
async fn pump(
    stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
    post: &impl Fn(RelayEvent),
) -> Result<(), String> {
    let (mut ws_write, mut ws_read) = stream.split();
    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(text) => {
                    ws_write.send(Message::Text(text)).await.map_err(|err| err.to_string())?;
                }
                None => {
                    let _ = ws_write.close().await;
                    return Ok(());
                }
            },
            incoming = ws_read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(target: "relay", "<< {text}");
                    post(RelayEvent::Message(text));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => post(RelayEvent::Message(text)),
                    Err(_) => tracing::warn!(target: "relay", "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(
                    WsError::ConnectionClosed
                    | WsError::AlreadyClosed
                    | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake),
                )) => {
                    tracing::debug!(target: "relay", "relay websocket closed");
                    return Ok(());
                }
                Some(Err(err)) => return Err(err.to_string()),
            },
        }
    }
}
