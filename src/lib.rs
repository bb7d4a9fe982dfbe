pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod utils;

use std::sync::Arc;

pub use client::{Flow, SignalingClient};
pub use config::ClientConfig;
pub use error::CallError;
pub use event::{Event, UserCommand};
pub use logger::{Notifier, UiEvent};

/// Connects to the relay over WebSocket and negotiates calls with the `webrtc` stack.
///
/// Returns the command sender, UI feed and the client loop to spawn.
pub fn build(
    config: ClientConfig,
) -> Result<
    (
        tokio::sync::mpsc::UnboundedSender<Event>,
        tokio::sync::mpsc::UnboundedReceiver<UiEvent>,
        impl std::future::Future<Output = ()>,
    ),
    error::TransportError,
> {
    let (ui_tx, ui_rx) = tokio::sync::mpsc::unbounded_channel();
    let connector = Arc::new(transport::WsConnector::new(config.insecure_tls));
    let factory = Arc::new(peer::WebRtcFactory);
    let (client, events) = SignalingClient::new(config, connector, factory, Notifier::new(ui_tx))?;
    let commands = client.sender();
    Ok((commands, ui_rx, client.run(events)))
}
