#![allow(dead_code)]

use async_trait::async_trait;
use peercall_lib::config::ClientConfig;
use peercall_lib::error::{MediaError, NegotiationError};
use peercall_lib::event::{ChannelEvent, Event, RelayEvent, UserCommand};
use peercall_lib::logger::{Notifier, UiEvent};
use peercall_lib::peer::negotiator::{
    ChannelHandler, DataChannel, Negotiator, NegotiatorFactory, NegotiatorSignals,
};
use peercall_lib::peer::types::{
    IceCandidate, MediaConstraints, MediaSummary, RtcSettings, SdpKind, SessionDescription,
};
use peercall_lib::transport::{RelayConnector, RelaySender};
use peercall_lib::SignalingClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

pub const LOCAL_ID: &str = "42";
pub const REMOTE_ID: &str = "99";

pub const REMOTE_OFFER: &str = r#"{"sdp":{"type":"offer","sdp":"v=0 remote-offer"}}"#;
pub const REMOTE_ANSWER: &str = r#"{"sdp":{"type":"answer","sdp":"v=0 remote-answer"}}"#;
pub const REMOTE_ICE: &str =
    r#"{"ice":{"candidate":"candidate:1 1 udp 2122260223 10.0.0.9 50000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;

/// Keeps every frame the client writes, across reconnects.
#[derive(Default)]
pub struct RecordingConnector {
    links: Mutex<Vec<mpsc::UnboundedReceiver<String>>>,
    frames: Mutex<Vec<String>>,
}

impl RecordingConnector {
    pub fn opened(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    /// Frames sent since the last call.
    pub fn take_frames(&self) -> Vec<String> {
        let mut links = self.links.lock().unwrap();
        let mut frames = self.frames.lock().unwrap();
        for rx in links.iter_mut() {
            while let Ok(frame) = rx.try_recv() {
                frames.push(frame);
            }
        }
        std::mem::take(&mut *frames)
    }
}

impl RelayConnector for RecordingConnector {
    fn open(&self, _url: &Url, _epoch: u64, _events: mpsc::UnboundedSender<Event>) -> RelaySender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.links.lock().unwrap().push(rx);
        tx
    }
}

#[derive(Default)]
pub struct ScriptedChannel {
    handler: Mutex<Option<ChannelHandler>>,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl ScriptedChannel {
    pub fn fire(&self, event: ChannelEvent) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataChannel for ScriptedChannel {
    fn label(&self) -> String {
        "label".into()
    }

    fn install(&self, handler: ChannelHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    async fn send_text(&self, text: String) -> Result<(), NegotiationError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Shared record of everything the scripted negotiators were asked to do.
#[derive(Default)]
pub struct Script {
    log: Mutex<Vec<String>>,
    channels: Mutex<Vec<Arc<ScriptedChannel>>>,
    pub fail_media: AtomicBool,
}

impl Script {
    fn push(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.log().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log().iter().position(|e| e == entry)
    }

    pub fn channel(&self, index: usize) -> Arc<ScriptedChannel> {
        self.channels.lock().unwrap()[index].clone()
    }
}

pub struct ScriptedFactory(pub Arc<Script>);

#[async_trait]
impl NegotiatorFactory for ScriptedFactory {
    async fn create(
        &self,
        _settings: &RtcSettings,
        signals: NegotiatorSignals,
    ) -> Result<Arc<dyn Negotiator>, NegotiationError> {
        self.0.push("create");
        Ok(Arc::new(ScriptedNegotiator {
            script: self.0.clone(),
            signals,
        }))
    }
}

struct ScriptedNegotiator {
    script: Arc<Script>,
    signals: NegotiatorSignals,
}

pub fn host_candidate() -> IceCandidate {
    IceCandidate {
        candidate: "candidate:7 1 udp 2122260223 192.168.1.2 54321 typ host".into(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

#[async_trait]
impl Negotiator for ScriptedNegotiator {
    async fn attach_media(&self, constraints: &MediaConstraints) -> Result<MediaSummary, MediaError> {
        self.script.push("media");
        if self.script.fail_media.load(Ordering::SeqCst) {
            return Err(MediaError::Unavailable("no camera".into()));
        }
        Ok(MediaSummary {
            audio: constraints.audio,
            video: constraints.video,
        })
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, NegotiationError> {
        self.script.push(format!("channel:{label}"));
        let channel = Arc::new(ScriptedChannel::default());
        self.script.channels.lock().unwrap().push(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.script.push("create_offer");
        Ok(SessionDescription::new(SdpKind::Offer, "v=0 local-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.script.push("create_answer");
        Ok(SessionDescription::new(SdpKind::Answer, "v=0 local-answer"))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.script.push(format!("set_local:{}", desc.kind));
        // gathering starts while the local description is being applied
        self.signals.local_candidate(Some(host_candidate()));
        self.signals.local_candidate(None);
        Ok(desc)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        self.script.push(format!("set_remote:{}", desc.kind));
        Ok(())
    }

    async fn add_candidate(&self, _candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.script.push("candidate");
        Ok(())
    }

    async fn close(&self) {
        self.script.push("close");
    }
}

pub fn config() -> ClientConfig {
    ClientConfig {
        secure: false,
        peer_id: Some(LOCAL_ID.into()),
        ..ClientConfig::default()
    }
}

pub struct Harness {
    pub client: SignalingClient,
    pub relay: Arc<RecordingConnector>,
    pub script: Arc<Script>,
    pub ui: mpsc::UnboundedReceiver<UiEvent>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Harness {
    pub fn new(config: ClientConfig) -> Self {
        let relay = Arc::new(RecordingConnector::default());
        let script = Arc::new(Script::default());
        let (ui_tx, ui) = mpsc::unbounded_channel();
        let (client, events) = SignalingClient::new(
            config,
            relay.clone(),
            Arc::new(ScriptedFactory(script.clone())),
            Notifier::new(ui_tx),
        )
        .unwrap();
        Self {
            client,
            relay,
            script,
            ui,
            events,
        }
    }

    /// Connected, `HELLO 42` sent and acknowledged.
    pub fn registered(config: ClientConfig) -> Self {
        let mut harness = Self::new(config);
        harness.client.start();
        harness.relay(RelayEvent::Opened);
        harness.inbound("HELLO");
        harness
    }

    pub fn relay(&mut self, event: RelayEvent) {
        let epoch = self.client.link().epoch();
        self.client.handle(Event::Relay { epoch, event });
    }

    pub fn inbound(&mut self, text: &str) {
        self.relay(RelayEvent::Message(text.to_string()));
    }

    pub fn command(&mut self, command: UserCommand) {
        self.client.handle(Event::User(command));
    }

    /// Feeds queued completions back into the client until it goes quiet.
    pub async fn settle(&mut self) {
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(100), self.events.recv()).await
        {
            self.client.handle(event);
        }
    }

    pub fn frames(&self) -> Vec<String> {
        self.relay.take_frames()
    }

    pub fn ui_events(&mut self) -> Vec<UiEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.ui.try_recv() {
            seen.push(event);
        }
        seen
    }
}

pub fn json(frame: &str) -> serde_json::Value {
    serde_json::from_str(frame).unwrap()
}
