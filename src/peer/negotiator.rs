//! Capability interface of the media-negotiation engine.
//!
//! The signaling core only talks to these traits. `peer::connection` provides the
//! `webrtc` crate implementation; tests provide scripted ones.

use crate::error::{MediaError, NegotiationError};
use crate::event::{ChannelEvent, ChannelId, Event, NegotiationEvent};
use crate::peer::types::{
    ChannelOrigin, IceCandidate, MediaConstraints, MediaSummary, RtcSettings, SessionDescription,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub type ChannelHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;

    /// Installs the open/message/error/close callbacks.
    fn install(&self, handler: ChannelHandler);

    async fn send_text(&self, text: String) -> Result<(), NegotiationError>;

    async fn close(&self);
}

#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Acquire local media per `constraints` and attach the tracks.
    async fn attach_media(&self, constraints: &MediaConstraints) -> Result<MediaSummary, MediaError>;

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, NegotiationError>;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    /// Applies `desc` and returns the effective local description.
    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), NegotiationError>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    /// Tears the instance down and releases local media.
    async fn close(&self);
}

#[async_trait]
pub trait NegotiatorFactory: Send + Sync {
    async fn create(
        &self,
        settings: &RtcSettings,
        signals: NegotiatorSignals,
    ) -> Result<Arc<dyn Negotiator>, NegotiationError>;
}

/// Callback sink handed to a negotiator instance; posts into the client's queue
/// tagged with the instance's generation.
#[derive(Clone)]
pub struct NegotiatorSignals {
    generation: u64,
    tx: mpsc::UnboundedSender<Event>,
    next_channel: Arc<AtomicU64>,
}

impl NegotiatorSignals {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            generation,
            tx,
            next_channel: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `None` marks the end of candidate gathering.
    pub fn local_candidate(&self, candidate: Option<IceCandidate>) {
        self.post(NegotiationEvent::LocalCandidate(candidate));
    }

    /// Announces the channel, then installs its callbacks. Call it from inside the
    /// engine's channel callback so no message can slip past unhandled.
    pub fn data_channel(&self, channel: Arc<dyn DataChannel>, origin: ChannelOrigin) -> ChannelId {
        let id = ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::debug!(target: "datachannel", label = %channel.label(), ?origin, "attaching data channel");
        self.post(NegotiationEvent::DataChannel {
            id,
            channel: channel.clone(),
            origin,
        });
        let (generation, tx) = (self.generation, self.tx.clone());
        let handler: ChannelHandler = Arc::new(move |event| {
            let _ = tx.send(Event::Channel {
                generation,
                channel: id,
                event,
            });
        });
        channel.install(handler);
        id
    }

    pub fn remote_track(&self, kind: impl Into<String>) {
        self.post(NegotiationEvent::RemoteTrack(kind.into()));
    }

    pub(crate) fn post(&self, event: NegotiationEvent) {
        let _ = self.tx.send(Event::Negotiation {
            generation: self.generation,
            event,
        });
    }
}
