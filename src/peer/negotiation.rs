//! Offer/answer sequencing for one call at a time.
//!
//! Each call gets a fresh negotiator instance driven by a worker task. The worker runs
//! operations strictly in submission order, so a candidate submitted after a remote
//! description is applied after it, and posts every completion back to the client's
//! queue tagged with the call's generation. Dropping the operation sender ends the
//! worker, which closes the instance and releases its media.

use crate::error::{CallError, NegotiationError, ProtocolError};
use crate::event::{Event, NegotiationEvent};
use crate::peer::negotiator::{Negotiator, NegotiatorFactory, NegotiatorSignals};
use crate::peer::state::{CallState, DescriptionState, MediaState, DATA_CHANNEL_LABEL};
use crate::peer::types::{
    ChannelOrigin, IceCandidate, MediaConstraints, MediaSummary, RtcSettings, SdpKind,
    SessionDescription,
};
use std::sync::Arc;
use tokio::sync::mpsc;

enum Op {
    CreateDataChannel(String),
    AttachMedia(MediaConstraints),
    CreateLocal(SdpKind),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
}

struct ActiveCall {
    generation: u64,
    ops: mpsc::UnboundedSender<Op>,
    state: CallState,
}

pub struct NegotiationController {
    factory: Arc<dyn NegotiatorFactory>,
    settings: RtcSettings,
    constraints: MediaConstraints,
    events: mpsc::UnboundedSender<Event>,
    next_generation: u64,
    active: Option<ActiveCall>,
}

impl NegotiationController {
    pub fn new(
        factory: Arc<dyn NegotiatorFactory>,
        settings: RtcSettings,
        constraints: MediaConstraints,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            factory,
            settings,
            constraints,
            events,
            next_generation: 0,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn generation(&self) -> Option<u64> {
        self.active.as_ref().map(|call| call.generation)
    }

    /// Completions from an earlier instance must not touch the current one.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == Some(generation)
    }

    pub fn state(&self) -> Option<&CallState> {
        self.active.as_ref().map(|call| &call.state)
    }

    /// Creates the negotiator instance for a new call and starts local media
    /// acquisition and the outbound data channel.
    pub fn start_call(&mut self) -> Result<u64, NegotiationError> {
        if self.active.is_some() {
            return Err(NegotiationError::AlreadyStarted);
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        let (ops, ops_rx) = mpsc::unbounded_channel();
        let signals = NegotiatorSignals::new(generation, self.events.clone());
        tokio::spawn(drive(
            self.factory.clone(),
            self.settings.clone(),
            signals,
            ops_rx,
        ));
        let _ = ops.send(Op::CreateDataChannel(DATA_CHANNEL_LABEL.to_string()));
        let _ = ops.send(Op::AttachMedia(self.constraints));
        tracing::debug!(target: "negotiation", generation, "negotiator instance created");
        self.active = Some(ActiveCall {
            generation,
            ops,
            state: CallState::default(),
        });
        Ok(generation)
    }

    /// Starts a call as the offering side. Rejected when an instance already exists,
    /// so an offer is never created twice for the same call.
    pub fn begin_as_offerer(&mut self) -> Result<u64, NegotiationError> {
        let generation = self.start_call()?;
        self.request_local(SdpKind::Offer)?;
        Ok(generation)
    }

    fn request_local(&mut self, kind: SdpKind) -> Result<(), NegotiationError> {
        let call = self.active.as_mut().ok_or(NegotiationError::Inactive)?;
        if call.state.local_kind().is_some() {
            return Err(NegotiationError::AlreadyStarted);
        }
        call.state.wanted_local = Some(kind);
        self.advance();
        Ok(())
    }

    pub fn on_remote_description(&mut self, desc: SessionDescription) -> Result<(), CallError> {
        let call = self.active.as_mut().ok_or(NegotiationError::Inactive)?;
        let local = call.state.local_kind();
        let unexpected = |role: &str| ProtocolError::UnexpectedDescription {
            kind: desc.kind.to_string(),
            role: role.to_string(),
        };
        match desc.kind {
            SdpKind::Offer if local == Some(SdpKind::Offer) => return Err(unexpected("offerer").into()),
            SdpKind::Answer if local != Some(SdpKind::Offer) => return Err(unexpected("answerer").into()),
            SdpKind::Pranswer | SdpKind::Rollback => return Err(unexpected("either role").into()),
            _ => {}
        }
        if call.state.remote != DescriptionState::None {
            return Err(ProtocolError::DuplicateDescription(desc.kind.to_string()).into());
        }
        call.state.remote = DescriptionState::Pending(desc.kind);
        tracing::debug!(target: "negotiation", kind = %desc.kind, "applying remote description");
        call.ops
            .send(Op::SetRemote(desc))
            .map_err(|_| NegotiationError::Inactive)?;
        Ok(())
    }

    /// A remote description has been handed to the negotiator, so candidates queued
    /// behind it on the operation chain will find it applied.
    pub fn remote_description_known(&self) -> bool {
        self.state()
            .map(|state| state.remote != DescriptionState::None)
            .unwrap_or(false)
    }

    pub fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let call = self.active.as_ref().ok_or(NegotiationError::Inactive)?;
        call.ops
            .send(Op::AddCandidate(candidate))
            .map_err(|_| NegotiationError::Inactive)
    }

    pub fn on_media_settled(&mut self, summary: Option<MediaSummary>) {
        if let Some(call) = self.active.as_mut() {
            call.state.media = match summary {
                Some(summary) => MediaState::Ready(summary),
                None => MediaState::Degraded,
            };
        }
        self.advance();
    }

    pub fn on_remote_applied(&mut self, kind: SdpKind) {
        let Some(call) = self.active.as_mut() else {
            return;
        };
        call.state.remote = DescriptionState::Set(kind);
        if kind == SdpKind::Offer && call.state.local_kind().is_none() {
            call.state.wanted_local = Some(SdpKind::Answer);
        }
        self.advance();
    }

    pub fn on_local_applied(&mut self, kind: SdpKind) {
        if let Some(call) = self.active.as_mut() {
            call.state.local = DescriptionState::Set(kind);
        }
    }

    pub fn on_candidate_applied(&mut self) {
        if let Some(call) = self.active.as_mut() {
            call.state.candidates_applied += 1;
        }
    }

    pub fn descriptions_complete(&self) -> bool {
        self.state()
            .map(CallState::descriptions_complete)
            .unwrap_or(false)
    }

    /// Discards the current instance. Its worker finishes the operation in flight,
    /// then closes the negotiator; completions it still posts are stale.
    pub fn reset(&mut self) -> bool {
        match self.active.take() {
            Some(call) => {
                tracing::debug!(target: "negotiation", generation = call.generation, "negotiator discarded");
                true
            }
            None => false,
        }
    }

    // Local description creation waits for settled media, and an answer also waits
    // for the remote offer to be applied.
    fn advance(&mut self) {
        let Some(call) = self.active.as_mut() else {
            return;
        };
        let state = &mut call.state;
        let Some(kind) = state.wanted_local else {
            return;
        };
        if state.local != DescriptionState::None || !state.media.is_settled() {
            return;
        }
        if kind == SdpKind::Answer && state.remote != DescriptionState::Set(SdpKind::Offer) {
            return;
        }
        state.wanted_local = None;
        state.local = DescriptionState::Pending(kind);
        tracing::debug!(target: "negotiation", %kind, "creating local description");
        let _ = call.ops.send(Op::CreateLocal(kind));
    }
}

async fn drive(
    factory: Arc<dyn NegotiatorFactory>,
    settings: RtcSettings,
    signals: NegotiatorSignals,
    mut ops: mpsc::UnboundedReceiver<Op>,
) {
    let negotiator = match factory.create(&settings, signals.clone()).await {
        Ok(negotiator) => negotiator,
        Err(err) => {
            signals.post(NegotiationEvent::Failed(err));
            return;
        }
    };
    while let Some(op) = ops.recv().await {
        let event = match op {
            Op::CreateDataChannel(label) => match negotiator.create_data_channel(&label).await {
                Ok(channel) => {
                    signals.data_channel(channel, ChannelOrigin::Local);
                    continue;
                }
                Err(err) => NegotiationEvent::Failed(err),
            },
            Op::AttachMedia(constraints) => {
                NegotiationEvent::MediaSettled(negotiator.attach_media(&constraints).await)
            }
            Op::CreateLocal(kind) => match create_local(negotiator.as_ref(), kind).await {
                Ok(desc) => NegotiationEvent::LocalDescription(desc),
                Err(err) => NegotiationEvent::Failed(err),
            },
            Op::SetRemote(desc) => {
                let kind = desc.kind;
                match negotiator.set_remote_description(desc).await {
                    Ok(()) => NegotiationEvent::RemoteDescriptionApplied(kind),
                    Err(err) => NegotiationEvent::Failed(err),
                }
            }
            Op::AddCandidate(candidate) => match negotiator.add_candidate(candidate).await {
                Ok(()) => NegotiationEvent::CandidateApplied,
                Err(err) => NegotiationEvent::Failed(err),
            },
        };
        signals.post(event);
    }
    negotiator.close().await;
    tracing::debug!(target: "negotiation", generation = signals.generation(), "negotiator closed");
}

async fn create_local(
    negotiator: &dyn Negotiator,
    kind: SdpKind,
) -> Result<SessionDescription, NegotiationError> {
    let desc = match kind {
        SdpKind::Answer => negotiator.create_answer().await?,
        _ => negotiator.create_offer().await?,
    };
    negotiator.set_local_description(desc).await
}
