//! The event loop context: every piece of mutable call state lives in
//! [`SignalingClient`] and is touched only from [`SignalingClient::handle`].

use crate::config::ClientConfig;
use crate::error::{CallError, ProtocolError, TransportError, UserInputError};
use crate::event::{ChannelEvent, ChannelId, Event, NegotiationEvent, RelayEvent, UserCommand};
use crate::logger::{Notifier, UiEvent};
use crate::peer::data_channel::DataChannelLifecycle;
use crate::peer::ice::CandidateRelay;
use crate::peer::negotiation::NegotiationController;
use crate::peer::negotiator::NegotiatorFactory;
use crate::peer::types::SdpKind;
use crate::session::{Role, SessionState, SignalingSession};
use crate::signaling::{self, Inbound, Outbound, Payload};
use crate::transport::{RelayConnector, RetryDecision, TransportLink};
use crate::utils::random_peer_id;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const GAVE_UP_MESSAGE: &str = "Too many connection attempts, aborting. Restart to try again";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct SignalingClient {
    config: ClientConfig,
    link: TransportLink,
    session: SignalingSession,
    negotiation: NegotiationController,
    candidates: CandidateRelay,
    channels: DataChannelLifecycle,
    notifier: Notifier,
    events: mpsc::UnboundedSender<Event>,
    remote_tracks: usize,
}

impl SignalingClient {
    /// Builds the client and the queue it drains. Nothing is sent until [`start`].
    ///
    /// [`start`]: SignalingClient::start
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn RelayConnector>,
        factory: Arc<dyn NegotiatorFactory>,
        notifier: Notifier,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Event>), TransportError> {
        let (events, rx) = mpsc::unbounded_channel();
        let link = TransportLink::new(
            config.relay_url()?,
            connector,
            events.clone(),
            config.retry,
        );
        let negotiation = NegotiationController::new(
            factory,
            config.rtc.clone(),
            config.constraints,
            events.clone(),
        );
        let client = Self {
            config,
            link,
            session: SignalingSession::new(),
            negotiation,
            candidates: CandidateRelay::new(),
            channels: DataChannelLifecycle::new(),
            notifier,
            events,
            remote_tracks: 0,
        };
        Ok((client, rx))
    }

    /// Sender for user commands and anything else that feeds the loop.
    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.events.clone()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &SignalingSession {
        &self.session
    }

    pub fn link(&self) -> &TransportLink {
        &self.link
    }

    pub fn negotiation(&self) -> &NegotiationController {
        &self.negotiation
    }

    pub fn candidates(&self) -> &CandidateRelay {
        &self.candidates
    }

    pub fn channels(&self) -> &DataChannelLifecycle {
        &self.channels
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn start(&mut self) {
        self.connect();
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        self.start();
        while let Some(event) = events.recv().await {
            if self.handle(event) == Flow::Exit {
                break;
            }
        }
        tracing::debug!(target: "signaling", "event loop finished");
    }

    /// Runs one event to completion. Events from a replaced connection or a
    /// discarded negotiator are dropped here.
    pub fn handle(&mut self, event: Event) -> Flow {
        match event {
            Event::Relay { epoch, event } => {
                if self.link.is_current(epoch) {
                    self.on_relay(event);
                } else {
                    tracing::trace!(target: "relay", epoch, ?event, "stale relay event");
                }
            }
            Event::RetryDue { epoch } => {
                if self.link.take_retry(epoch) {
                    self.connect();
                }
            }
            Event::Negotiation { generation, event } => {
                if self.negotiation.is_current(generation) {
                    self.on_negotiation(event);
                } else {
                    tracing::debug!(target: "negotiation", generation, ?event, "stale negotiation event");
                }
            }
            Event::Channel {
                generation,
                channel,
                event,
            } => {
                if self.negotiation.is_current(generation) {
                    self.on_channel(channel, event);
                }
            }
            Event::User(command) => return self.on_user(command),
        }
        Flow::Continue
    }

    fn connect(&mut self) {
        self.notifier.clear();
        let peer_id = self
            .config
            .peer_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(random_peer_id);
        match self.link.connect() {
            Ok(_) => {
                self.session.on_connecting(peer_id);
                let status = format!("Connecting to server {}", self.link.url());
                self.notifier.set_status(status);
            }
            Err(err) => self.notifier.set_error(err.to_string()),
        }
    }

    fn on_relay(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Opened => {
                self.link.on_opened();
                let Some(peer_id) = self.session.local_peer_id().map(str::to_string) else {
                    return;
                };
                self.send(Outbound::Hello(peer_id.clone()));
                self.notifier.emit(UiEvent::PeerId(peer_id));
                self.notifier.set_status("Registering with server");
            }
            RelayEvent::Message(text) => match signaling::decode(&text) {
                Ok(inbound) => self.on_inbound(inbound),
                Err(err) => self.fail(err.into()),
            },
            RelayEvent::Error(reason) => {
                self.link.on_error(&reason);
                self.notifier.set_error("Unable to connect to server");
            }
            RelayEvent::Closed => {
                self.notifier.set_status("Disconnected from server");
                self.teardown();
                let decision = self.link.on_closed();
                self.after_close(decision);
            }
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Hello => self.on_registered(),
            Inbound::SessionOk => self.on_session_ok(),
            Inbound::OfferRequest => self.on_offer_request(),
            Inbound::ServerError(text) => self.fail(ProtocolError::Server(text).into()),
            Inbound::Payload(payload) => self.on_payload(payload),
        }
    }

    fn on_registered(&mut self) {
        if !self.session.on_registered() {
            tracing::warn!(target: "signaling", state = ?self.session.state(), "unexpected HELLO ignored");
            return;
        }
        self.link.reset_attempts();
        self.notifier
            .set_status("Registered with server, waiting for call");
        if let Some(peer) = self.config.call.clone() {
            self.request_session(&peer);
        }
    }

    fn request_session(&mut self, peer: &str) {
        match self.session.request_session(peer) {
            Ok(frame) => {
                tracing::info!(target: "signaling", peer, "requesting session");
                self.send(frame);
            }
            Err(err) => self.fail(err.into()),
        }
    }

    fn on_session_ok(&mut self) {
        let Some(role) = self.session.on_session_ok(self.config.remote_offerer) else {
            tracing::warn!(target: "signaling", state = ?self.session.state(), "unexpected SESSION_OK ignored");
            return;
        };
        match role {
            Role::Answerer => {
                self.send(Outbound::OfferRequest);
                self.notifier
                    .set_status("Sent OFFER_REQUEST, waiting for offer");
            }
            Role::Offerer if !self.negotiation.is_active() => self.begin_offer(),
            _ => {}
        }
    }

    fn on_offer_request(&mut self) {
        if self.negotiation.is_active() {
            tracing::debug!(target: "signaling", "OFFER_REQUEST ignored, call already started");
            return;
        }
        if !self.session.accept_offer_request() {
            tracing::warn!(target: "signaling", "OFFER_REQUEST ignored, acting as answerer");
            return;
        }
        self.begin_offer();
    }

    fn begin_offer(&mut self) {
        match self.negotiation.begin_as_offerer() {
            Ok(generation) => {
                tracing::debug!(target: "signaling", generation, "starting call as offerer");
                self.on_call_started();
                self.notifier.set_status("Starting negotiation");
            }
            Err(err) => self.fail(err.into()),
        }
    }

    fn on_call_started(&mut self) {
        self.link.reset_attempts();
        self.session.on_call_started();
    }

    fn on_payload(&mut self, payload: Payload) {
        if !self.negotiation.is_active() {
            if !payload.is_description() {
                tracing::warn!(target: "signaling", "first message from peer is not an SDP description");
            }
            if let Err(err) = self.negotiation.start_call() {
                return self.fail(err.into());
            }
            self.on_call_started();
            self.notifier
                .set_status("Created peer connection for call, waiting for SDP");
        }
        match payload {
            Payload::Description(desc) => {
                let role = match desc.kind {
                    SdpKind::Offer => Role::Answerer,
                    _ => Role::Offerer,
                };
                if let Err(err) = self.negotiation.on_remote_description(desc) {
                    return self.fail(err);
                }
                self.session.resolve_role(role);
            }
            Payload::Candidate(candidate) => {
                if let Err(err) = self
                    .candidates
                    .on_remote_candidate(candidate, &mut self.negotiation)
                {
                    self.fail(err.into());
                }
            }
        }
    }

    fn on_negotiation(&mut self, event: NegotiationEvent) {
        match event {
            NegotiationEvent::MediaSettled(Ok(summary)) => {
                tracing::debug!(target: "negotiation", ?summary, "local media attached");
                self.negotiation.on_media_settled(Some(summary));
            }
            NegotiationEvent::MediaSettled(Err(err)) => {
                self.fail(err.into());
                self.negotiation.on_media_settled(None);
            }
            NegotiationEvent::LocalDescription(desc) => {
                self.negotiation.on_local_applied(desc.kind);
                tracing::info!(target: "negotiation", kind = %desc.kind, "Sending SDP");
                self.send(Outbound::Description(desc));
                for frame in self.candidates.on_local_description_sent() {
                    self.send(frame);
                }
                self.check_connected();
            }
            NegotiationEvent::RemoteDescriptionApplied(kind) => {
                tracing::debug!(target: "negotiation", %kind, "remote description set");
                self.negotiation.on_remote_applied(kind);
                self.check_connected();
            }
            NegotiationEvent::CandidateApplied => self.negotiation.on_candidate_applied(),
            NegotiationEvent::LocalCandidate(candidate) => {
                if let Some(frame) = self.candidates.on_local_candidate(candidate) {
                    self.send(frame);
                }
            }
            NegotiationEvent::DataChannel {
                id,
                channel,
                origin,
            } => self.channels.attach(id, channel, origin),
            NegotiationEvent::RemoteTrack(kind) => {
                self.remote_tracks += 1;
                tracing::info!(target: "negotiation", %kind, "remote track");
                self.check_connected();
            }
            NegotiationEvent::Failed(err) => self.fail(err.into()),
        }
    }

    fn on_channel(&mut self, id: ChannelId, event: ChannelEvent) {
        if self.channels.on_event(id, event, &mut self.notifier) {
            self.check_connected();
        }
    }

    fn check_connected(&mut self) {
        let media_flowing = self.channels.any_open() || self.remote_tracks > 0;
        if self.negotiation.descriptions_complete()
            && media_flowing
            && self.session.on_connected()
        {
            self.notifier.set_status("Connected");
            self.notifier.emit(UiEvent::CallActive(true));
        }
    }

    fn on_user(&mut self, command: UserCommand) -> Flow {
        match command {
            UserCommand::Call(peer) => self.request_session(&peer),
            UserCommand::SendText(text) => {
                if self.channels.send_text(&text, &self.notifier) == 0 {
                    self.fail(UserInputError::NoChannel.into());
                }
            }
            UserCommand::Disconnect => {
                tracing::info!(target: "signaling", "disconnect requested");
                self.notifier.set_status("Disconnected from server");
                self.teardown();
                let decision = self.link.close();
                self.after_close(decision);
            }
            UserCommand::Shutdown => {
                self.teardown();
                self.link.shutdown();
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    /// Fatal errors end the session and send the link through reconnect; the rest
    /// only reach the status line.
    fn fail(&mut self, err: CallError) {
        if !err.is_fatal() {
            tracing::warn!(target: "signaling", "{err}");
            self.notifier.set_status(err.to_string());
            return;
        }
        self.notifier.set_error(err.to_string());
        self.teardown();
        let decision = self.link.close();
        self.after_close(decision);
    }

    fn after_close(&mut self, decision: RetryDecision) {
        match decision {
            RetryDecision::Scheduled(delay) => {
                tracing::debug!(target: "relay", ?delay, attempts = self.link.attempts(), "reconnect scheduled");
            }
            RetryDecision::GaveUp(failures) => {
                tracing::error!(target: "relay", failures, "retry cap exceeded");
                self.notifier.set_error(GAVE_UP_MESSAGE);
            }
            RetryDecision::Ignored => {}
        }
    }

    /// Releases everything the session owned: channels, negotiator and media,
    /// candidate bookkeeping, then the session itself.
    fn teardown(&mut self) {
        let had_call = self.negotiation.is_active();
        self.channels.close_all();
        if self.negotiation.reset() {
            tracing::debug!(target: "signaling", "negotiator discarded, media released");
        }
        self.candidates.reset();
        self.remote_tracks = 0;
        self.session.reset();
        if had_call {
            self.notifier.emit(UiEvent::CallActive(false));
        }
    }

    fn send(&mut self, frame: Outbound) {
        if let Err(err) = self.link.send(signaling::encode(&frame)) {
            self.fail(err.into());
        }
    }
}
