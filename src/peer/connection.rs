//! `webrtc` crate implementation of the negotiator capability interface.

use crate::error::{MediaError, NegotiationError};
use crate::event::ChannelEvent;
use crate::peer::negotiator::{ChannelHandler, DataChannel, Negotiator, NegotiatorFactory, NegotiatorSignals};
use crate::peer::types::{
    ChannelOrigin, IceCandidate, MediaConstraints, MediaSummary, RtcSettings, SdpKind,
    SessionDescription,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const STREAM_ID: &str = "peercall";

/// Builds a `webrtc` peer connection per call.
#[derive(Debug, Clone, Default)]
pub struct WebRtcFactory;

#[async_trait]
impl NegotiatorFactory for WebRtcFactory {
    async fn create(
        &self,
        settings: &RtcSettings,
        signals: NegotiatorSignals,
    ) -> Result<Arc<dyn Negotiator>, NegotiationError> {
        let create_err = |err: webrtc::Error| NegotiationError::Create(err.to_string());
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(create_err)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(create_err)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let pc = Arc::new(
            api.new_peer_connection(rtc_config(settings))
                .await
                .map_err(create_err)?,
        );
        wire_callbacks(&pc, signals);
        tracing::info!(target: "negotiation", "Creating RTCPeerConnection");
        Ok(Arc::new(WebRtcNegotiator { pc }))
    }
}

fn wire_callbacks(pc: &Arc<RTCPeerConnection>, signals: NegotiatorSignals) {
    let candidate_signals = signals.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => match c.to_json() {
                Ok(init) => candidate_signals.local_candidate(Some(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                })),
                Err(err) => tracing::warn!(target: "ice", "unserializable local candidate: {err}"),
            },
            None => candidate_signals.local_candidate(None),
        }
        Box::pin(async {})
    }));

    let channel_signals = signals.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        tracing::info!(target: "datachannel", label = dc.label(), "Data channel created");
        channel_signals.data_channel(Arc::new(RtcChannel(dc)), ChannelOrigin::Remote);
        Box::pin(async {})
    }));

    let track_signals = signals.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            tracing::info!(target: "negotiation", kind = %track.kind(), "Incoming stream");
            track_signals.remote_track(track.kind().to_string());
            Box::pin(async {})
        },
    ));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        tracing::debug!(target: "ice", "ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    let pc_stats = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        tracing::debug!(target: "negotiation", generation = signals.generation(), "Peer connection state changed to: {:?}", st);
        if st == RTCPeerConnectionState::Failed {
            if let Some(pc) = pc_stats.upgrade() {
                tokio::spawn(async move { dump_selected_pair(&pc, "FAILED").await });
            }
        }
        Box::pin(async {})
    }));
}

/// Logs the nominated candidate pair.
async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, report) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = report {
            if pair.nominated {
                tracing::debug!(
                    target: "ice",
                    "STATS {moment}: {}:{} bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

fn rtc_config(settings: &RtcSettings) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(settings),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(settings: &RtcSettings) -> Vec<RTCIceServer> {
    settings
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server
                .urls
                .iter()
                .map(|url| add_ice_url_scheme(url, server))
                .collect(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let kind = desc.kind;
    let parsed = match kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpKind::Rollback => {
            return Err(NegotiationError::step("parse description", "rollback is not supported"))
        }
    };
    parsed.map_err(|err| NegotiationError::step("parse description", err))
}

fn from_rtc(desc: &RTCSessionDescription) -> Result<SessionDescription, NegotiationError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(NegotiationError::step("read description", "unspecified sdp type"))
        }
    };
    Ok(SessionDescription::new(kind, desc.sdp.clone()))
}

pub struct WebRtcNegotiator {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcNegotiator {
    async fn add_local_track(&self, mime_type: &str, id: &str) -> Result<(), MediaError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            STREAM_ID.to_owned(),
        ));
        self.pc
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|err| MediaError::Unavailable(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Negotiator for WebRtcNegotiator {
    async fn attach_media(&self, constraints: &MediaConstraints) -> Result<MediaSummary, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::NoTracksRequested);
        }
        let mut summary = MediaSummary::default();
        let mut last_err = None;
        if constraints.audio {
            match self.add_local_track(MIME_TYPE_OPUS, "audio").await {
                Ok(()) => summary.audio = true,
                Err(err) => last_err = Some(err),
            }
        }
        if constraints.video {
            match self.add_local_track(MIME_TYPE_VP8, "video").await {
                Ok(()) => summary.video = true,
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(err) if !summary.audio && !summary.video => Err(err),
            Some(err) => {
                tracing::warn!(target: "negotiation", "continuing with partial media: {err}");
                Ok(summary)
            }
            None => {
                tracing::debug!(target: "negotiation", ?summary, "Adding local stream");
                Ok(summary)
            }
        }
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, NegotiationError> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|err| NegotiationError::Channel(err.to_string()))?;
        Ok(Arc::new(RtcChannel(dc)))
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|err| NegotiationError::step("create offer", err))?;
        from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|err| NegotiationError::step("create answer", err))?;
        from_rtc(&answer)
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        let rtc = to_rtc(desc.clone())?;
        self.pc
            .set_local_description(rtc)
            .await
            .map_err(|err| NegotiationError::step("set local description", err))?;
        match self.pc.local_description().await {
            Some(applied) => from_rtc(&applied),
            None => Ok(desc),
        }
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let rtc = to_rtc(desc)?;
        self.pc
            .set_remote_description(rtc)
            .await
            .map_err(|err| NegotiationError::step("set remote description", err))
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| NegotiationError::Candidate(err.to_string()))
    }

    async fn close(&self) {
        // closing the connection stops the local tracks
        if let Err(err) = self.pc.close().await {
            tracing::warn!(target: "negotiation", "error closing peer connection: {err}");
        }
    }
}

pub struct RtcChannel(Arc<RTCDataChannel>);

#[async_trait]
impl DataChannel for RtcChannel {
    fn label(&self) -> String {
        self.0.label().to_string()
    }

    fn install(&self, handler: ChannelHandler) {
        let on_open = handler.clone();
        self.0.on_open(Box::new(move || {
            on_open(ChannelEvent::Open);
            Box::pin(async {})
        }));

        let on_message = handler.clone();
        self.0.on_message(Box::new(move |msg: DataChannelMessage| {
            let event = if msg.is_string {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => ChannelEvent::Text(text),
                    Err(_) => ChannelEvent::Binary(msg.data),
                }
            } else {
                ChannelEvent::Binary(msg.data)
            };
            on_message(event);
            Box::pin(async {})
        }));

        let on_error = handler.clone();
        self.0.on_error(Box::new(move |err: webrtc::Error| {
            on_error(ChannelEvent::Error(err.to_string()));
            Box::pin(async {})
        }));

        self.0.on_close(Box::new(move || {
            handler(ChannelEvent::Close);
            Box::pin(async {})
        }));
    }

    async fn send_text(&self, text: String) -> Result<(), NegotiationError> {
        self.0
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|err| NegotiationError::Channel(err.to_string()))
    }

    async fn close(&self) {
        if let Err(err) = self.0.close().await {
            tracing::debug!(target: "datachannel", "error closing data channel: {err}");
        }
    }
}
