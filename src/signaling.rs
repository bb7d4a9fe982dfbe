//! Relay wire protocol: plain-text tokens plus `{"sdp": ...}` / `{"ice": ...}` JSON frames.
//!
//! Frames are decoded once here into [`Inbound`]; the client matches on the variant and
//! never looks at raw text again.

use crate::error::ProtocolError;
use crate::peer::types::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

pub const HELLO: &str = "HELLO";
pub const SESSION: &str = "SESSION";
pub const SESSION_OK: &str = "SESSION_OK";
pub const OFFER_REQUEST: &str = "OFFER_REQUEST";
pub const ERROR: &str = "ERROR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Registration acknowledged.
    Hello,
    SessionOk,
    /// The remote peer wants us to send the offer.
    OfferRequest,
    /// `ERROR <reason>`; the whole frame is kept for display.
    ServerError(String),
    Payload(Payload),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Description(SessionDescription),
    Candidate(IceCandidate),
}

impl Payload {
    pub fn is_description(&self) -> bool {
        matches!(self, Payload::Description(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Hello(String),
    Session(String),
    OfferRequest,
    Description(SessionDescription),
    Candidate(IceCandidate),
}

#[derive(Deserialize)]
struct RawPayload {
    #[serde(default)]
    sdp: Option<SessionDescription>,
    #[serde(default)]
    ice: Option<IceCandidate>,
}

#[derive(Serialize)]
struct SdpFrame<'a> {
    sdp: &'a SessionDescription,
}

#[derive(Serialize)]
struct IceFrame<'a> {
    ice: &'a IceCandidate,
}

pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
    match text {
        HELLO => return Ok(Inbound::Hello),
        SESSION_OK => return Ok(Inbound::SessionOk),
        OFFER_REQUEST => return Ok(Inbound::OfferRequest),
        _ => {}
    }
    if text.starts_with(ERROR) {
        return Ok(Inbound::ServerError(text.to_string()));
    }
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|source| ProtocolError::MalformedJson {
            raw: text.to_string(),
            source,
        })?;
    if !value.is_object() {
        return Err(ProtocolError::UnknownPayload(text.to_string()));
    }
    let raw: RawPayload =
        serde_json::from_value(value).map_err(|source| ProtocolError::MalformedJson {
            raw: text.to_string(),
            source,
        })?;
    match (raw.sdp, raw.ice) {
        (Some(desc), _) => Ok(Inbound::Payload(Payload::Description(desc))),
        (None, Some(cand)) => Ok(Inbound::Payload(Payload::Candidate(cand))),
        (None, None) => Err(ProtocolError::UnknownPayload(text.to_string())),
    }
}

pub fn encode(message: &Outbound) -> String {
    match message {
        Outbound::Hello(peer_id) => format!("{HELLO} {peer_id}"),
        Outbound::Session(peer_id) => format!("{SESSION} {peer_id}"),
        Outbound::OfferRequest => OFFER_REQUEST.to_string(),
        // serializing these plain structs cannot fail
        Outbound::Description(desc) => {
            serde_json::to_string(&SdpFrame { sdp: desc }).unwrap_or_default()
        }
        Outbound::Candidate(cand) => {
            serde_json::to_string(&IceFrame { ice: cand }).unwrap_or_default()
        }
    }
}
