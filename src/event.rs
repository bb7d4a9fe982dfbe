//! Events delivered to the client's single dispatch queue.
//!
//! Every asynchronous step (relay I/O, negotiator work, timers) finishes by posting one of
//! these back to the loop. Each carries the epoch or generation it was started under so the
//! loop can drop completions that belong to a connection or call that no longer exists.

use crate::error::{MediaError, NegotiationError};
use crate::peer::negotiator::DataChannel;
use crate::peer::types::{ChannelOrigin, IceCandidate, MediaSummary, SdpKind, SessionDescription};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

pub enum Event {
    Relay { epoch: u64, event: RelayEvent },
    RetryDue { epoch: u64 },
    Negotiation { generation: u64, event: NegotiationEvent },
    Channel {
        generation: u64,
        channel: ChannelId,
        event: ChannelEvent,
    },
    User(UserCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Opened,
    Message(String),
    Error(String),
    Closed,
}

pub enum NegotiationEvent {
    MediaSettled(Result<MediaSummary, MediaError>),
    /// Applied as the local description and ready to transmit.
    LocalDescription(SessionDescription),
    RemoteDescriptionApplied(SdpKind),
    CandidateApplied,
    LocalCandidate(Option<IceCandidate>),
    /// Posted before any of the channel's own events.
    DataChannel {
        id: ChannelId,
        channel: Arc<dyn DataChannel>,
        origin: ChannelOrigin,
    },
    RemoteTrack(String),
    Failed(NegotiationError),
}

impl fmt::Debug for NegotiationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationEvent::MediaSettled(res) => write!(f, "MediaSettled({res:?})"),
            NegotiationEvent::LocalDescription(desc) => write!(f, "LocalDescription({})", desc.kind),
            NegotiationEvent::RemoteDescriptionApplied(kind) => {
                write!(f, "RemoteDescriptionApplied({kind})")
            }
            NegotiationEvent::CandidateApplied => f.write_str("CandidateApplied"),
            NegotiationEvent::LocalCandidate(c) => write!(f, "LocalCandidate({})", c.is_some()),
            NegotiationEvent::DataChannel { id, channel, origin } => {
                write!(f, "DataChannel({}, {}, {origin:?})", id.0, channel.label())
            }
            NegotiationEvent::RemoteTrack(kind) => write!(f, "RemoteTrack({kind})"),
            NegotiationEvent::Failed(err) => write!(f, "Failed({err})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Text(String),
    Binary(Bytes),
    Error(String),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Request a session with the given peer id.
    Call(String),
    SendText(String),
    /// Reset: close the relay link and go through teardown and reconnect.
    Disconnect,
    Shutdown,
}
