use crate::peer::types::{MediaSummary, SdpKind};

/// Label of the data channel created alongside the offer.
pub const DATA_CHANNEL_LABEL: &str = "label";

/// Reply sent back over a data channel for every text message received.
pub const ACK_MESSAGE: &str = "Hi! (from peercall)";

/// Progress of one description slot of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriptionState {
    #[default]
    None,
    /// Handed to the negotiator, completion not seen yet.
    Pending(SdpKind),
    Set(SdpKind),
}

impl DescriptionState {
    pub fn kind(&self) -> Option<SdpKind> {
        match self {
            DescriptionState::None => None,
            DescriptionState::Pending(kind) | DescriptionState::Set(kind) => Some(*kind),
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, DescriptionState::Set(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MediaState {
    #[default]
    Pending,
    Ready(MediaSummary),
    /// Acquisition failed; negotiating without local media.
    Degraded,
}

impl MediaState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, MediaState::Pending)
    }
}

/// Per-call negotiation bookkeeping owned by the controller.
#[derive(Debug, Clone, Default)]
pub struct CallState {
    pub local: DescriptionState,
    pub remote: DescriptionState,
    pub media: MediaState,
    /// Local description requested but waiting on its prerequisites.
    pub wanted_local: Option<SdpKind>,
    pub candidates_applied: usize,
}

impl CallState {
    /// Kind of local description this call has started or requested, if any.
    pub fn local_kind(&self) -> Option<SdpKind> {
        self.local.kind().or(self.wanted_local)
    }

    pub fn descriptions_complete(&self) -> bool {
        self.local.is_set() && self.remote.is_set()
    }
}
