use thiserror::Error;

/// Failures of the relay connection itself.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid relay url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("tls setup failed: {0}")]
    Tls(String),
    #[error("relay link is not open")]
    NotOpen,
    #[error("relay link closed")]
    ChannelClosed,
    #[error("too many connection attempts ({0}), giving up")]
    RetriesExhausted(u32),
}

/// Malformed or unexpected relay traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{0}")]
    Server(String),
    #[error("Error parsing incoming JSON: {raw}")]
    MalformedJson {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unknown incoming JSON: {0}")]
    UnknownPayload(String),
    #[error("unexpected {kind} description while acting as {role}")]
    UnexpectedDescription { kind: String, role: String },
    #[error("duplicate remote {0} description")]
    DuplicateDescription(String),
}

/// Failures reported by the negotiator while building the connection.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("failed to create negotiator: {0}")]
    Create(String),
    #[error("{step} failed: {reason}")]
    Step { step: &'static str, reason: String },
    #[error("failed to add ICE candidate: {0}")]
    Candidate(String),
    #[error("data channel error: {0}")]
    Channel(String),
    #[error("negotiation already started for this call")]
    AlreadyStarted,
    #[error("no active negotiator")]
    Inactive,
}

impl NegotiationError {
    pub fn step(step: &'static str, reason: impl ToString) -> Self {
        NegotiationError::Step {
            step,
            reason: reason.to_string(),
        }
    }
}

/// Local media could not be acquired; negotiation continues without it.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("no audio or video requested")]
    NoTracksRequested,
    #[error("Error accessing media devices: {0}")]
    Unavailable(String),
}

/// Rejected locally, never reaches the relay.
#[derive(Debug, Error)]
pub enum UserInputError {
    #[error("Peer id must be filled out")]
    EmptyPeerId,
    #[error("ERROR parsing {what}: {source}, using default {what}")]
    InvalidConfig {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("not registered with the relay yet")]
    NotRegistered,
    #[error("a session is already active")]
    SessionActive,
    #[error("no open data channel")]
    NoChannel,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    UserInput(#[from] UserInputError),
}

impl CallError {
    /// Fatal errors tear the session down and send the link back through reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CallError::Transport(_) | CallError::Protocol(_) | CallError::Negotiation(_)
        )
    }
}
