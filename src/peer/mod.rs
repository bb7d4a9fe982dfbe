pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod negotiation;
pub mod negotiator;
pub mod state;
pub mod types;

pub use connection::WebRtcFactory;
pub use negotiation::NegotiationController;
pub use negotiator::{ChannelHandler, DataChannel, Negotiator, NegotiatorFactory, NegotiatorSignals};
pub use types::{IceCandidate, MediaConstraints, RtcSettings, SdpKind, SessionDescription};
