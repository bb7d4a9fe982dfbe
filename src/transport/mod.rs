pub mod link;
pub mod ws;

pub use link::{ConnectionAttemptCounter, LinkState, RelayConnector, RelaySender, RetryDecision, TransportLink};
pub use ws::WsConnector;
