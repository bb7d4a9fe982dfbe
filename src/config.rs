// Client configuration: relay address, identity, negotiator settings and retry policy.

use crate::error::UserInputError;
use crate::peer::types::{MediaConstraints, RtcSettings};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_SERVER: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9000;

/// Reconnect behaviour of the relay link.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
    /// Delay after a graceful close.
    #[serde(with = "millis")]
    pub close_delay: Duration,
    /// Delay after a connection error.
    #[serde(with = "millis")]
    pub error_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            close_delay: Duration::from_secs(1),
            error_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub server: String,
    pub port: u16,
    /// `wss://` when true, `ws://` otherwise.
    pub secure: bool,
    /// Accept self-signed relay certificates.
    pub insecure_tls: bool,
    pub peer_id: Option<String>,
    /// Ask the remote side to send the offer after `SESSION_OK`.
    pub remote_offerer: bool,
    /// Peer to call as soon as registration completes.
    pub call: Option<String>,
    pub rtc: RtcSettings,
    pub constraints: MediaConstraints,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT,
            secure: true,
            insecure_tls: false,
            peer_id: None,
            remote_offerer: false,
            call: None,
            rtc: RtcSettings::default(),
            constraints: MediaConstraints::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn relay_url(&self) -> Result<Url, url::ParseError> {
        let scheme = if self.secure { "wss" } else { "ws" };
        Url::parse(&format!("{}://{}:{}", scheme, self.server, self.port))
    }
}

fn parse_or_default<T>(text: &str, what: &'static str) -> (T, Option<UserInputError>)
where
    T: DeserializeOwned + Default,
{
    if text.trim().is_empty() {
        return (T::default(), None);
    }
    match serde_json::from_str(text) {
        Ok(value) => (value, None),
        Err(source) => {
            tracing::warn!(target: "config", %source, "invalid {what}, falling back to defaults");
            (T::default(), Some(UserInputError::InvalidConfig { what, source }))
        }
    }
}

/// Free-text negotiator configuration; invalid JSON yields the built-in default.
pub fn parse_rtc_settings(text: &str) -> (RtcSettings, Option<UserInputError>) {
    parse_or_default(text, "configuration")
}

/// Free-text media constraints; invalid JSON yields `{audio: true, video: true}`.
pub fn parse_constraints(text: &str) -> (MediaConstraints, Option<UserInputError>) {
    parse_or_default(text, "constraints")
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
