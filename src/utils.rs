use crate::peer::types::IceServer;
use rand::Rng;

/// Lowest and highest peer id handed out when none is configured.
pub const PEER_ID_MIN: u32 = 10;
pub const PEER_ID_MAX: u32 = 8999;

pub fn random_peer_id() -> String {
    rand::rng()
        .random_range(PEER_ID_MIN..=PEER_ID_MAX)
        .to_string()
}

// ICE urls without a scheme get `turn:` when credentials are present, `stun:` otherwise
pub fn add_ice_url_scheme(url: &str, server: &IceServer) -> String {
    if url.starts_with("turn:") || url.starts_with("turns:") || url.starts_with("stun:") || url.starts_with("stuns:") {
        url.to_string()
    } else {
        let scheme = if server.username.is_some() && server.credential.is_some() {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, url)
    }
}
