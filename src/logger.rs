use crate::peer::types::IceCandidate;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Overrides the whole filter when set, e.g. `PEERCALL_LOG=signaling=trace`.
pub const FILTER_ENV: &str = "PEERCALL_LOG";

const NOISY_TARGETS: &[&str] = &[
    "webrtc",
    "webrtc_ice",
    "webrtc_sctp",
    "webrtc_dtls",
    "webrtc_mdns",
    "tungstenite",
    "tokio_tungstenite",
];

static INIT: OnceLock<()> = OnceLock::new();

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

/// Installs the global subscriber once; later calls are no-ops.
pub fn init(level: LevelFilter) -> Result<(), InitError> {
    if INIT.get().is_some() {
        return Ok(());
    }
    let filter = match std::env::var(FILTER_ENV) {
        Ok(custom) => EnvFilter::new(custom),
        Err(_) => EnvFilter::new(default_filter(level)),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(level >= LevelFilter::DEBUG)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Configure(err.to_string()))?;
    INIT.set(()).ok();
    Ok(())
}

fn default_filter(level: LevelFilter) -> String {
    let mut directives = vec![level.to_string().to_lowercase()];
    if level > LevelFilter::WARN {
        directives.extend(NOISY_TARGETS.iter().map(|target| format!("{target}=warn")));
    }
    directives.join(",")
}

/// Trickle-ICE candidate dump.
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    tracing::trace!(
        target: "ice",
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_mline_index,
        cand.username_fragment
    );
}

/// Everything the presentation layer is told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Status(String),
    Error(String),
    PeerId(String),
    Transcript(String),
    CallActive(bool),
}

/// Status line plus the event feed for whoever renders it.
///
/// An error stays on the status line until `clear` is called at the start of the next
/// connection attempt; plain status updates are logged but not shown meanwhile.
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<UiEvent>>,
    status: String,
    is_error: bool,
}

impl Notifier {
    pub fn new(tx: mpsc::UnboundedSender<UiEvent>) -> Self {
        Self {
            tx: Some(tx),
            status: String::new(),
            is_error: false,
        }
    }

    /// A notifier that only keeps the status line.
    pub fn detached() -> Self {
        Self {
            tx: None,
            status: String::new(),
            is_error: false,
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn set_status(&mut self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!(target: "status", "{text}");
        if self.is_error {
            return;
        }
        self.status = text.clone();
        self.emit(UiEvent::Status(text));
    }

    pub fn set_error(&mut self, text: impl Into<String>) {
        let text = text.into();
        tracing::error!(target: "status", "{text}");
        self.status = text.clone();
        self.is_error = true;
        self.emit(UiEvent::Error(text));
    }

    pub fn clear(&mut self) {
        self.status.clear();
        self.is_error = false;
    }

    pub fn emit(&self, event: UiEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
