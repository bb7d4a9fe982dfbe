use crate::config::RetryPolicy;
use crate::error::TransportError;
use crate::event::Event;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

/// Outbound half of one relay connection.
pub type RelaySender = mpsc::UnboundedSender<String>;

/// Opens relay connections. Implementations post `Event::Relay` tagged with `epoch`
/// for every lifecycle change and finish each connection with exactly one `Closed`.
pub trait RelayConnector: Send + Sync {
    fn open(&self, url: &Url, epoch: u64, events: mpsc::UnboundedSender<Event>) -> RelaySender;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    Closed,
    /// Retry cap exceeded; only a restart recovers.
    Failed,
}

/// Consecutive connection failures since the last successful registration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionAttemptCounter(u32);

impl ConnectionAttemptCounter {
    pub fn get(&self) -> u32 {
        self.0
    }

    fn bump(&mut self) -> u32 {
        self.0 = self.0.saturating_add(1);
        self.0
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Scheduled(Duration),
    GaveUp(u32),
    /// The close belonged to a connection that was already handled.
    Ignored,
}

struct PendingRetry {
    epoch: u64,
    delay: Duration,
    handle: JoinHandle<()>,
}

/// One connection to the relay at a time, with bounded reconnects.
pub struct TransportLink {
    url: Url,
    connector: Arc<dyn RelayConnector>,
    events: mpsc::UnboundedSender<Event>,
    policy: RetryPolicy,
    attempts: ConnectionAttemptCounter,
    epoch: u64,
    state: LinkState,
    outbound: Option<RelaySender>,
    saw_error: bool,
    pending_retry: Option<PendingRetry>,
    retries_scheduled: u32,
}

impl TransportLink {
    pub fn new(
        url: Url,
        connector: Arc<dyn RelayConnector>,
        events: mpsc::UnboundedSender<Event>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            url,
            connector,
            events,
            policy,
            attempts: ConnectionAttemptCounter::default(),
            epoch: 0,
            state: LinkState::Idle,
            outbound: None,
            saw_error: false,
            pending_retry: None,
            retries_scheduled: 0,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }

    pub fn retries_scheduled(&self) -> u32 {
        self.retries_scheduled
    }

    pub fn pending_retry(&self) -> Option<Duration> {
        self.pending_retry.as_ref().map(|p| p.delay)
    }

    /// Events from older connections are stale.
    pub fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch && matches!(self.state, LinkState::Connecting | LinkState::Open)
    }

    pub fn connect(&mut self) -> Result<u64, TransportError> {
        if self.state == LinkState::Failed {
            return Err(TransportError::RetriesExhausted(self.attempts.get()));
        }
        if let Some(pending) = self.pending_retry.take() {
            pending.handle.abort();
        }
        self.epoch += 1;
        self.saw_error = false;
        self.state = LinkState::Connecting;
        tracing::debug!(target: "relay", url = %self.url, epoch = self.epoch, "connecting");
        self.outbound = Some(self.connector.open(&self.url, self.epoch, self.events.clone()));
        Ok(self.epoch)
    }

    pub fn on_opened(&mut self) {
        tracing::debug!(target: "relay", epoch = self.epoch, "relay link open");
        self.state = LinkState::Open;
    }

    pub fn on_error(&mut self, reason: &str) {
        tracing::warn!(target: "relay", epoch = self.epoch, "relay link error: {reason}");
        self.saw_error = true;
    }

    /// Counts the failure and schedules the next attempt unless the cap is exceeded.
    pub fn on_closed(&mut self) -> RetryDecision {
        if !matches!(self.state, LinkState::Connecting | LinkState::Open) {
            return RetryDecision::Ignored;
        }
        self.outbound = None;
        let failures = self.attempts.bump();
        if failures > self.policy.max_attempts {
            tracing::error!(target: "relay", failures, "giving up on relay");
            self.state = LinkState::Failed;
            return RetryDecision::GaveUp(failures);
        }
        self.state = LinkState::Closed;
        let delay = if self.saw_error {
            self.policy.error_delay
        } else {
            self.policy.close_delay
        };
        self.schedule_retry(delay);
        RetryDecision::Scheduled(delay)
    }

    /// Drops the current connection and runs the close path immediately.
    ///
    /// The connector's own `Closed` for this epoch arrives later and is ignored.
    pub fn close(&mut self) -> RetryDecision {
        self.on_closed()
    }

    /// Stops for good: no retry, and events from the current connection go stale.
    pub fn shutdown(&mut self) {
        if let Some(pending) = self.pending_retry.take() {
            pending.handle.abort();
        }
        self.outbound = None;
        self.state = LinkState::Idle;
    }

    /// Whether a `RetryDue` for `epoch` should start a new attempt.
    pub fn take_retry(&mut self, epoch: u64) -> bool {
        let due = self.state == LinkState::Closed
            && matches!(&self.pending_retry, Some(pending) if pending.epoch == epoch);
        if due {
            self.pending_retry = None;
        }
        due
    }

    pub fn reset_attempts(&mut self) {
        self.attempts.reset();
    }

    pub fn send(&self, text: String) -> Result<(), TransportError> {
        if self.state != LinkState::Open {
            return Err(TransportError::NotOpen);
        }
        tracing::trace!(target: "relay", ">> {text}");
        self.outbound
            .as_ref()
            .ok_or(TransportError::NotOpen)?
            .send(text)
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn schedule_retry(&mut self, delay: Duration) {
        let epoch = self.epoch;
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::RetryDue { epoch });
        });
        self.retries_scheduled += 1;
        tracing::debug!(target: "relay", ?delay, epoch, "reconnect scheduled");
        self.pending_retry = Some(PendingRetry {
            epoch,
            delay,
            handle,
        });
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        if let Some(pending) = self.pending_retry.take() {
            pending.handle.abort();
        }
    }
}
