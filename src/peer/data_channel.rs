use crate::event::{ChannelEvent, ChannelId};
use crate::logger::{Notifier, UiEvent};
use crate::peer::negotiator::DataChannel;
use crate::peer::state::ACK_MESSAGE;
use crate::peer::types::ChannelOrigin;
use chrono::{DateTime, Local};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Oldest lines are dropped past this many.
pub const TRANSCRIPT_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone)]
pub struct TranscriptLine {
    pub at: DateTime<Local>,
    pub direction: Direction,
    pub text: String,
}

struct Attached {
    channel: Arc<dyn DataChannel>,
    origin: ChannelOrigin,
    open: bool,
}

/// Data channels of the current call and the text they carried.
#[derive(Default)]
pub struct DataChannelLifecycle {
    channels: HashMap<ChannelId, Attached>,
    transcript: VecDeque<TranscriptLine>,
}

impl DataChannelLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a channel whose callbacks already feed the event queue under `id`.
    /// Local and remote channels behave the same.
    pub fn attach(&mut self, id: ChannelId, channel: Arc<dyn DataChannel>, origin: ChannelOrigin) {
        self.channels.insert(
            id,
            Attached {
                channel,
                origin,
                open: false,
            },
        );
    }

    /// Returns true when this event is the channel opening.
    pub fn on_event(&mut self, id: ChannelId, event: ChannelEvent, notifier: &mut Notifier) -> bool {
        let Some(attached) = self.channels.get_mut(&id) else {
            return false;
        };
        match event {
            ChannelEvent::Open => {
                tracing::info!(target: "datachannel", origin = ?attached.origin, "dataChannel.OnOpen");
                attached.open = true;
                return true;
            }
            ChannelEvent::Text(text) => {
                let channel = attached.channel.clone();
                tracing::debug!(target: "datachannel", "Incoming string message: {text}");
                notifier.set_status("Received data channel message");
                self.record(Direction::Incoming, text, notifier);
                acknowledge(channel);
            }
            ChannelEvent::Binary(data) => {
                let preview = &data[..data.len().min(16)];
                tracing::debug!(
                    target: "datachannel",
                    len = data.len(),
                    "Incoming data message {}",
                    hex::encode(preview)
                );
                acknowledge(attached.channel.clone());
            }
            ChannelEvent::Error(reason) => {
                tracing::warn!(target: "datachannel", "dataChannel.OnError: {reason}");
            }
            ChannelEvent::Close => {
                tracing::info!(target: "datachannel", origin = ?attached.origin, "dataChannel.OnClose");
                attached.open = false;
            }
        }
        false
    }

    /// Sends `text` on every open channel; returns how many accepted it.
    pub fn send_text(&mut self, text: &str, notifier: &Notifier) -> usize {
        let open: Vec<_> = self
            .channels
            .values()
            .filter(|attached| attached.open)
            .map(|attached| attached.channel.clone())
            .collect();
        for channel in &open {
            let channel = channel.clone();
            let text = text.to_string();
            tokio::spawn(async move {
                if let Err(err) = channel.send_text(text).await {
                    tracing::warn!(target: "datachannel", "send failed: {err}");
                }
            });
        }
        if !open.is_empty() {
            self.record(Direction::Outgoing, text.to_string(), notifier);
        }
        open.len()
    }

    pub fn any_open(&self) -> bool {
        self.channels.values().any(|attached| attached.open)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn transcript(&self) -> &VecDeque<TranscriptLine> {
        &self.transcript
    }

    /// Closes and forgets every channel of the call. The transcript is kept.
    pub fn close_all(&mut self) {
        for (_, attached) in self.channels.drain() {
            tokio::spawn(async move { attached.channel.close().await });
        }
    }

    fn record(&mut self, direction: Direction, text: String, notifier: &Notifier) {
        let line = TranscriptLine {
            at: Local::now(),
            direction,
            text,
        };
        let shown = match line.direction {
            Direction::Incoming => line.text.clone(),
            Direction::Outgoing => format!("> {}", line.text),
        };
        notifier.emit(UiEvent::Transcript(shown));
        if self.transcript.len() == TRANSCRIPT_LIMIT {
            self.transcript.pop_front();
        }
        self.transcript.push_back(line);
    }
}

fn acknowledge(channel: Arc<dyn DataChannel>) {
    tokio::spawn(async move {
        if let Err(err) = channel.send_text(ACK_MESSAGE.to_string()).await {
            tracing::warn!(target: "datachannel", "failed to send ack: {err}");
        }
    });
}
