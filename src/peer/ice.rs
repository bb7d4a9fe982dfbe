use crate::error::NegotiationError;
use crate::logger::dump_candidate;
use crate::peer::negotiation::NegotiationController;
use crate::peer::types::IceCandidate;
use crate::signaling::Outbound;

/// What happened to a candidate received from the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCandidate {
    Applied,
    /// Arrived before any remote description; dropped, never queued.
    Discarded,
}

/// Trickle-ICE relay between the negotiator and the peer.
#[derive(Debug, Default)]
pub struct CandidateRelay {
    /// Gathered before our description went out; the peer would discard them.
    held: Vec<IceCandidate>,
    description_sent: bool,
    sent: usize,
    forwarded: usize,
    discarded: usize,
    gathering_done: bool,
}

impl CandidateRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gathered local candidate becomes an `{"ice": ...}` frame once the local
    /// description has been sent; `None` is the end-of-candidates marker and produces
    /// nothing.
    pub fn on_local_candidate(&mut self, candidate: Option<IceCandidate>) -> Option<Outbound> {
        match candidate {
            Some(candidate) if !self.description_sent => {
                dump_candidate("LOCAL (held)", &candidate);
                self.held.push(candidate);
                None
            }
            Some(candidate) => {
                dump_candidate("LOCAL", &candidate);
                self.sent += 1;
                Some(Outbound::Candidate(candidate))
            }
            None => {
                tracing::debug!(target: "ice", sent = self.sent, "ICE Candidate was null, done");
                self.gathering_done = true;
                None
            }
        }
    }

    /// Releases the candidates held back while the local description was pending.
    pub fn on_local_description_sent(&mut self) -> Vec<Outbound> {
        self.description_sent = true;
        self.sent += self.held.len();
        self.held.drain(..).map(Outbound::Candidate).collect()
    }

    pub fn on_remote_candidate(
        &mut self,
        candidate: IceCandidate,
        negotiation: &mut NegotiationController,
    ) -> Result<RemoteCandidate, NegotiationError> {
        dump_candidate("REMOTE", &candidate);
        if !negotiation.remote_description_known() {
            tracing::warn!(target: "ice", "Ignoring ICE candidate: No remote description set");
            self.discarded += 1;
            return Ok(RemoteCandidate::Discarded);
        }
        negotiation.add_remote_candidate(candidate)?;
        self.forwarded += 1;
        Ok(RemoteCandidate::Applied)
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn forwarded(&self) -> usize {
        self.forwarded
    }

    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn gathering_done(&self) -> bool {
        self.gathering_done
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
