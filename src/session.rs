use crate::error::UserInputError;
use crate::signaling::Outbound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Registered,
    SessionRequested,
    SessionActive,
    Negotiating,
    Connected,
    Closed,
}

/// Which side creates the offer. Once resolved it never changes for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unresolved,
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub local_peer_id: String,
    pub remote_peer_id: Option<String>,
    role: Role,
}

impl Session {
    fn new(local_peer_id: String, remote_peer_id: Option<String>) -> Self {
        Self {
            local_peer_id,
            remote_peer_id,
            role: Role::Unresolved,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns whether the session now plays `role`.
    fn resolve_role(&mut self, role: Role) -> bool {
        match self.role {
            Role::Unresolved => {
                tracing::debug!(target: "signaling", ?role, "role resolved");
                self.role = role;
                true
            }
            current => current == role,
        }
    }
}

/// Registration and session lifecycle for one relay connection at a time.
#[derive(Debug)]
pub struct SignalingSession {
    state: SessionState,
    local_peer_id: Option<String>,
    session: Option<Session>,
}

impl Default for SignalingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            local_peer_id: None,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_peer_id(&self) -> Option<&str> {
        self.local_peer_id.as_deref()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn role(&self) -> Role {
        self.session
            .as_ref()
            .map(Session::role)
            .unwrap_or(Role::Unresolved)
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(target: "signaling", from = ?self.state, to = ?next, "session state");
            self.state = next;
        }
    }

    /// A new connection attempt with a fresh identity.
    pub fn on_connecting(&mut self, peer_id: String) {
        self.session = None;
        self.local_peer_id = Some(peer_id);
        self.transition(SessionState::Connecting);
    }

    /// `HELLO` echoed back. Returns false when it was not expected.
    pub fn on_registered(&mut self) -> bool {
        if self.state != SessionState::Connecting {
            return false;
        }
        self.transition(SessionState::Registered);
        true
    }

    /// Validates the target peer and yields the `SESSION <id>` frame to send.
    pub fn request_session(&mut self, remote_peer_id: &str) -> Result<Outbound, UserInputError> {
        let remote = remote_peer_id.trim();
        if remote.is_empty() {
            return Err(UserInputError::EmptyPeerId);
        }
        if self.session.is_some() {
            return Err(UserInputError::SessionActive);
        }
        let Some(local) = self.local_peer_id.clone() else {
            return Err(UserInputError::NotRegistered);
        };
        if self.state != SessionState::Registered {
            return Err(UserInputError::NotRegistered);
        }
        self.session = Some(Session::new(local, Some(remote.to_string())));
        self.transition(SessionState::SessionRequested);
        Ok(Outbound::Session(remote.to_string()))
    }

    /// `SESSION_OK` for our request. The role follows the remote-offerer preference.
    pub fn on_session_ok(&mut self, remote_offerer: bool) -> Option<Role> {
        if self.state != SessionState::SessionRequested {
            return None;
        }
        let wanted = if remote_offerer {
            Role::Answerer
        } else {
            Role::Offerer
        };
        let session = self.session.as_mut()?;
        session.resolve_role(wanted);
        let role = session.role();
        self.transition(SessionState::SessionActive);
        Some(role)
    }

    /// The peer asked us to offer. Refused once we are the answering side.
    pub fn accept_offer_request(&mut self) -> bool {
        self.ensure_session().resolve_role(Role::Offerer)
    }

    /// Records the role implied by a description; false if it contradicts the
    /// resolved one.
    pub fn resolve_role(&mut self, role: Role) -> bool {
        self.ensure_session().resolve_role(role)
    }

    /// A negotiator instance now exists for this session.
    pub fn on_call_started(&mut self) {
        self.ensure_session();
        self.transition(SessionState::Negotiating);
    }

    pub fn on_connected(&mut self) -> bool {
        if self.state != SessionState::Negotiating {
            return false;
        }
        self.transition(SessionState::Connected);
        true
    }

    /// Ends the session; a new one needs a new connection.
    pub fn reset(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!(target: "signaling", remote = ?session.remote_peer_id, "session closed");
        }
        self.transition(SessionState::Closed);
    }

    // Calls can start without an explicit session request when the peer dials us.
    fn ensure_session(&mut self) -> &mut Session {
        let local = self.local_peer_id.clone().unwrap_or_default();
        self.session.get_or_insert_with(|| Session::new(local, None))
    }
}
