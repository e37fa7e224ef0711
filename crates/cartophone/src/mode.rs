//! Operating mode and the messages that flow into the mode arbiter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Operating mode of the reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Detected tags trigger playback.
    #[default]
    Read,
    /// The next detected tag belongs to the active handshake session.
    Privileged,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Read => "read",
            Mode::Privileged => "privileged",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one handshake session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tag seen by the poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardEvent {
    pub uid: String,
    pub detected_at: DateTime<Utc>,
}

impl CardEvent {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            detected_at: Utc::now(),
        }
    }
}

/// Write end of a session's result slot. Held by the arbiter while the session
/// is registered; filled at most once.
#[derive(Debug)]
pub struct CaptureSlot {
    session_id: SessionId,
    tx: Option<oneshot::Sender<CardEvent>>,
}

impl CaptureSlot {
    /// Create a slot and the receiver the session waits on.
    pub fn new(session_id: SessionId) -> (Self, oneshot::Receiver<CardEvent>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                session_id,
                tx: Some(tx),
            },
            rx,
        )
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// True once the slot has been filled (or a fill was attempted).
    pub fn is_spent(&self) -> bool {
        self.tx.is_none()
    }

    /// Deliver a card into the slot.
    ///
    /// Returns the event back if the slot was already spent or the session
    /// closed its receiving end.
    pub fn fill(&mut self, event: CardEvent) -> Result<(), CardEvent> {
        match self.tx.take() {
            Some(tx) => tx.send(event),
            None => Err(event),
        }
    }
}

/// Request for the arbiter to change mode.
///
/// A request for [`Mode::Privileged`] always carries the capture slot of the
/// session that asked for it, so registering the session and entering the mode
/// happen in one arbiter step.
#[derive(Debug)]
pub struct ModeSwitchRequest {
    pub target: Mode,
    pub session_id: Option<SessionId>,
    pub capture: Option<CaptureSlot>,
    /// Receives the resulting mode once the arbiter has applied the request.
    pub ack: Option<oneshot::Sender<Mode>>,
    pub requested_at: DateTime<Utc>,
}

impl ModeSwitchRequest {
    pub fn privileged(capture: CaptureSlot) -> Self {
        Self {
            target: Mode::Privileged,
            session_id: Some(capture.session_id()),
            capture: Some(capture),
            ack: None,
            requested_at: Utc::now(),
        }
    }

    pub fn read(session_id: Option<SessionId>) -> Self {
        Self {
            target: Mode::Read,
            session_id,
            capture: None,
            ack: None,
            requested_at: Utc::now(),
        }
    }

    /// Ask to be told the resulting mode once this request has been applied.
    pub fn with_ack(mut self) -> (Self, oneshot::Receiver<Mode>) {
        let (tx, rx) = oneshot::channel();
        self.ack = Some(tx);
        (self, rx)
    }
}
