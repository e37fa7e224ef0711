//! Handshake controller - bounded-time capture of the next card for one caller.
//!
//! A single permit gates sessions: a second request while one is running is
//! rejected with [`HandshakeOutcome::Conflict`], never queued. While a session
//! holds the permit, a [`SessionGuard`] owns the privileged mode. Dropping the
//! guard (on every return path, and when the caller's future is cancelled)
//! asks the arbiter for Read mode and then releases the permit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};

use crate::arbiter::ArbiterHandle;
use crate::mode::{CaptureSlot, CardEvent, Mode, ModeSwitchRequest, SessionId};
use crate::store::{Card, CardStore, CollaboratorError, NewCard};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on waiting for the arbiter to apply a session's Read request.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

/// What the caller wants done with the captured card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeKind {
    Associate {
        playlist_id: String,
        replace_card: bool,
    },
    /// Create the card with no playlist bound.
    Register,
}

impl HandshakeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeKind::Associate { .. } => "associate",
            HandshakeKind::Register => "register",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Success {
        card_id: String,
        playlist_id: String,
    },
    AlreadyBoundSame,
    /// The card is bound elsewhere; carries its current binding.
    AlreadyBoundOther {
        card_id: String,
        playlist_id: String,
    },
    NoCardDetected,
    Error(String),
    Conflict,
}

impl HandshakeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeOutcome::Success { .. } => "success",
            HandshakeOutcome::AlreadyBoundSame => "already_bound_same",
            HandshakeOutcome::AlreadyBoundOther { .. } => "already_bound_other",
            HandshakeOutcome::NoCardDetected => "no_card_detected",
            HandshakeOutcome::Error(_) => "error",
            HandshakeOutcome::Conflict => "conflict",
        }
    }
}

/// How the wait on the capture slot ended.
enum Capture {
    Card(CardEvent),
    TimedOut,
    /// The arbiter dropped the slot without filling it.
    Rejected,
}

/// Holds privileged mode for one session.
///
/// Release requests Read first, then returns the permit. A new session can
/// only start after the permit is back, so its Privileged request always
/// queues behind this Read. Dropping an unreleased guard (a cancelled caller)
/// releases it without waiting for the arbiter.
struct SessionGuard {
    session_id: SessionId,
    arbiter: ArbiterHandle,
    permit: Option<OwnedSemaphorePermit>,
}

impl SessionGuard {
    /// Release the session; the receiver yields the mode once Read is applied.
    fn release(mut self) -> oneshot::Receiver<Mode> {
        let (request, applied) = ModeSwitchRequest::read(Some(self.session_id)).with_ack();
        self.release_with(request);
        applied
    }

    fn release_with(&mut self, request: ModeSwitchRequest) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        if self.arbiter.request(request).is_err() {
            tracing::warn!(
                session = %self.session_id,
                "Mode arbiter gone, could not request Read on session release"
            );
        }
        drop(permit);
        tracing::debug!(session = %self.session_id, "Handshake session released");
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release_with(ModeSwitchRequest::read(Some(self.session_id)));
    }
}

#[derive(Clone)]
pub struct HandshakeController {
    permit: Arc<Semaphore>,
    arbiter: ArbiterHandle,
    cards: Arc<dyn CardStore>,
    timeout: Duration,
}

impl HandshakeController {
    pub fn new(arbiter: ArbiterHandle, cards: Arc<dyn CardStore>) -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
            arbiter,
            cards,
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Default deadline used by [`Self::start`].
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True while a session holds the permit.
    pub fn is_active(&self) -> bool {
        self.permit.available_permits() == 0
    }

    /// Run a handshake with the configured deadline.
    pub async fn start(&self, kind: HandshakeKind) -> HandshakeOutcome {
        self.request_handshake(kind, self.timeout).await
    }

    pub async fn request_handshake(
        &self,
        kind: HandshakeKind,
        timeout: Duration,
    ) -> HandshakeOutcome {
        let Ok(permit) = Arc::clone(&self.permit).try_acquire_owned() else {
            tracing::info!(
                target: "cartophone::handshake",
                event = "handshake_rejected",
                kind = kind.as_str(),
                mode = %self.arbiter.mode(),
                outcome = HandshakeOutcome::Conflict.as_str(),
                "Handshake already in progress"
            );
            return HandshakeOutcome::Conflict;
        };

        let session_id = SessionId::new();
        let (slot, rx) = CaptureSlot::new(session_id);
        if let Err(e) = self.arbiter.request(ModeSwitchRequest::privileged(slot)) {
            drop(permit);
            let outcome = HandshakeOutcome::Error(e.to_string());
            tracing::error!(
                target: "cartophone::handshake",
                event = "handshake_resolved",
                kind = kind.as_str(),
                session = %session_id,
                mode = %self.arbiter.mode(),
                outcome = outcome.as_str(),
                error = %e,
                "Handshake could not enter privileged mode"
            );
            return outcome;
        }

        let guard = SessionGuard {
            session_id,
            arbiter: self.arbiter.clone(),
            permit: Some(permit),
        };
        tracing::debug!(
            session = %session_id,
            kind = kind.as_str(),
            timeout_ms = timeout.as_millis() as u64,
            "Handshake session started"
        );

        let started = Instant::now();
        let (uid, outcome) = match wait_for_card(rx, timeout).await {
            Capture::Card(event) => {
                let outcome = self
                    .resolve(&kind, &event.uid)
                    .await
                    .unwrap_or_else(|e| HandshakeOutcome::Error(e.to_string()));
                (Some(event.uid), outcome)
            }
            Capture::TimedOut => (None, HandshakeOutcome::NoCardDetected),
            Capture::Rejected => (
                None,
                HandshakeOutcome::Error("capture slot closed by mode arbiter".to_string()),
            ),
        };

        let mode = self.await_release(guard).await;

        tracing::info!(
            target: "cartophone::handshake",
            event = "handshake_resolved",
            kind = kind.as_str(),
            session = %session_id,
            uid = uid.as_deref().unwrap_or(""),
            mode = %mode,
            outcome = outcome.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Handshake resolved"
        );
        outcome
    }

    /// Release the session and wait until the arbiter is back in Read mode.
    async fn await_release(&self, guard: SessionGuard) -> Mode {
        let session_id = guard.session_id;
        match tokio::time::timeout(RELEASE_TIMEOUT, guard.release()).await {
            Ok(Ok(mode)) => mode,
            Ok(Err(_)) => self.arbiter.mode(),
            Err(_) => {
                tracing::warn!(
                    session = %session_id,
                    "Mode arbiter did not apply Read before the release deadline"
                );
                self.arbiter.mode()
            }
        }
    }

    async fn resolve(
        &self,
        kind: &HandshakeKind,
        uid: &str,
    ) -> Result<HandshakeOutcome, CollaboratorError> {
        let existing = self.cards.check_card(uid).await?;

        match (kind, existing) {
            (HandshakeKind::Register, None) => self.create(uid, String::new()).await,
            (HandshakeKind::Register, Some(card)) if card.is_bound() => {
                Ok(HandshakeOutcome::AlreadyBoundOther {
                    card_id: card.id,
                    playlist_id: card.playlist_id,
                })
            }
            (HandshakeKind::Register, Some(_)) => Ok(HandshakeOutcome::AlreadyBoundSame),
            (HandshakeKind::Associate { playlist_id, .. }, None) => {
                self.create(uid, playlist_id.clone()).await
            }
            (
                HandshakeKind::Associate {
                    playlist_id,
                    replace_card,
                },
                Some(card),
            ) => {
                if card.playlist_id == *playlist_id {
                    Ok(HandshakeOutcome::AlreadyBoundSame)
                } else if card.is_bound() && !replace_card {
                    Ok(HandshakeOutcome::AlreadyBoundOther {
                        card_id: card.id,
                        playlist_id: card.playlist_id,
                    })
                } else {
                    self.rebind(card, playlist_id.clone()).await
                }
            }
        }
    }

    async fn create(
        &self,
        uid: &str,
        playlist_id: String,
    ) -> Result<HandshakeOutcome, CollaboratorError> {
        let card = self
            .cards
            .add_card(NewCard {
                uid: uid.to_string(),
                playlist_id,
            })
            .await?;
        Ok(HandshakeOutcome::Success {
            card_id: card.id,
            playlist_id: card.playlist_id,
        })
    }

    async fn rebind(
        &self,
        mut card: Card,
        playlist_id: String,
    ) -> Result<HandshakeOutcome, CollaboratorError> {
        card.playlist_id = playlist_id;
        self.cards.update_card(&card).await?;
        Ok(HandshakeOutcome::Success {
            card_id: card.id,
            playlist_id: card.playlist_id,
        })
    }
}

/// Wait for the slot to be filled or the deadline to pass.
///
/// On the deadline the slot is closed and checked once more: a card that
/// landed at the same instant is still taken, and any later fill fails on the
/// arbiter side. Exactly one of the two ends the session.
async fn wait_for_card(mut rx: oneshot::Receiver<CardEvent>, timeout: Duration) -> Capture {
    match tokio::time::timeout(timeout, &mut rx).await {
        Ok(Ok(event)) => Capture::Card(event),
        Ok(Err(_)) => Capture::Rejected,
        Err(_) => {
            rx.close();
            match rx.try_recv() {
                Ok(event) => Capture::Card(event),
                Err(_) => Capture::TimedOut,
            }
        }
    }
}
