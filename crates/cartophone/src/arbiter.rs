//! Mode arbiter - the single owner of the operating mode.
//!
//! One task waits on two inputs, mode-switch requests and card events, and
//! processes exactly one message per iteration. Card events are routed by the
//! mode as of that iteration:
//! - Read: handed to the dispatch worker (non-blocking send)
//! - Privileged: written into the registered session's capture slot
//!
//! The mode itself never leaves this task. Everyone else observes it through
//! the [`ArbiterState`] snapshot published on a watch channel.

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::mode::{CaptureSlot, CardEvent, Mode, ModeSwitchRequest, SessionId};

/// Published view of the arbiter, updated after every processed message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArbiterState {
    pub mode: Mode,
    /// Session whose capture slot is registered, if any.
    pub session: Option<SessionId>,
    /// Card events handed to the dispatcher.
    pub dispatched: u64,
    /// Card events delivered into a session's capture slot.
    pub captured: u64,
    /// Card events seen after the session already captured one.
    pub ignored_after_capture: u64,
    /// Card events that reached a slot whose session had already timed out.
    pub late_dropped: u64,
    /// Card events that could not be handed to the dispatcher.
    pub dispatch_failed: u64,
    /// Invariant breaches (privileged mode with no registered session).
    pub violations: u64,
    /// Effective mode changes.
    pub transitions: u64,
    /// Switch requests for the already-active mode.
    pub duplicates: u64,
}

impl ArbiterState {
    /// Card events routed so far, whatever their destination.
    pub fn routed(&self) -> u64 {
        self.dispatched
            + self.captured
            + self.ignored_after_capture
            + self.late_dropped
            + self.dispatch_failed
            + self.violations
    }

    /// Mode-switch requests processed so far.
    pub fn switches(&self) -> u64 {
        self.transitions + self.duplicates
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ArbiterError {
    #[error("mode arbiter is not running")]
    Closed,
}

/// Cloneable handle for submitting switch requests and reading state.
#[derive(Clone)]
pub struct ArbiterHandle {
    switch_tx: mpsc::UnboundedSender<ModeSwitchRequest>,
    state_rx: watch::Receiver<ArbiterState>,
}

impl ArbiterHandle {
    /// Submit a mode-switch request. Never blocks.
    pub fn request(&self, request: ModeSwitchRequest) -> Result<(), ArbiterError> {
        self.switch_tx
            .send(request)
            .map_err(|_| ArbiterError::Closed)
    }

    pub fn state(&self) -> ArbiterState {
        self.state_rx.borrow().clone()
    }

    pub fn mode(&self) -> Mode {
        self.state_rx.borrow().mode
    }

    pub fn subscribe(&self) -> watch::Receiver<ArbiterState> {
        self.state_rx.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&ArbiterState) -> bool,
    ) -> Result<ArbiterState, ArbiterError> {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| ArbiterError::Closed)?;
        Ok(state.clone())
    }
}

pub struct ModeArbiter {
    switch_rx: mpsc::UnboundedReceiver<ModeSwitchRequest>,
    card_rx: mpsc::Receiver<CardEvent>,
    dispatch_tx: mpsc::UnboundedSender<CardEvent>,
    state_tx: watch::Sender<ArbiterState>,
    mode: Mode,
    session: Option<CaptureSlot>,
}

impl ModeArbiter {
    pub fn new(
        card_rx: mpsc::Receiver<CardEvent>,
        dispatch_tx: mpsc::UnboundedSender<CardEvent>,
    ) -> (Self, ArbiterHandle) {
        let (switch_tx, switch_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ArbiterState::default());

        let arbiter = Self {
            switch_rx,
            card_rx,
            dispatch_tx,
            state_tx,
            mode: Mode::Read,
            session: None,
        };
        let handle = ArbiterHandle {
            switch_tx,
            state_rx,
        };
        (arbiter, handle)
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until both inputs are closed.
    pub async fn run(mut self) {
        tracing::info!(mode = %self.mode, "Mode arbiter started");

        loop {
            // Unbiased: when both inputs are ready either may go first, and
            // only one message is handled per iteration.
            tokio::select! {
                Some(request) = self.switch_rx.recv() => self.apply_switch(request),
                Some(event) = self.card_rx.recv() => self.route(event),
                else => break,
            }
        }

        tracing::info!(mode = %self.mode, "Mode arbiter exiting");
    }

    fn apply_switch(&mut self, request: ModeSwitchRequest) {
        let ModeSwitchRequest {
            target,
            session_id,
            capture,
            ack,
            requested_at,
        } = request;

        self.switch_mode(target, session_id, capture, requested_at);

        // Published state already reflects the request when the sender wakes.
        if let Some(ack) = ack {
            let _ = ack.send(self.mode);
        }
    }

    fn switch_mode(
        &mut self,
        target: Mode,
        session_id: Option<SessionId>,
        capture: Option<CaptureSlot>,
        requested_at: chrono::DateTime<chrono::Utc>,
    ) {
        let session = session_id.map(|s| s.to_string());

        if target == self.mode {
            if let Some(slot) = capture {
                // A second session tried to register while one is active.
                // Dropping its slot wakes that session with a closed receiver.
                tracing::warn!(
                    target: "cartophone::mode",
                    event = "mode_switch_duplicate",
                    mode = %self.mode,
                    session = %slot.session_id(),
                    outcome = "rejected",
                    "Privileged request while a session is registered, capture slot rejected"
                );
                self.publish(|s| s.duplicates += 1);
                return;
            }
            tracing::info!(
                target: "cartophone::mode",
                event = "mode_switch_duplicate",
                mode = %self.mode,
                session = session.as_deref().unwrap_or(""),
                outcome = "ignored",
                "Duplicate mode switch ignored"
            );
            self.publish(|s| s.duplicates += 1);
            return;
        }

        match target {
            Mode::Privileged => {
                if capture.is_none() {
                    tracing::warn!(
                        target: "cartophone::mode",
                        "Entering privileged mode without a capture slot"
                    );
                }
                self.session = capture;
            }
            Mode::Read => {
                if let Some(slot) = self.session.take()
                    && session_id.is_some_and(|id| id != slot.session_id())
                {
                    tracing::warn!(
                        target: "cartophone::mode",
                        registered = %slot.session_id(),
                        requested_by = session.as_deref().unwrap_or(""),
                        "Read requested by a different session than the registered one"
                    );
                }
            }
        }

        let from = self.mode;
        self.mode = target;
        let latency_ms = (chrono::Utc::now() - requested_at).num_milliseconds();

        tracing::info!(
            target: "cartophone::mode",
            event = "mode_transition",
            from = %from,
            mode = %self.mode,
            session = session.as_deref().unwrap_or(""),
            latency_ms,
            outcome = "switched",
            "Mode switched"
        );

        let mode = self.mode;
        let registered = self.session.as_ref().map(|s| s.session_id());
        self.publish(|s| {
            s.mode = mode;
            s.session = registered;
            s.transitions += 1;
        });
    }

    fn route(&mut self, event: CardEvent) {
        match self.mode {
            Mode::Read => {
                let uid = event.uid.clone();
                if self.dispatch_tx.send(event).is_err() {
                    tracing::error!(%uid, "Dispatch worker gone, card dropped");
                    self.publish(|s| s.dispatch_failed += 1);
                    return;
                }
                tracing::debug!(%uid, mode = %self.mode, "Card routed to dispatcher");
                self.publish(|s| s.dispatched += 1);
            }
            Mode::Privileged => {
                let Some(slot) = self.session.as_mut() else {
                    tracing::error!(
                        target: "cartophone::mode",
                        event = "protocol_violation",
                        uid = %event.uid,
                        mode = %self.mode,
                        "Card event in privileged mode with no registered session, dropped"
                    );
                    self.publish(|s| s.violations += 1);
                    return;
                };

                let session = slot.session_id();
                if slot.is_spent() {
                    tracing::info!(
                        uid = %event.uid,
                        %session,
                        "Session already captured a card, ignoring"
                    );
                    self.publish(|s| s.ignored_after_capture += 1);
                    return;
                }

                match slot.fill(event) {
                    Ok(()) => {
                        tracing::debug!(%session, "Card delivered to session");
                        self.publish(|s| s.captured += 1);
                    }
                    Err(event) => {
                        tracing::info!(
                            uid = %event.uid,
                            %session,
                            "Capture window already closed, card dropped"
                        );
                        self.publish(|s| s.late_dropped += 1);
                    }
                }
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut ArbiterState)) {
        self.state_tx.send_modify(update);
    }
}
