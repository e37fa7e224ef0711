//! CartophoneService: wires the reader pipeline and owns its lifecycle.
//!
//! This service owns:
//! - The card poller, mode arbiter, dispatch worker and alarm monitor tasks
//! - The handshake controller used by the associate/register entry points
//! - Handles to the player and alarm store for the management endpoints
//! - Shutdown coordination (bidirectional)
//!
//! Transports hold an `Arc<CartophoneService>` and never touch the arbiter's
//! channels directly.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alarms::{AlarmMonitor, DEFAULT_ALARM_INTERVAL};
use crate::arbiter::{ArbiterHandle, ArbiterState, ModeArbiter};
use crate::dispatch::{CardDispatcher, PlaybackDispatcher, spawn_dispatch_worker};
use crate::handshake::{
    DEFAULT_HANDSHAKE_TIMEOUT, HandshakeController, HandshakeKind, HandshakeOutcome,
};
use crate::mode::Mode;
use crate::owntone::{OwnToneClient, PlayerControl};
use crate::pocketbase::PocketBaseClient;
use crate::poller::CardPoller;
use crate::scanner::{CardScanner, ScanConfig};
use crate::store::{AlarmStore, CardStore, Player, PlaylistStore};
use crate::version::VersionInfo;

/// Detections buffered between the poller and the arbiter.
const CARD_EVENT_BUFFER: usize = 16;

/// How long shutdown waits for queued dispatches to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub scan: ScanConfig,
    pub handshake_timeout: Duration,
    pub alarm_interval: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            alarm_interval: DEFAULT_ALARM_INTERVAL,
        }
    }
}

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub cards: Arc<dyn CardStore>,
    pub playlists: Arc<dyn PlaylistStore>,
    pub alarms: Arc<dyn AlarmStore>,
    pub player: Arc<dyn Player>,
    pub control: Arc<dyn PlayerControl>,
}

impl Collaborators {
    pub fn remote(pocketbase: PocketBaseClient, owntone: OwnToneClient) -> Self {
        let pocketbase = Arc::new(pocketbase);
        let owntone = Arc::new(owntone);
        Self {
            cards: pocketbase.clone(),
            playlists: pocketbase.clone(),
            alarms: pocketbase,
            player: owntone.clone(),
            control: owntone,
        }
    }
}

/// Snapshot of service health for transports to query.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub mode: Mode,
    pub handshake_active: bool,
    pub arbiter: ArbiterState,
    pub version: VersionInfo,
}

struct Tasks {
    poller: JoinHandle<()>,
    alarms: JoinHandle<()>,
    arbiter: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

pub struct CartophoneService {
    arbiter: ArbiterHandle,
    handshake: HandshakeController,
    control: Arc<dyn PlayerControl>,
    alarms: Arc<dyn AlarmStore>,

    cancel: CancellationToken,
    tasks: Mutex<Option<Tasks>>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    version: VersionInfo,
}

impl CartophoneService {
    /// Spawn the pipeline. Must be called inside a tokio runtime.
    pub fn start(
        scanner: Box<dyn CardScanner>,
        collaborators: Collaborators,
        settings: ServiceSettings,
    ) -> Self {
        let Collaborators {
            cards,
            playlists,
            alarms,
            player,
            control,
        } = collaborators;

        let (card_tx, card_rx) = mpsc::channel(CARD_EVENT_BUFFER);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (arbiter, handle) = ModeArbiter::new(card_rx, dispatch_tx);

        let dispatcher: Arc<dyn CardDispatcher> = Arc::new(PlaybackDispatcher::new(
            Arc::clone(&cards),
            Arc::clone(&playlists),
            Arc::clone(&player),
        ));

        let cancel = CancellationToken::new();
        let tasks = Tasks {
            dispatcher: spawn_dispatch_worker(dispatcher, dispatch_rx),
            arbiter: arbiter.spawn(),
            poller: CardPoller::new(scanner, settings.scan).spawn(card_tx, cancel.clone()),
            alarms: AlarmMonitor::new(Arc::clone(&alarms), playlists, player)
                .with_interval(settings.alarm_interval)
                .spawn(cancel.clone()),
        };

        let handshake = HandshakeController::new(handle.clone(), cards)
            .with_timeout(settings.handshake_timeout);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            arbiter: handle,
            handshake,
            control,
            alarms,
            cancel,
            tasks: Mutex::new(Some(tasks)),
            shutdown_tx,
            shutdown_rx,
            version: VersionInfo::new(),
        }
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn health(&self) -> HealthSnapshot {
        let arbiter = self.arbiter.state();
        HealthSnapshot {
            mode: arbiter.mode,
            handshake_active: self.handshake.is_active(),
            arbiter,
            version: self.version.clone(),
        }
    }

    pub fn arbiter(&self) -> &ArbiterHandle {
        &self.arbiter
    }

    pub fn handshake(&self) -> &HandshakeController {
        &self.handshake
    }

    pub fn player(&self) -> &Arc<dyn PlayerControl> {
        &self.control
    }

    pub fn alarms(&self) -> &Arc<dyn AlarmStore> {
        &self.alarms
    }

    pub async fn associate(&self, playlist_id: String, replace_card: bool) -> HandshakeOutcome {
        self.handshake
            .start(HandshakeKind::Associate {
                playlist_id,
                replace_card,
            })
            .await
    }

    pub async fn register(&self) -> HandshakeOutcome {
        self.handshake.start(HandshakeKind::Register).await
    }

    /// Ask the transport to stop; `shutdown()` runs once it has.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Stop every task. Safe to call more than once.
    pub async fn shutdown(&self) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return;
        };
        tracing::info!("Stopping reader pipeline");

        self.cancel.cancel();
        let _ = tasks.poller.await;
        let _ = tasks.alarms.await;

        // The arbiter never sees its switch channel close while handles are
        // alive, so it is stopped here. Dropping it closes the dispatch queue.
        tasks.arbiter.abort();
        let _ = tasks.arbiter.await;

        if tokio::time::timeout(DRAIN_TIMEOUT, tasks.dispatcher)
            .await
            .is_err()
        {
            tracing::warn!("Dispatch worker did not drain before shutdown deadline");
        }
        tracing::info!("Reader pipeline stopped");
    }
}
