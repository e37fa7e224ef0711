//! cartophone: NFC tags in, playlists out.
//!
//! A poller reads tags, a single arbiter task owns the operating mode and
//! routes each tag either to playback or to the one running associate/register
//! handshake.

pub mod alarms;
pub mod arbiter;
pub mod config;
pub mod dispatch;
pub mod handshake;
pub mod mode;
pub mod owntone;
pub mod pocketbase;
pub mod poller;
pub mod scanner;
pub mod service;
pub mod store;
pub mod transport;
mod version;

#[cfg(test)]
mod testing;

pub use arbiter::{ArbiterError, ArbiterHandle, ArbiterState, ModeArbiter};
pub use config::{Config, ConfigError};
pub use dispatch::{CardDispatcher, PlaybackDispatcher, spawn_dispatch_worker};
pub use handshake::{HandshakeController, HandshakeKind, HandshakeOutcome};
pub use mode::{CaptureSlot, CardEvent, Mode, ModeSwitchRequest, SessionId};
pub use owntone::{OwnToneClient, PlayerControl, PlayerStatus, QueueItem};
pub use pocketbase::PocketBaseClient;
pub use poller::CardPoller;
pub use scanner::{CardScanner, Modulation, ScanConfig, ScanError, SerialScanner};
pub use service::{CartophoneService, Collaborators, HealthSnapshot, ServiceSettings};
pub use store::{
    AlarmStore, AlarmUpdate, CardStore, CollaboratorError, NewAlarm, Player, PlaylistStore,
};
pub use version::{CARTOPHONE_VERSION, VersionInfo};
