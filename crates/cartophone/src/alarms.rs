//! Alarm monitor - plays the playlist of every alarm due this minute.
//!
//! Runs on its own timer and goes straight to the player; it does not pass
//! through the mode arbiter.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::store::{AlarmStore, CollaboratorError, Player, PlaylistStore};

pub const DEFAULT_ALARM_INTERVAL: Duration = Duration::from_secs(60);

/// True for a zero-padded 24h `HH:MM`, the format alarms are matched on.
pub fn is_valid_hour(hour: &str) -> bool {
    hour.len() == 5 && chrono::NaiveTime::parse_from_str(hour, "%H:%M").is_ok()
}

pub struct AlarmMonitor {
    alarms: Arc<dyn AlarmStore>,
    playlists: Arc<dyn PlaylistStore>,
    player: Arc<dyn Player>,
    interval: Duration,
}

impl AlarmMonitor {
    pub fn new(
        alarms: Arc<dyn AlarmStore>,
        playlists: Arc<dyn PlaylistStore>,
        player: Arc<dyn Player>,
    ) -> Self {
        Self {
            alarms,
            playlists,
            player,
            interval: DEFAULT_ALARM_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Alarm monitor started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_checked: Option<String> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let hour = chrono::Local::now().format("%H:%M").to_string();
            // A short interval must not fire the same minute twice.
            if last_checked.as_deref() == Some(hour.as_str()) {
                continue;
            }
            self.check_at(&hour).await;
            last_checked = Some(hour);
        }

        tracing::info!("Alarm monitor stopped");
    }

    /// Play every active alarm set for `hour` (`HH:MM`). Returns how many played.
    pub async fn check_at(&self, hour: &str) -> usize {
        let alarms = match self.alarms.active_alarms(hour).await {
            Ok(alarms) => alarms,
            Err(e) => {
                tracing::warn!(%hour, error = %e, "Failed to fetch alarms");
                return 0;
            }
        };

        let mut played = 0;
        for alarm in alarms {
            match self.ring(&alarm.playlist_id).await {
                Ok(()) => {
                    tracing::info!(
                        target: "cartophone::playback",
                        alarm_id = %alarm.id,
                        %hour,
                        playlist_id = %alarm.playlist_id,
                        "Alarm triggered"
                    );
                    played += 1;
                }
                Err(e) => {
                    tracing::warn!(alarm_id = %alarm.id, error = %e, "Alarm playback failed");
                }
            }
        }
        played
    }

    async fn ring(&self, playlist_id: &str) -> Result<(), CollaboratorError> {
        let playlist = self.playlists.get_playlist(playlist_id).await?;
        self.player.play_playlist(&playlist).await
    }
}
