//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::owntone::{PlayerControl, PlayerStatus, QueueItem};
use crate::scanner::{CardScanner, ScanConfig, ScanError};
use crate::store::{
    Alarm, AlarmStore, AlarmUpdate, Card, CardStore, CollaboratorError, NewAlarm, NewCard,
    Player, Playlist, PlaylistStore,
};

#[derive(Default)]
pub struct MemoryStore {
    cards: Mutex<Vec<Card>>,
    playlists: Mutex<HashMap<String, Playlist>>,
    alarms: Mutex<Vec<Alarm>>,
    next_id: AtomicUsize,
    pub fail_check: AtomicBool,
    pub fail_add: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_playlist: AtomicBool,
    pub fail_alarms: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_card(self, id: &str, uid: &str, playlist_id: &str) -> Self {
        self.cards.lock().unwrap().push(Card {
            id: id.to_string(),
            uid: uid.to_string(),
            playlist_id: playlist_id.to_string(),
        });
        self
    }

    pub fn with_playlist(self, id: &str, name: &str, uri: &str) -> Self {
        self.playlists.lock().unwrap().insert(
            id.to_string(),
            Playlist {
                id: id.to_string(),
                name: name.to_string(),
                uri: uri.to_string(),
            },
        );
        self
    }

    pub fn with_alarm(self, id: &str, hour: &str, playlist_id: &str, activated: bool) -> Self {
        self.alarms.lock().unwrap().push(Alarm {
            id: id.to_string(),
            hour: hour.to_string(),
            activated,
            playlist_id: playlist_id.to_string(),
        });
        self
    }

    pub fn cards(&self) -> Vec<Card> {
        self.cards.lock().unwrap().clone()
    }

    pub fn alarms(&self) -> Vec<Alarm> {
        self.alarms.lock().unwrap().clone()
    }

    pub fn card_by_uid(&self, uid: &str) -> Option<Card> {
        self.cards.lock().unwrap().iter().find(|c| c.uid == uid).cloned()
    }

    pub fn fail(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }
}

fn not_found() -> CollaboratorError {
    CollaboratorError::Status {
        status: 404,
        body: "not found".to_string(),
    }
}

fn injected(what: &str) -> CollaboratorError {
    CollaboratorError::Unavailable(format!("injected {what} failure"))
}

#[async_trait]
impl CardStore for MemoryStore {
    async fn check_card(&self, uid: &str) -> Result<Option<Card>, CollaboratorError> {
        if self.fail_check.load(Ordering::SeqCst) {
            return Err(injected("check_card"));
        }
        Ok(self.card_by_uid(uid))
    }

    async fn add_card(&self, card: NewCard) -> Result<Card, CollaboratorError> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(injected("add_card"));
        }
        let id = format!("card_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let created = Card {
            id,
            uid: card.uid,
            playlist_id: card.playlist_id,
        };
        self.cards.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update_card(&self, card: &Card) -> Result<(), CollaboratorError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(injected("update_card"));
        }
        let mut cards = self.cards.lock().unwrap();
        match cards.iter_mut().find(|c| c.id == card.id) {
            Some(existing) => {
                *existing = card.clone();
                Ok(())
            }
            None => Err(not_found()),
        }
    }
}

#[async_trait]
impl PlaylistStore for MemoryStore {
    async fn get_playlist(&self, id: &str) -> Result<Playlist, CollaboratorError> {
        if self.fail_playlist.load(Ordering::SeqCst) {
            return Err(injected("get_playlist"));
        }
        self.playlists
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(not_found)
    }
}

#[async_trait]
impl AlarmStore for MemoryStore {
    async fn active_alarms(&self, hour: &str) -> Result<Vec<Alarm>, CollaboratorError> {
        Ok(self
            .alarms
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.activated && a.hour == hour)
            .cloned()
            .collect())
    }

    async fn list_alarms(&self) -> Result<Vec<Alarm>, CollaboratorError> {
        if self.fail_alarms.load(Ordering::SeqCst) {
            return Err(injected("list_alarms"));
        }
        Ok(self.alarms())
    }

    async fn create_alarm(&self, alarm: NewAlarm) -> Result<Alarm, CollaboratorError> {
        if self.fail_alarms.load(Ordering::SeqCst) {
            return Err(injected("create_alarm"));
        }
        let created = Alarm {
            id: format!("alarm_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            hour: alarm.hour,
            activated: alarm.activated,
            playlist_id: alarm.playlist_id,
        };
        self.alarms.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update_alarm(
        &self,
        id: &str,
        update: &AlarmUpdate,
    ) -> Result<(), CollaboratorError> {
        if self.fail_alarms.load(Ordering::SeqCst) {
            return Err(injected("update_alarm"));
        }
        let mut alarms = self.alarms.lock().unwrap();
        let alarm = alarms
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(not_found)?;
        update.apply(alarm);
        Ok(())
    }

    async fn delete_alarm(&self, id: &str) -> Result<(), CollaboratorError> {
        if self.fail_alarms.load(Ordering::SeqCst) {
            return Err(injected("delete_alarm"));
        }
        let mut alarms = self.alarms.lock().unwrap();
        let before = alarms.len();
        alarms.retain(|a| a.id != id);
        if alarms.len() == before {
            return Err(not_found());
        }
        Ok(())
    }
}

/// Player that records what it was asked to play.
#[derive(Default)]
pub struct RecordingPlayer {
    played: Mutex<Vec<Playlist>>,
    queue: Mutex<Vec<String>>,
    state: Mutex<Option<&'static str>>,
    pub fail: AtomicBool,
}

impl RecordingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> Vec<Playlist> {
        self.played.lock().unwrap().clone()
    }

    pub fn queued(&self) -> Vec<String> {
        self.queue.lock().unwrap().clone()
    }
}

#[async_trait]
impl Player for RecordingPlayer {
    async fn play_playlist(&self, playlist: &Playlist) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("play_playlist"));
        }
        self.played.lock().unwrap().push(playlist.clone());
        *self.state.lock().unwrap() = Some("play");
        Ok(())
    }
}

#[async_trait]
impl PlayerControl for RecordingPlayer {
    async fn player_status(&self) -> Result<PlayerStatus, CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("player_status"));
        }
        Ok(PlayerStatus {
            state: self.state.lock().unwrap().unwrap_or("stop").to_string(),
            volume: Some(50),
            item_id: None,
            item_length_ms: None,
            item_progress_ms: None,
        })
    }

    async fn play(&self) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("play"));
        }
        *self.state.lock().unwrap() = Some("play");
        Ok(())
    }

    async fn pause(&self) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("pause"));
        }
        *self.state.lock().unwrap() = Some("pause");
        Ok(())
    }

    async fn queue(&self) -> Result<Vec<QueueItem>, CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("queue"));
        }
        Ok(self
            .queued()
            .into_iter()
            .enumerate()
            .map(|(position, uri)| QueueItem {
                id: position as u64 + 1,
                position: position as u32,
                title: String::new(),
                artist: String::new(),
                album: String::new(),
                uri,
                length_ms: None,
            })
            .collect())
    }

    async fn clear_queue(&self) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("clear_queue"));
        }
        self.queue.lock().unwrap().clear();
        Ok(())
    }

    async fn add_to_queue(&self, uris: &[String]) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("add_to_queue"));
        }
        self.queue.lock().unwrap().extend_from_slice(uris);
        Ok(())
    }
}

/// Scanner fed from a channel; reports no tag when nothing arrives within the
/// scan window.
pub struct ChannelScanner {
    rx: tokio::sync::mpsc::UnboundedReceiver<String>,
}

impl ChannelScanner {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedSender<String>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { rx }, tx)
    }
}

#[async_trait]
impl CardScanner for ChannelScanner {
    async fn scan(&mut self, config: &ScanConfig) -> Result<Option<String>, ScanError> {
        match tokio::time::timeout(config.window(), self.rx.recv()).await {
            Ok(Some(uid)) => Ok(Some(uid)),
            Ok(None) => Err(ScanError::Closed),
            Err(_) => Ok(None),
        }
    }
}
