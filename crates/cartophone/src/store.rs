//! Collaborator seams: the card/playlist store and the playback service.
//!
//! The core never caches these records; it passes UIDs and playlist ids
//! through to whichever implementation is wired in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A persisted tag-to-playlist binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub uid: String,
    /// Empty when the card is registered but not yet associated.
    #[serde(rename = "playlistId", default)]
    pub playlist_id: String,
}

impl Card {
    pub fn is_bound(&self) -> bool {
        !self.playlist_id.is_empty()
    }
}

/// Payload for creating a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCard {
    pub uid: String,
    #[serde(rename = "playlistId")]
    pub playlist_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: String,
    /// Wall-clock trigger time, `HH:MM`.
    pub hour: String,
    #[serde(default)]
    pub activated: bool,
    #[serde(rename = "playlistId")]
    pub playlist_id: String,
}

/// Payload for creating an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAlarm {
    pub hour: String,
    #[serde(default)]
    pub activated: bool,
    #[serde(rename = "playlistId")]
    pub playlist_id: String,
}

/// Partial update of an alarm; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlarmUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated: Option<bool>,
    #[serde(rename = "playlistId", skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
}

impl AlarmUpdate {
    pub fn apply(&self, alarm: &mut Alarm) {
        if let Some(hour) = &self.hour {
            alarm.hour = hour.clone();
        }
        if let Some(activated) = self.activated {
            alarm.activated = activated;
        }
        if let Some(playlist_id) = &self.playlist_id {
            alarm.playlist_id = playlist_id.clone();
        }
    }
}

/// Failure talking to PocketBase or OwnTone.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("{0}")]
    Unavailable(String),
}

/// Build the HTTP client shared by the REST collaborators.
pub(crate) fn http_client(
    timeout: std::time::Duration,
) -> Result<reqwest::Client, CollaboratorError> {
    let mut headers = reqwest::header::HeaderMap::new();
    let user_agent = format!("cartophone/{}", crate::version::CARTOPHONE_VERSION);
    if let Ok(value) = reqwest::header::HeaderValue::from_str(&user_agent) {
        headers.insert(reqwest::header::USER_AGENT, value);
    }

    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()?)
}

/// Pass the response through when its status is one of `accepted`.
pub(crate) async fn accept_status(
    response: reqwest::Response,
    accepted: &[u16],
) -> Result<reqwest::Response, CollaboratorError> {
    let status = response.status().as_u16();
    if accepted.contains(&status) {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CollaboratorError::Status { status, body })
}

/// Read a JSON body, reporting shape mismatches as [`CollaboratorError::Decode`].
pub(crate) async fn decode_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, CollaboratorError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| CollaboratorError::Decode(e.to_string()))
}

#[async_trait]
pub trait CardStore: Send + Sync {
    /// Look up the card registered for `uid`, if any.
    async fn check_card(&self, uid: &str) -> Result<Option<Card>, CollaboratorError>;

    async fn add_card(&self, card: NewCard) -> Result<Card, CollaboratorError>;

    async fn update_card(&self, card: &Card) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait PlaylistStore: Send + Sync {
    async fn get_playlist(&self, id: &str) -> Result<Playlist, CollaboratorError>;
}

#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// Activated alarms whose trigger time equals `hour` (`HH:MM`).
    async fn active_alarms(&self, hour: &str) -> Result<Vec<Alarm>, CollaboratorError>;

    async fn list_alarms(&self) -> Result<Vec<Alarm>, CollaboratorError>;

    async fn create_alarm(&self, alarm: NewAlarm) -> Result<Alarm, CollaboratorError>;

    async fn update_alarm(
        &self,
        id: &str,
        update: &AlarmUpdate,
    ) -> Result<(), CollaboratorError>;

    async fn delete_alarm(&self, id: &str) -> Result<(), CollaboratorError>;
}

/// Playback trigger.
#[async_trait]
pub trait Player: Send + Sync {
    /// Replace the current queue with `playlist` and start playing it.
    async fn play_playlist(&self, playlist: &Playlist) -> Result<(), CollaboratorError>;
}
