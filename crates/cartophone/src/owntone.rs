//! OwnTone REST client: queue replacement and basic transport control.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::store::{CollaboratorError, Player, Playlist, accept_status, decode_json, http_client};

const OK: &[u16] = &[200, 204];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Subset of `GET /api/player` the service reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatus {
    /// `play`, `pause` or `stop`.
    pub state: String,
    #[serde(default)]
    pub volume: Option<u32>,
    #[serde(default)]
    pub item_id: Option<u64>,
    #[serde(default)]
    pub item_length_ms: Option<u64>,
    #[serde(default)]
    pub item_progress_ms: Option<u64>,
}

/// One entry of `GET /api/queue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: u64,
    #[serde(default)]
    pub position: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    pub uri: String,
    #[serde(default)]
    pub length_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Queue {
    #[serde(default)]
    items: Vec<QueueItem>,
}

/// Transport and queue control exposed over HTTP.
#[async_trait]
pub trait PlayerControl: Send + Sync {
    async fn player_status(&self) -> Result<PlayerStatus, CollaboratorError>;

    /// Resume the current queue.
    async fn play(&self) -> Result<(), CollaboratorError>;

    async fn pause(&self) -> Result<(), CollaboratorError>;

    async fn queue(&self) -> Result<Vec<QueueItem>, CollaboratorError>;

    async fn clear_queue(&self) -> Result<(), CollaboratorError>;

    /// Append `uris` to the end of the queue.
    async fn add_to_queue(&self, uris: &[String]) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct OwnToneClient {
    base_url: String,
    client: reqwest::Client,
}

impl OwnToneClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CollaboratorError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: http_client(REQUEST_TIMEOUT)?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn put(&self, path: &str) -> Result<(), CollaboratorError> {
        let response = self.client.put(self.url(path)).send().await?;
        accept_status(response, OK).await?;
        Ok(())
    }

    /// `uris` is a comma-separated list.
    pub async fn enqueue(&self, uris: &str) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .post(self.url("/api/queue/items/add"))
            .query(&[("uris", uris)])
            .send()
            .await?;
        accept_status(response, OK).await?;
        Ok(())
    }
}

#[async_trait]
impl PlayerControl for OwnToneClient {
    async fn player_status(&self) -> Result<PlayerStatus, CollaboratorError> {
        let response = self.client.get(self.url("/api/player")).send().await?;
        let response = accept_status(response, &[200]).await?;
        decode_json(response).await
    }

    async fn play(&self) -> Result<(), CollaboratorError> {
        self.put("/api/player/play").await
    }

    async fn pause(&self) -> Result<(), CollaboratorError> {
        self.put("/api/player/pause").await
    }

    async fn queue(&self) -> Result<Vec<QueueItem>, CollaboratorError> {
        let response = self.client.get(self.url("/api/queue")).send().await?;
        let response = accept_status(response, &[200]).await?;
        let queue: Queue = decode_json(response).await?;
        Ok(queue.items)
    }

    async fn clear_queue(&self) -> Result<(), CollaboratorError> {
        self.put("/api/queue/clear").await
    }

    async fn add_to_queue(&self, uris: &[String]) -> Result<(), CollaboratorError> {
        self.enqueue(&uris.join(",")).await
    }
}

#[async_trait]
impl Player for OwnToneClient {
    async fn play_playlist(&self, playlist: &Playlist) -> Result<(), CollaboratorError> {
        self.clear_queue().await?;
        self.enqueue(&playlist.uri).await?;
        self.play().await
    }
}
