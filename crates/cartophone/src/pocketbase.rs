//! PocketBase REST client for cards, playlists and alarms.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::store::{
    Alarm, AlarmStore, AlarmUpdate, Card, CardStore, CollaboratorError, NewAlarm, NewCard,
    Playlist, PlaylistStore, accept_status, decode_json, http_client,
};

const CARDS: &str = "/api/collections/cards/records";
const PLAYLISTS: &str = "/api/collections/playlists/records";
const ALARMS: &str = "/api/collections/alarms/records";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One page of a PocketBase list response; only the records are used.
#[derive(Debug, Deserialize)]
struct RecordList<T> {
    items: Vec<T>,
}

#[derive(Debug, Clone)]
pub struct PocketBaseClient {
    base_url: String,
    client: reqwest::Client,
}

impl PocketBaseClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CollaboratorError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            base_url,
            client: http_client(REQUEST_TIMEOUT)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Quote a value for use inside a PocketBase filter expression.
fn filter_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[async_trait]
impl CardStore for PocketBaseClient {
    async fn check_card(&self, uid: &str) -> Result<Option<Card>, CollaboratorError> {
        let response = self
            .client
            .get(self.url(CARDS))
            .query(&[("filter", format!("uid={}", filter_literal(uid)))])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = accept_status(response, &[200]).await?;
        let list: RecordList<Card> = decode_json(response).await?;
        Ok(list.items.into_iter().next())
    }

    async fn add_card(&self, card: NewCard) -> Result<Card, CollaboratorError> {
        let response = self.client.post(self.url(CARDS)).json(&card).send().await?;
        let response = accept_status(response, &[200, 201]).await?;
        let created: Card = decode_json(response).await?;
        tracing::debug!(card_id = %created.id, uid = %created.uid, "Card created");
        Ok(created)
    }

    async fn update_card(&self, card: &Card) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .patch(self.url(&format!("{}/{}", CARDS, card.id)))
            .json(card)
            .send()
            .await?;
        accept_status(response, &[200]).await?;
        tracing::debug!(card_id = %card.id, playlist_id = %card.playlist_id, "Card updated");
        Ok(())
    }
}

#[async_trait]
impl PlaylistStore for PocketBaseClient {
    async fn get_playlist(&self, id: &str) -> Result<Playlist, CollaboratorError> {
        let response = self
            .client
            .get(self.url(&format!("{}/{}", PLAYLISTS, id)))
            .send()
            .await?;
        let response = accept_status(response, &[200]).await?;
        decode_json(response).await
    }
}

#[async_trait]
impl AlarmStore for PocketBaseClient {
    async fn active_alarms(&self, hour: &str) -> Result<Vec<Alarm>, CollaboratorError> {
        let filter = format!("hour={} && activated=true", filter_literal(hour));
        let response = self
            .client
            .get(self.url(ALARMS))
            .query(&[("filter", filter)])
            .send()
            .await?;
        let response = accept_status(response, &[200]).await?;
        let list: RecordList<Alarm> = decode_json(response).await?;
        Ok(list.items)
    }

    async fn list_alarms(&self) -> Result<Vec<Alarm>, CollaboratorError> {
        let response = self.client.get(self.url(ALARMS)).send().await?;
        let response = accept_status(response, &[200]).await?;
        let list: RecordList<Alarm> = decode_json(response).await?;
        Ok(list.items)
    }

    async fn create_alarm(&self, alarm: NewAlarm) -> Result<Alarm, CollaboratorError> {
        let response = self.client.post(self.url(ALARMS)).json(&alarm).send().await?;
        let response = accept_status(response, &[200, 201]).await?;
        let created: Alarm = decode_json(response).await?;
        tracing::info!(alarm_id = %created.id, hour = %created.hour, "Alarm created");
        Ok(created)
    }

    async fn update_alarm(
        &self,
        id: &str,
        update: &AlarmUpdate,
    ) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .patch(self.url(&format!("{}/{}", ALARMS, id)))
            .json(update)
            .send()
            .await?;
        accept_status(response, &[200]).await?;
        tracing::info!(alarm_id = %id, ?update, "Alarm updated");
        Ok(())
    }

    async fn delete_alarm(&self, id: &str) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .delete(self.url(&format!("{}/{}", ALARMS, id)))
            .send()
            .await?;
        accept_status(response, &[200, 204]).await?;
        tracing::info!(alarm_id = %id, "Alarm deleted");
        Ok(())
    }
}
