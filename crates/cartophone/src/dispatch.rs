//! Action dispatcher - plays the playlist bound to a card read in Read mode.
//!
//! Failures are logged and swallowed; nothing here can stop the poller or
//! the arbiter.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::mode::CardEvent;
use crate::store::{CardStore, CollaboratorError, Player, PlaylistStore};

#[async_trait]
pub trait CardDispatcher: Send + Sync {
    async fn dispatch(&self, uid: &str);
}

/// What a dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    UnknownCard,
    Unbound { card_id: String },
    Played { playlist_id: String, name: String },
}

pub struct PlaybackDispatcher {
    cards: Arc<dyn CardStore>,
    playlists: Arc<dyn PlaylistStore>,
    player: Arc<dyn Player>,
}

impl PlaybackDispatcher {
    pub fn new(
        cards: Arc<dyn CardStore>,
        playlists: Arc<dyn PlaylistStore>,
        player: Arc<dyn Player>,
    ) -> Self {
        Self {
            cards,
            playlists,
            player,
        }
    }

    pub async fn try_dispatch(&self, uid: &str) -> Result<DispatchOutcome, CollaboratorError> {
        let Some(card) = self.cards.check_card(uid).await? else {
            return Ok(DispatchOutcome::UnknownCard);
        };
        if !card.is_bound() {
            return Ok(DispatchOutcome::Unbound { card_id: card.id });
        }

        let playlist = self.playlists.get_playlist(&card.playlist_id).await?;
        self.player.play_playlist(&playlist).await?;

        Ok(DispatchOutcome::Played {
            playlist_id: card.playlist_id,
            name: playlist.name,
        })
    }
}

#[async_trait]
impl CardDispatcher for PlaybackDispatcher {
    async fn dispatch(&self, uid: &str) {
        match self.try_dispatch(uid).await {
            Ok(DispatchOutcome::UnknownCard) => {
                tracing::info!(%uid, "Card not registered, nothing to play");
            }
            Ok(DispatchOutcome::Unbound { card_id }) => {
                tracing::info!(%uid, %card_id, "Card has no playlist bound, nothing to play");
            }
            Ok(DispatchOutcome::Played { playlist_id, name }) => {
                tracing::info!(
                    target: "cartophone::playback",
                    %uid,
                    %playlist_id,
                    playlist = %name,
                    "Playing playlist"
                );
            }
            Err(e) => {
                tracing::warn!(%uid, error = %e, "Card dispatch failed");
            }
        }
    }
}

/// Consume routed card events one at a time, in arrival order.
pub fn spawn_dispatch_worker(
    dispatcher: Arc<dyn CardDispatcher>,
    mut events: mpsc::UnboundedReceiver<CardEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            dispatcher.dispatch(&event.uid).await;
        }
        tracing::debug!("Dispatch worker exiting");
    })
}
