use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use super::engine::{PlaybackEngine, PlaybackEvent};
use crate::sources::TrackResolver;

/// Process-wide map from guild to its playback engine.
///
/// Engines are created on first access and live until the guild leaves
/// voice; there is no other eviction.
pub struct GuildRegistry {
    engines: DashMap<GuildId, PlaybackEngine>,
    resolver: Arc<dyn TrackResolver>,
    events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
}

impl GuildRegistry {
    pub fn new(resolver: Arc<dyn TrackResolver>) -> Self {
        Self {
            engines: DashMap::new(),
            resolver,
            events: None,
        }
    }

    /// Engines created from now on publish their events to `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Returns the guild's engine, starting a fresh one if needed.
    pub fn get(&self, guild_id: GuildId) -> PlaybackEngine {
        let mut entry = self
            .engines
            .entry(guild_id)
            .or_insert_with(|| self.spawn(guild_id));
        if entry.is_closed() {
            *entry = self.spawn(guild_id);
        }
        entry.clone()
    }

    /// Returns the guild's engine only if one is running.
    pub fn existing(&self, guild_id: GuildId) -> Option<PlaybackEngine> {
        self.engines
            .get(&guild_id)
            .map(|engine| engine.clone())
            .filter(|engine| !engine.is_closed())
    }

    pub fn remove(&self, guild_id: GuildId) -> Option<PlaybackEngine> {
        self.engines.remove(&guild_id).map(|(_, engine)| engine)
    }

    /// Drops the guild's entry and shuts its engine down.
    pub async fn leave(&self, guild_id: GuildId) -> bool {
        match self.remove(guild_id) {
            Some(engine) => {
                engine.leave().await;
                info!("🗑️ Discarded playback state for guild {}", engine.guild_id());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    fn spawn(&self, guild_id: GuildId) -> PlaybackEngine {
        PlaybackEngine::spawn(guild_id, self.resolver.clone(), self.events.clone())
    }
}
