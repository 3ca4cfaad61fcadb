use dashmap::DashMap;
use serenity::{
    builder::{CreateMessage, EditMessage},
    http::Http,
    model::id::{ChannelId, GuildId},
};
use songbird::Songbird;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        engine::PlaybackEvent,
        queue::{StatusMessage, Track},
        registry::GuildRegistry,
    },
    ui::{buttons, embeds},
};

/// Turns engine events into Discord messages and voice housekeeping.
pub struct EventPump {
    pub http: Arc<Http>,
    pub voice: Option<Arc<Songbird>>,
    pub registry: Arc<GuildRegistry>,
    pub announce_channels: Arc<DashMap<GuildId, ChannelId>>,
    pub disconnect_when_idle: bool,
}

impl EventPump {
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<PlaybackEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                PlaybackEvent::TrackStarted {
                    guild_id,
                    track,
                    status_message,
                } => self.announce(guild_id, &track, status_message).await,
                PlaybackEvent::Idle { guild_id } => self.on_idle(guild_id).await,
            }
        }
        debug!("playback event stream closed");
    }

    /// Edits the guild's status message in place, or posts a new one.
    async fn announce(&self, guild_id: GuildId, track: &Track, previous: Option<StatusMessage>) {
        let embed = embeds::create_now_playing_embed(track);
        let controls = buttons::create_player_buttons();

        if let Some(previous) = previous {
            let edit = EditMessage::new().embed(embed.clone()).components(controls.clone());
            match previous
                .channel_id
                .edit_message(&*self.http, previous.message_id, edit)
                .await
            {
                Ok(_) => return,
                Err(e) => warn!("could not edit status message in guild {}: {}", guild_id, e),
            }
        }

        let channel_id = self
            .announce_channels
            .get(&guild_id)
            .map(|channel| *channel)
            .or(previous.map(|message| message.channel_id));
        let Some(channel_id) = channel_id else {
            debug!("no channel to announce {} in guild {}", track.title(), guild_id);
            return;
        };

        let message = CreateMessage::new().embed(embed).components(controls);
        match channel_id.send_message(&*self.http, message).await {
            Ok(sent) => {
                if let Some(engine) = self.registry.existing(guild_id) {
                    engine.set_status_message(StatusMessage {
                        channel_id: sent.channel_id,
                        message_id: sent.id,
                    });
                }
            }
            Err(e) => warn!("could not post status message in guild {}: {}", guild_id, e),
        }
    }

    async fn on_idle(&self, guild_id: GuildId) {
        if !self.disconnect_when_idle {
            return;
        }
        let Some(engine) = self.registry.existing(guild_id) else {
            return;
        };

        // Something may have been queued since the event was published.
        match engine.disconnect_if_idle().await {
            Ok(true) => {}
            Ok(false) | Err(_) => return,
        }

        if let Some(voice) = &self.voice {
            if let Err(e) = voice.remove(guild_id).await {
                warn!("could not leave voice in guild {}: {:?}", guild_id, e);
            }
        }
        info!("💤 Queue ran dry, left voice in guild {}", guild_id);
    }
}
