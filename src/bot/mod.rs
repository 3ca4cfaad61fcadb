//! # Bot Module
//!
//! Discord side of the jukebox: slash commands, player buttons, voice
//! connections and the "now playing" status messages.
//!
//! [`JukeboxBot`] implements Serenity's [`EventHandler`]. Playback itself is
//! delegated to the per-guild engines held by the [`GuildRegistry`]; this
//! module only translates between Discord and those engines.

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::{
    audio::{engine::PlaybackEvent, registry::GuildRegistry, sink::SongbirdSink},
    config::Config,
};

/// Main Discord event handler.
pub struct JukeboxBot {
    config: Arc<Config>,
    pub registry: Arc<GuildRegistry>,
    /// Shared by every voice sink for streaming.
    http_client: reqwest::Client,
    /// Text channel of the last command per guild, where status messages go.
    announce_channels: Arc<DashMap<GuildId, ChannelId>>,
    /// Handed to the event pump on the first `ready`.
    events: Mutex<Option<mpsc::UnboundedReceiver<PlaybackEvent>>>,
}

impl JukeboxBot {
    pub fn new(
        config: Config,
        registry: Arc<GuildRegistry>,
        events: mpsc::UnboundedReceiver<PlaybackEvent>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            http_client: reqwest::Client::new(),
            announce_channels: Arc::new(DashMap::new()),
            events: Mutex::new(Some(events)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Remembers where to post status messages for the guild.
    pub fn set_announce_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.announce_channels.insert(guild_id, channel_id);
    }

    /// Registers slash commands on `GUILD_ID` when set, globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registering guild commands: {:?}", e);
                        anyhow::anyhow!(
                            "Could not register guild commands. Check the bot has the 'applications.commands' scope in that guild."
                        )
                    })?;
                info!("✅ Guild commands registered for: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registering global commands: {:?}", e);
                    anyhow::anyhow!("Could not register global commands.")
                })?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }

    /// Joins `channel_id` and attaches the call to the guild's engine.
    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird not initialised"))?;

        let call = manager.join(guild_id, channel_id).await.map_err(|e| {
            error!("Error joining voice in guild {}: {:?}", guild_id, e);
            anyhow::anyhow!("Could not connect to the voice channel")
        })?;

        let sink = SongbirdSink::new(call, self.http_client.clone());
        self.registry.get(guild_id).connect(Box::new(sink)).await?;

        info!("🔊 Connected to voice channel {} in guild {}", channel_id, guild_id);
        Ok(())
    }

    /// Leaves voice and discards everything the guild had queued.
    pub async fn leave_voice_channel(&self, ctx: &Context, guild_id: GuildId) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird not initialised"))?;

        // Engine first, so the voice state update that follows finds nothing to clean up.
        self.registry.leave(guild_id).await;
        self.announce_channels.remove(&guild_id);

        if manager.get(guild_id).is_some() {
            manager.remove(guild_id).await?;
        }

        info!("👋 Left voice in guild {}", guild_id);
        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error registering commands: {:?}", e);
        }

        // `ready` fires again after a reconnect; the pump only starts once.
        let Some(receiver) = self.events.lock().await.take() else {
            return;
        };
        let pump = events::EventPump {
            http: ctx.http.clone(),
            voice: songbird::get(&ctx).await,
            registry: self.registry.clone(),
            announce_channels: self.announce_channels.clone(),
            disconnect_when_idle: self.config.disconnect_when_idle,
        };
        tokio::spawn(pump.run(receiver));
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                    error!("Error handling command: {:?}", e);
                }
            }
            Interaction::Component(component_interaction) => {
                if let Err(e) = handlers::handle_component(&ctx, component_interaction, self).await
                {
                    error!("Error handling component: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Discards the guild's state when someone else disconnects the bot.
    async fn voice_state_update(&self, ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(engine) = self.registry.existing(guild_id) else {
            return;
        };

        // Our own idle disconnect detaches the sink before leaving voice.
        match engine.snapshot().await {
            Ok(snapshot) if snapshot.connected => {}
            _ => return,
        }

        info!("🔌 Bot was disconnected from voice in guild {}", guild_id);
        self.registry.leave(guild_id).await;
        self.announce_channels.remove(&guild_id);

        if let Some(manager) = songbird::get(&ctx).await {
            if let Err(e) = manager.remove(guild_id).await {
                warn!("could not clean up voice call in guild {}: {:?}", guild_id, e);
            }
        }
    }
}
