use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::{CommandInteraction, ComponentInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{debug, info};

use crate::{
    audio::engine::PlaybackEngine,
    bot::JukeboxBot,
    ui::{buttons::PlayerControl, embeds},
};

/// Defers the command, runs it, answers by editing the deferred response
/// and schedules that answer for deletion.
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &JukeboxBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Commands only work inside a server")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    info!(
        "📝 Command /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    bot.set_announce_channel(guild_id, command.channel_id);

    let response = match run_command(ctx, &command, bot, guild_id).await {
        Ok(response) => response,
        Err(e) => {
            debug!("/{} failed in guild {}: {:?}", command.data.name, guild_id, e);
            EditInteractionResponse::new().embed(embeds::create_error_embed(&e.to_string()))
        }
    };
    command.edit_response(&ctx.http, response).await?;

    if let Some(lifetime) = bot.config().reply_lifetime() {
        let http = ctx.http.clone();
        tokio::spawn(async move {
            tokio::time::sleep(lifetime).await;
            if let Err(e) = command.delete_response(&http).await {
                debug!("could not delete reply to /{}: {}", command.data.name, e);
            }
        });
    }

    Ok(())
}

async fn run_command(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<EditInteractionResponse> {
    let engine = bot.registry.get(guild_id);

    match command.data.name.as_str() {
        "join" => handle_join(ctx, command, bot, guild_id).await,
        "leave" => {
            bot.leave_voice_channel(ctx, guild_id).await?;
            Ok(text("👋 Left the voice channel"))
        }
        "play" => handle_play(ctx, command, bot, guild_id, &engine).await,
        "pause" => Ok(if engine.pause().await? {
            text("⏸️ Paused")
        } else {
            text("Nothing is playing, or it is already paused")
        }),
        "resume" => Ok(if engine.resume().await? {
            text("▶️ Resumed")
        } else {
            text("Nothing is paused")
        }),
        "skip" => Ok(if engine.skip().await? {
            text("⏭️ Skipped")
        } else {
            text("Nothing to skip")
        }),
        "previous" => Ok(match engine.previous().await? {
            Some(track) => text(format!("⏮️ Going back to **{}**", track.title())),
            None => text("There is nothing in the history yet"),
        }),
        "stop" => {
            engine.stop().await?;
            Ok(text("⏹️ Stopped and cleared the queue"))
        }
        "volume" => {
            let level = integer_option(command, "level")
                .ok_or_else(|| anyhow::anyhow!("A volume level is required"))?;
            engine.set_volume(level).await?;
            Ok(text(format!("🔊 Volume set to {}%", level)))
        }
        "loop" => {
            let mode = string_option(command, "mode").unwrap_or("off");
            let mode = engine.set_loop_mode(mode).await?;
            Ok(text(format!("{} Loop mode: **{}**", embeds::loop_emoji(mode), mode)))
        }
        "shuffle" => {
            let count = engine.shuffle().await?;
            Ok(text(format!("🔀 Shuffled {} tracks", count)))
        }
        "queue" => {
            let snapshot = engine.snapshot().await?;
            Ok(EditInteractionResponse::new().embed(embeds::create_queue_embed(&snapshot)))
        }
        "nowplaying" => Ok(match engine.snapshot().await?.now_playing {
            Some(track) => EditInteractionResponse::new().embed(embeds::create_now_playing_embed(&track)),
            None => text("Nothing is playing right now"),
        }),
        "help" => Ok(EditInteractionResponse::new().embed(embeds::create_help_embed())),
        other => Ok(text(format!("❌ Unknown command /{}", other))),
    }
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<EditInteractionResponse> {
    let caller = get_user_voice_channel(ctx, guild_id, command.user.id)?;
    let connected = bot.registry.get(guild_id).snapshot().await?.connected;
    match plan_voice(caller, connected)? {
        VoicePlan::Join(channel_id) => {
            bot.join_voice_channel(ctx, guild_id, channel_id).await?;
            Ok(text(format!("🔊 Joined <#{}>", channel_id)))
        }
        VoicePlan::AlreadyConnected => Ok(text("🔊 Already connected to voice")),
    }
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
    engine: &PlaybackEngine,
) -> Result<EditInteractionResponse> {
    let query = string_option(command, "query")
        .map(str::trim)
        .filter(|query| !query.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Tell me what to play"))?;

    let caller = get_user_voice_channel(ctx, guild_id, command.user.id)?;
    if let VoicePlan::Join(channel_id) = plan_voice(caller, engine.snapshot().await?.connected)? {
        bot.join_voice_channel(ctx, guild_id, channel_id).await?;
    }

    let track = engine.enqueue(query).await?;
    let snapshot = engine.snapshot().await?;

    // Under the loop modes the playing track also sits at the queue head.
    let embed = match snapshot.queue.iter().rposition(|queued| queued == &track) {
        Some(0) if snapshot.now_playing.as_ref() == Some(&track) => embeds::create_now_playing_embed(&track),
        Some(index) => embeds::create_track_added_embed(&track, index + 1),
        None => embeds::create_now_playing_embed(&track),
    };
    Ok(EditInteractionResponse::new().embed(embed))
}

/// Player buttons act on the engine and acknowledge silently; the status
/// message updates itself once the next track starts.
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Button used outside a server"))?;

    info!(
        "🔘 Button {} pressed by {} in guild {}",
        component.data.custom_id, component.user.name, guild_id
    );

    let Some(control) = PlayerControl::from_custom_id(&component.data.custom_id) else {
        component
            .create_response(&ctx.http, ephemeral("❌ Unknown action"))
            .await?;
        return Ok(());
    };

    let engine = bot.registry.get(guild_id);
    let result = match control {
        PlayerControl::Previous => engine.previous().await.map(|_| ()),
        PlayerControl::Stop => engine.stop().await,
        PlayerControl::Next => engine.skip().await.map(|_| ()),
    };

    let response = match result {
        Ok(()) => CreateInteractionResponse::Acknowledge,
        Err(e) => ephemeral(&format!("❌ {}", e)),
    };
    component.create_response(&ctx.http, response).await?;

    Ok(())
}

// Helpers

fn text(content: impl Into<String>) -> EditInteractionResponse {
    EditInteractionResponse::new().content(content)
}

fn ephemeral(content: &str) -> CreateInteractionResponse {
    CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(content)
            .ephemeral(true),
    )
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn integer_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

/// The voice channel the user is in, if any.
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<Option<ChannelId>> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild not found in cache"))?;

    Ok(guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id))
}

#[derive(Debug, PartialEq)]
enum VoicePlan {
    Join(ChannelId),
    AlreadyConnected,
}

/// `join` and `play` need the caller in voice; the bot joins only when it
/// has no connection yet.
fn plan_voice(caller: Option<ChannelId>, connected: bool) -> Result<VoicePlan> {
    let channel_id = caller.ok_or_else(|| anyhow::anyhow!("You need to be in a voice channel"))?;
    Ok(if connected {
        VoicePlan::AlreadyConnected
    } else {
        VoicePlan::Join(channel_id)
    })
}
