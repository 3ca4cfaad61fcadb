use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::audio::{
    engine::QueueSnapshot,
    queue::{LoopMode, Track},
};

/// Color palette shared by every embed.
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";
const QUEUE_PREVIEW: usize = 10;

pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Now Playing")
        .description(format!("**{}**", track.title()))
        .color(colors::MUSIC_PURPLE)
        .field("⏱️ Duration", track.duration_display(), true);

    if let Some(thumbnail) = track.thumbnail_url() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_track_added_embed(track: &Track, position: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("✅ Added to Queue")
        .description(format!("**{}**", track.title()))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duration", track.duration_display(), true)
        .field("📍 Position", position.to_string(), true);

    if let Some(thumbnail) = track.thumbnail_url() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Current track, the next few queued tracks and the playback settings.
pub fn create_queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE);

    if snapshot.now_playing.is_none() && snapshot.queue.is_empty() {
        return embed
            .description("😴 **The queue is empty**\n\n💡 Use `/play <song>` to add music")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &snapshot.now_playing {
        let status = if snapshot.paused {
            "⏸️"
        } else {
            loop_emoji(snapshot.loop_mode)
        };
        embed = embed.field(
            format!("{status} Now Playing"),
            format!("**{}** `[{}]`", current.title(), current.duration_display()),
            false,
        );
    }

    if !snapshot.queue.is_empty() {
        let mut upcoming = String::new();
        for (i, track) in snapshot.queue.iter().take(QUEUE_PREVIEW).enumerate() {
            upcoming.push_str(&format!(
                "**{}**. {} `[{}]`\n",
                i + 1,
                track.title(),
                track.duration_display()
            ));
        }
        if snapshot.queue.len() > QUEUE_PREVIEW {
            upcoming.push_str(&format!("…and {} more", snapshot.queue.len() - QUEUE_PREVIEW));
        }
        embed = embed.field("Up Next", upcoming, false);
    }

    let info = format!(
        "**Queued:** {} • **Loop:** {} • **Volume:** {}%",
        snapshot.queue.len(),
        snapshot.loop_mode,
        (snapshot.volume * 100.0).round() as u32
    );

    embed
        .field("Info", info, false)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn create_help_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Guild Jukebox")
        .color(colors::INFO_BLUE)
        .description("One queue per server, shared by everyone in voice")
        .field(
            "🎵 Playback",
            "• `/play <song or url>` - Queue a track\n\
            • `/pause` - Pause playback\n\
            • `/resume` - Resume playback\n\
            • `/skip` - Skip to the next track\n\
            • `/previous` - Replay the last track\n\
            • `/stop` - Stop and clear the queue",
            false,
        )
        .field(
            "📜 Queue",
            "• `/queue` - Show the queue\n\
            • `/nowplaying` - Show the current track\n\
            • `/shuffle` - Shuffle the queue\n\
            • `/loop <off|track|queue>` - Set repeat mode",
            false,
        )
        .field(
            "🎛️ Audio",
            "• `/volume <0-100>` - Set the volume",
            false,
        )
        .field(
            "🔊 Connection",
            "• `/join` - Join your voice channel\n\
            • `/leave` - Leave and forget the queue",
            false,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn create_error_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
}

pub fn loop_emoji(mode: LoopMode) -> &'static str {
    match mode {
        LoopMode::Track => "🔂",
        LoopMode::Queue => "🔁",
        LoopMode::Off => "▶️",
    }
}
