use rand::seq::SliceRandom;
use rand::Rng;
use serenity::model::id::{ChannelId, MessageId};
use std::{collections::VecDeque, fmt, str::FromStr};
use tracing::debug;

use crate::error::{PlaybackError, PlaybackResult};

pub const DEFAULT_VOLUME: f32 = 0.5;
const MAX_HISTORY: usize = 50;

/// Opaque handle the sink knows how to stream from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle(String);

impl MediaHandle {
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self(stream_url.into())
    }

    pub fn stream_url(&self) -> &str {
        &self.0
    }
}

/// A resolved, playable track. Never mutated after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    reference: String,
    title: String,
    duration_display: String,
    thumbnail_url: Option<String>,
    media: MediaHandle,
}

impl Track {
    pub fn new(
        reference: impl Into<String>,
        title: impl Into<String>,
        duration_display: impl Into<String>,
        thumbnail_url: Option<String>,
        media: MediaHandle,
    ) -> Self {
        Self {
            reference: reference.into(),
            title: title.into(),
            duration_display: duration_display.into(),
            thumbnail_url,
            media,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn duration_display(&self) -> &str {
        &self.duration_display
    }
    pub fn thumbnail_url(&self) -> Option<&str> {
        self.thumbnail_url.as_deref()
    }
    pub fn media(&self) -> &MediaHandle {
        &self.media
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl FromStr for LoopMode {
    type Err = PlaybackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(LoopMode::Off),
            "track" => Ok(LoopMode::Track),
            "queue" => Ok(LoopMode::Queue),
            other => Err(PlaybackError::InvalidArgument(format!(
                "unknown loop mode `{other}` (expected off, track or queue)"
            ))),
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopMode::Off => "off",
            LoopMode::Track => "track",
            LoopMode::Queue => "queue",
        })
    }
}

/// Where the last "now playing" message lives, so it can be edited in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMessage {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

/// Everything a guild remembers about its playback.
///
/// Owned by exactly one engine worker; nothing else touches it.
#[derive(Debug, Clone)]
pub struct GuildQueueState {
    pub queue: VecDeque<Track>,
    pub history: Vec<Track>,
    pub loop_mode: LoopMode,
    pub volume: f32,
    pub now_playing: Option<Track>,
    pub status_message: Option<StatusMessage>,
}

impl Default for GuildQueueState {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            history: Vec::new(),
            loop_mode: LoopMode::Off,
            volume: DEFAULT_VOLUME,
            now_playing: None,
            status_message: None,
        }
    }
}

impl GuildQueueState {
    pub fn push(&mut self, track: Track) {
        self.queue.push_back(track);
    }

    /// Picks the track that should play next, applying the loop mode.
    ///
    /// `Track` repeats the head without consuming it. `Off` and `Queue` pop
    /// the head into history; `Queue` also puts it back at the tail.
    pub fn select_next(&mut self) -> Option<Track> {
        match self.loop_mode {
            LoopMode::Track => self.queue.front().cloned(),
            LoopMode::Off => {
                let next = self.queue.pop_front()?;
                self.record_history(next.clone());
                Some(next)
            }
            LoopMode::Queue => {
                let next = self.queue.pop_front()?;
                self.record_history(next.clone());
                self.queue.push_back(next.clone());
                Some(next)
            }
        }
    }

    /// Moves the most recent history entry back to the front of the queue.
    pub fn recall_previous(&mut self) -> Option<Track> {
        let track = self.history.pop()?;
        self.queue.push_front(track.clone());
        Some(track)
    }

    /// Drops the queue head; used when the repeated track cannot be played.
    pub fn drop_head(&mut self) -> Option<Track> {
        self.queue.pop_front()
    }

    /// Moves the queue head into history, ending a track loop on it.
    pub fn retire_head(&mut self) -> Option<Track> {
        let head = self.queue.pop_front()?;
        self.record_history(head.clone());
        Some(head)
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) -> PlaybackResult<usize> {
        let len = self.queue.len();
        if len < 2 {
            return Err(PlaybackError::InsufficientItems(len));
        }
        self.queue.make_contiguous().shuffle(rng);
        Ok(len)
    }

    /// Stores a 0–100 percentage as a 0.0–1.0 gain.
    pub fn set_volume_percent(&mut self, percent: i64) -> PlaybackResult<f32> {
        if !(0..=100).contains(&percent) {
            return Err(PlaybackError::InvalidArgument(format!(
                "volume must be between 0 and 100, got {percent}"
            )));
        }
        self.volume = percent as f32 / 100.0;
        Ok(self.volume)
    }

    fn record_history(&mut self, track: Track) {
        self.history.push(track);
        if self.history.len() > MAX_HISTORY {
            let overflow = self.history.len() - MAX_HISTORY;
            self.history.drain(..overflow);
            debug!("history trimmed by {overflow}");
        }
    }
}
