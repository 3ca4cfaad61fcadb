use thiserror::Error;

/// Why a playback operation was declined.
///
/// None of these are fatal: the engine keeps running and the caller is
/// expected to show the message to whoever issued the command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error("I'm not connected to a voice channel")]
    NotInVoiceSession,

    #[error("could not load that track: {0}")]
    Resolution(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not enough tracks to do that ({0} in queue)")]
    InsufficientItems(usize),
}

pub type PlaybackResult<T> = Result<T, PlaybackError>;
