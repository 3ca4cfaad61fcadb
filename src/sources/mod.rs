pub mod ytdlp;

use async_trait::async_trait;
use url::Url;

use crate::{audio::queue::Track, error::PlaybackResult};

pub use ytdlp::YtDlpResolver;

/// Turns a user-supplied reference into a playable track.
///
/// The reference is either a direct media locator or free-text search; a
/// search must settle on exactly one result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> PlaybackResult<Track>;
}

/// True when `reference` should be treated as a URL rather than a search.
pub fn is_direct_locator(reference: &str) -> bool {
    Url::parse(reference.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

/// Formats seconds as `m:ss`, or `h:mm:ss` from one hour up.
pub fn format_duration(total_seconds: u64) -> String {
    let (minutes, seconds) = (total_seconds / 60, total_seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
