use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::{format_duration, is_direct_locator, TrackResolver};
use crate::{
    audio::queue::{MediaHandle, Track},
    error::{PlaybackError, PlaybackResult},
};

/// Resolves tracks by shelling out to yt-dlp.
pub struct YtDlpResolver {
    binary: String,
    // Limit concurrent lookups to stay clear of rate limiting
    rate_limiter: Semaphore,
}

/// The subset of yt-dlp's `--dump-json` output we use.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    url: Option<String>,
    entries: Option<Vec<YtDlpInfo>>,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            rate_limiter: Semaphore::new(3),
        }
    }

    fn target_for(reference: &str) -> String {
        let reference = reference.trim();
        if is_direct_locator(reference) {
            reference.to_string()
        } else {
            format!("ytsearch1:{reference}")
        }
    }

    fn parse_output(reference: &str, stdout: &str) -> PlaybackResult<Track> {
        let line = stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| PlaybackError::Resolution(format!("no results for `{reference}`")))?;

        let mut info: YtDlpInfo = serde_json::from_str(line)
            .map_err(|e| PlaybackError::Resolution(format!("unreadable yt-dlp output: {e}")))?;

        // Searches and playlists answer with a list; the first entry wins.
        if let Some(entries) = info.entries.take() {
            info = entries
                .into_iter()
                .next()
                .ok_or_else(|| PlaybackError::Resolution(format!("no results for `{reference}`")))?;
        }

        let stream_url = info
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| PlaybackError::Resolution("no playable stream found".to_string()))?;

        let seconds = info.duration.map(|d| d.max(0.0) as u64).unwrap_or(0);

        Ok(Track::new(
            reference,
            info.title.unwrap_or_else(|| "Unknown".to_string()),
            format_duration(seconds),
            info.thumbnail,
            MediaHandle::new(stream_url),
        ))
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, reference: &str) -> PlaybackResult<Track> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| PlaybackError::Resolution(e.to_string()))?;

        let target = Self::target_for(reference);
        info!("🔍 Resolving {}", target);

        let output = Command::new(&self.binary)
            .args([
                "--no-playlist",
                "--dump-json",
                "--no-warnings",
                "-f",
                "bestaudio/best",
                target.as_str(),
            ])
            .output()
            .await
            .map_err(|e| PlaybackError::Resolution(format!("could not run yt-dlp: {e}")))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(PlaybackError::Resolution(error.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let track = Self::parse_output(reference, &stdout)?;
        debug!("resolved {} to {}", reference, track.title());
        Ok(track)
    }
}
