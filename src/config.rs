use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Register commands on one guild while developing

    // Status messages
    pub status_delete_delay: u64, // Seconds; 0 keeps replies around

    // Voice
    pub disconnect_when_idle: bool,

    // Resolver
    pub ytdlp_path: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, falling back to
    /// defaults for everything except the token.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            guild_id: lookup("GUILD_ID").and_then(|s| s.trim().parse().ok()),
            status_delete_delay: parse_or(&lookup, "STATUS_DELETE_DELAY", defaults.status_delete_delay)?,
            disconnect_when_idle: parse_or(&lookup, "DISCONNECT_WHEN_IDLE", defaults.disconnect_when_idle)?,
            ytdlp_path: lookup("YTDLP_PATH")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.ytdlp_path),
        };

        config.validate()?;
        Ok(config)
    }

    /// Catches values that would only fail later, at the first command.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.ytdlp_path.trim().is_empty() {
            anyhow::bail!("YTDLP_PATH must not be empty");
        }

        Ok(())
    }

    /// How long command replies stay visible, if they get deleted at all.
    pub fn reply_lifetime(&self) -> Option<Duration> {
        (self.status_delete_delay > 0).then(|| Duration::from_secs(self.status_delete_delay))
    }

    /// Loggable summary; never includes the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Replies: {}\n  \
            Voice: disconnect when idle={}\n  \
            Resolver: {}",
            self.guild_id
                .map_or("global".to_string(), |id| format!("on guild {id}")),
            self.reply_lifetime()
                .map_or("kept".to_string(), |d| format!("deleted after {}s", d.as_secs())),
            self.disconnect_when_idle,
            self.ytdlp_path
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            guild_id: None,
            status_delete_delay: 20,
            disconnect_when_idle: true,
            ytdlp_path: "yt-dlp".to_string(),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value `{value}`")),
        _ => Ok(default),
    }
}
