//! # Audio Module
//!
//! Per-guild queueing and playback.
//!
//! - [`queue`] holds the data a guild remembers: queue, history, loop mode,
//!   volume and the track currently playing.
//! - [`engine`] runs one worker task per guild. Commands and stream-finished
//!   notifications share the worker's mailbox, so every transition for a
//!   guild happens one at a time and in arrival order.
//! - [`sink`] is the seam to the voice transport, with a songbird
//!   implementation.
//! - [`registry`] maps guild ids to engines, creating them on first use.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use serenity::all::GuildId;
//! # async fn example(registry: Arc<GuildRegistry>, sink: Box<dyn AudioSink>) -> anyhow::Result<()> {
//! let engine = registry.get(GuildId::new(123456789));
//! engine.connect(sink).await?;
//! engine.enqueue("never gonna give you up").await?;
//! engine.set_loop_mode("queue").await?;
//! engine.skip().await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod queue;
pub mod registry;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;
