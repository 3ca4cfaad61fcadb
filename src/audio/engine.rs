use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{
    queue::{GuildQueueState, LoopMode, StatusMessage, Track},
    sink::{AudioSink, FinishedNotifier},
};
use crate::{
    error::{PlaybackError, PlaybackResult},
    sources::TrackResolver,
};

/// Something the bot layer may want to show to users.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    TrackStarted {
        guild_id: GuildId,
        track: Track,
        status_message: Option<StatusMessage>,
    },
    Idle {
        guild_id: GuildId,
    },
}

/// Read-only copy of a guild's playback state.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub now_playing: Option<Track>,
    pub queue: Vec<Track>,
    pub history: Vec<Track>,
    pub loop_mode: LoopMode,
    pub volume: f32,
    pub paused: bool,
    pub connected: bool,
    pub status_message: Option<StatusMessage>,
}

type Reply<T> = oneshot::Sender<T>;

/// Messages processed, one at a time, by a guild's worker.
pub(crate) enum GuildCommand {
    Connect { sink: Box<dyn AudioSink>, reply: Reply<()> },
    Disconnect { reply: Reply<()> },
    DisconnectIfIdle { reply: Reply<bool> },
    Append { track: Track, reply: Reply<PlaybackResult<Track>> },
    StreamFinished { epoch: u64 },
    Skip { reply: Reply<PlaybackResult<bool>> },
    Previous { reply: Reply<PlaybackResult<Option<Track>>> },
    Pause { reply: Reply<PlaybackResult<bool>> },
    Resume { reply: Reply<PlaybackResult<bool>> },
    Stop { reply: Reply<PlaybackResult<()>> },
    SetVolume { percent: i64, reply: Reply<PlaybackResult<f32>> },
    SetLoopMode { mode: LoopMode, reply: Reply<()> },
    Shuffle { reply: Reply<PlaybackResult<usize>> },
    SetStatusMessage { message: StatusMessage },
    Snapshot { reply: Reply<QueueSnapshot> },
    Leave { reply: Reply<()> },
}

/// Handle to one guild's playback worker.
///
/// Cloning is cheap; every clone talks to the same worker. All operations
/// are queued in arrival order, together with stream-finished notifications
/// coming from the audio transport.
#[derive(Clone)]
pub struct PlaybackEngine {
    guild_id: GuildId,
    mailbox: mpsc::UnboundedSender<GuildCommand>,
    resolver: Arc<dyn TrackResolver>,
}

impl PlaybackEngine {
    /// Starts the worker for `guild_id`. Must be called inside a Tokio runtime.
    pub fn spawn(
        guild_id: GuildId,
        resolver: Arc<dyn TrackResolver>,
        events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
    ) -> Self {
        let (mailbox, commands) = mpsc::unbounded_channel();
        let worker = GuildWorker {
            guild_id,
            state: GuildQueueState::default(),
            sink: None,
            epoch: 0,
            bound: None,
            paused: false,
            failures: 0,
            commands,
            mailbox: mailbox.downgrade(),
            events,
        };
        tokio::spawn(worker.run());
        debug!("playback worker started for guild {}", guild_id);

        Self {
            guild_id,
            mailbox,
            resolver,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// True once the worker has shut down (after `leave`).
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub async fn connect(&self, sink: Box<dyn AudioSink>) -> PlaybackResult<()> {
        self.request(|reply| GuildCommand::Connect { sink, reply }).await
    }

    pub async fn disconnect(&self) -> PlaybackResult<()> {
        self.request(|reply| GuildCommand::Disconnect { reply }).await
    }

    /// Detaches the sink only if nothing is bound; returns whether it did.
    pub async fn disconnect_if_idle(&self) -> PlaybackResult<bool> {
        self.request(|reply| GuildCommand::DisconnectIfIdle { reply }).await
    }

    /// Resolves `reference` and appends it. Starts playback if nothing is bound.
    ///
    /// Resolution runs before the worker is involved, so a slow lookup never
    /// holds up other operations on the guild.
    pub async fn enqueue(&self, reference: &str) -> PlaybackResult<Track> {
        let track = self.resolver.resolve(reference).await?;
        self.request(|reply| GuildCommand::Append { track, reply })
            .await?
    }

    /// Returns whether a bound track was stopped.
    pub async fn skip(&self) -> PlaybackResult<bool> {
        self.request(|reply| GuildCommand::Skip { reply }).await?
    }

    /// Returns the recalled track, if history had one.
    pub async fn previous(&self) -> PlaybackResult<Option<Track>> {
        self.request(|reply| GuildCommand::Previous { reply }).await?
    }

    pub async fn pause(&self) -> PlaybackResult<bool> {
        self.request(|reply| GuildCommand::Pause { reply }).await?
    }

    pub async fn resume(&self) -> PlaybackResult<bool> {
        self.request(|reply| GuildCommand::Resume { reply }).await?
    }

    /// Clears the queue and stops the current track.
    pub async fn stop(&self) -> PlaybackResult<()> {
        self.request(|reply| GuildCommand::Stop { reply }).await?
    }

    pub async fn set_volume(&self, percent: i64) -> PlaybackResult<f32> {
        self.request(|reply| GuildCommand::SetVolume { percent, reply })
            .await?
    }

    pub async fn set_loop_mode(&self, mode: &str) -> PlaybackResult<LoopMode> {
        let mode: LoopMode = mode.parse()?;
        self.request(|reply| GuildCommand::SetLoopMode { mode, reply })
            .await?;
        Ok(mode)
    }

    /// Returns the number of shuffled tracks.
    pub async fn shuffle(&self) -> PlaybackResult<usize> {
        self.request(|reply| GuildCommand::Shuffle { reply }).await?
    }

    pub fn set_status_message(&self, message: StatusMessage) {
        let _ = self.mailbox.send(GuildCommand::SetStatusMessage { message });
    }

    pub async fn snapshot(&self) -> PlaybackResult<QueueSnapshot> {
        self.request(|reply| GuildCommand::Snapshot { reply }).await
    }

    /// Releases the sink and shuts the worker down, discarding all state.
    pub async fn leave(&self) {
        if self
            .request(|reply| GuildCommand::Leave { reply })
            .await
            .is_err()
        {
            debug!("guild {} already left", self.guild_id);
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> GuildCommand) -> PlaybackResult<T> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(build(reply))
            .map_err(|_| PlaybackError::NotInVoiceSession)?;
        response.await.map_err(|_| PlaybackError::NotInVoiceSession)
    }
}

struct GuildWorker {
    guild_id: GuildId,
    state: GuildQueueState,
    sink: Option<Box<dyn AudioSink>>,
    /// Last epoch handed out; bumped on every bind.
    epoch: u64,
    /// Epoch of the binding currently playing, if any.
    bound: Option<u64>,
    paused: bool,
    /// Consecutive binds the sink refused.
    failures: usize,
    commands: mpsc::UnboundedReceiver<GuildCommand>,
    mailbox: mpsc::WeakUnboundedSender<GuildCommand>,
    events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
}

impl GuildWorker {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            if !self.handle(command).await {
                break;
            }
        }
        debug!("playback worker stopped for guild {}", self.guild_id);
    }

    /// Returns false when the worker should shut down.
    async fn handle(&mut self, command: GuildCommand) -> bool {
        match command {
            GuildCommand::Connect { sink, reply } => {
                let interrupted = self.bound.is_some();
                if let Some(mut old) = self.sink.replace(sink) {
                    self.unbind();
                    old.release().await;
                }
                info!("🔊 Voice sink attached in guild {}", self.guild_id);
                // Releasing the old sink cut the stream without a finish notice.
                if interrupted && !self.state.queue.is_empty() {
                    self.advance().await;
                }
                let _ = reply.send(());
            }
            GuildCommand::Disconnect { reply } => {
                if let Some(mut sink) = self.sink.take() {
                    self.unbind();
                    sink.release().await;
                    info!("🔌 Voice sink detached in guild {}", self.guild_id);
                }
                let _ = reply.send(());
            }
            GuildCommand::DisconnectIfIdle { reply } => {
                let mut detached = false;
                if self.bound.is_none() {
                    if let Some(mut sink) = self.sink.take() {
                        sink.release().await;
                        detached = true;
                        info!("💤 Voice sink detached while idle in guild {}", self.guild_id);
                    }
                }
                let _ = reply.send(detached);
            }
            GuildCommand::Append { track, reply } => {
                let result = self.append(track).await;
                let _ = reply.send(result);
            }
            GuildCommand::StreamFinished { epoch } => {
                if self.bound != Some(epoch) {
                    debug!(
                        "discarding stale finish for epoch {} in guild {} (bound: {:?})",
                        epoch, self.guild_id, self.bound
                    );
                } else {
                    self.unbind();
                    self.advance().await;
                }
            }
            GuildCommand::Skip { reply } => {
                let _ = reply.send(self.skip());
            }
            GuildCommand::Previous { reply } => {
                let result = self.require_sink().map(|_| {
                    let recalled = self.state.recall_previous();
                    if let Some(track) = &recalled {
                        info!("⏮️ Recalled {} in guild {}", track.title(), self.guild_id);
                        let _ = self.stop_bound();
                    }
                    recalled
                });
                let _ = reply.send(result);
            }
            GuildCommand::Pause { reply } => {
                let _ = reply.send(self.set_paused(true));
            }
            GuildCommand::Resume { reply } => {
                let _ = reply.send(self.set_paused(false));
            }
            GuildCommand::Stop { reply } => {
                let result = self.require_sink().map(|_| {
                    self.state.queue.clear();
                    let _ = self.stop_bound();
                    info!("⏹️ Playback stopped in guild {}", self.guild_id);
                });
                let _ = reply.send(result);
            }
            GuildCommand::SetVolume { percent, reply } => {
                let result = self.state.set_volume_percent(percent);
                if let Ok(volume) = result {
                    if self.bound.is_some() {
                        if let Some(sink) = self.sink.as_mut() {
                            sink.set_volume(volume);
                        }
                    }
                    info!("🔊 Volume set to {}% in guild {}", percent, self.guild_id);
                }
                let _ = reply.send(result);
            }
            GuildCommand::SetLoopMode { mode, reply } => {
                self.state.loop_mode = mode;
                info!("🔁 Loop mode {} in guild {}", mode, self.guild_id);
                let _ = reply.send(());
            }
            GuildCommand::Shuffle { reply } => {
                let result = self.state.shuffle(&mut rand::thread_rng());
                if let Ok(count) = result {
                    info!("🔀 Shuffled {} tracks in guild {}", count, self.guild_id);
                }
                let _ = reply.send(result);
            }
            GuildCommand::SetStatusMessage { message } => {
                self.state.status_message = Some(message);
            }
            GuildCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            GuildCommand::Leave { reply } => {
                if let Some(mut sink) = self.sink.take() {
                    self.unbind();
                    sink.release().await;
                }
                self.state = GuildQueueState::default();
                info!("👋 Left guild {}", self.guild_id);
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn append(&mut self, track: Track) -> PlaybackResult<Track> {
        self.require_sink()?;
        info!("➕ Queued {} in guild {}", track.title(), self.guild_id);
        self.state.push(track.clone());
        if self.bound.is_none() {
            self.advance().await;
        }
        Ok(track)
    }

    /// Binds the next track, or goes idle when there is none.
    async fn advance(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            self.state.now_playing = None;
            return;
        };

        let Some(track) = self.state.select_next() else {
            self.state.now_playing = None;
            self.failures = 0;
            sink.release().await;
            info!("📭 Queue finished in guild {}", self.guild_id);
            self.publish(PlaybackEvent::Idle {
                guild_id: self.guild_id,
            });
            return;
        };

        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        self.epoch += 1;
        let notifier = FinishedNotifier::new(self.epoch, mailbox);
        self.bound = Some(self.epoch);
        self.paused = false;

        match sink.bind(track.media(), self.state.volume, notifier.clone()).await {
            Ok(()) => {
                self.failures = 0;
                info!("🎵 Now playing {} in guild {}", track.title(), self.guild_id);
                self.state.now_playing = Some(track.clone());
                self.publish(PlaybackEvent::TrackStarted {
                    guild_id: self.guild_id,
                    track,
                    status_message: self.state.status_message,
                });
            }
            Err(e) => {
                warn!("❌ Could not play {} in guild {}: {:?}", track.title(), self.guild_id, e);
                self.state.now_playing = None;
                self.failures += 1;
                if self.state.loop_mode == LoopMode::Track {
                    self.state.drop_head();
                }
                // OFF and TRACK consume the queue on every failure; only a
                // looping queue can fail forever.
                if self.state.loop_mode == LoopMode::Queue && self.failures >= self.state.queue.len() {
                    warn!("giving up after {} failed tracks in guild {}", self.failures, self.guild_id);
                    self.bound = None;
                    self.failures = 0;
                    sink.release().await;
                    self.publish(PlaybackEvent::Idle {
                        guild_id: self.guild_id,
                    });
                } else {
                    notifier.notify();
                }
            }
        }
    }

    fn skip(&mut self) -> PlaybackResult<bool> {
        self.require_sink()?;
        if self.bound.is_some() && self.state.loop_mode == LoopMode::Track {
            // Otherwise the repeated head would simply be picked again.
            if self.state.queue.front() == self.state.now_playing.as_ref() {
                self.state.retire_head();
            }
        }
        let stopped = self.stop_bound()?;
        if stopped {
            info!("⏭️ Skip requested in guild {}", self.guild_id);
        }
        Ok(stopped)
    }

    /// Stops the bound stream; its finish notification drives the transition.
    fn stop_bound(&mut self) -> PlaybackResult<bool> {
        let sink = self.sink.as_mut().ok_or(PlaybackError::NotInVoiceSession)?;
        if self.bound.is_none() {
            return Ok(false);
        }
        sink.stop();
        Ok(true)
    }

    fn set_paused(&mut self, pause: bool) -> PlaybackResult<bool> {
        let sink = self.sink.as_mut().ok_or(PlaybackError::NotInVoiceSession)?;
        if self.bound.is_none() || self.paused == pause {
            return Ok(false);
        }
        if pause {
            sink.pause();
            info!("⏸️ Paused in guild {}", self.guild_id);
        } else {
            sink.resume();
            info!("▶️ Resumed in guild {}", self.guild_id);
        }
        self.paused = pause;
        Ok(true)
    }

    fn require_sink(&self) -> PlaybackResult<()> {
        if self.sink.is_some() {
            Ok(())
        } else {
            Err(PlaybackError::NotInVoiceSession)
        }
    }

    fn unbind(&mut self) {
        self.bound = None;
        self.paused = false;
        self.state.now_playing = None;
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            now_playing: self.state.now_playing.clone(),
            queue: self.state.queue.iter().cloned().collect(),
            history: self.state.history.clone(),
            loop_mode: self.state.loop_mode,
            volume: self.state.volume,
            paused: self.paused,
            connected: self.sink.is_some(),
            status_message: self.state.status_message,
        }
    }

    fn publish(&self, event: PlaybackEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{self, FakeSink, SinkCall};
    use pretty_assertions::assert_eq;

    fn refs(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(|t| t.reference()).collect()
    }

    fn playing(snapshot: &QueueSnapshot) -> Option<&str> {
        snapshot.now_playing.as_ref().map(|t| t.reference())
    }

    async fn connected_engine() -> (PlaybackEngine, FakeSink) {
        let engine = PlaybackEngine::spawn(GuildId::new(1), testing::resolver(), None);
        let sink = FakeSink::new();
        engine.connect(sink.boxed()).await.unwrap();
        (engine, sink)
    }

    #[tokio::test]
    async fn test_first_enqueue_plays_and_the_rest_wait_in_order() {
        let (engine, sink) = connected_engine().await;
        for name in ["a", "b", "c"] {
            engine.enqueue(name).await.unwrap();
        }

        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(playing(&snapshot), Some("a"));
        assert_eq!(refs(&snapshot.queue), vec!["b", "c"]);
        assert_eq!(sink.binds(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_skip_moves_to_the_next_track() {
        let (engine, sink) = connected_engine().await;
        engine.enqueue("trackA").await.unwrap();
        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(playing(&snapshot), Some("trackA"));
        assert!(snapshot.queue.is_empty());

        engine.enqueue("trackB").await.unwrap();
        assert_eq!(refs(&engine.snapshot().await.unwrap().queue), vec!["trackB"]);

        assert_eq!(engine.skip().await, Ok(true));
        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(playing(&snapshot), Some("trackB"));
        assert_eq!(refs(&snapshot.history), vec!["trackA", "trackB"]);
        assert!(snapshot.queue.is_empty());
        assert_eq!(sink.binds(), vec!["trackA", "trackB"]);
    }

    #[tokio::test]
    async fn test_natural_end_of_last_track_goes_idle() {
        let (engine, sink) = connected_engine().await;
        engine.enqueue("a").await.unwrap();
        sink.finish();

        let snapshot = engine.snapshot().await.unwrap();
        assert!(snapshot.now_playing.is_none());
        assert!(snapshot.connected);
        assert_eq!(sink.calls().last(), Some(&SinkCall::Release));
        assert_eq!(engine.skip().await, Ok(false));
    }

    #[tokio::test]
    async fn test_duplicate_finish_notifications_advance_once() {
        let (engine, sink) = connected_engine().await;
        for name in ["a", "b", "c"] {
            engine.enqueue(name).await.unwrap();
        }

        let notifier = sink.notifier().unwrap();
        notifier.notify();
        notifier.notify();

        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(playing(&snapshot), Some("b"));
        assert_eq!(refs(&snapshot.queue), vec!["c"]);
        assert_eq!(sink.binds(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_natural_end_arriving_after_skip_is_discarded() {
        let (engine, sink) = connected_engine().await;
        for name in ["a", "b", "c"] {
            engine.enqueue(name).await.unwrap();
        }

        let first = sink.notifier().unwrap();
        engine.skip().await.unwrap();
        first.notify();

        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(playing(&snapshot), Some("b"));
        assert_eq!(refs(&snapshot.queue), vec!["c"]);
        assert_eq!(sink.binds(), vec!["a", "b"]);

        let current = sink.notifier().unwrap().epoch();
        engine.mailbox.send(GuildCommand::StreamFinished { epoch: current + 7 }).unwrap();
        assert_eq!(playing(&engine.snapshot().await.unwrap()), Some("b"));
    }

    #[tokio::test]
    async fn test_queue_loop_cycles_forever() {
        let (engine, sink) = connected_engine().await;
        engine.set_loop_mode("queue").await.unwrap();
        engine.enqueue("a").await.unwrap();
        engine.enqueue("b").await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..6 {
            let snapshot = engine.snapshot().await.unwrap();
            seen.push(playing(&snapshot).unwrap().to_string());
            assert_eq!(snapshot.queue.len(), 2);
            sink.finish();
        }
        // "a" was already back in the queue when "b" arrived
        assert_eq!(seen, vec!["a", "a", "b", "a", "b", "a"]);
    }

    #[tokio::test]
    async fn test_track_loop_repeats_the_head() {
        let (engine, sink) = connected_engine().await;
        engine.set_loop_mode("track").await.unwrap();
        engine.enqueue("a").await.unwrap();
        engine.enqueue("b").await.unwrap();

        for _ in 0..3 {
            sink.finish();
            engine.snapshot().await.unwrap();
        }
        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(sink.binds(), vec!["a", "a", "a", "a"]);
        assert_eq!(playing(&snapshot), Some("a"));
        assert_eq!(refs(&snapshot.queue), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_skip_breaks_out_of_a_track_loop() {
        let (engine, sink) = connected_engine().await;
        engine.set_loop_mode("track").await.unwrap();
        engine.enqueue("a").await.unwrap();
        engine.enqueue("b").await.unwrap();

        engine.skip().await.unwrap();
        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(playing(&snapshot), Some("b"));
        assert_eq!(refs(&snapshot.queue), vec!["b"]);
        assert_eq!(sink.binds(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_previous_replays_the_last_history_entry() {
        let (engine, sink) = connected_engine().await;
        engine.enqueue("a").await.unwrap();
        engine.enqueue("b").await.unwrap();
        engine.skip().await.unwrap();

        let recalled = engine.previous().await.unwrap().unwrap();
        assert_eq!(recalled.reference(), "b");

        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(playing(&snapshot), Some("b"));
        assert_eq!(refs(&snapshot.history), vec!["a", "b"]);
        assert_eq!(sink.binds(), vec!["a", "b", "b"]);
    }

    #[tokio::test]
    async fn test_previous_with_empty_history_does_nothing() {
        let (engine, sink) = connected_engine().await;
        assert_eq!(engine.previous().await, Ok(None));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_previous_under_track_loop_retargets_the_loop() {
        let (engine, sink) = connected_engine().await;
        engine.enqueue("a").await.unwrap();
        engine.enqueue("b").await.unwrap();
        engine.skip().await.unwrap();
        engine.set_loop_mode("track").await.unwrap();
        engine.enqueue("c").await.unwrap();

        // history is [a, b]; "b" is playing and gets recalled in front of "c"
        engine.previous().await.unwrap();
        engine.snapshot().await.unwrap();
        sink.finish();
        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(playing(&snapshot), Some("b"));
        assert_eq!(refs(&snapshot.queue), vec!["b", "c"]);
        assert_eq!(sink.binds(), vec!["a", "b", "b", "b"]);
    }

    #[tokio::test]
    async fn test_pause_and_resume_only_in_matching_state() {
        let (engine, sink) = connected_engine().await;
        assert_eq!(engine.pause().await, Ok(false));

        engine.enqueue("a").await.unwrap();
        assert_eq!(engine.resume().await, Ok(false));
        assert_eq!(engine.pause().await, Ok(true));
        assert_eq!(engine.pause().await, Ok(false));
        assert!(engine.snapshot().await.unwrap().paused);
        assert_eq!(engine.resume().await, Ok(true));

        let controls: Vec<SinkCall> = sink
            .calls()
            .into_iter()
            .filter(|c| matches!(c, SinkCall::Pause | SinkCall::Resume))
            .collect();
        assert_eq!(controls, vec![SinkCall::Pause, SinkCall::Resume]);
    }

    #[tokio::test]
    async fn test_volume_is_validated_and_applied_live() {
        let (engine, sink) = connected_engine().await;
        engine.enqueue("a").await.unwrap();

        assert!(matches!(engine.set_volume(150).await, Err(PlaybackError::InvalidArgument(_))));
        assert!(matches!(engine.set_volume(-1).await, Err(PlaybackError::InvalidArgument(_))));
        assert_eq!(engine.snapshot().await.unwrap().volume, 0.5);

        assert_eq!(engine.set_volume(30).await, Ok(0.3));
        assert_eq!(sink.calls().last(), Some(&SinkCall::Volume(0.3)));

        engine.enqueue("b").await.unwrap();
        engine.skip().await.unwrap();
        engine.snapshot().await.unwrap();
        assert!(sink.calls().contains(&SinkCall::Bind("https://cdn.test/b".to_string(), 0.3)));
    }

    #[tokio::test]
    async fn test_unknown_loop_mode_is_rejected() {
        let (engine, _sink) = connected_engine().await;
        assert!(matches!(engine.set_loop_mode("forever").await, Err(PlaybackError::InvalidArgument(_))));
        assert_eq!(engine.snapshot().await.unwrap().loop_mode, LoopMode::Off);
    }

    #[tokio::test]
    async fn test_shuffle_leaves_now_playing_and_history_alone() {
        let (engine, _sink) = connected_engine().await;
        assert_eq!(engine.shuffle().await, Err(PlaybackError::InsufficientItems(0)));

        engine.enqueue("a").await.unwrap();
        engine.enqueue("b").await.unwrap();
        assert_eq!(engine.shuffle().await, Err(PlaybackError::InsufficientItems(1)));

        for name in ["c", "d", "e"] {
            engine.enqueue(name).await.unwrap();
        }
        assert_eq!(engine.shuffle().await, Ok(4));

        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(playing(&snapshot), Some("a"));
        assert_eq!(refs(&snapshot.history), vec!["a"]);
        let mut queued = refs(&snapshot.queue);
        queued.sort();
        assert_eq!(queued, vec!["b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_operations_needing_voice_fail_without_a_sink() {
        let engine = PlaybackEngine::spawn(GuildId::new(2), testing::resolver(), None);
        assert_eq!(engine.enqueue("a").await, Err(PlaybackError::NotInVoiceSession));
        assert_eq!(engine.skip().await, Err(PlaybackError::NotInVoiceSession));
        assert_eq!(engine.pause().await, Err(PlaybackError::NotInVoiceSession));
        assert_eq!(engine.previous().await, Err(PlaybackError::NotInVoiceSession));
        assert!(engine.snapshot().await.unwrap().queue.is_empty());

        // these only touch the queue state
        assert_eq!(engine.set_volume(70).await, Ok(0.7));
        assert_eq!(engine.set_loop_mode("queue").await, Ok(LoopMode::Queue));
    }

    #[tokio::test]
    async fn test_failed_resolution_leaves_queue_untouched() {
        let (engine, sink) = connected_engine().await;
        engine.enqueue("a").await.unwrap();
        assert!(matches!(engine.enqueue("missing").await, Err(PlaybackError::Resolution(_))));

        let snapshot = engine.snapshot().await.unwrap();
        assert!(snapshot.queue.is_empty());
        assert_eq!(sink.binds(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_refused_bind_moves_on_to_the_next_track() {
        let (engine, sink) = connected_engine().await;
        sink.refuse("broken");
        engine.enqueue("a").await.unwrap();
        engine.enqueue("broken").await.unwrap();
        engine.enqueue("c").await.unwrap();

        sink.finish();
        // the refused bind re-posts its own finish behind this snapshot
        engine.snapshot().await.unwrap();
        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(playing(&snapshot), Some("c"));
        assert_eq!(sink.binds(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_refused_binds_in_a_row_still_reach_a_playable_track() {
        let (engine, sink) = connected_engine().await;
        sink.refuse("b1");
        sink.refuse("b2");
        for name in ["a", "b1", "b2", "c"] {
            engine.enqueue(name).await.unwrap();
        }

        sink.finish();
        // each refused bind re-posts its finish behind the next snapshot
        let mut snapshot = engine.snapshot().await.unwrap();
        for _ in 0..5 {
            if playing(&snapshot).is_some() {
                break;
            }
            snapshot = engine.snapshot().await.unwrap();
        }
        assert_eq!(playing(&snapshot), Some("c"));
        assert!(snapshot.queue.is_empty());
        assert_eq!(sink.binds(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_refused_bind_under_track_loop_drops_the_head() {
        let (engine, sink) = connected_engine().await;
        sink.refuse("broken");
        engine.set_loop_mode("track").await.unwrap();
        engine.enqueue("broken").await.unwrap();
        engine.enqueue("b").await.unwrap();

        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(playing(&snapshot), Some("b"));
        assert_eq!(refs(&snapshot.queue), vec!["b"]);
    }

    #[tokio::test]
    async fn test_queue_loop_of_broken_tracks_gives_up() {
        let (engine, sink) = connected_engine().await;
        sink.refuse("x");
        sink.refuse("y");
        engine.set_loop_mode("queue").await.unwrap();
        engine.enqueue("x").await.unwrap();
        engine.enqueue("y").await.unwrap();

        let snapshot = engine.snapshot().await.unwrap();
        assert!(snapshot.now_playing.is_none());
        assert_eq!(snapshot.queue.len(), 2);
        assert!(sink.binds().is_empty());
    }

    #[tokio::test]
    async fn test_stop_clears_queue_and_goes_idle() {
        let (engine, sink) = connected_engine().await;
        engine.set_loop_mode("queue").await.unwrap();
        for name in ["a", "b", "c"] {
            engine.enqueue(name).await.unwrap();
        }
        engine.stop().await.unwrap();

        let snapshot = engine.snapshot().await.unwrap();
        assert!(snapshot.now_playing.is_none());
        assert!(snapshot.queue.is_empty());
        assert_eq!(snapshot.loop_mode, LoopMode::Queue);
        assert_eq!(sink.calls().last(), Some(&SinkCall::Release));
    }

    #[tokio::test]
    async fn test_disconnect_keeps_state_but_drops_the_binding() {
        let (engine, sink) = connected_engine().await;
        engine.enqueue("a").await.unwrap();
        engine.enqueue("b").await.unwrap();
        engine.set_volume(20).await.unwrap();
        engine.disconnect().await.unwrap();

        let snapshot = engine.snapshot().await.unwrap();
        assert!(!snapshot.connected);
        assert!(snapshot.now_playing.is_none());
        assert_eq!(refs(&snapshot.queue), vec!["b"]);
        assert_eq!(snapshot.volume, 0.2);

        // the old binding's notification no longer counts
        sink.finish();
        assert!(engine.snapshot().await.unwrap().now_playing.is_none());
    }

    #[tokio::test]
    async fn test_reconnecting_mid_track_moves_on_with_the_new_sink() {
        let (engine, old) = connected_engine().await;
        engine.enqueue("a").await.unwrap();
        engine.enqueue("b").await.unwrap();

        let new = FakeSink::new();
        engine.connect(new.boxed()).await.unwrap();

        let snapshot = engine.snapshot().await.unwrap();
        assert!(snapshot.connected);
        assert_eq!(playing(&snapshot), Some("b"));
        assert_eq!(old.calls().last(), Some(&SinkCall::Release));
        assert_eq!(new.binds(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_reconnecting_while_idle_binds_nothing() {
        let (engine, _old) = connected_engine().await;
        let new = FakeSink::new();
        engine.connect(new.boxed()).await.unwrap();

        assert!(engine.snapshot().await.unwrap().now_playing.is_none());
        assert!(new.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueues_keep_every_track_once() {
        let (engine, sink) = connected_engine().await;
        let names: Vec<String> = (0..20).map(|i| format!("t{i:02}")).collect();

        let handles: Vec<_> = names
            .iter()
            .cloned()
            .map(|name| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.enqueue(&name).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let snapshot = engine.snapshot().await.unwrap();
        let mut seen: Vec<&str> = snapshot.now_playing.iter().map(|t| t.reference()).collect();
        seen.extend(refs(&snapshot.queue));
        seen.sort_unstable();
        assert_eq!(seen, names.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(sink.binds().len(), 1);
        assert_eq!(Some(sink.binds()[0].as_str()), playing(&snapshot));
    }

    #[tokio::test]
    async fn test_disconnect_if_idle_leaves_a_playing_guild_alone() {
        let (engine, sink) = connected_engine().await;
        engine.enqueue("a").await.unwrap();
        assert!(!engine.disconnect_if_idle().await.unwrap());
        assert!(engine.snapshot().await.unwrap().connected);

        sink.finish();
        assert!(engine.disconnect_if_idle().await.unwrap());
        let snapshot = engine.snapshot().await.unwrap();
        assert!(!snapshot.connected);
        assert!(!engine.disconnect_if_idle().await.unwrap());
    }

    #[tokio::test]
    async fn test_events_report_starts_and_idle() {
        let (events, mut received) = mpsc::unbounded_channel();
        let engine = PlaybackEngine::spawn(GuildId::new(3), testing::resolver(), Some(events));
        let sink = FakeSink::new();
        engine.connect(sink.boxed()).await.unwrap();

        engine.enqueue("a").await.unwrap();
        match received.recv().await.unwrap() {
            PlaybackEvent::TrackStarted { track, status_message, .. } => {
                assert_eq!(track.reference(), "a");
                assert!(status_message.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }

        sink.finish();
        assert!(matches!(received.recv().await.unwrap(), PlaybackEvent::Idle { .. }));
    }

    #[tokio::test]
    async fn test_leave_shuts_the_worker_down() {
        let (engine, sink) = connected_engine().await;
        engine.enqueue("a").await.unwrap();
        engine.leave().await;

        assert_eq!(sink.calls().last(), Some(&SinkCall::Release));
        assert_eq!(engine.snapshot().await.unwrap_err(), PlaybackError::NotInVoiceSession);
        assert!(engine.is_closed());
    }
}
