use anyhow::Result;
use async_trait::async_trait;
use songbird::{
    input::{HttpRequest, Input},
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{engine::GuildCommand, queue::MediaHandle};

/// The transport that actually streams audio into a voice session.
///
/// Every successful `bind` must eventually fire the notifier it was given,
/// whether the stream ended, was stopped, or broke.
#[async_trait]
pub trait AudioSink: Send {
    async fn bind(&mut self, media: &MediaHandle, volume: f32, notifier: FinishedNotifier) -> Result<()>;
    fn stop(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn set_volume(&mut self, volume: f32);
    /// Stops whatever is bound and lets go of it.
    async fn release(&mut self);
}

/// Posts an epoch-tagged "stream finished" message back to the guild worker.
#[derive(Clone)]
pub struct FinishedNotifier {
    epoch: u64,
    mailbox: mpsc::UnboundedSender<GuildCommand>,
}

impl FinishedNotifier {
    pub(crate) fn new(epoch: u64, mailbox: mpsc::UnboundedSender<GuildCommand>) -> Self {
        Self { epoch, mailbox }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Safe to call more than once; the worker drops repeats.
    pub fn notify(&self) {
        if self
            .mailbox
            .send(GuildCommand::StreamFinished { epoch: self.epoch })
            .is_err()
        {
            debug!("stream {} finished after the guild worker shut down", self.epoch);
        }
    }
}

/// Songbird-backed sink bound to one guild's voice call.
pub struct SongbirdSink {
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    current: Option<TrackHandle>,
}

impl SongbirdSink {
    pub fn new(call: Arc<Mutex<Call>>, http: reqwest::Client) -> Self {
        Self {
            call,
            http,
            current: None,
        }
    }
}

#[async_trait]
impl AudioSink for SongbirdSink {
    async fn bind(&mut self, media: &MediaHandle, volume: f32, notifier: FinishedNotifier) -> Result<()> {
        let input = Input::from(HttpRequest::new(self.http.clone(), media.stream_url().to_string()));

        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(input)
        };

        handle.set_volume(volume)?;
        handle.add_event(
            Event::Track(TrackEvent::End),
            StreamFinishedHandler {
                notifier: notifier.clone(),
            },
        )?;
        // A broken stream may never reach End.
        handle.add_event(Event::Track(TrackEvent::Error), StreamFinishedHandler { notifier })?;

        self.current = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = &self.current {
            if let Err(e) = handle.stop() {
                warn!("failed to stop track: {e}");
            }
        }
    }

    fn pause(&mut self) {
        if let Some(handle) = &self.current {
            if let Err(e) = handle.pause() {
                warn!("failed to pause track: {e}");
            }
        }
    }

    fn resume(&mut self) {
        if let Some(handle) = &self.current {
            if let Err(e) = handle.play() {
                warn!("failed to resume track: {e}");
            }
        }
    }

    fn set_volume(&mut self, volume: f32) {
        if let Some(handle) = &self.current {
            if let Err(e) = handle.set_volume(volume) {
                warn!("failed to set volume: {e}");
            }
        }
    }

    async fn release(&mut self) {
        if let Some(handle) = self.current.take() {
            let _ = handle.stop();
        }
        self.call.lock().await.stop();
    }
}

struct StreamFinishedHandler {
    notifier: FinishedNotifier,
}

#[async_trait]
impl VoiceEventHandler for StreamFinishedHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _) in *tracks {
                debug!("stream {} ended in state {:?}", self.notifier.epoch(), state.playing);
            }
        }
        self.notifier.notify();
        None
    }
}
