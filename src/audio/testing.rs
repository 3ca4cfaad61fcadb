//! Test doubles for the engine: a recording sink and a canned resolver.

use anyhow::Result;
use async_trait::async_trait;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use super::{
    queue::{MediaHandle, Track},
    sink::{AudioSink, FinishedNotifier},
};
use crate::{error::PlaybackError, sources::MockTrackResolver};

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Bind(String, f32),
    Stop,
    Pause,
    Resume,
    Volume(f32),
    Release,
}

#[derive(Default)]
struct FakeSinkInner {
    calls: Vec<SinkCall>,
    notifier: Option<FinishedNotifier>,
    refuse: HashSet<String>,
}

/// Records every call. `stop` fires the finish notification immediately,
/// the way a real transport reports a stopped stream.
#[derive(Clone, Default)]
pub struct FakeSink {
    inner: Arc<Mutex<FakeSinkInner>>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn AudioSink> {
        Box::new(self.clone())
    }

    /// Makes `bind` fail for tracks whose stream URL ends with `name`.
    pub fn refuse(&self, name: &str) {
        self.inner.lock().unwrap().refuse.insert(stream_url(name));
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn binds(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Bind(url, _) => Some(url.trim_start_matches("https://cdn.test/").to_string()),
                _ => None,
            })
            .collect()
    }

    /// The notifier handed over by the most recent bind.
    pub fn notifier(&self) -> Option<FinishedNotifier> {
        self.inner.lock().unwrap().notifier.clone()
    }

    /// Simulates the current stream reaching its natural end.
    pub fn finish(&self) {
        if let Some(notifier) = self.notifier() {
            notifier.notify();
        }
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn bind(&mut self, media: &MediaHandle, volume: f32, notifier: FinishedNotifier) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.refuse.contains(media.stream_url()) {
            anyhow::bail!("stream unavailable");
        }
        inner.calls.push(SinkCall::Bind(media.stream_url().to_string(), volume));
        inner.notifier = Some(notifier);
        Ok(())
    }

    fn stop(&mut self) {
        let notifier = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(SinkCall::Stop);
            inner.notifier.clone()
        };
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }

    fn pause(&mut self) {
        self.inner.lock().unwrap().calls.push(SinkCall::Pause);
    }

    fn resume(&mut self) {
        self.inner.lock().unwrap().calls.push(SinkCall::Resume);
    }

    fn set_volume(&mut self, volume: f32) {
        self.inner.lock().unwrap().calls.push(SinkCall::Volume(volume));
    }

    async fn release(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(SinkCall::Release);
        inner.notifier = None;
    }
}

fn stream_url(name: &str) -> String {
    format!("https://cdn.test/{name}")
}

pub fn track(name: &str) -> Track {
    Track::new(name, format!("Title {name}"), "3:00", None, MediaHandle::new(stream_url(name)))
}

/// Resolves any reference to a canned track, except `missing`.
pub fn resolver() -> Arc<MockTrackResolver> {
    let mut resolver = MockTrackResolver::new();
    resolver.expect_resolve().returning(|reference| {
        if reference == "missing" {
            Err(PlaybackError::Resolution("no results for `missing`".to_string()))
        } else {
            Ok(track(reference))
        }
    });
    Arc::new(resolver)
}
