use async_trait::async_trait;
use peermeet::media::{MediaConstraints, MediaSource, MediaStreamHandle, TrackHandle, TrackKind};
use peermeet::MediaError;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Media source with scripted failures and a record of every track it handed out
#[derive(Default)]
pub struct ScriptedMedia {
    user_error: Mutex<Option<MediaError>>,
    screen_results: Mutex<VecDeque<MediaError>>,
    delay: Mutex<Option<Duration>>,
    issued: Mutex<Vec<TrackHandle>>,
}

impl ScriptedMedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every camera/microphone request fails with `err`.
    pub fn deny_user_media(self, err: MediaError) -> Self {
        *self.user_error.lock().unwrap() = Some(err);
        self
    }

    /// Every acquisition takes `delay` before resolving.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// The next screen request fails with `err`.
    pub fn fail_next_screen(&self, err: MediaError) {
        self.screen_results.lock().unwrap().push_back(err);
    }

    pub fn issued(&self) -> Vec<TrackHandle> {
        self.issued.lock().unwrap().clone()
    }

    pub fn issued_of(&self, kind: TrackKind) -> Vec<TrackHandle> {
        self.issued()
            .into_iter()
            .filter(|t| t.kind() == kind)
            .collect()
    }

    pub fn live_tracks(&self) -> usize {
        self.issued().iter().filter(|t| !t.is_stopped()).count()
    }

    async fn wait(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn issue(&self, kinds: &[TrackKind]) -> MediaStreamHandle {
        let stream = MediaStreamHandle::new(kinds);
        self.issued
            .lock()
            .unwrap()
            .extend(stream.tracks.iter().cloned());
        stream
    }
}

#[async_trait]
impl MediaSource for ScriptedMedia {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStreamHandle, MediaError> {
        self.wait().await;
        let denied = self.user_error.lock().unwrap().clone();
        if let Some(err) = denied {
            return Err(err);
        }
        let mut kinds = Vec::new();
        if constraints.video {
            kinds.push(TrackKind::Camera);
        }
        if constraints.audio {
            kinds.push(TrackKind::Audio);
        }
        Ok(self.issue(&kinds))
    }

    async fn acquire_screen(&self) -> Result<MediaStreamHandle, MediaError> {
        self.wait().await;
        let scripted = self.screen_results.lock().unwrap().pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }
        Ok(self.issue(&[TrackKind::Screen]))
    }
}
