//! Local capture: camera, microphone and screen
//!
//! Capture drivers live behind [`MediaSource`]. The session only ever sees
//! [`TrackHandle`]s and decides which of them sit on the outbound senders.

pub mod track;

pub use track::{MediaStreamHandle, TrackHandle, TrackKind};

use crate::error::MediaError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Which devices a user-media acquisition asks for
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Media-capture capability
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Camera and/or microphone. Denial or missing hardware fails the whole request.
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStreamHandle, MediaError>;

    /// Screen capture. The user may dismiss the picker.
    async fn acquire_screen(&self) -> Result<MediaStreamHandle, MediaError>;

    /// Releases a stream handed out by this source. Never fails.
    fn release(&self, stream: &MediaStreamHandle) {
        let stopped = stream.stop_all();
        debug!("Released stream {} ({} live tracks stopped)", stream.id, stopped);
    }
}

/// Source with a fixed set of devices whose tracks carry no captured frames
/// until a capture pipeline feeds them through [`TrackHandle::write_sample`].
#[derive(Debug, Clone, Copy)]
pub struct StaticMediaSource {
    pub camera: bool,
    pub microphone: bool,
    pub screen: bool,
}

impl Default for StaticMediaSource {
    fn default() -> Self {
        Self {
            camera: true,
            microphone: true,
            screen: true,
        }
    }
}

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStreamHandle, MediaError> {
        if constraints.video && !self.camera {
            return Err(MediaError::DeviceUnavailable("camera".into()));
        }
        if constraints.audio && !self.microphone {
            return Err(MediaError::DeviceUnavailable("microphone".into()));
        }

        let mut kinds = Vec::new();
        if constraints.video {
            kinds.push(TrackKind::Camera);
        }
        if constraints.audio {
            kinds.push(TrackKind::Audio);
        }
        if kinds.is_empty() {
            return Err(MediaError::DeviceUnavailable("no device requested".into()));
        }

        let stream = MediaStreamHandle::new(&kinds);
        info!("Acquired user media {} with {} tracks", stream.id, stream.tracks.len());
        Ok(stream)
    }

    async fn acquire_screen(&self) -> Result<MediaStreamHandle, MediaError> {
        if !self.screen {
            return Err(MediaError::DeviceUnavailable("screen capture".into()));
        }
        let stream = MediaStreamHandle::new(&[TrackKind::Screen]);
        info!("Acquired screen capture {}", stream.id);
        Ok(stream)
    }
}
