use crate::utils::random_id;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// What a local track captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Camera,
    Screen,
}

impl TrackKind {
    pub fn is_video(self) -> bool {
        matches!(self, TrackKind::Camera | TrackKind::Screen)
    }

    fn codec(self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            // camera and screen share one codec so the sender can swap them in place
            TrackKind::Camera | TrackKind::Screen => RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        }
    }

    fn label(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Camera => "camera",
            TrackKind::Screen => "screen",
        }
    }
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
    local: Arc<TrackLocalStaticSample>,
}

/// One local media track. Clones share the same underlying track.
#[derive(Clone)]
pub struct TrackHandle {
    inner: Arc<TrackInner>,
}

impl TrackHandle {
    pub fn new(kind: TrackKind, stream_id: &str) -> Self {
        let id = format!("{}-{}", kind.label(), random_id());
        let local = Arc::new(TrackLocalStaticSample::new(
            kind.codec(),
            id.clone(),
            stream_id.to_string(),
        ));
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id,
                kind,
                enabled: AtomicBool::new(true),
                ended,
                local,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flips the enabled flag and returns the new value.
    pub fn toggle_enabled(&self) -> bool {
        !self.inner.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    /// Stops capture. Returns `false` if the track was already stopped.
    pub fn stop(&self) -> bool {
        self.inner.ended.send_if_modified(|ended| {
            if *ended {
                false
            } else {
                *ended = true;
                true
            }
        })
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Resolves once the track has been stopped, locally or by the capture source.
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    pub fn local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.local.clone()
    }

    /// Feeds one encoded sample. Disabled or stopped tracks drop it and return `false`.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<bool, webrtc::Error> {
        if !self.is_enabled() || self.is_stopped() {
            return Ok(false);
        }
        self.inner
            .local
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(true)
    }

    pub fn same_track(&self, other: &TrackHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for TrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A captured stream: the tracks handed out by one acquisition
#[derive(Debug, Clone)]
pub struct MediaStreamHandle {
    pub id: String,
    pub tracks: Vec<TrackHandle>,
}

impl MediaStreamHandle {
    pub fn new(kinds: &[TrackKind]) -> Self {
        let id = format!("stream-{}", random_id());
        let tracks = kinds.iter().map(|k| TrackHandle::new(*k, &id)).collect();
        Self { id, tracks }
    }

    pub fn audio(&self) -> Option<&TrackHandle> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video(&self) -> Option<&TrackHandle> {
        self.tracks.iter().find(|t| t.kind().is_video())
    }

    /// Stops every track, returning how many were still live.
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}
