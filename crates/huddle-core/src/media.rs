//! Local media model.
//!
//! Mirrors the shape of the Media Capture API: a stream is a bundle of
//! shared tracks, each with an `enabled` flag and a ready state. Hardware
//! access goes through the [`MediaDevices`] trait so the session can run
//! against a real capture backend or the in-process [`simulated`] one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::MediaAccessError;

pub mod simulated;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackState {
    Live,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

/// A single audio or video track.
///
/// Disabling a track keeps the device open (frames become black/silent);
/// stopping it releases the device and is permanent.
#[derive(Debug)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    label: String,
    settings: Option<TrackSettings>,
    enabled: AtomicBool,
    ended: AtomicBool,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Arc<Self> {
        Self::build(kind, label.into(), None)
    }

    pub fn video(label: impl Into<String>, settings: TrackSettings) -> Arc<Self> {
        Self::build(TrackKind::Video, label.into(), Some(settings))
    }

    fn build(kind: TrackKind, label: String, settings: Option<TrackSettings>) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label,
            settings,
            enabled: AtomicBool::new(true),
            ended: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn settings(&self) -> Option<TrackSettings> {
        self.settings
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            tracing::debug!(track = %self.id, kind = ?self.kind, "track stopped");
        }
    }

    pub fn ready_state(&self) -> TrackState {
        if self.ended.load(Ordering::SeqCst) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }
}

#[derive(Debug)]
struct StreamInner {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

/// A handle to a set of tracks. Clones share the same tracks, so only the
/// owner of a stream should call [`MediaStream::stop_all`].
#[derive(Debug, Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: uuid::Uuid::new_v4().to_string(),
                tracks,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.inner.tracks
    }

    pub fn video_tracks(&self) -> Vec<Arc<MediaTrack>> {
        self.tracks_of(TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> Vec<Arc<MediaTrack>> {
        self.tracks_of(TrackKind::Audio)
    }

    fn tracks_of(&self, kind: TrackKind) -> Vec<Arc<MediaTrack>> {
        self.inner
            .tracks
            .iter()
            .filter(|t| t.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.inner.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
    }

    pub fn stop_all(&self) {
        for track in &self.inner.tracks {
            track.stop();
        }
    }

    /// True while at least one track is still live.
    pub fn is_active(&self) -> bool {
        self.inner
            .tracks
            .iter()
            .any(|t| t.ready_state() == TrackState::Live)
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MediaStream {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    User,
    Environment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub aspect_ratio: f64,
    pub facing_mode: FacingMode,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaDeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    /// Empty until the user has granted permission.
    pub label: String,
}

/// Feature detection result, resolved once by the host and handed to the
/// session at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaCapabilities {
    pub user_media: bool,
    pub display_media: bool,
    pub enumerate_devices: bool,
}

impl Default for MediaCapabilities {
    fn default() -> Self {
        Self {
            user_media: true,
            display_media: true,
            enumerate_devices: true,
        }
    }
}

/// Access to capture hardware.
///
/// Calls may suspend indefinitely (e.g. while a permission prompt is
/// showing). There is no cancellation; callers must discard late results.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, MediaAccessError>;

    async fn get_display_media(&self) -> Result<MediaStream, MediaAccessError>;

    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, MediaAccessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_stream() -> MediaStream {
        MediaStream::new(vec![
            MediaTrack::video(
                "cam",
                TrackSettings {
                    width: 1280,
                    height: 720,
                    frame_rate: 30.0,
                },
            ),
            MediaTrack::new(TrackKind::Audio, "mic"),
        ])
    }

    #[test]
    fn stop_all_ends_every_track() {
        let stream = camera_stream();
        assert!(stream.is_active());
        stream.stop_all();
        assert!(!stream.is_active());
        assert!(
            stream
                .tracks()
                .iter()
                .all(|t| t.ready_state() == TrackState::Ended)
        );
    }

    #[test]
    fn clones_share_tracks() {
        let stream = camera_stream();
        let other = stream.clone();
        other.set_kind_enabled(TrackKind::Video, false);
        assert!(!stream.video_tracks()[0].enabled());
        assert!(stream.audio_tracks()[0].enabled());
        assert_eq!(stream, other);
    }

    #[test]
    fn stopping_twice_is_harmless() {
        let track = MediaTrack::new(TrackKind::Audio, "mic");
        track.stop();
        track.stop();
        assert_eq!(track.ready_state(), TrackState::Ended);
    }
}
