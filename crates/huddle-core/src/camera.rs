//! Local capture devices: the camera stream and the microphone stream.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::errors::CameraError;
use crate::media::{
    DeviceKind, FacingMode, MediaCapabilities, MediaConstraints, MediaDeviceInfo, MediaDevices,
    MediaStream, TrackKind, VideoConstraints,
};

/// Default capture resolution.
const VIDEO_WIDTH: u32 = 1280;
const VIDEO_HEIGHT: u32 = 720;

/// Typed error sink injected by the owner of the manager.
pub type CameraErrorCallback = Arc<dyn Fn(&CameraError) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct CameraOptions {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub aspect_ratio: f64,
    pub facing_mode: FacingMode,
    pub device_id: Option<String>,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            ideal_width: VIDEO_WIDTH,
            ideal_height: VIDEO_HEIGHT,
            aspect_ratio: 16.0 / 9.0,
            facing_mode: FacingMode::User,
            device_id: None,
        }
    }
}

/// Observable state of the camera.
#[derive(Debug, Clone, Default)]
pub struct MediaAcquisition {
    pub stream: Option<MediaStream>,
    pub is_loading: bool,
    pub error: Option<CameraError>,
    pub has_permission: bool,
}

#[derive(Default)]
struct CameraState {
    acquisition: MediaAcquisition,
    /// Audio-only stream, independent of the camera so video changes never
    /// cut the microphone.
    microphone: Option<MediaStream>,
    devices: Vec<MediaDeviceInfo>,
    options: CameraOptions,
    /// Bumped by every start/stop; an acquisition that comes back with a
    /// stale generation has been superseded.
    generation: u64,
}

/// Owns the local camera and microphone streams.
///
/// Nobody else stops them: other components get clones for display
/// only. Starting the camera always releases the previous stream first,
/// stopping is idempotent, and tracks are released on drop.
pub struct CameraManager {
    backend: Arc<dyn MediaDevices>,
    capabilities: MediaCapabilities,
    state: Mutex<CameraState>,
    on_error: Option<CameraErrorCallback>,
}

impl CameraManager {
    pub fn new(
        backend: Arc<dyn MediaDevices>,
        capabilities: MediaCapabilities,
        options: CameraOptions,
    ) -> Self {
        Self {
            backend,
            capabilities,
            state: Mutex::new(CameraState {
                options,
                ..Default::default()
            }),
            on_error: None,
        }
    }

    pub fn with_error_callback(mut self, callback: CameraErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    /// Acquire the camera. Resolves to `None` on failure or when the request
    /// was superseded by a later start/stop; never returns an error.
    pub async fn start_camera(&self) -> Option<MediaStream> {
        let (generation, constraints) = {
            let mut state = self.state.lock().await;
            if let Some(previous) = state.acquisition.stream.take() {
                previous.stop_all();
                tracing::debug!(stream = %previous.id(), "released previous camera stream");
            }
            state.generation += 1;
            state.acquisition.is_loading = true;
            state.acquisition.error = None;
            (state.generation, Self::constraints(&state.options))
        };

        let result = if self.capabilities.user_media {
            self.backend
                .get_user_media(&constraints)
                .await
                .map_err(|e| CameraError::classify(&e))
        } else {
            Err(CameraError::Unknown("camera capture is not supported".into()))
        };

        let mut state = self.state.lock().await;
        if state.generation != generation {
            if let Ok(stream) = result {
                stream.stop_all();
                tracing::info!(stream = %stream.id(), "discarded camera stream that arrived after cancellation");
            }
            return None;
        }
        state.acquisition.is_loading = false;

        match result {
            Ok(stream) => {
                let permission_changed = !state.acquisition.has_permission;
                state.acquisition.has_permission = true;
                state.acquisition.stream = Some(stream.clone());
                drop(state);

                tracing::info!(
                    stream = %stream.id(),
                    video_tracks = stream.video_tracks().len(),
                    "camera started"
                );
                if permission_changed {
                    self.refresh_devices().await;
                }
                Some(stream)
            }
            Err(err) => {
                let permission_changed =
                    err == CameraError::PermissionDenied && state.acquisition.has_permission;
                if err == CameraError::PermissionDenied {
                    state.acquisition.has_permission = false;
                }
                state.acquisition.error = Some(err.clone());
                drop(state);

                tracing::warn!("camera unavailable: {err}");
                if let Some(callback) = &self.on_error {
                    callback(&err);
                }
                if permission_changed {
                    self.refresh_devices().await;
                }
                None
            }
        }
    }

    /// Stop every track and forget the stream. Also cancels a pending start.
    pub async fn stop_camera(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.acquisition.is_loading = false;
        if let Some(stream) = state.acquisition.stream.take() {
            stream.stop_all();
            tracing::info!(stream = %stream.id(), "camera stopped");
        }
    }

    /// Acquire the microphone, or return the one already held.
    pub async fn start_microphone(&self) -> Result<MediaStream, CameraError> {
        if let Some(mic) = &self.state.lock().await.microphone {
            return Ok(mic.clone());
        }
        if !self.capabilities.user_media {
            return Err(CameraError::Unknown("microphone capture is not supported".into()));
        }
        let constraints = MediaConstraints {
            video: None,
            audio: true,
        };
        let stream = self
            .backend
            .get_user_media(&constraints)
            .await
            .map_err(|e| CameraError::classify(&e))?;

        let mut state = self.state.lock().await;
        if let Some(existing) = &state.microphone {
            stream.stop_all();
            return Ok(existing.clone());
        }
        state.microphone = Some(stream.clone());
        tracing::info!(stream = %stream.id(), "microphone started");
        Ok(stream)
    }

    /// Release the microphone. Idempotent.
    pub async fn stop_microphone(&self) {
        if let Some(mic) = self.state.lock().await.microphone.take() {
            mic.stop_all();
            tracing::info!(stream = %mic.id(), "microphone stopped");
        }
    }

    /// Enable or disable the microphone track. Returns false when no
    /// microphone is held.
    pub async fn set_microphone_enabled(&self, enabled: bool) -> bool {
        match &self.state.lock().await.microphone {
            Some(mic) => {
                mic.set_kind_enabled(TrackKind::Audio, enabled);
                true
            }
            None => false,
        }
    }

    pub async fn microphone(&self) -> Option<MediaStream> {
        self.state.lock().await.microphone.clone()
    }

    /// Flip `enabled` on the held camera stream's tracks of `kind`.
    /// Returns false when no stream is held.
    pub async fn set_tracks_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        let state = self.state.lock().await;
        match &state.acquisition.stream {
            Some(stream) => {
                stream.set_kind_enabled(kind, enabled);
                true
            }
            None => false,
        }
    }

    /// Re-read the device list. Labels stay empty until permission is granted.
    pub async fn refresh_devices(&self) {
        if !self.capabilities.enumerate_devices {
            return;
        }
        match self.backend.enumerate_devices().await {
            Ok(devices) => {
                tracing::debug!(count = devices.len(), "media devices enumerated");
                self.state.lock().await.devices = devices;
            }
            Err(e) => tracing::warn!("device enumeration failed: {e}"),
        }
    }

    /// Use `device_id` for the next start.
    pub async fn select_device(&self, device_id: Option<String>) {
        self.state.lock().await.options.device_id = device_id;
    }

    pub async fn acquisition(&self) -> MediaAcquisition {
        self.state.lock().await.acquisition.clone()
    }

    pub async fn stream(&self) -> Option<MediaStream> {
        self.state.lock().await.acquisition.stream.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.lock().await.acquisition.is_loading
    }

    pub async fn error(&self) -> Option<CameraError> {
        self.state.lock().await.acquisition.error.clone()
    }

    pub async fn has_permission(&self) -> bool {
        self.state.lock().await.acquisition.has_permission
    }

    pub async fn devices(&self) -> Vec<MediaDeviceInfo> {
        self.state.lock().await.devices.clone()
    }

    pub async fn video_devices(&self) -> Vec<MediaDeviceInfo> {
        self.state
            .lock()
            .await
            .devices
            .iter()
            .filter(|d| d.kind == DeviceKind::VideoInput)
            .cloned()
            .collect()
    }

    fn constraints(options: &CameraOptions) -> MediaConstraints {
        MediaConstraints {
            video: Some(VideoConstraints {
                ideal_width: options.ideal_width,
                ideal_height: options.ideal_height,
                aspect_ratio: options.aspect_ratio,
                facing_mode: options.facing_mode,
                device_id: options.device_id.clone(),
            }),
            audio: false,
        }
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(stream) = state.acquisition.stream.take() {
            stream.stop_all();
            tracing::debug!(stream = %stream.id(), "camera released on drop");
        }
        if let Some(mic) = state.microphone.take() {
            mic.stop_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MediaAccessError;
    use crate::media::TrackState;
    use crate::media::simulated::SimulatedMediaDevices;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn manager(sim: &Arc<SimulatedMediaDevices>) -> CameraManager {
        CameraManager::new(sim.clone(), MediaCapabilities::default(), CameraOptions::default())
    }

    #[tokio::test]
    async fn start_returns_stream_and_grants_permission() {
        let sim = Arc::new(SimulatedMediaDevices::new());
        let cam = manager(&sim);
        let stream = cam.start_camera().await.expect("stream");
        assert_eq!(stream.video_tracks().len(), 1);
        assert_eq!(stream.video_tracks()[0].settings().unwrap().width, 1280);
        assert!(cam.has_permission().await);
        assert!(!cam.is_loading().await);
        assert!(cam.error().await.is_none());
    }

    #[tokio::test]
    async fn restart_releases_previous_stream() {
        let sim = Arc::new(SimulatedMediaDevices::new());
        let cam = manager(&sim);
        let first = cam.start_camera().await.unwrap();
        let second = cam.start_camera().await.unwrap();
        assert!(!first.is_active());
        assert!(second.is_active());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let sim = Arc::new(SimulatedMediaDevices::new());
        let cam = manager(&sim);
        let stream = cam.start_camera().await.unwrap();
        cam.stop_camera().await;
        cam.stop_camera().await;
        assert!(cam.stream().await.is_none());
        assert!(
            stream
                .tracks()
                .iter()
                .all(|t| t.ready_state() == TrackState::Ended)
        );
    }

    #[tokio::test]
    async fn permission_denied_is_reported_through_callback() {
        let sim = Arc::new(SimulatedMediaDevices::new());
        sim.set_camera_fault(Some(MediaAccessError::not_allowed()));
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let cam = manager(&sim).with_error_callback(Arc::new(move |e: &CameraError| {
            sink.lock().unwrap().push(e.clone());
        }));

        assert!(cam.start_camera().await.is_none());
        assert_eq!(cam.error().await, Some(CameraError::PermissionDenied));
        assert!(!cam.has_permission().await);
        assert!(!cam.is_loading().await);
        assert_eq!(*seen.lock().unwrap(), vec![CameraError::PermissionDenied]);
    }

    #[tokio::test]
    async fn busy_device_keeps_permission_flag() {
        let sim = Arc::new(SimulatedMediaDevices::new());
        let cam = manager(&sim);
        cam.start_camera().await.unwrap();
        sim.set_camera_fault(Some(MediaAccessError::not_readable()));
        assert!(cam.start_camera().await.is_none());
        assert_eq!(cam.error().await, Some(CameraError::DeviceBusy));
        assert!(cam.has_permission().await);
    }

    #[tokio::test]
    async fn unsupported_capability_never_calls_backend() {
        let sim = Arc::new(SimulatedMediaDevices::new());
        let caps = MediaCapabilities {
            user_media: false,
            ..Default::default()
        };
        let cam = CameraManager::new(sim.clone(), caps, CameraOptions::default());
        assert!(cam.start_camera().await.is_none());
        assert!(matches!(cam.error().await, Some(CameraError::Unknown(_))));
        assert_eq!(sim.user_media_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_pending_start_discards_late_stream() {
        let sim = Arc::new(SimulatedMediaDevices::new());
        sim.set_latency(Duration::from_millis(500));
        let cam = Arc::new(manager(&sim));

        let pending = tokio::spawn({
            let cam = cam.clone();
            async move { cam.start_camera().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cam.is_loading().await);
        cam.stop_camera().await;

        assert!(pending.await.unwrap().is_none());
        assert!(cam.stream().await.is_none());
        assert!(!cam.is_loading().await);
        let issued = sim.issued_streams();
        assert_eq!(issued.len(), 1);
        assert!(!issued[0].is_active());
    }

    #[tokio::test]
    async fn devices_reenumerated_after_permission_change() {
        let sim = Arc::new(SimulatedMediaDevices::new());
        let cam = manager(&sim);
        cam.refresh_devices().await;
        assert!(cam.video_devices().await[0].label.is_empty());

        cam.start_camera().await.unwrap();
        assert_eq!(sim.enumerations(), 2);
        assert_eq!(cam.video_devices().await[0].label, "Integrated Camera");

        cam.start_camera().await.unwrap();
        assert_eq!(sim.enumerations(), 2);
    }

    #[tokio::test]
    async fn microphone_survives_camera_stop() {
        let sim = Arc::new(SimulatedMediaDevices::new());
        let cam = manager(&sim);
        let mic = cam.start_microphone().await.unwrap();
        assert_eq!(mic.audio_tracks().len(), 1);
        assert!(mic.video_tracks().is_empty());

        let camera = cam.start_camera().await.unwrap();
        assert!(camera.audio_tracks().is_empty());
        cam.stop_camera().await;

        assert!(mic.is_active());
        assert_eq!(cam.start_microphone().await.unwrap(), mic);
        assert_eq!(sim.user_media_requests(), 2);

        assert!(cam.set_microphone_enabled(false).await);
        assert!(!mic.audio_tracks()[0].enabled());
        cam.stop_microphone().await;
        cam.stop_microphone().await;
        assert!(!mic.is_active());
        assert!(!cam.set_microphone_enabled(true).await);
    }

    #[tokio::test]
    async fn drop_releases_tracks() {
        let sim = Arc::new(SimulatedMediaDevices::new());
        let stream = {
            let cam = manager(&sim);
            cam.start_camera().await.unwrap()
        };
        assert!(!stream.is_active());
    }
}
