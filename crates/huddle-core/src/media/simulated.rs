//! In-process capture backend.
//!
//! Produces synthetic tracks instead of touching hardware. Used by the
//! headless shell and by tests, which can inject faults and latency and
//! inspect every stream that was handed out.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    DeviceKind, MediaConstraints, MediaDeviceInfo, MediaDevices, MediaStream, MediaTrack,
    TrackKind, TrackSettings,
};
use crate::errors::MediaAccessError;

const DISPLAY_WIDTH: u32 = 1920;
const DISPLAY_HEIGHT: u32 = 1080;

#[derive(Debug, Default)]
struct SimState {
    camera_fault: Option<MediaAccessError>,
    display_fault: Option<MediaAccessError>,
    latency: Duration,
    permission_granted: bool,
    devices: Vec<MediaDeviceInfo>,
    issued: Vec<MediaStream>,
    user_media_requests: usize,
    display_requests: usize,
    enumerations: usize,
}

pub struct SimulatedMediaDevices {
    state: Mutex<SimState>,
}

impl SimulatedMediaDevices {
    /// One front camera and one microphone, permission not yet granted.
    pub fn new() -> Self {
        let devices = vec![
            MediaDeviceInfo {
                device_id: "camera-front".into(),
                kind: DeviceKind::VideoInput,
                label: "Integrated Camera".into(),
            },
            MediaDeviceInfo {
                device_id: "mic-default".into(),
                kind: DeviceKind::AudioInput,
                label: "Built-in Microphone".into(),
            },
        ];
        Self {
            state: Mutex::new(SimState {
                devices,
                ..Default::default()
            }),
        }
    }

    /// No capture devices at all.
    pub fn without_devices() -> Self {
        let sim = Self::new();
        sim.lock().devices.clear();
        sim
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Fail every following camera request with `fault` (or succeed again with `None`).
    pub fn set_camera_fault(&self, fault: Option<MediaAccessError>) {
        self.lock().camera_fault = fault;
    }

    pub fn set_display_fault(&self, fault: Option<MediaAccessError>) {
        self.lock().display_fault = fault;
    }

    /// Delay applied to every acquisition, emulating a permission prompt.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Every stream returned so far, in order.
    pub fn issued_streams(&self) -> Vec<MediaStream> {
        self.lock().issued.clone()
    }

    pub fn user_media_requests(&self) -> usize {
        self.lock().user_media_requests
    }

    pub fn display_requests(&self) -> usize {
        self.lock().display_requests
    }

    pub fn enumerations(&self) -> usize {
        self.lock().enumerations
    }

    fn latency(&self) -> Duration {
        self.lock().latency
    }
}

impl Default for SimulatedMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SimulatedMediaDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, MediaAccessError> {
        self.lock().user_media_requests += 1;
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if let Some(fault) = state.camera_fault.clone() {
            if fault.name == "NotAllowedError" {
                state.permission_granted = false;
            }
            return Err(fault);
        }

        let mut tracks = Vec::new();
        if let Some(video) = &constraints.video {
            let camera = state
                .devices
                .iter()
                .find(|d| {
                    d.kind == DeviceKind::VideoInput
                        && video
                            .device_id
                            .as_ref()
                            .is_none_or(|wanted| wanted == &d.device_id)
                })
                .ok_or_else(MediaAccessError::not_found)?;
            tracks.push(MediaTrack::video(
                camera.label.clone(),
                TrackSettings {
                    width: video.ideal_width,
                    height: video.ideal_height,
                    frame_rate: 30.0,
                },
            ));
        }
        if constraints.audio {
            let mic = state
                .devices
                .iter()
                .find(|d| d.kind == DeviceKind::AudioInput)
                .ok_or_else(MediaAccessError::not_found)?;
            tracks.push(MediaTrack::new(TrackKind::Audio, mic.label.clone()));
        }

        state.permission_granted = true;
        let stream = MediaStream::new(tracks);
        state.issued.push(stream.clone());
        Ok(stream)
    }

    async fn get_display_media(&self) -> Result<MediaStream, MediaAccessError> {
        self.lock().display_requests += 1;
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if let Some(fault) = state.display_fault.clone() {
            return Err(fault);
        }
        let stream = MediaStream::new(vec![MediaTrack::video(
            "Entire screen",
            TrackSettings {
                width: DISPLAY_WIDTH,
                height: DISPLAY_HEIGHT,
                frame_rate: 15.0,
            },
        )]);
        state.issued.push(stream.clone());
        Ok(stream)
    }

    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, MediaAccessError> {
        let mut state = self.lock();
        state.enumerations += 1;
        let granted = state.permission_granted;
        Ok(state
            .devices
            .iter()
            .map(|d| MediaDeviceInfo {
                label: if granted { d.label.clone() } else { String::new() },
                ..d.clone()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{FacingMode, VideoConstraints};

    fn constraints() -> MediaConstraints {
        MediaConstraints {
            video: Some(VideoConstraints {
                ideal_width: 1280,
                ideal_height: 720,
                aspect_ratio: 16.0 / 9.0,
                facing_mode: FacingMode::User,
                device_id: None,
            }),
            audio: true,
        }
    }

    #[tokio::test]
    async fn labels_hidden_until_permission_granted() {
        let sim = SimulatedMediaDevices::new();
        let before = sim.enumerate_devices().await.unwrap();
        assert!(before.iter().all(|d| d.label.is_empty()));

        sim.get_user_media(&constraints()).await.unwrap();
        let after = sim.enumerate_devices().await.unwrap();
        assert!(after.iter().all(|d| !d.label.is_empty()));
    }

    #[tokio::test]
    async fn no_devices_reports_not_found() {
        let sim = SimulatedMediaDevices::without_devices();
        let err = sim.get_user_media(&constraints()).await.unwrap_err();
        assert_eq!(err.name, "NotFoundError");
    }

    #[tokio::test]
    async fn camera_fault_is_returned() {
        let sim = SimulatedMediaDevices::new();
        sim.set_camera_fault(Some(MediaAccessError::not_readable()));
        let err = sim.get_user_media(&constraints()).await.unwrap_err();
        assert_eq!(err.name, "NotReadableError");
        assert_eq!(sim.user_media_requests(), 1);
        assert!(sim.issued_streams().is_empty());
    }
}
