//! Synthetic placeholder streams.
//!
//! A participant whose video is on but who has no real stream gets a
//! canvas-backed stream instead: a role-coloured gradient with their
//! initials, pumped at a fixed frame rate while a tokio runtime is around.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use huddle_core::media::{MediaStream, MediaTrack, TrackSettings};
use huddle_core::participants::{Participant, Role};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::font;

pub const CANVAS_WIDTH: u32 = 640;
pub const CANVAS_HEIGHT: u32 = 360;
pub const FRAME_RATE: u32 = 30;

const INITIALS_SCALE: u32 = 12;
const INITIALS_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const JPEG_QUALITY: u8 = 60;

/// Top and bottom gradient colours per role.
pub fn role_gradient(role: Role) -> (Rgb<u8>, Rgb<u8>) {
    match role {
        Role::Host => (Rgb([37, 99, 235]), Rgb([30, 64, 175])),
        Role::Presenter => (Rgb([147, 51, 234]), Rgb([107, 33, 168])),
        Role::Attendee => (Rgb([13, 148, 136]), Rgb([17, 94, 89])),
        Role::Guest => (Rgb([100, 116, 139]), Rgb([51, 65, 85])),
    }
}

/// Draw the placeholder frame for `participant`.
pub fn draw_placeholder(participant: &Participant) -> RgbImage {
    let (top, bottom) = role_gradient(participant.role);
    let mut canvas = RgbImage::from_fn(CANVAS_WIDTH, CANVAS_HEIGHT, |_, y| {
        let t = y as f32 / (CANVAS_HEIGHT - 1) as f32;
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Rgb([
            mix(top[0], bottom[0]),
            mix(top[1], bottom[1]),
            mix(top[2], bottom[2]),
        ])
    });

    let initials = participant.initials();
    let width = font::text_width(&initials, INITIALS_SCALE);
    let height = font::GLYPH_HEIGHT * INITIALS_SCALE;
    let left = CANVAS_WIDTH.saturating_sub(width) / 2;
    let top_edge = CANVAS_HEIGHT.saturating_sub(height) / 2;
    for (x, y) in font::lit_cells(&initials, INITIALS_SCALE) {
        let (px, py) = (left + x, top_edge + y);
        if px < CANVAS_WIDTH && py < CANVAS_HEIGHT {
            canvas.put_pixel(px, py, INITIALS_COLOR);
        }
    }
    canvas
}

/// Cancels the frame loop when dropped.
struct FramePump {
    cancel_tx: watch::Sender<bool>,
    _handle: JoinHandle<()>,
}

impl Drop for FramePump {
    fn drop(&mut self) {
        let _ = self.cancel_tx.send(true);
    }
}

async fn frame_loop(stream_id: String, frames: Arc<AtomicU64>, mut cancel_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / FRAME_RATE);
    loop {
        tokio::select! {
            _ = cancel_rx.changed() => break,
            _ = ticker.tick() => {
                if frames.fetch_add(1, Ordering::Relaxed) == 0 {
                    tracing::debug!(stream = %stream_id, "first placeholder frame");
                }
            }
        }
    }
    tracing::debug!(
        stream = %stream_id,
        frames = frames.load(Ordering::Relaxed),
        "placeholder frame loop exited"
    );
}

/// A placeholder stream and the canvas it captures.
pub struct SyntheticStream {
    stream: MediaStream,
    frame: Arc<RgbImage>,
    frames: Arc<AtomicU64>,
    pump: Option<FramePump>,
}

impl SyntheticStream {
    /// Wrap `frame` in a single-video-track stream and, inside a tokio
    /// runtime, start pumping frames.
    pub fn new(frame: RgbImage) -> Self {
        let track = MediaTrack::video(
            "placeholder",
            TrackSettings {
                width: frame.width(),
                height: frame.height(),
                frame_rate: FRAME_RATE as f64,
            },
        );
        let stream = MediaStream::new(vec![track]);
        let frames = Arc::new(AtomicU64::new(0));

        let pump = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let task = frame_loop(stream.id().to_string(), frames.clone(), cancel_rx);
            FramePump {
                cancel_tx,
                _handle: handle.spawn(task),
            }
        });
        if pump.is_none() {
            tracing::debug!(stream = %stream.id(), "no runtime; placeholder is a still frame");
        }

        Self {
            stream,
            frame: Arc::new(frame),
            frames,
            pump,
        }
    }

    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    pub fn frame(&self) -> &RgbImage {
        &self.frame
    }

    /// Frames delivered so far.
    pub fn frames_delivered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn is_live(&self) -> bool {
        self.stream.is_active()
    }

    /// Current frame as a `data:image/jpeg;base64,...` URL for web shells.
    pub fn data_url(&self) -> Option<String> {
        let mut jpeg = Vec::with_capacity((self.frame.width() * self.frame.height() / 4) as usize);
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
        if let Err(e) = encoder.encode_image(&*self.frame) {
            tracing::warn!(stream = %self.stream.id(), "placeholder JPEG encode failed: {e}");
            return None;
        }
        let b64 = base64::engine::general_purpose::STANDARD.encode(&jpeg);
        Some(format!("data:image/jpeg;base64,{b64}"))
    }

    /// Stop the frame loop and end the track. Idempotent.
    pub fn stop(&mut self) {
        if self.pump.take().is_some() || self.stream.is_active() {
            tracing::debug!(stream = %self.stream.id(), "placeholder released");
        }
        self.stream.stop_all();
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Creates placeholder streams for tiles.
pub trait SyntheticStreamFactory: Send + Sync {
    fn create(&self, participant: &Participant) -> SyntheticStream;
}

/// Draws placeholders on an in-memory canvas.
#[derive(Debug, Default, Clone, Copy)]
pub struct CanvasStreamFactory;

impl SyntheticStreamFactory for CanvasStreamFactory {
    fn create(&self, participant: &Participant) -> SyntheticStream {
        let synthetic = SyntheticStream::new(draw_placeholder(participant));
        tracing::info!(
            participant = %participant.id,
            stream = %synthetic.stream().id(),
            "placeholder stream created"
        );
        synthetic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::media::TrackState;

    fn ada() -> Participant {
        Participant::remote("ada", "Ada Lovelace", Role::Presenter)
    }

    #[test]
    fn placeholder_has_gradient_and_initials() {
        let frame = draw_placeholder(&ada());
        assert_eq!(frame.dimensions(), (CANVAS_WIDTH, CANVAS_HEIGHT));
        let (top, bottom) = role_gradient(Role::Presenter);
        assert_eq!(*frame.get_pixel(0, 0), top);
        assert_eq!(*frame.get_pixel(0, CANVAS_HEIGHT - 1), bottom);
        let white = frame.pixels().filter(|p| **p == INITIALS_COLOR).count();
        assert!(white > 0);
    }

    #[test]
    fn roles_get_distinct_colours() {
        let roles = [Role::Host, Role::Presenter, Role::Attendee, Role::Guest];
        for (i, a) in roles.iter().enumerate() {
            for b in &roles[i + 1..] {
                assert_ne!(role_gradient(*a), role_gradient(*b));
            }
        }
    }

    #[test]
    fn still_frame_without_runtime() {
        let mut synthetic = CanvasStreamFactory.create(&ada());
        let track = synthetic.stream().video_tracks()[0].clone();
        assert_eq!(track.settings().unwrap().frame_rate, 30.0);
        assert_eq!(track.settings().unwrap().width, CANVAS_WIDTH);
        assert!(synthetic.is_live());
        assert!(synthetic.data_url().unwrap().starts_with("data:image/jpeg;base64,"));

        synthetic.stop();
        assert_eq!(track.ready_state(), TrackState::Ended);
        synthetic.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn frames_pump_until_stopped() {
        let mut synthetic = CanvasStreamFactory.create(&ada());
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        let pumped = synthetic.frames_delivered();
        assert!((29..=31).contains(&pumped), "pumped {pumped}");

        synthetic.stop();
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(synthetic.frames_delivered() <= pumped + 1);
    }

    #[tokio::test]
    async fn drop_ends_the_track() {
        let synthetic = CanvasStreamFactory.create(&ada());
        let track = synthetic.stream().tracks()[0].clone();
        drop(synthetic);
        assert_eq!(track.ready_state(), TrackState::Ended);
    }
}
