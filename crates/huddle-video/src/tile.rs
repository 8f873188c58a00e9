//! Per-participant video tile.

use std::sync::Arc;

use huddle_core::controls::VirtualBackgroundMode;
use huddle_core::layout::GridArea;
use huddle_core::participants::Role;
use huddle_core::session::TileState;
use serde::Serialize;

use crate::canvas::{SyntheticStream, SyntheticStreamFactory};

pub const TILE_WIDTH: u32 = 640;
pub const TILE_HEIGHT: u32 = 360;
pub const TILE_ASPECT_RATIO: &str = "16 / 9";

const BLUR_RADIUS_PX: u32 = 12;
const OVERLAY_GRADIENT: &str = "linear-gradient(135deg, #0f172a 0%, #1e3a8a 50%, #0f766e 100%)";
const OVERLAY_OPACITY: f32 = 0.55;

/// What the tile's video element shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TileSource {
    Avatar { initials: String },
    Stream { stream_id: String },
    Placeholder { stream_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TileBadge {
    Muted,
    VideoOff,
    ScreenSharing,
}

/// Cosmetic local-tile effect. Neither variant segments the person from
/// the background.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackgroundEffect {
    Blur { radius_px: u32, css: String },
    GradientOverlay { css: String, opacity: f32 },
}

impl BackgroundEffect {
    pub fn for_mode(mode: VirtualBackgroundMode) -> Option<Self> {
        match mode {
            VirtualBackgroundMode::None => None,
            VirtualBackgroundMode::Blur => Some(Self::Blur {
                radius_px: BLUR_RADIUS_PX,
                css: format!("backdrop-filter: blur({BLUR_RADIUS_PX}px)"),
            }),
            VirtualBackgroundMode::Background => Some(Self::GradientOverlay {
                css: format!("background: {OVERLAY_GRADIENT}"),
                opacity: OVERLAY_OPACITY,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinControl {
    pub pinned: bool,
    pub label: &'static str,
    /// Shown only while the pointer is over the tile.
    pub reveal_on_hover: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedTile {
    pub participant_id: String,
    pub area: GridArea,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: &'static str,
    pub display_name: String,
    pub source: TileSource,
    pub badges: Vec<TileBadge>,
    pub speaking_ring: bool,
    pub pin: PinControl,
    pub role_badge: Option<&'static str>,
    pub you_label: bool,
    pub background: Option<BackgroundEffect>,
}

/// Renders one participant and owns that tile's placeholder stream.
///
/// A placeholder is created once per "video on, no stream" stretch and
/// released as soon as video turns off or a real stream shows up. A real
/// stream is never stopped here.
pub struct TileRenderer {
    participant_id: String,
    factory: Arc<dyn SyntheticStreamFactory>,
    placeholder: Option<SyntheticStream>,
}

impl TileRenderer {
    pub fn new(participant_id: impl Into<String>, factory: Arc<dyn SyntheticStreamFactory>) -> Self {
        Self {
            participant_id: participant_id.into(),
            factory,
            placeholder: None,
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn placeholder(&self) -> Option<&SyntheticStream> {
        self.placeholder.as_ref()
    }

    pub fn render(&mut self, tile: &TileState) -> RenderedTile {
        let p = &tile.participant;
        let source = if p.is_video_off || !tile.show_video {
            self.release();
            TileSource::Avatar {
                initials: p.initials(),
            }
        } else if let Some(stream) = &p.stream {
            self.release();
            TileSource::Stream {
                stream_id: stream.id().to_string(),
            }
        } else {
            let placeholder = self
                .placeholder
                .get_or_insert_with(|| self.factory.create(p));
            TileSource::Placeholder {
                stream_id: placeholder.stream().id().to_string(),
            }
        };

        let mut badges = Vec::new();
        if p.is_muted {
            badges.push(TileBadge::Muted);
        }
        if p.is_video_off {
            badges.push(TileBadge::VideoOff);
        }
        if p.is_screen_sharing {
            badges.push(TileBadge::ScreenSharing);
        }

        RenderedTile {
            participant_id: p.id.clone(),
            area: tile.area,
            width: TILE_WIDTH,
            height: TILE_HEIGHT,
            aspect_ratio: TILE_ASPECT_RATIO,
            display_name: p.display_name.clone(),
            source,
            badges,
            speaking_ring: p.is_speaking,
            pin: PinControl {
                pinned: tile.is_pinned,
                label: if tile.is_pinned { "Unpin" } else { "Pin" },
                reveal_on_hover: true,
            },
            role_badge: match p.role {
                Role::Host | Role::Presenter => Some(p.role.label()),
                Role::Attendee | Role::Guest => None,
            },
            you_label: p.is_local,
            background: if p.is_local {
                BackgroundEffect::for_mode(tile.virtual_background)
            } else {
                None
            },
        }
    }

    /// Stop the placeholder, if any.
    pub fn release(&mut self) {
        if let Some(mut placeholder) = self.placeholder.take() {
            placeholder.stop();
        }
    }
}

impl Drop for TileRenderer {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::canvas::CanvasStreamFactory;
    use huddle_core::media::{MediaStream, MediaTrack, TrackKind, TrackState};
    use huddle_core::participants::Participant;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts placeholder creations.
    #[derive(Default)]
    pub(crate) struct CountingFactory {
        pub(crate) created: AtomicUsize,
    }

    impl SyntheticStreamFactory for CountingFactory {
        fn create(&self, participant: &Participant) -> SyntheticStream {
            self.created.fetch_add(1, Ordering::SeqCst);
            CanvasStreamFactory.create(participant)
        }
    }

    pub(crate) fn tile(participant: Participant) -> TileState {
        TileState {
            participant,
            area: GridArea::Single,
            is_pinned: false,
            virtual_background: VirtualBackgroundMode::None,
            show_video: true,
        }
    }

    fn camera_on(id: &str) -> Participant {
        Participant {
            is_video_off: false,
            ..Participant::remote(id, "Grace Hopper", Role::Attendee)
        }
    }

    #[test]
    fn video_off_shows_initials() {
        let factory = Arc::new(CountingFactory::default());
        let mut renderer = TileRenderer::new("g", factory.clone());
        let out = renderer.render(&tile(Participant::remote("g", "Grace Hopper", Role::Guest)));
        assert_eq!(out.source, TileSource::Avatar { initials: "GH".into() });
        assert!(out.badges.contains(&TileBadge::VideoOff));
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
        assert_eq!((out.width, out.height, out.aspect_ratio), (640, 360, "16 / 9"));
    }

    #[test]
    fn placeholder_is_memoized_across_renders() {
        let factory = Arc::new(CountingFactory::default());
        let mut renderer = TileRenderer::new("g", factory.clone());
        let state = tile(camera_on("g"));

        let first = renderer.render(&state);
        let second = renderer.render(&state);
        assert_eq!(first.source, second.source);
        assert!(matches!(first.source, TileSource::Placeholder { .. }));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn placeholder_released_when_video_turns_off() {
        let factory = Arc::new(CountingFactory::default());
        let mut renderer = TileRenderer::new("g", factory.clone());
        renderer.render(&tile(camera_on("g")));
        let track = renderer.placeholder().unwrap().stream().tracks()[0].clone();

        let mut off = camera_on("g");
        off.is_video_off = true;
        renderer.render(&tile(off));
        assert!(renderer.placeholder().is_none());
        assert_eq!(track.ready_state(), TrackState::Ended);

        renderer.render(&tile(camera_on("g")));
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn real_stream_replaces_placeholder_and_is_left_running() {
        let factory = Arc::new(CountingFactory::default());
        let mut renderer = TileRenderer::new("g", factory.clone());
        renderer.render(&tile(camera_on("g")));
        let placeholder_track = renderer.placeholder().unwrap().stream().tracks()[0].clone();

        let real = MediaStream::new(vec![MediaTrack::new(TrackKind::Video, "cam")]);
        let mut with_stream = camera_on("g");
        with_stream.stream = Some(real.clone());
        let out = renderer.render(&tile(with_stream));

        assert_eq!(
            out.source,
            TileSource::Stream {
                stream_id: real.id().to_string()
            }
        );
        assert_eq!(placeholder_track.ready_state(), TrackState::Ended);
        drop(renderer);
        assert!(real.is_active());
    }

    #[test]
    fn drop_releases_placeholder() {
        let factory = Arc::new(CountingFactory::default());
        let mut renderer = TileRenderer::new("g", factory);
        renderer.render(&tile(camera_on("g")));
        let track = renderer.placeholder().unwrap().stream().tracks()[0].clone();
        drop(renderer);
        assert_eq!(track.ready_state(), TrackState::Ended);
    }

    #[test]
    fn affordances_follow_participant_state() {
        let factory = Arc::new(CountingFactory::default());
        let mut renderer = TileRenderer::new("me", factory);
        let mut me = Participant::local("me", "Alan Turing", Role::Host);
        me.is_speaking = true;
        let state = TileState {
            is_pinned: true,
            virtual_background: VirtualBackgroundMode::Blur,
            ..tile(me)
        };
        let out = renderer.render(&state);
        assert!(out.you_label);
        assert!(out.speaking_ring);
        assert!(out.badges.contains(&TileBadge::Muted));
        assert_eq!(out.role_badge, Some("Host"));
        assert_eq!(out.pin.label, "Unpin");
        assert!(matches!(
            out.background,
            Some(BackgroundEffect::Blur { radius_px: 12, .. })
        ));
    }

    #[test]
    fn remote_tiles_never_get_background_effects() {
        let factory = Arc::new(CountingFactory::default());
        let mut renderer = TileRenderer::new("g", factory);
        let state = TileState {
            virtual_background: VirtualBackgroundMode::Background,
            ..tile(camera_on("g"))
        };
        assert!(renderer.render(&state).background.is_none());
    }

    #[test]
    fn self_view_off_shows_avatar() {
        let factory = Arc::new(CountingFactory::default());
        let mut renderer = TileRenderer::new("me", factory.clone());
        let mut me = Participant::local("me", "Alan Turing", Role::Host);
        me.is_video_off = false;
        let state = TileState {
            show_video: false,
            ..tile(me)
        };
        assert!(matches!(renderer.render(&state).source, TileSource::Avatar { .. }));
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }
}
