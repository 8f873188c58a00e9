//! Meeting session orchestrator.
//!
//! Owns every piece of in-meeting state and wires the camera manager, the
//! roster, the layout engine, the panels and the peer source together.
//! UI shells read snapshots and view models and send commands back; all
//! changes are also broadcast as [`SessionEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::camera::{CameraManager, CameraOptions};
use crate::chat::{Attachment, ChatLog, ChatMessage};
use crate::controls::{
    ControlBarState, ControlCommand, ControlHandler, MeetingPreferences, VirtualBackgroundMode,
};
use crate::errors::{CameraError, HuddleError};
use crate::events::{EventEmitter, SessionEvent, SessionEventListener};
use crate::layout::{self, Arrangement, GridArea, LayoutSpec};
use crate::media::{MediaCapabilities, MediaDeviceInfo, MediaDevices, MediaStream, TrackKind};
use crate::panels::{self, ChatPanelView, PanelState, ParticipantsPanelView, SidePanel};
use crate::participants::{Participant, ParticipantManager, Role};
use crate::peers::{PeerChange, PeerChangeListener, RemotePeerSource};
use crate::settings::Settings;

const CLOCK_INTERVAL: Duration = Duration::from_secs(1);
const AUTOHIDE_AFTER: Duration = Duration::from_secs(3);

/// Invoked once when the local user leaves. Navigation is the caller's job.
pub type LeaveCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub meeting_title: String,
    pub meeting_code: String,
    pub is_recording: bool,
    pub local_id: String,
    pub local_name: String,
    pub local_role: Role,
    pub camera: CameraOptions,
    pub capabilities: MediaCapabilities,
    pub start_with_camera: bool,
    pub start_with_mic: bool,
    pub clock_interval: Duration,
    pub autohide_after: Duration,
}

impl SessionConfig {
    pub fn new(meeting_title: impl Into<String>, meeting_code: impl Into<String>) -> Self {
        Self {
            meeting_title: meeting_title.into(),
            meeting_code: meeting_code.into(),
            is_recording: false,
            local_id: "local".into(),
            local_name: "You".into(),
            local_role: Role::Host,
            camera: CameraOptions::default(),
            capabilities: MediaCapabilities::default(),
            start_with_camera: false,
            start_with_mic: false,
            clock_interval: CLOCK_INTERVAL,
            autohide_after: AUTOHIDE_AFTER,
        }
    }

    pub fn from_settings(
        meeting_title: impl Into<String>,
        meeting_code: impl Into<String>,
        settings: &Settings,
    ) -> Self {
        let mut config = Self::new(meeting_title, meeting_code);
        if let Some(name) = settings.display_name.as_ref().filter(|n| !n.trim().is_empty()) {
            config.local_name = name.clone();
        }
        config.camera = settings.camera_options();
        config.start_with_camera = settings.camera_enabled_on_join;
        config.start_with_mic = settings.mic_enabled_on_join;
        config.autohide_after = Duration::from_secs(settings.autohide_secs.max(1));
        config
    }
}

/// Read-only view of the session for UI shells and tests.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub meeting_title: String,
    pub meeting_code: String,
    pub is_recording: bool,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_screen_sharing: bool,
    pub show_participants: bool,
    pub show_chat: bool,
    pub pinned_participant_id: Option<String>,
    pub active_speaker_id: Option<String>,
    pub virtual_background: VirtualBackgroundMode,
    pub elapsed_seconds: u64,
    pub elapsed: String,
    pub controls_visible: bool,
    pub document_hidden: bool,
    pub camera_loading: bool,
    pub camera_error: Option<CameraError>,
    pub local_stream_id: Option<String>,
    pub unread_messages: u32,
    pub has_left: bool,
}

/// One grid cell ready for the tile renderer.
#[derive(Debug, Clone)]
pub struct TileState {
    pub participant: Participant,
    pub area: GridArea,
    pub is_pinned: bool,
    /// Local tile only; remote tiles always carry `None`.
    pub virtual_background: VirtualBackgroundMode,
    /// False for the local tile when self-view is turned off.
    pub show_video: bool,
}

#[derive(Debug, Clone)]
pub struct TileBoard {
    pub spec: LayoutSpec,
    pub tiles: Vec<TileState>,
    pub hidden: Vec<String>,
}

/// `MM:SS`; minutes keep counting past the hour.
pub fn format_clock(elapsed_seconds: u64) -> String {
    format!("{:02}:{:02}", elapsed_seconds / 60, elapsed_seconds % 60)
}

#[derive(Debug, Default)]
struct UiState {
    is_muted: bool,
    /// While sharing this is the camera intent applied when sharing ends.
    is_video_off: bool,
    is_screen_sharing: bool,
    panels: PanelState,
    pinned: Option<String>,
    virtual_background: VirtualBackgroundMode,
    elapsed_seconds: u64,
    controls_visible: bool,
    document_hidden: bool,
    preferences: MeetingPreferences,
    mounted: bool,
    left: bool,
}

/// Resets the in-flight flag when the media operation ends, on every path.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct ChannelListener(mpsc::UnboundedSender<PeerChange>);

impl PeerChangeListener for ChannelListener {
    fn on_change(&self, change: PeerChange) {
        let _ = self.0.send(change);
    }
}

struct SessionInner {
    config: SessionConfig,
    camera: CameraManager,
    devices: Arc<dyn MediaDevices>,
    peers: Arc<dyn RemotePeerSource>,
    emitter: EventEmitter,
    ui: Mutex<UiState>,
    participants: Mutex<ParticipantManager>,
    chat: Mutex<ChatLog>,
    display_stream: Mutex<Option<MediaStream>>,
    on_leave: StdMutex<Option<LeaveCallback>>,
    /// Set while a camera or screen-share acquisition is in flight.
    media_busy: AtomicBool,
    shutdown: CancellationToken,
    autohide: StdMutex<Option<JoinHandle<()>>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl SessionInner {
    fn arrangement(&self, participants: &ParticipantManager, pinned: Option<&str>) -> Arrangement {
        layout::arrange(&participants.ids(), pinned)
    }

    async fn emit_layout(&self) {
        let pinned = self.ui.lock().await.pinned.clone();
        let participants = self.participants.lock().await;
        let arrangement = self.arrangement(&participants, pinned.as_deref());
        drop(participants);
        self.emitter.emit(SessionEvent::LayoutChanged(arrangement.spec));
    }

    async fn tick_clock(&self) {
        let elapsed_seconds = {
            let mut ui = self.ui.lock().await;
            ui.elapsed_seconds += 1;
            ui.elapsed_seconds
        };
        tracing::trace!(elapsed_seconds, "clock tick");
        self.emitter.emit(SessionEvent::ClockTick { elapsed_seconds });
    }

    async fn hide_controls(&self) {
        let changed = {
            let mut ui = self.ui.lock().await;
            let changed = ui.controls_visible && !ui.left;
            if changed {
                ui.controls_visible = false;
            }
            changed
        };
        if changed {
            tracing::debug!("controls hidden after inactivity");
            self.emitter.emit(SessionEvent::ControlsVisibilityChanged(false));
        }
    }

    async fn apply_peer_change(&self, change: PeerChange) {
        match change {
            PeerChange::Joined(participant) => {
                let added = self
                    .participants
                    .lock()
                    .await
                    .add_participant(participant.clone());
                if added {
                    tracing::info!(participant = %participant.id, "participant joined");
                    self.emitter.emit(SessionEvent::ParticipantJoined(participant));
                    self.emit_layout().await;
                }
            }
            PeerChange::Left(id) => {
                let removed = self.participants.lock().await.remove_participant(&id);
                if removed.is_none() {
                    return;
                }
                let unpinned = {
                    let mut ui = self.ui.lock().await;
                    if ui.pinned.as_deref() == Some(id.as_str()) {
                        ui.pinned = None;
                        true
                    } else {
                        false
                    }
                };
                tracing::info!(participant = %id, "participant left");
                self.emitter.emit(SessionEvent::ParticipantLeft(id));
                if unpinned {
                    self.emitter.emit(SessionEvent::PinChanged(None));
                }
                self.emit_layout().await;
            }
            PeerChange::Updated(update) => {
                let updated = {
                    let mut participants = self.participants.lock().await;
                    participants.participant_mut(&update.id).map(|p| {
                        let stream = p.stream.take();
                        let is_speaking = p.is_speaking;
                        *p = Participant {
                            stream: update.stream.clone().or(stream),
                            is_speaking,
                            is_local: false,
                            ..update
                        };
                        p.clone()
                    })
                };
                if let Some(p) = updated {
                    self.emitter.emit(SessionEvent::ParticipantUpdated(p));
                }
            }
            PeerChange::ActiveSpeaker(id) => {
                {
                    let mut participants = self.participants.lock().await;
                    let known = id.as_deref().filter(|id| participants.contains(id));
                    participants.set_active_speaker(known);
                }
                self.emitter.emit(SessionEvent::ActiveSpeakerChanged(id));
            }
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self
            .autohide
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        for handle in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
        self.peers.stop();
        if let Some(stream) = self.display_stream.get_mut().take() {
            stream.stop_all();
        }
    }
}

/// A live meeting from the local participant's point of view.
///
/// Dropping the session clears every timer and releases all media.
pub struct MeetingSession {
    inner: Arc<SessionInner>,
}

impl MeetingSession {
    pub fn new(
        config: SessionConfig,
        devices: Arc<dyn MediaDevices>,
        peers: Arc<dyn RemotePeerSource>,
        on_leave: LeaveCallback,
    ) -> Self {
        let emitter = EventEmitter::new();
        let error_emitter = emitter.clone();
        let camera = CameraManager::new(devices.clone(), config.capabilities, config.camera.clone())
            .with_error_callback(Arc::new(move |err: &CameraError| {
                error_emitter.emit(SessionEvent::CameraError(err.clone()));
            }));

        let mut participants = ParticipantManager::new();
        participants.set_local(Participant::local(
            config.local_id.clone(),
            config.local_name.clone(),
            config.local_role,
        ));

        let ui = UiState {
            is_muted: true,
            is_video_off: true,
            controls_visible: true,
            ..Default::default()
        };

        Self {
            inner: Arc::new(SessionInner {
                config,
                camera,
                devices,
                peers,
                emitter,
                ui: Mutex::new(ui),
                participants: Mutex::new(participants),
                chat: Mutex::new(ChatLog::new()),
                display_stream: Mutex::new(None),
                on_leave: StdMutex::new(Some(on_leave)),
                media_busy: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                autohide: StdMutex::new(None),
                tasks: StdMutex::new(Vec::new()),
            }),
        }
    }

    /// Register a listener for session events.
    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.inner.emitter.add_listener(listener);
    }

    /// Seed the roster, enumerate devices and start the timers.
    ///
    /// Calling it again is a no-op.
    pub async fn mount(&self) {
        {
            let mut ui = self.inner.ui.lock().await;
            if ui.mounted || ui.left {
                return;
            }
            ui.mounted = true;
        }
        tracing::info!(
            title = %self.inner.config.meeting_title,
            code = %self.inner.config.meeting_code,
            "mounting meeting session"
        );

        {
            let mut participants = self.inner.participants.lock().await;
            for participant in self.inner.peers.participants() {
                if participants.add_participant(participant.clone()) {
                    self.inner
                        .emitter
                        .emit(SessionEvent::ParticipantJoined(participant));
                }
            }
            let speaker = self.inner.peers.active_speaker();
            let known = speaker.as_deref().filter(|id| participants.contains(id));
            participants.set_active_speaker(known);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .peers
            .on_participant_change(Arc::new(ChannelListener(tx)));
        let peer_loop = self.spawn_peer_loop(rx);
        let clock = self.spawn_clock();
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([peer_loop, clock]);
        self.inner.peers.start();
        self.restart_autohide();

        self.inner.camera.refresh_devices().await;
        self.inner.emit_layout().await;

        if self.inner.config.start_with_mic {
            self.toggle_mute().await;
        }
        if self.inner.config.start_with_camera {
            self.toggle_video().await;
        }
    }

    fn spawn_clock(&self) -> JoinHandle<()> {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let token = self.inner.shutdown.clone();
        let period = self.inner.config.clock_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.tick_clock().await;
                    }
                }
            }
            tracing::debug!("session clock stopped");
        })
    }

    fn spawn_peer_loop(&self, mut rx: mpsc::UnboundedReceiver<PeerChange>) -> JoinHandle<()> {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let token = self.inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    change = rx.recv() => {
                        let Some(change) = change else { break };
                        let Some(inner) = weak.upgrade() else { break };
                        inner.apply_peer_change(change).await;
                    }
                }
            }
            tracing::debug!("peer event loop ended");
        })
    }

    fn restart_autohide(&self) {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let delay = self.inner.config.autohide_after;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.hide_controls().await;
            }
        });
        let previous = self
            .inner
            .autohide
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Any pointer movement shows the controls and restarts the countdown.
    pub async fn pointer_moved(&self) {
        let shown = {
            let mut ui = self.inner.ui.lock().await;
            if ui.left {
                return;
            }
            !std::mem::replace(&mut ui.controls_visible, true)
        };
        if shown {
            self.inner
                .emitter
                .emit(SessionEvent::ControlsVisibilityChanged(true));
        }
        self.restart_autohide();
    }

    /// Mute or unmute. The microphone is acquired on the first unmute; if
    /// that fails the session stays muted.
    pub async fn toggle_mute(&self) -> bool {
        let unmute = {
            let ui = self.inner.ui.lock().await;
            if ui.left {
                return ui.is_muted;
            }
            ui.is_muted
        };
        if unmute {
            if let Err(e) = self.inner.camera.start_microphone().await {
                tracing::warn!("microphone unavailable, staying muted: {e}");
                return true;
            }
        }
        let muted = {
            let mut ui = self.inner.ui.lock().await;
            if ui.left {
                drop(ui);
                self.inner.camera.stop_microphone().await;
                return true;
            }
            ui.is_muted = !unmute;
            ui.is_muted
        };
        self.inner.camera.set_microphone_enabled(!muted).await;
        let local = {
            let mut participants = self.inner.participants.lock().await;
            participants.local_mut().map(|p| {
                p.is_muted = muted;
                p.clone()
            })
        };
        tracing::info!("microphone muted: {muted}");
        if let Some(local) = local {
            self.inner
                .emitter
                .emit(SessionEvent::ParticipantUpdated(local));
        }
        muted
    }

    /// Turn the camera on or off.
    ///
    /// While sharing, only the camera intent applied when sharing stops is
    /// flipped. A click that arrives while another media operation is still
    /// pending can only turn video off: it cancels a pending camera start
    /// so the late stream is stopped instead of attached.
    pub async fn toggle_video(&self) {
        let Some(_in_flight) = InFlight::acquire(&self.inner.media_busy) else {
            self.turn_video_off_while_busy().await;
            return;
        };

        let (turn_on, sharing) = {
            let mut ui = self.inner.ui.lock().await;
            if ui.left {
                return;
            }
            ui.is_video_off = !ui.is_video_off;
            if ui.is_screen_sharing {
                tracing::info!(
                    "camera will be {} when sharing stops",
                    if ui.is_video_off { "off" } else { "on" }
                );
            }
            (!ui.is_video_off, ui.is_screen_sharing)
        };
        if sharing {
            return;
        }

        if turn_on {
            if self.start_camera_and_attach().await.is_none() {
                tracing::info!("video stays off");
            }
        } else {
            self.inner.camera.stop_camera().await;
            self.attach_local(None, false).await;
        }
    }

    async fn turn_video_off_while_busy(&self) {
        let cancel = {
            let mut ui = self.inner.ui.lock().await;
            let camera_wanted = !ui.left && !ui.is_screen_sharing && !ui.is_video_off;
            if camera_wanted {
                ui.is_video_off = true;
            }
            camera_wanted
        };
        if !cancel {
            tracing::debug!("video toggle ignored: media operation in flight");
            return;
        }
        tracing::info!("camera turned off while a media operation was pending");
        self.inner.camera.stop_camera().await;
        self.attach_local(None, false).await;
    }

    /// Start the camera and attach it to the local tile. The caller must
    /// hold the media in-flight guard and have recorded the intent to show
    /// video; if that intent is withdrawn before the stream arrives, the
    /// stream is stopped. Leaves video off on failure.
    async fn start_camera_and_attach(&self) -> Option<MediaStream> {
        let Some(stream) = self.inner.camera.start_camera().await else {
            self.inner.ui.lock().await.is_video_off = true;
            return None;
        };

        let hidden = {
            let ui = self.inner.ui.lock().await;
            if ui.left || ui.is_screen_sharing || ui.is_video_off {
                drop(ui);
                self.inner.camera.stop_camera().await;
                return None;
            }
            ui.document_hidden
        };
        if hidden {
            stream.set_kind_enabled(TrackKind::Video, false);
        }
        self.attach_local(Some(stream.clone()), false).await;
        Some(stream)
    }

    async fn attach_local(&self, stream: Option<MediaStream>, sharing: bool) {
        let stream_id = stream.as_ref().map(|s| s.id().to_string());
        let local = {
            let mut participants = self.inner.participants.lock().await;
            participants.local_mut().map(|p| {
                p.is_video_off = stream.is_none();
                p.is_screen_sharing = sharing;
                p.stream = stream;
                p.clone()
            })
        };
        self.inner
            .emitter
            .emit(SessionEvent::LocalStreamChanged(stream_id));
        if let Some(local) = local {
            self.inner
                .emitter
                .emit(SessionEvent::ParticipantUpdated(local));
        }
    }

    /// Start or stop presenting the screen.
    ///
    /// A cancelled or denied picker leaves camera and mic untouched. When
    /// sharing stops the camera comes back only if it was on before; if it
    /// cannot be re-acquired the error is surfaced and video stays off.
    pub async fn toggle_screen_share(&self) {
        let Some(_in_flight) = InFlight::acquire(&self.inner.media_busy) else {
            tracing::debug!("screen share toggle ignored: media operation in flight");
            return;
        };

        let sharing = {
            let ui = self.inner.ui.lock().await;
            if ui.left {
                return;
            }
            ui.is_screen_sharing
        };

        if !sharing {
            if !self.inner.config.capabilities.display_media {
                self.inner.emitter.emit(SessionEvent::ScreenShareFailed(
                    "screen sharing is not supported".into(),
                ));
                return;
            }
            let shared = match self.inner.devices.get_display_media().await {
                Ok(shared) => shared,
                Err(e) => {
                    tracing::warn!("screen share not started: {e}");
                    self.inner
                        .emitter
                        .emit(SessionEvent::ScreenShareFailed(e.to_string()));
                    return;
                }
            };
            {
                let mut ui = self.inner.ui.lock().await;
                if ui.left {
                    shared.stop_all();
                    return;
                }
                ui.is_screen_sharing = true;
            }
            self.inner.camera.stop_camera().await;
            *self.inner.display_stream.lock().await = Some(shared.clone());
            let stream_id = shared.id().to_string();
            tracing::info!(stream = %stream_id, "screen share started");
            self.attach_local(Some(shared), true).await;
            self.inner
                .emitter
                .emit(SessionEvent::ScreenShareChanged(true));
        } else {
            if let Some(shared) = self.inner.display_stream.lock().await.take() {
                shared.stop_all();
            }
            let restore_camera = {
                let mut ui = self.inner.ui.lock().await;
                ui.is_screen_sharing = false;
                !ui.is_video_off
            };
            tracing::info!(restore_camera, "screen share stopped");
            self.inner
                .emitter
                .emit(SessionEvent::ScreenShareChanged(false));

            if restore_camera {
                if self.start_camera_and_attach().await.is_none() {
                    tracing::warn!("camera could not be restored after screen share");
                    self.attach_local(None, false).await;
                }
            } else {
                self.attach_local(None, false).await;
            }
        }
    }

    /// Page visibility: pause the camera's video track while hidden.
    /// Microphone tracks and screen shares are left alone.
    pub async fn set_document_hidden(&self, hidden: bool) {
        let camera_on = {
            let mut ui = self.inner.ui.lock().await;
            ui.document_hidden = hidden;
            !ui.is_video_off && !ui.is_screen_sharing
        };
        if camera_on {
            let toggled = self
                .inner
                .camera
                .set_tracks_enabled(TrackKind::Video, !hidden)
                .await;
            if toggled {
                tracing::debug!(hidden, "camera video track enabled: {}", !hidden);
            }
        }
    }

    pub async fn toggle_chat(&self) -> bool {
        self.toggle_panel(SidePanel::Chat).await == Some(SidePanel::Chat)
    }

    pub async fn toggle_participants(&self) -> bool {
        self.toggle_panel(SidePanel::Participants).await == Some(SidePanel::Participants)
    }

    async fn toggle_panel(&self, panel: SidePanel) -> Option<SidePanel> {
        let open = self.inner.ui.lock().await.panels.toggle(panel);
        if open == Some(SidePanel::Chat) && self.inner.chat.lock().await.mark_read() {
            self.inner.emitter.emit(SessionEvent::UnreadCountChanged(0));
        }
        self.inner.emitter.emit(SessionEvent::PanelChanged(open));
        open
    }

    /// Pin `participant_id`, or unpin it if it is already pinned.
    pub async fn toggle_pin(&self, participant_id: &str) -> Result<Option<String>, HuddleError> {
        if !self.inner.participants.lock().await.contains(participant_id) {
            return Err(HuddleError::UnknownParticipant(participant_id.to_string()));
        }
        let pinned = {
            let mut ui = self.inner.ui.lock().await;
            ui.pinned = if ui.pinned.as_deref() == Some(participant_id) {
                None
            } else {
                Some(participant_id.to_string())
            };
            ui.pinned.clone()
        };
        tracing::info!(pinned = ?pinned, "pin changed");
        self.inner
            .emitter
            .emit(SessionEvent::PinChanged(pinned.clone()));
        self.inner.emit_layout().await;
        Ok(pinned)
    }

    pub async fn set_virtual_background(&self, mode: VirtualBackgroundMode) {
        let changed = {
            let mut ui = self.inner.ui.lock().await;
            std::mem::replace(&mut ui.virtual_background, mode) != mode
        };
        if changed {
            self.inner
                .emitter
                .emit(SessionEvent::VirtualBackgroundChanged(mode));
        }
    }

    /// Switch cameras. A running camera is restarted on the new device.
    pub async fn select_camera(&self, device_id: Option<String>) {
        self.inner.ui.lock().await.preferences.selected_camera = device_id.clone();
        self.inner.camera.select_device(device_id).await;

        let Some(_in_flight) = InFlight::acquire(&self.inner.media_busy) else {
            return;
        };
        let camera_on = {
            let ui = self.inner.ui.lock().await;
            !ui.is_video_off && !ui.is_screen_sharing && !ui.left
        };
        if camera_on && self.start_camera_and_attach().await.is_none() {
            self.attach_local(None, false).await;
        }
    }

    pub async fn set_preferences(&self, preferences: MeetingPreferences) {
        self.inner.ui.lock().await.preferences = preferences;
    }

    pub async fn preferences(&self) -> MeetingPreferences {
        self.inner.ui.lock().await.preferences.clone()
    }

    /// Send a message as the local participant. The message is also emitted
    /// upward for optional persistence.
    pub async fn send_chat_message(
        &self,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<ChatMessage, HuddleError> {
        let content = content.trim();
        if content.is_empty() && attachment.is_none() {
            return Err(HuddleError::Session("empty chat message".into()));
        }
        let (sender_id, sender) = {
            let participants = self.inner.participants.lock().await;
            let local = participants
                .local()
                .ok_or_else(|| HuddleError::Session("no local participant".into()))?;
            (local.id.clone(), local.display_name.clone())
        };
        let msg = ChatMessage::new(sender_id, sender, content, attachment);
        self.inner.chat.lock().await.push(msg.clone(), true, true);
        self.inner
            .emitter
            .emit(SessionEvent::ChatMessageSent(msg.clone()));
        Ok(msg)
    }

    /// Deliver an inbound message.
    pub async fn receive_chat_message(&self, msg: ChatMessage) {
        let chat_open = self.inner.ui.lock().await.panels.is_open(SidePanel::Chat);
        let unread = self.inner.chat.lock().await.push(msg.clone(), chat_open, false);
        self.inner
            .emitter
            .emit(SessionEvent::ChatMessageReceived(msg));
        if let Some(count) = unread {
            self.inner
                .emitter
                .emit(SessionEvent::UnreadCountChanged(count));
        }
    }

    /// Leave the meeting. `on_leave` runs exactly once.
    pub async fn leave(&self) {
        let callback = self
            .inner
            .on_leave
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(callback) = callback else {
            return;
        };
        tracing::info!(code = %self.inner.config.meeting_code, "leaving meeting");
        self.unmount().await;
        self.inner.emitter.emit(SessionEvent::Left);
        callback();
    }

    /// Stop every timer and release all media. Idempotent.
    pub async fn unmount(&self) {
        self.inner.ui.lock().await.left = true;
        self.inner.shutdown.cancel();
        if let Some(handle) = self
            .inner
            .autohide
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        let tasks: Vec<JoinHandle<()>> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in tasks {
            handle.abort();
        }
        self.inner.peers.stop();
        self.inner.camera.stop_camera().await;
        self.inner.camera.stop_microphone().await;
        if let Some(shared) = self.inner.display_stream.lock().await.take() {
            shared.stop_all();
        }
    }

    /// Run a toolbar command.
    pub async fn dispatch(&self, command: ControlCommand) {
        tracing::debug!(?command, "control command");
        match command {
            ControlCommand::ToggleMute => {
                self.toggle_mute().await;
            }
            ControlCommand::ToggleVideo => self.toggle_video().await,
            ControlCommand::ToggleScreenShare => self.toggle_screen_share().await,
            ControlCommand::ToggleParticipants => {
                self.toggle_participants().await;
            }
            ControlCommand::ToggleChat => {
                self.toggle_chat().await;
            }
            ControlCommand::SetVirtualBackground(mode) => self.set_virtual_background(mode).await,
            ControlCommand::Leave => self.leave().await,
        }
    }

    /// Keyboard shortcut entry point. Returns the command that ran, if any.
    pub async fn handle_shortcut(&self, key: char) -> Option<ControlCommand> {
        let (enabled, background) = {
            let ui = self.inner.ui.lock().await;
            (ui.preferences.shortcuts_enabled, ui.virtual_background)
        };
        if !enabled {
            return None;
        }
        let command = ControlCommand::from_shortcut(key, background)?;
        self.dispatch(command).await;
        Some(command)
    }

    pub async fn snapshot(&self) -> SessionState {
        let acquisition = self.inner.camera.acquisition().await;
        let unread_messages = self.inner.chat.lock().await.unread();
        let (local_stream_id, active_speaker_id) = {
            let participants = self.inner.participants.lock().await;
            (
                participants
                    .local()
                    .and_then(|p| p.stream.as_ref())
                    .map(|s| s.id().to_string()),
                participants.active_speaker().map(str::to_string),
            )
        };
        let ui = self.inner.ui.lock().await;
        SessionState {
            meeting_title: self.inner.config.meeting_title.clone(),
            meeting_code: self.inner.config.meeting_code.clone(),
            is_recording: self.inner.config.is_recording,
            is_muted: ui.is_muted,
            is_video_off: ui.is_video_off,
            is_screen_sharing: ui.is_screen_sharing,
            show_participants: ui.panels.is_open(SidePanel::Participants),
            show_chat: ui.panels.is_open(SidePanel::Chat),
            pinned_participant_id: ui.pinned.clone(),
            active_speaker_id,
            virtual_background: ui.virtual_background,
            elapsed_seconds: ui.elapsed_seconds,
            elapsed: format_clock(ui.elapsed_seconds),
            controls_visible: ui.controls_visible,
            document_hidden: ui.document_hidden,
            camera_loading: acquisition.is_loading,
            camera_error: acquisition.error,
            local_stream_id,
            unread_messages,
            has_left: ui.left,
        }
    }

    pub async fn formatted_elapsed(&self) -> String {
        format_clock(self.inner.ui.lock().await.elapsed_seconds)
    }

    pub async fn participants(&self) -> Vec<Participant> {
        self.inner.participants.lock().await.participants().to_vec()
    }

    pub async fn local_participant(&self) -> Option<Participant> {
        self.inner.participants.lock().await.local().cloned()
    }

    /// Current grid arrangement of the roster.
    pub async fn arrangement(&self) -> Arrangement {
        let pinned = self.inner.ui.lock().await.pinned.clone();
        let participants = self.inner.participants.lock().await;
        self.inner.arrangement(&participants, pinned.as_deref())
    }

    /// Everything the grid renderer needs, in slot order.
    pub async fn tiles(&self) -> TileBoard {
        let (pinned, background, self_view) = {
            let ui = self.inner.ui.lock().await;
            (
                ui.pinned.clone(),
                ui.virtual_background,
                ui.preferences.show_self_view,
            )
        };
        let participants = self.inner.participants.lock().await;
        let arrangement = self.inner.arrangement(&participants, pinned.as_deref());
        let tiles = arrangement
            .placements
            .iter()
            .filter_map(|placement| {
                let participant = participants.participant(&placement.participant_id)?.clone();
                let is_local = participant.is_local;
                Some(TileState {
                    is_pinned: pinned.as_deref() == Some(participant.id.as_str()),
                    area: placement.area,
                    virtual_background: if is_local {
                        background
                    } else {
                        VirtualBackgroundMode::None
                    },
                    show_video: !is_local || self_view,
                    participant,
                })
            })
            .collect();
        TileBoard {
            spec: arrangement.spec,
            tiles,
            hidden: arrangement.hidden,
        }
    }

    pub async fn control_bar(&self) -> ControlBarState {
        let unread_messages = self.inner.chat.lock().await.unread();
        let participant_count = self.inner.participants.lock().await.participant_count();
        let ui = self.inner.ui.lock().await;
        ControlBarState {
            is_muted: ui.is_muted,
            is_video_off: ui.is_video_off,
            is_screen_sharing: ui.is_screen_sharing,
            show_participants: ui.panels.is_open(SidePanel::Participants),
            show_chat: ui.panels.is_open(SidePanel::Chat),
            virtual_background: ui.virtual_background,
            unread_messages,
            participant_count,
        }
    }

    pub async fn participants_panel(&self) -> ParticipantsPanelView {
        let pinned = self.inner.ui.lock().await.pinned.clone();
        let participants = self.inner.participants.lock().await;
        panels::participants_panel(participants.participants(), pinned.as_deref())
    }

    pub async fn chat_panel(&self) -> ChatPanelView {
        let local_id = self
            .inner
            .participants
            .lock()
            .await
            .local_id()
            .map(str::to_string);
        let chat = self.inner.chat.lock().await;
        panels::chat_panel(chat.messages(), local_id.as_deref())
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.chat.lock().await.messages().to_vec()
    }

    pub async fn devices(&self) -> Vec<MediaDeviceInfo> {
        self.inner.camera.devices().await
    }

    pub fn camera(&self) -> &CameraManager {
        &self.inner.camera
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

#[async_trait]
impl ControlHandler for MeetingSession {
    async fn handle(&self, command: ControlCommand) {
        self.dispatch(command).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_format() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(65), "01:05");
        assert_eq!(format_clock(3_600 + 7), "60:07");
    }

    #[test]
    fn config_from_settings() {
        let settings = Settings {
            display_name: Some("Ada".into()),
            camera_enabled_on_join: true,
            autohide_secs: 5,
            ..Default::default()
        };
        let config = SessionConfig::from_settings("Standup", "abc-defg-hij", &settings);
        assert_eq!(config.local_name, "Ada");
        assert!(config.start_with_camera);
        assert!(!config.start_with_mic);
        assert_eq!(config.autohide_after, Duration::from_secs(5));
    }

    #[test]
    fn blank_display_name_keeps_default() {
        let settings = Settings {
            display_name: Some("  ".into()),
            ..Default::default()
        };
        let config = SessionConfig::from_settings("t", "c", &settings);
        assert_eq!(config.local_name, "You");
    }

    #[test]
    fn in_flight_guard_is_exclusive_and_resets() {
        let flag = AtomicBool::new(false);
        {
            let _first = InFlight::acquire(&flag).unwrap();
            assert!(InFlight::acquire(&flag).is_none());
        }
        assert!(InFlight::acquire(&flag).is_some());
    }
}
