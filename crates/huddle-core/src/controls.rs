//! Toolbar and device bar.
//!
//! Both surfaces are stateless: they turn the booleans the session hands
//! them into button view models and translate clicks or shortcuts into
//! [`ControlCommand`]s. The session decides what a command does.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::media::{DeviceKind, MediaDeviceInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VirtualBackgroundMode {
    #[default]
    None,
    Blur,
    Background,
}

impl VirtualBackgroundMode {
    /// Next mode in the toolbar cycle.
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Blur,
            Self::Blur => Self::Background,
            Self::Background => Self::None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Some(Self::None),
            "blur" => Some(Self::Blur),
            "background" | "bg" => Some(Self::Background),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlCommand {
    ToggleMute,
    ToggleVideo,
    ToggleScreenShare,
    ToggleParticipants,
    ToggleChat,
    SetVirtualBackground(VirtualBackgroundMode),
    Leave,
}

impl ControlCommand {
    /// Keyboard shortcut mapping. `current_background` feeds the `b` cycle.
    pub fn from_shortcut(key: char, current_background: VirtualBackgroundMode) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'm' => Some(Self::ToggleMute),
            'v' => Some(Self::ToggleVideo),
            's' => Some(Self::ToggleScreenShare),
            'p' => Some(Self::ToggleParticipants),
            'c' => Some(Self::ToggleChat),
            'b' => Some(Self::SetVirtualBackground(current_background.next())),
            'l' => Some(Self::Leave),
            _ => None,
        }
    }
}

/// Everything the toolbar needs to draw itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ControlBarState {
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_screen_sharing: bool,
    pub show_participants: bool,
    pub show_chat: bool,
    pub virtual_background: VirtualBackgroundMode,
    pub unread_messages: u32,
    pub participant_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlButton {
    pub command: ControlCommand,
    pub label: String,
    pub active: bool,
    /// Red styling (mic/camera off, leave).
    pub danger: bool,
    pub badge: Option<String>,
    pub shortcut: char,
}

/// Callback set the toolbar invokes.
#[async_trait]
pub trait ControlHandler: Send + Sync {
    async fn handle(&self, command: ControlCommand);
}

pub struct ControlBar;

impl ControlBar {
    pub fn buttons(state: &ControlBarState) -> Vec<ControlButton> {
        vec![
            ControlButton {
                command: ControlCommand::ToggleMute,
                label: if state.is_muted { "Unmute" } else { "Mute" }.into(),
                active: !state.is_muted,
                danger: state.is_muted,
                badge: None,
                shortcut: 'm',
            },
            ControlButton {
                command: ControlCommand::ToggleVideo,
                label: if state.is_video_off {
                    "Start video"
                } else {
                    "Stop video"
                }
                .into(),
                active: !state.is_video_off,
                danger: state.is_video_off,
                badge: None,
                shortcut: 'v',
            },
            ControlButton {
                command: ControlCommand::ToggleScreenShare,
                label: if state.is_screen_sharing {
                    "Stop sharing"
                } else {
                    "Share screen"
                }
                .into(),
                active: state.is_screen_sharing,
                danger: false,
                badge: None,
                shortcut: 's',
            },
            ControlButton {
                command: ControlCommand::SetVirtualBackground(state.virtual_background.next()),
                label: match state.virtual_background {
                    VirtualBackgroundMode::None => "Blur background",
                    VirtualBackgroundMode::Blur => "Use background",
                    VirtualBackgroundMode::Background => "Remove background",
                }
                .into(),
                active: state.virtual_background != VirtualBackgroundMode::None,
                danger: false,
                badge: None,
                shortcut: 'b',
            },
            ControlButton {
                command: ControlCommand::ToggleParticipants,
                label: "Participants".into(),
                active: state.show_participants,
                danger: false,
                badge: Some(state.participant_count.to_string()),
                shortcut: 'p',
            },
            ControlButton {
                command: ControlCommand::ToggleChat,
                label: "Chat".into(),
                active: state.show_chat,
                danger: false,
                badge: (state.unread_messages > 0).then(|| state.unread_messages.to_string()),
                shortcut: 'c',
            },
            ControlButton {
                command: ControlCommand::Leave,
                label: "Leave".into(),
                active: false,
                danger: true,
                badge: None,
                shortcut: 'l',
            },
        ]
    }
}

/// In-meeting preferences. Lives as long as the session, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeetingPreferences {
    pub selected_camera: Option<String>,
    pub selected_microphone: Option<String>,
    pub show_self_view: bool,
    pub shortcuts_enabled: bool,
    pub high_contrast: bool,
}

impl Default for MeetingPreferences {
    fn default() -> Self {
        Self {
            selected_camera: None,
            selected_microphone: None,
            show_self_view: true,
            shortcuts_enabled: true,
            high_contrast: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceOption {
    pub device_id: String,
    pub label: String,
    pub selected: bool,
}

/// Device picker entries for one device kind.
///
/// Unlabelled devices (permission not granted yet) get a numbered
/// placeholder. With no explicit selection the first device is selected.
pub fn device_options(
    devices: &[MediaDeviceInfo],
    kind: DeviceKind,
    selected: Option<&str>,
) -> Vec<DeviceOption> {
    let noun = match kind {
        DeviceKind::VideoInput => "Camera",
        DeviceKind::AudioInput => "Microphone",
        DeviceKind::AudioOutput => "Speaker",
    };
    devices
        .iter()
        .filter(|d| d.kind == kind)
        .enumerate()
        .map(|(i, d)| DeviceOption {
            device_id: d.device_id.clone(),
            label: if d.label.is_empty() {
                format!("{noun} {}", i + 1)
            } else {
                d.label.clone()
            },
            selected: match selected {
                Some(id) => id == d.device_id,
                None => i == 0,
            },
        })
        .collect()
}
