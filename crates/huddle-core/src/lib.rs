//! Huddle core: client-side meeting session logic.
//!
//! Pure Rust crate with no platform dependencies. Media capture and remote
//! peers sit behind traits so UI shells and tests can plug in their own.

pub mod camera;
pub mod chat;
pub mod controls;
pub mod errors;
pub mod events;
pub mod layout;
pub mod media;
pub mod panels;
pub mod participants;
pub mod peers;
pub mod session;
pub mod settings;

pub use camera::{CameraManager, CameraOptions, MediaAcquisition};
pub use chat::{Attachment, ChatLog, ChatMessage};
pub use controls::{ControlBar, ControlBarState, ControlCommand, ControlHandler, VirtualBackgroundMode};
pub use errors::{CameraError, HuddleError, MediaAccessError};
pub use events::{EventEmitter, SessionEvent, SessionEventListener};
pub use layout::{Arrangement, GridArea, LayoutKind, LayoutSpec, arrange, compute_layout};
pub use media::{MediaDevices, MediaStream, MediaTrack, TrackKind};
pub use participants::{Participant, ParticipantManager, Role};
pub use peers::{RemotePeerSource, SimulatedPeers};
pub use session::{MeetingSession, SessionConfig, SessionState, TileBoard, TileState};
pub use settings::{Settings, SettingsStore};
