use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HuddleError {
    #[error("session error: {0}")]
    Session(String),
    #[error("unknown participant: {0}")]
    UnknownParticipant(String),
    #[error("media error: {0}")]
    Media(#[from] MediaAccessError),
    #[error("settings error: {0}")]
    Settings(String),
}

/// Failure reported by a [`crate::media::MediaDevices`] backend.
///
/// `name` follows the DOMException names browsers use for capture errors
/// (`NotAllowedError`, `NotFoundError`, `NotReadableError`, ...).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct MediaAccessError {
    pub name: String,
    pub message: String,
}

impl MediaAccessError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn not_allowed() -> Self {
        Self::new("NotAllowedError", "permission denied by user")
    }

    pub fn not_found() -> Self {
        Self::new("NotFoundError", "requested device not found")
    }

    pub fn not_readable() -> Self {
        Self::new("NotReadableError", "could not start video source")
    }
}

/// Camera failures. None of them end the meeting; the session carries on
/// with video off.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
pub enum CameraError {
    #[error("No camera found. Connect a camera and try again.")]
    NoCameraFound,
    #[error("Camera permission denied. Allow camera access in your browser settings.")]
    PermissionDenied,
    #[error("Camera is already in use by another application.")]
    DeviceBusy,
    #[error("Could not access camera: {0}")]
    Unknown(String),
}

impl CameraError {
    /// Map a backend failure onto the camera taxonomy.
    pub fn classify(err: &MediaAccessError) -> Self {
        match err.name.as_str() {
            "NotFoundError" | "DevicesNotFoundError" | "OverconstrainedError" => {
                Self::NoCameraFound
            }
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                Self::PermissionDenied
            }
            "NotReadableError" | "TrackStartError" | "AbortError" => Self::DeviceBusy,
            _ => Self::Unknown(err.message.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_names() {
        assert_eq!(
            CameraError::classify(&MediaAccessError::not_found()),
            CameraError::NoCameraFound
        );
        assert_eq!(
            CameraError::classify(&MediaAccessError::not_allowed()),
            CameraError::PermissionDenied
        );
        assert_eq!(
            CameraError::classify(&MediaAccessError::not_readable()),
            CameraError::DeviceBusy
        );
    }

    #[test]
    fn classify_unknown_keeps_message() {
        let err = MediaAccessError::new("TypeError", "constraints malformed");
        assert_eq!(
            CameraError::classify(&err),
            CameraError::Unknown("constraints malformed".into())
        );
    }

    #[test]
    fn permission_message_mentions_denied() {
        let msg = CameraError::PermissionDenied.to_string();
        assert!(msg.contains("permission denied"));
    }
}
