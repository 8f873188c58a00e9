//! Participant records and the local roster.

use serde::{Deserialize, Serialize};

use crate::media::MediaStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Presenter,
    Attendee,
    Guest,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Host => "Host",
            Role::Presenter => "Presenter",
            Role::Attendee => "Attendee",
            Role::Guest => "Guest",
        }
    }
}

/// One attendee as the session sees it.
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub role: Role,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_speaking: bool,
    pub is_screen_sharing: bool,
    pub is_local: bool,
    #[serde(skip)]
    pub stream: Option<MediaStream>,
}

impl Participant {
    /// A remote attendee with mic on and camera off.
    pub fn remote(id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role,
            is_muted: false,
            is_video_off: true,
            is_speaking: false,
            is_screen_sharing: false,
            is_local: false,
            stream: None,
        }
    }

    pub fn local(id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            is_local: true,
            is_muted: true,
            ..Self::remote(id, display_name, role)
        }
    }

    pub fn initials(&self) -> String {
        initials(&self.display_name)
    }
}

/// Up to two upper-cased initials from a display name, `?` when blank.
pub fn initials(display_name: &str) -> String {
    let letters: String = display_name
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .take(2)
        .flat_map(char::to_uppercase)
        .collect();
    if letters.is_empty() {
        "?".to_string()
    } else {
        letters
    }
}

/// Manages the roster of a meeting.
///
/// Updated by the session (toggles) and by the peer source. Read by the
/// layout engine and the panels.
#[derive(Debug, Clone, Default)]
pub struct ParticipantManager {
    participants: Vec<Participant>,
    local_id: Option<String>,
}

impl ParticipantManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local(&mut self, participant: Participant) {
        self.local_id = Some(participant.id.clone());
        self.participants.retain(|p| p.id != participant.id);
        self.participants.insert(0, participant);
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn local(&self) -> Option<&Participant> {
        self.local_id.as_deref().and_then(|id| self.participant(id))
    }

    pub fn local_mut(&mut self) -> Option<&mut Participant> {
        let id = self.local_id.clone()?;
        self.participant_mut(&id)
    }

    /// Returns false when a participant with the same id is already present.
    pub fn add_participant(&mut self, participant: Participant) -> bool {
        if self.participants.iter().any(|p| p.id == participant.id) {
            return false;
        }
        self.participants.push(participant);
        true
    }

    pub fn remove_participant(&mut self, id: &str) -> Option<Participant> {
        if self.local_id.as_deref() == Some(id) {
            return None;
        }
        let pos = self.participants.iter().position(|p| p.id == id)?;
        Some(self.participants.remove(pos))
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn participant_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.participant(id).is_some()
    }

    /// Mark exactly `id` as speaking; `None` silences everyone.
    pub fn set_active_speaker(&mut self, id: Option<&str>) {
        for p in &mut self.participants {
            p.is_speaking = Some(p.id.as_str()) == id;
        }
    }

    pub fn active_speaker(&self) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.is_speaking)
            .map(|p| p.id.as_str())
    }

    /// Participants eligible for speaker election: remote and unmuted.
    pub fn speaker_candidates(&self) -> Vec<&Participant> {
        self.participants
            .iter()
            .filter(|p| !p.is_local && !p.is_muted)
            .collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.local_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_participant(id: &str, name: &str) -> Participant {
        Participant::remote(id, name, Role::Attendee)
    }

    #[test]
    fn initials_from_names() {
        assert_eq!(initials("Ada Lovelace"), "AL");
        assert_eq!(initials("grace brewster murray hopper"), "GB");
        assert_eq!(initials("Linus"), "L");
        assert_eq!(initials("   "), "?");
    }

    #[test]
    fn no_duplicate_participants() {
        let mut mgr = ParticipantManager::new();
        assert!(mgr.add_participant(make_participant("p1", "Alice")));
        assert!(!mgr.add_participant(make_participant("p1", "Alice")));
        assert_eq!(mgr.participant_count(), 1);
    }

    #[test]
    fn local_participant_stays_first_and_cannot_be_removed() {
        let mut mgr = ParticipantManager::new();
        mgr.add_participant(make_participant("p1", "Alice"));
        mgr.set_local(Participant::local("me", "Me", Role::Host));
        assert_eq!(mgr.ids(), vec!["me", "p1"]);
        assert!(mgr.remove_participant("me").is_none());
        assert!(mgr.remove_participant("p1").is_some());
        assert_eq!(mgr.participant_count(), 1);
    }

    #[test]
    fn single_active_speaker() {
        let mut mgr = ParticipantManager::new();
        mgr.add_participant(make_participant("p1", "Alice"));
        mgr.add_participant(make_participant("p2", "Bob"));
        mgr.set_active_speaker(Some("p1"));
        mgr.set_active_speaker(Some("p2"));
        assert_eq!(mgr.active_speaker(), Some("p2"));
        assert!(!mgr.participant("p1").unwrap().is_speaking);
        mgr.set_active_speaker(None);
        assert_eq!(mgr.active_speaker(), None);
    }

    #[test]
    fn candidates_exclude_local_and_muted() {
        let mut mgr = ParticipantManager::new();
        mgr.set_local(Participant {
            is_muted: false,
            ..Participant::local("me", "Me", Role::Host)
        });
        mgr.add_participant(make_participant("p1", "Alice"));
        mgr.add_participant(Participant {
            is_muted: true,
            ..make_participant("p2", "Bob")
        });
        let ids: Vec<_> = mgr.speaker_candidates().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["p1".to_string()]);
    }

    #[test]
    fn clear_resets_everything() {
        let mut mgr = ParticipantManager::new();
        mgr.set_local(Participant::local("me", "Me", Role::Host));
        mgr.add_participant(make_participant("p1", "Alice"));
        mgr.clear();
        assert_eq!(mgr.participant_count(), 0);
        assert!(mgr.local_id().is_none());
    }
}
