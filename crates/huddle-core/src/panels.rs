use serde::Serialize;

use crate::chat::ChatMessage;
use crate::participants::{Participant, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SidePanel {
    Chat,
    Participants,
}

/// Which side panel is open. Holding an `Option` makes two open panels
/// unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PanelState {
    open: Option<SidePanel>,
}

impl PanelState {
    pub fn open(&self) -> Option<SidePanel> {
        self.open
    }

    pub fn is_open(&self, panel: SidePanel) -> bool {
        self.open == Some(panel)
    }

    /// Open `panel` (closing the other one) or close it if already open.
    pub fn toggle(&mut self, panel: SidePanel) -> Option<SidePanel> {
        self.open = if self.is_open(panel) { None } else { Some(panel) };
        self.open
    }

    pub fn close(&mut self) {
        self.open = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantRow {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub is_local: bool,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_speaking: bool,
    pub is_pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantsPanelView {
    pub title: String,
    pub rows: Vec<ParticipantRow>,
}

/// Roster listing: local participant first, then hosts, then by name.
pub fn participants_panel(
    participants: &[Participant],
    pinned_id: Option<&str>,
) -> ParticipantsPanelView {
    let mut rows: Vec<ParticipantRow> = participants
        .iter()
        .map(|p| ParticipantRow {
            id: p.id.clone(),
            name: if p.is_local {
                format!("{} (You)", p.display_name)
            } else {
                p.display_name.clone()
            },
            role: p.role,
            is_local: p.is_local,
            is_muted: p.is_muted,
            is_video_off: p.is_video_off,
            is_speaking: p.is_speaking,
            is_pinned: pinned_id == Some(p.id.as_str()),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.is_local
            .cmp(&a.is_local)
            .then_with(|| (b.role == Role::Host).cmp(&(a.role == Role::Host)))
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    ParticipantsPanelView {
        title: format!("Participants ({})", rows.len()),
        rows,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatLine {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub time: String,
    pub own: bool,
    pub attachment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatPanelView {
    pub lines: Vec<ChatLine>,
    pub empty_hint: Option<String>,
}

pub fn chat_panel(messages: &[ChatMessage], local_id: Option<&str>) -> ChatPanelView {
    let lines: Vec<ChatLine> = messages
        .iter()
        .map(|m| ChatLine {
            id: m.id.clone(),
            sender: m.sender.clone(),
            content: m.content.clone(),
            time: m.time_label(),
            own: local_id == Some(m.sender_id.as_str()),
            attachment: m.attachment.as_ref().map(|a| a.name.clone()),
        })
        .collect();
    let empty_hint = lines
        .is_empty()
        .then(|| "No messages yet. Say hello!".to_string());
    ChatPanelView { lines, empty_hint }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_one_panel_closes_the_other() {
        let mut panels = PanelState::default();
        assert_eq!(panels.toggle(SidePanel::Participants), Some(SidePanel::Participants));
        assert_eq!(panels.toggle(SidePanel::Chat), Some(SidePanel::Chat));
        assert!(!panels.is_open(SidePanel::Participants));
        assert_eq!(panels.toggle(SidePanel::Chat), None);
    }

    #[test]
    fn roster_sorted_local_then_host_then_name() {
        let mut me = Participant::local("me", "Zoe", Role::Attendee);
        me.is_muted = false;
        let people = vec![
            Participant::remote("b", "bob", Role::Attendee),
            me,
            Participant::remote("h", "Yann", Role::Host),
            Participant::remote("a", "Alice", Role::Guest),
        ];
        let view = participants_panel(&people, Some("a"));
        let ids: Vec<_> = view.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["me", "h", "a", "b"]);
        assert_eq!(view.rows[0].name, "Zoe (You)");
        assert!(view.rows[2].is_pinned);
        assert_eq!(view.title, "Participants (4)");
    }

    #[test]
    fn chat_view_marks_own_messages() {
        let msgs = vec![
            ChatMessage::new("me", "Me", "hello", None),
            ChatMessage::new("p1", "Alice", "hi", None),
        ];
        let view = chat_panel(&msgs, Some("me"));
        assert!(view.lines[0].own);
        assert!(!view.lines[1].own);
        assert!(view.empty_hint.is_none());
        assert!(chat_panel(&[], None).empty_hint.is_some());
    }
}
