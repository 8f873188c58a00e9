use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachment: Option<Attachment>,
}

impl ChatMessage {
    pub fn new(
        sender_id: impl Into<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            sender: sender.into(),
            content: content.into(),
            timestamp: Utc::now(),
            attachment,
        }
    }

    /// `HH:MM` label shown next to the message.
    pub fn time_label(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }
}

/// Append-only message history of the current session.
///
/// Messages keep arrival order and are never edited or removed. Unread
/// messages are counted while the chat panel is closed.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    unread: u32,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Returns the new unread count when it changed.
    pub fn push(&mut self, msg: ChatMessage, panel_open: bool, from_local: bool) -> Option<u32> {
        self.messages.push(msg);
        if panel_open || from_local {
            return None;
        }
        self.unread += 1;
        Some(self.unread)
    }

    /// Reset the unread counter. Returns true if it was non-zero.
    pub fn mark_read(&mut self) -> bool {
        std::mem::replace(&mut self.unread, 0) > 0
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn unread(&self) -> u32 {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
