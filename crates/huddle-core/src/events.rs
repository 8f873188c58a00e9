use std::sync::{Arc, PoisonError, RwLock};

use crate::chat::ChatMessage;
use crate::controls::VirtualBackgroundMode;
use crate::errors::CameraError;
use crate::layout::LayoutSpec;
use crate::panels::SidePanel;
use crate::participants::Participant;

/// Events emitted by the session to UI listeners.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ParticipantJoined(Participant),
    ParticipantLeft(String), // participant id
    ParticipantUpdated(Participant),
    ActiveSpeakerChanged(Option<String>),
    ChatMessageReceived(ChatMessage),
    /// Outbound message for an optional external persistence layer.
    ChatMessageSent(ChatMessage),
    UnreadCountChanged(u32),
    CameraError(CameraError),
    /// Stream id now attached to the local tile, if any.
    LocalStreamChanged(Option<String>),
    ScreenShareChanged(bool),
    ScreenShareFailed(String),
    PanelChanged(Option<SidePanel>),
    PinChanged(Option<String>),
    VirtualBackgroundChanged(VirtualBackgroundMode),
    ClockTick { elapsed_seconds: u64 },
    ControlsVisibilityChanged(bool),
    LayoutChanged(LayoutSpec),
    Left,
}

/// Trait for receiving events from the session.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    impl SessionEventListener for CountingListener {
        fn on_event(&self, _event: SessionEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn emitter_dispatches_to_multiple_listeners() {
        let emitter = EventEmitter::new();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        emitter.add_listener(Arc::new(CountingListener { count: count1.clone() }));
        emitter.add_listener(Arc::new(CountingListener { count: count2.clone() }));

        emitter.emit(SessionEvent::Left);

        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    struct EventCapture {
        events: Arc<std::sync::Mutex<Vec<SessionEvent>>>,
    }

    impl SessionEventListener for EventCapture {
        fn on_event(&self, event: SessionEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn emitter_delivers_correct_events() {
        let emitter = EventEmitter::new();
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        emitter.add_listener(Arc::new(EventCapture { events: events.clone() }));

        emitter.emit(SessionEvent::ParticipantLeft("p1".to_string()));

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 1);
        match &captured[0] {
            SessionEvent::ParticipantLeft(id) => assert_eq!(id, "p1"),
            _ => panic!("expected ParticipantLeft"),
        }
    }
}
