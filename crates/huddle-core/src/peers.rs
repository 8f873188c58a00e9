//! Remote participants.
//!
//! The session only sees remote attendees through [`RemotePeerSource`].
//! [`SimulatedPeers`] is the stand-in used until a real transport exists:
//! a fixed roster plus a timer that elects a random unmuted speaker in
//! place of voice-activity detection.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;

use crate::participants::{Participant, Role};

/// Default speaker election period.
pub const SPEAKER_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub enum PeerChange {
    Joined(Participant),
    Left(String),
    Updated(Participant),
    ActiveSpeaker(Option<String>),
}

pub trait PeerChangeListener: Send + Sync {
    fn on_change(&self, change: PeerChange);
}

/// Source of remote participants and of the current speaker.
pub trait RemotePeerSource: Send + Sync {
    fn participants(&self) -> Vec<Participant>;
    fn active_speaker(&self) -> Option<String>;
    fn on_participant_change(&self, listener: Arc<dyn PeerChangeListener>);
    /// Begin producing changes. Called once the session is mounted.
    fn start(&self) {}
    /// Stop background work. Must be idempotent.
    fn stop(&self) {}
}

/// Pick a speaker among `candidates`, or `None` when nobody may speak.
pub fn elect_speaker<R: rand::Rng + ?Sized>(
    candidates: &[&Participant],
    rng: &mut R,
) -> Option<String> {
    candidates.choose(rng).map(|p| p.id.clone())
}

struct PeersInner {
    roster: Mutex<Vec<Participant>>,
    speaker: Mutex<Option<String>>,
    listeners: RwLock<Vec<Arc<dyn PeerChangeListener>>>,
    rng: Mutex<StdRng>,
}

impl PeersInner {
    fn notify(&self, change: PeerChange) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_change(change.clone());
        }
    }

    fn elect(&self) {
        let elected = {
            let roster = self.roster.lock().unwrap_or_else(PoisonError::into_inner);
            let candidates: Vec<&Participant> = roster
                .iter()
                .filter(|p| !p.is_muted && !p.is_local)
                .collect();
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            elect_speaker(&candidates, &mut *rng)
        };

        {
            let mut speaker = self.speaker.lock().unwrap_or_else(PoisonError::into_inner);
            if *speaker == elected {
                return;
            }
            speaker.clone_from(&elected);
        }
        {
            let mut roster = self.roster.lock().unwrap_or_else(PoisonError::into_inner);
            for p in roster.iter_mut() {
                p.is_speaking = Some(&p.id) == elected.as_ref();
            }
        }
        tracing::debug!(speaker = ?elected, "simulated speaker elected");
        self.notify(PeerChange::ActiveSpeaker(elected));
    }
}

pub struct SimulatedPeers {
    inner: Arc<PeersInner>,
    interval: Duration,
    election: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedPeers {
    pub fn new(roster: Vec<Participant>, interval: Duration) -> Self {
        Self::with_rng(roster, interval, StdRng::from_entropy())
    }

    /// Deterministic elections for tests and demos.
    pub fn seeded(roster: Vec<Participant>, interval: Duration, seed: u64) -> Self {
        Self::with_rng(roster, interval, StdRng::seed_from_u64(seed))
    }

    fn with_rng(roster: Vec<Participant>, interval: Duration, rng: StdRng) -> Self {
        Self {
            inner: Arc::new(PeersInner {
                roster: Mutex::new(roster),
                speaker: Mutex::new(None),
                listeners: RwLock::new(Vec::new()),
                rng: Mutex::new(rng),
            }),
            interval,
            election: Mutex::new(None),
        }
    }

    /// A small mixed-role meeting. Sarah and Marcus have their cameras on.
    pub fn demo_roster() -> Vec<Participant> {
        vec![
            Participant {
                is_video_off: false,
                ..Participant::remote("sarah", "Sarah Chen", Role::Host)
            },
            Participant {
                is_video_off: false,
                ..Participant::remote("marcus", "Marcus Johnson", Role::Presenter)
            },
            Participant {
                is_muted: true,
                ..Participant::remote("priya", "Priya Patel", Role::Attendee)
            },
            Participant::remote("tom", "Tom Becker", Role::Guest),
        ]
    }

    pub fn join(&self, participant: Participant) {
        {
            let mut roster = self.inner.roster.lock().unwrap_or_else(PoisonError::into_inner);
            if roster.iter().any(|p| p.id == participant.id) {
                return;
            }
            roster.push(participant.clone());
        }
        tracing::info!(participant = %participant.id, "simulated participant joined");
        self.inner.notify(PeerChange::Joined(participant));
    }

    pub fn leave(&self, id: &str) {
        let removed = {
            let mut roster = self.inner.roster.lock().unwrap_or_else(PoisonError::into_inner);
            let before = roster.len();
            roster.retain(|p| p.id != id);
            roster.len() != before
        };
        if !removed {
            return;
        }
        {
            let mut speaker = self.inner.speaker.lock().unwrap_or_else(PoisonError::into_inner);
            if speaker.as_deref() == Some(id) {
                *speaker = None;
            }
        }
        tracing::info!(participant = %id, "simulated participant left");
        self.inner.notify(PeerChange::Left(id.to_string()));
    }

    /// Muting the current speaker also ends their turn.
    pub fn set_muted(&self, id: &str, muted: bool) {
        let silenced = muted && {
            let mut speaker = self.inner.speaker.lock().unwrap_or_else(PoisonError::into_inner);
            let current = speaker.as_deref() == Some(id);
            if current {
                *speaker = None;
            }
            current
        };
        let updated = {
            let mut roster = self.inner.roster.lock().unwrap_or_else(PoisonError::into_inner);
            roster.iter_mut().find(|p| p.id == id).map(|p| {
                p.is_muted = muted;
                if silenced {
                    p.is_speaking = false;
                }
                p.clone()
            })
        };
        if let Some(p) = updated {
            self.inner.notify(PeerChange::Updated(p));
        }
        if silenced {
            tracing::debug!(participant = %id, "speaker muted");
            self.inner.notify(PeerChange::ActiveSpeaker(None));
        }
    }

    /// Run one election immediately.
    pub fn elect_now(&self) {
        self.inner.elect();
    }
}

impl RemotePeerSource for SimulatedPeers {
    fn participants(&self) -> Vec<Participant> {
        self.inner
            .roster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn active_speaker(&self) -> Option<String> {
        self.inner
            .speaker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn on_participant_change(&self, listener: Arc<dyn PeerChangeListener>) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn start(&self) {
        let mut election = self.election.lock().unwrap_or_else(PoisonError::into_inner);
        if election.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let period = self.interval;
        *election = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                inner.elect();
            }
        }));
        tracing::debug!(interval_ms = period.as_millis() as u64, "speaker election started");
    }

    fn stop(&self) {
        if let Some(handle) = self
            .election
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            tracing::debug!("speaker election stopped");
        }
    }
}

impl Drop for SimulatedPeers {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        changes: Mutex<Vec<PeerChange>>,
    }

    impl PeerChangeListener for Recorder {
        fn on_change(&self, change: PeerChange) {
            self.changes.lock().unwrap().push(change);
        }
    }

    struct Counter(AtomicUsize);

    impl PeerChangeListener for Counter {
        fn on_change(&self, change: PeerChange) {
            if matches!(change, PeerChange::ActiveSpeaker(_)) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn election_skips_muted_and_local() {
        let mut rng = StdRng::seed_from_u64(7);
        let local = Participant::local("me", "Me", Role::Host);
        let muted = Participant {
            is_muted: true,
            ..Participant::remote("m", "Muted", Role::Attendee)
        };
        let open = Participant::remote("o", "Open", Role::Attendee);
        let roster = [&local, &muted, &open];
        let candidates: Vec<&Participant> = roster
            .iter()
            .copied()
            .filter(|p| !p.is_muted && !p.is_local)
            .collect();
        for _ in 0..20 {
            assert_eq!(elect_speaker(&candidates, &mut rng).as_deref(), Some("o"));
        }
        assert_eq!(elect_speaker(&[], &mut rng), None);
    }

    #[test]
    fn elect_now_marks_single_speaker() {
        let peers = SimulatedPeers::seeded(SimulatedPeers::demo_roster(), SPEAKER_INTERVAL, 1);
        peers.elect_now();
        let speaker = peers.active_speaker().expect("someone speaks");
        assert_ne!(speaker, "priya");
        let speaking: Vec<_> = peers
            .participants()
            .into_iter()
            .filter(|p| p.is_speaking)
            .map(|p| p.id)
            .collect();
        assert_eq!(speaking, vec![speaker]);
    }

    #[test]
    fn join_leave_and_mute_notify_listeners() {
        let peers = SimulatedPeers::seeded(Vec::new(), SPEAKER_INTERVAL, 1);
        let recorder = Arc::new(Recorder {
            changes: Mutex::new(Vec::new()),
        });
        peers.on_participant_change(recorder.clone());

        peers.join(Participant::remote("a", "Ann", Role::Guest));
        peers.join(Participant::remote("a", "Ann", Role::Guest));
        peers.set_muted("a", true);
        peers.leave("a");
        peers.leave("a");

        let changes = recorder.changes.lock().unwrap();
        assert_eq!(changes.len(), 3);
        assert!(matches!(&changes[0], PeerChange::Joined(p) if p.id == "a"));
        assert!(matches!(&changes[1], PeerChange::Updated(p) if p.is_muted));
        assert!(matches!(&changes[2], PeerChange::Left(id) if id == "a"));
    }

    #[test]
    fn muting_the_speaker_ends_their_turn() {
        let roster = vec![Participant::remote("a", "Ann", Role::Guest)];
        let peers = SimulatedPeers::seeded(roster, SPEAKER_INTERVAL, 1);
        peers.elect_now();
        assert_eq!(peers.active_speaker().as_deref(), Some("a"));
        let recorder = Arc::new(Recorder {
            changes: Mutex::new(Vec::new()),
        });
        peers.on_participant_change(recorder.clone());

        peers.set_muted("a", true);

        assert_eq!(peers.active_speaker(), None);
        assert!(peers.participants().iter().all(|p| !p.is_speaking));
        let changes = recorder.changes.lock().unwrap();
        assert_eq!(changes.len(), 2);
        assert!(matches!(&changes[0], PeerChange::Updated(p) if p.is_muted && !p.is_speaking));
        assert!(matches!(&changes[1], PeerChange::ActiveSpeaker(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn election_timer_runs_until_stopped() {
        let roster = vec![
            Participant::remote("a", "Ann", Role::Guest),
            Participant::remote("b", "Ben", Role::Guest),
            Participant::remote("c", "Cy", Role::Guest),
        ];
        let peers = SimulatedPeers::seeded(roster, Duration::from_secs(1), 3);
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        peers.on_participant_change(counter.clone());
        peers.start();

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let during = counter.0.load(Ordering::SeqCst);
        assert!(during >= 1);

        peers.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), during);
    }
}
