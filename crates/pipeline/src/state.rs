//! Conversation state machine
//!
//! Single-owner finite state machine over the four conversation states.
//! Transitions are serialized by construction (one task applies events) and
//! recorded with strictly increasing timestamps. Illegal transitions are
//! dropped with a warning; they never crash the session.

use tokio::sync::watch;
use voice_orchestrator_core::monotonic_ns;

/// Global turn state of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Terminal once entered via emergency stop; also the pre-start state
    Idle,
    /// Waiting on the caller
    Listening,
    /// A turn is committed, generation in flight, no audio out yet
    Thinking,
    /// Outbound audio flowing
    Speaking,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::Listening => "listening",
            ConversationState::Thinking => "thinking",
            ConversationState::Speaking => "speaking",
        }
    }
}

/// Events the state machine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    SessionStart,
    UserStartedSpeaking,
    /// Turn-end detected; `has_text` is whether STT produced a transcript
    UserStoppedSpeaking { has_text: bool },
    /// A canned utterance (greeting, idle prompt) was committed for playback
    CannedUtteranceCommitted,
    FirstTtsAudio,
    /// LLM finished with no speakable content
    LlmFinishedSilent,
    TtsFinishedNatural,
    Interrupted,
    EmergencyStop,
}

impl StateEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateEvent::SessionStart => "session_start",
            StateEvent::UserStartedSpeaking => "user_started_speaking",
            StateEvent::UserStoppedSpeaking { .. } => "user_stopped_speaking",
            StateEvent::CannedUtteranceCommitted => "canned_utterance_committed",
            StateEvent::FirstTtsAudio => "first_tts_audio",
            StateEvent::LlmFinishedSilent => "llm_finished_silent",
            StateEvent::TtsFinishedNatural => "tts_finished_natural",
            StateEvent::Interrupted => "interrupted",
            StateEvent::EmergencyStop => "emergency_stop",
        }
    }
}

/// One recorded transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRecord {
    pub from: ConversationState,
    pub to: ConversationState,
    pub event: StateEvent,
    pub timestamp_ns: u64,
}

/// The state machine. Owned by the orchestrator's engine loop; observers
/// get a `watch` receiver.
pub struct StateMachine {
    state: ConversationState,
    terminal: bool,
    /// Inner voiced flag while LISTENING; not a state of its own
    voiced: bool,
    history: Vec<TransitionRecord>,
    publisher: watch::Sender<ConversationState>,
}

impl StateMachine {
    pub fn new() -> (Self, watch::Receiver<ConversationState>) {
        let (publisher, receiver) = watch::channel(ConversationState::Idle);
        (
            Self {
                state: ConversationState::Idle,
                terminal: false,
                voiced: false,
                history: Vec::new(),
                publisher,
            },
            receiver,
        )
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Apply an event. Returns the transition taken, or `None` when the
    /// event is a legal no-op or illegal in the current state.
    pub fn apply(&mut self, event: StateEvent) -> Option<TransitionRecord> {
        use ConversationState::*;
        use StateEvent::*;

        if self.terminal {
            tracing::warn!(event = event.as_str(), "event after emergency stop, dropped");
            return None;
        }

        let to = match (self.state, event) {
            (_, EmergencyStop) => {
                self.terminal = true;
                Some(Idle)
            }
            (Idle, SessionStart) => Some(Listening),
            (Listening, UserStartedSpeaking) => {
                // No transition; just remember the caller is voiced
                self.voiced = true;
                None
            }
            (Listening, UserStoppedSpeaking { has_text }) => {
                self.voiced = false;
                if has_text {
                    Some(Thinking)
                } else {
                    // Legal no-op: stay listening
                    None
                }
            }
            (Listening, CannedUtteranceCommitted) => Some(Thinking),
            (Thinking, FirstTtsAudio) => Some(Speaking),
            (Thinking, LlmFinishedSilent) => Some(Listening),
            (Thinking, Interrupted) => Some(Listening),
            (Speaking, TtsFinishedNatural) => Some(Listening),
            (Speaking, Interrupted) => Some(Listening),
            (from, event) => {
                tracing::warn!(
                    state = from.as_str(),
                    event = event.as_str(),
                    "illegal state transition dropped"
                );
                return None;
            }
        }?;

        let record = TransitionRecord {
            from: self.state,
            to,
            event,
            timestamp_ns: next_timestamp(self.history.last().map(|r| r.timestamp_ns)),
        };
        tracing::debug!(
            from = record.from.as_str(),
            to = record.to.as_str(),
            event = event.as_str(),
            "state transition"
        );
        self.state = to;
        self.history.push(record);
        let _ = self.publisher.send(to);
        Some(record)
    }
}

/// Strictly increasing even when the clock does not tick between events.
fn next_timestamp(previous: Option<u64>) -> u64 {
    let now = monotonic_ns();
    match previous {
        Some(prev) if now <= prev => prev + 1,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConversationState::*;
    use StateEvent::*;

    fn machine() -> StateMachine {
        StateMachine::new().0
    }

    #[test]
    fn test_happy_path() {
        let mut sm = machine();
        sm.apply(SessionStart);
        assert_eq!(sm.state(), Listening);
        sm.apply(UserStartedSpeaking);
        assert_eq!(sm.state(), Listening);
        sm.apply(UserStoppedSpeaking { has_text: true });
        assert_eq!(sm.state(), Thinking);
        sm.apply(FirstTtsAudio);
        assert_eq!(sm.state(), Speaking);
        sm.apply(TtsFinishedNatural);
        assert_eq!(sm.state(), Listening);
    }

    #[test]
    fn test_empty_utterance_stays_listening() {
        let mut sm = machine();
        sm.apply(SessionStart);
        assert!(sm.apply(UserStoppedSpeaking { has_text: false }).is_none());
        assert_eq!(sm.state(), Listening);
    }

    #[test]
    fn test_silent_llm_returns_to_listening() {
        let mut sm = machine();
        sm.apply(SessionStart);
        sm.apply(UserStoppedSpeaking { has_text: true });
        sm.apply(LlmFinishedSilent);
        assert_eq!(sm.state(), Listening);
    }

    #[test]
    fn test_interrupt_while_speaking() {
        let mut sm = machine();
        sm.apply(SessionStart);
        sm.apply(UserStoppedSpeaking { has_text: true });
        sm.apply(FirstTtsAudio);
        assert!(sm.apply(Interrupted).is_some());
        assert_eq!(sm.state(), Listening);
    }

    #[test]
    fn test_double_interrupt_transitions_once() {
        let mut sm = machine();
        sm.apply(SessionStart);
        sm.apply(UserStoppedSpeaking { has_text: true });
        sm.apply(FirstTtsAudio);

        assert!(sm.apply(Interrupted).is_some());
        // Second interrupt arrives 5 ms later: Listening has no Interrupted
        // transition, so it is dropped
        assert!(sm.apply(Interrupted).is_none());
        assert_eq!(sm.state(), Listening);

        let transitions: Vec<_> = sm
            .history()
            .iter()
            .filter(|r| r.event == Interrupted)
            .collect();
        assert_eq!(transitions.len(), 1);
    }

    #[test]
    fn test_emergency_stop_is_terminal() {
        let mut sm = machine();
        sm.apply(SessionStart);
        sm.apply(EmergencyStop);
        assert_eq!(sm.state(), Idle);
        assert!(sm.is_terminal());
        assert!(sm.apply(SessionStart).is_none());
        assert_eq!(sm.state(), Idle);
    }

    #[test]
    fn test_illegal_transition_dropped() {
        let mut sm = machine();
        sm.apply(SessionStart);
        assert!(sm.apply(FirstTtsAudio).is_none());
        assert_eq!(sm.state(), Listening);
    }

    #[test]
    fn test_timestamps_strictly_increasing() {
        let mut sm = machine();
        sm.apply(SessionStart);
        sm.apply(UserStoppedSpeaking { has_text: true });
        sm.apply(FirstTtsAudio);
        sm.apply(TtsFinishedNatural);
        let stamps: Vec<u64> = sm.history().iter().map(|r| r.timestamp_ns).collect();
        for pair in stamps.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_watch_publishes() {
        let (mut sm, rx) = StateMachine::new();
        sm.apply(SessionStart);
        assert_eq!(*rx.borrow(), Listening);
    }

    #[test]
    fn test_replay_determinism() {
        // The same event log always produces the same state sequence
        let events = [
            SessionStart,
            UserStartedSpeaking,
            UserStoppedSpeaking { has_text: true },
            FirstTtsAudio,
            Interrupted,
            UserStoppedSpeaking { has_text: true },
            FirstTtsAudio,
            TtsFinishedNatural,
        ];
        let run = |events: &[StateEvent]| {
            let mut sm = machine();
            let mut states = Vec::new();
            for &e in events {
                sm.apply(e);
                states.push(sm.state());
            }
            states
        };
        assert_eq!(run(&events), run(&events));
    }
}
