//! Playback state machine.
//!
//! Lifecycle of one playback: `Idle → Running → {Paused, Completed,
//! Stopped}`, `Paused → Running | Stopped`. Stopped and Completed are
//! terminal — replaying a sequence creates a fresh machine, and `play`
//! on the engine is last-writer-wins (the old playback is stopped first).

use marionette_common::status::PlaybackStatus;

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded — new state.
    Ok(PlaybackStatus),
    /// Transition rejected — reason.
    Rejected(&'static str),
}

/// Event that can drive a playback transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Start ticking.
    Play,
    /// Freeze at the current elapsed offset.
    Pause,
    /// Continue from the paused offset.
    Resume,
    /// Cancel (operator, fault, or emergency).
    Stop,
    /// Non-looping sequence reached its end.
    Complete,
}

/// Holder of the current playback state.
#[derive(Debug, Clone)]
pub struct PlaybackMachine {
    state: PlaybackStatus,
}

impl PlaybackMachine {
    /// New machine in Idle.
    pub const fn new() -> Self {
        Self {
            state: PlaybackStatus::Idle,
        }
    }

    /// Current state.
    #[inline]
    pub const fn state(&self) -> PlaybackStatus {
        self.state
    }

    /// Whether ticks should execute.
    #[inline]
    pub const fn is_running(&self) -> bool {
        matches!(self.state, PlaybackStatus::Running)
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: PlaybackEvent) -> TransitionResult {
        use PlaybackEvent::*;
        use PlaybackStatus::*;

        let next = match (self.state, event) {
            (Idle, Play) => Running,

            (Running, Pause) => Paused,
            (Running, Stop) => Stopped,
            (Running, Complete) => Completed,

            (Paused, Resume) => Running,
            (Paused, Stop) => Stopped,

            _ => {
                return TransitionResult::Rejected(invalid_transition_reason(self.state, event));
            }
        };

        self.state = next;
        TransitionResult::Ok(next)
    }

    /// Force Stopped (emergency path and fault escalation).
    #[inline]
    pub fn force_stop(&mut self) {
        self.state = PlaybackStatus::Stopped;
    }
}

impl Default for PlaybackMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_transition_reason(state: PlaybackStatus, event: PlaybackEvent) -> &'static str {
    use PlaybackEvent::*;
    use PlaybackStatus::*;
    match (state, event) {
        (Stopped | Completed, _) => "playback is terminal; start a new playback",
        (Idle, _) => "no playback loaded",
        (Running, Play) => "already running",
        (Running, Resume) => "not paused",
        (Running, _) => unreachable!("valid running transitions are handled before reaching here"),
        (Paused, Pause) => "already paused",
        (Paused, _) => "paused: only resume or stop allowed",
    }
}
