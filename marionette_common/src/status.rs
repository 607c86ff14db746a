//! Playback status and alert types.
//!
//! Shared contract between the sequencing engine and its consumers
//! (the CLI binary, and whatever API layer sits above it). All enums use
//! `#[repr(u8)]` for compact layout; alerts are a bitflag word so a status
//! query is a copy, never an allocation.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Lifecycle state of one playback.
///
/// `Stopped` and `Completed` are terminal for a given playback; replaying
/// creates a fresh state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum PlaybackStatus {
    /// No playback loaded.
    #[default]
    Idle = 0,
    /// Ticking and dispatching positions.
    Running = 1,
    /// Frozen at an elapsed offset; ticks are skipped.
    Paused = 2,
    /// Cancelled by an operator, a fault, or emergency stop.
    Stopped = 3,
    /// Reached the end of a non-looping sequence.
    Completed = 4,
}

impl PlaybackStatus {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Running),
            2 => Some(Self::Paused),
            3 => Some(Self::Stopped),
            4 => Some(Self::Completed),
            _ => None,
        }
    }

    /// True for states that end a playback permanently.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed)
    }
}

bitflags! {
    /// Unacknowledged alert conditions surfaced by `status()`.
    ///
    /// Set by the tick task and the emergency path; cleared only by an
    /// explicit operator acknowledgement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AlertFlags: u16 {
        /// A tick-path validation was rejected for at least one channel.
        const VALIDATION_REJECTED = 0x0001;
        /// The sink failed a write on at least one channel.
        const SINK_CHANNEL_FAULT  = 0x0002;
        /// Consecutive all-channel sink failures; playback was stopped.
        const SINK_COMM_LOST      = 0x0004;
        /// Emergency stop latch is (or was) active.
        const EMERGENCY_ACTIVE    = 0x0008;
        /// The tick task terminated abnormally; channels hold last position.
        const SEQUENCER_FAULT     = 0x0010;
        /// At least one tick exceeded its period budget.
        const TICK_OVERRUN        = 0x0020;
    }
}

impl Default for AlertFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// O(1) per-playback tick timing summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TickStats {
    /// Total ticks executed.
    pub ticks: u64,
    /// Last tick body duration [µs].
    pub last_tick_us: u64,
    /// Maximum tick body duration [µs].
    pub max_tick_us: u64,
    /// Average tick body duration [µs].
    pub avg_tick_us: u64,
    /// Ticks that exceeded the frame period.
    pub overruns: u64,
}

/// Point-in-time view of the engine, readable without touching the tick task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Last known playback state.
    pub status: PlaybackStatus,
    /// Name of the active (or last) sequence.
    pub sequence: Option<String>,
    /// Elapsed playback time [s] at the last update.
    pub elapsed_s: f64,
    /// Completed loop iterations of the active sequence.
    pub loops_completed: u32,
    /// Whether the emergency latch is currently set.
    pub emergency_active: bool,
    /// Unacknowledged alerts.
    pub alerts: AlertFlags,
    /// Tick timing summary for the active (or last) playback.
    pub stats: TickStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_u8() {
        for status in [
            PlaybackStatus::Idle,
            PlaybackStatus::Running,
            PlaybackStatus::Paused,
            PlaybackStatus::Stopped,
            PlaybackStatus::Completed,
        ] {
            assert_eq!(PlaybackStatus::from_u8(status as u8), Some(status));
        }
        assert_eq!(PlaybackStatus::from_u8(5), None);
    }

    #[test]
    fn terminal_states() {
        assert!(PlaybackStatus::Stopped.is_terminal());
        assert!(PlaybackStatus::Completed.is_terminal());
        assert!(!PlaybackStatus::Running.is_terminal());
        assert!(!PlaybackStatus::Paused.is_terminal());
        assert!(!PlaybackStatus::Idle.is_terminal());
    }

    #[test]
    fn alerts_accumulate_and_clear() {
        let mut alerts = AlertFlags::default();
        assert!(alerts.is_empty());

        alerts |= AlertFlags::SINK_CHANNEL_FAULT;
        alerts |= AlertFlags::TICK_OVERRUN;
        assert!(alerts.contains(AlertFlags::SINK_CHANNEL_FAULT));
        assert!(!alerts.contains(AlertFlags::EMERGENCY_ACTIVE));

        alerts = AlertFlags::empty();
        assert!(alerts.is_empty());
    }
}
