//! Control commands into the tick task.
//!
//! The control plane never touches playback state directly: it sends
//! commands over an mpsc channel that the tick task drains at its next
//! wake, which is also what guarantees `stop()` lands before the next
//! tick executes. The emergency path deliberately does NOT go through
//! here — it writes hardware directly via the safety validator.

use crate::sequence::Sequence;
use marionette_common::channel::ChannelConfigError;
use std::sync::Arc;
use thiserror::Error;

/// Commands accepted by the tick task.
#[derive(Debug)]
pub enum ControlCommand {
    /// Start playing a compiled sequence (last-writer-wins).
    Play(Arc<Sequence>),
    /// Freeze the active playback.
    Pause,
    /// Continue a paused playback.
    Resume,
    /// Cancel the active playback.
    Stop,
    /// Terminate the tick task (engine shutdown).
    Shutdown,
}

/// Errors returned across the control surface.
///
/// Nothing panics or throws across this boundary; every control operation
/// yields a value.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Named sequence is not in the library.
    #[error("unknown sequence '{0}'")]
    UnknownSequence(String),

    /// Operation requires an active (running or paused) playback.
    #[error("no active playback")]
    NotActive,

    /// Operation requires a running playback.
    #[error("no playback is running")]
    NotRunning,

    /// Operation requires a paused playback.
    #[error("playback is not paused")]
    NotPaused,

    /// Emergency latch is set; reset before commanding motion.
    #[error("emergency stop active; operator reset required")]
    EmergencyActive,

    /// A channel targeted by the operation is part of the active playback.
    #[error("channel {0} is in use by the active playback")]
    ChannelBusy(u8),

    /// The tick task is gone (shutdown or crashed).
    #[error("sequencer task is not available")]
    EngineDown,

    /// Channel table operation failed.
    #[error(transparent)]
    Channel(#[from] ChannelConfigError),
}
