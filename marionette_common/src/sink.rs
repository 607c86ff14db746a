//! Actuator sink trait and error types.
//!
//! This module defines:
//! - `ActuatorSink` trait - Interface for pluggable actuator backends
//! - `ActuatorError` enum - Error types for dispatch operations
//! - `SimulatedSink` - In-memory backend for the binary and tests
//!
//! The serial protocol to the physical servo controller lives behind this
//! trait; the sequencer only ever sees validated `(channel, position)` pairs.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::trace;

/// Error types for actuator dispatch.
#[derive(Debug, Clone, Error)]
pub enum ActuatorError {
    /// The transport reports the channel is not present/connected.
    #[error("channel {0} not connected")]
    Disconnected(u8),

    /// A write to the transport failed.
    #[error("write failed on channel {channel_id}: {reason}")]
    WriteFailed { channel_id: u8, reason: String },

    /// The transport did not respond within its deadline.
    #[error("transport timeout")]
    Timeout,
}

/// Trait defining the interface for actuator backends.
///
/// The sequencer calls `set_channel_position` once per channel per tick and
/// treats any error as non-fatal for that channel. Implementations must not
/// block longer than one tick period under normal operation.
///
/// # Timing Contracts
///
/// | Operation | Max Duration | RT Constraint |
/// |-----------|--------------|---------------|
/// | `set_channel_position()` | one tick period | **HARD** |
/// | `shutdown()` | 1 second | None (post-playback) |
pub trait ActuatorSink: Send {
    /// Returns the backend's unique identifier (e.g., "simulation", "maestro-serial").
    fn name(&self) -> &'static str;

    /// Command one channel to a pulse-width position [µs].
    ///
    /// The position has already passed the safety validator; the backend
    /// applies no policy of its own.
    fn set_channel_position(&mut self, channel_id: u8, position_us: f64)
    -> Result<(), ActuatorError>;

    /// Graceful shutdown of the backend.
    ///
    /// Default implementation does nothing (for transports without teardown).
    fn shutdown(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

/// In-memory actuator backend.
///
/// Records the last commanded position per channel plus a full write log,
/// with per-channel and whole-transport failure injection for exercising the
/// sequencer's fault isolation paths.
#[derive(Debug, Default)]
pub struct SimulatedSink {
    last_position: BTreeMap<u8, f64>,
    write_log: Vec<(u8, f64)>,
    failing_channels: Vec<u8>,
    fail_all: bool,
}

impl SimulatedSink {
    /// Create a healthy simulated sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last position commanded on a channel, if any write succeeded.
    pub fn last_position(&self, channel_id: u8) -> Option<f64> {
        self.last_position.get(&channel_id).copied()
    }

    /// All successful writes in dispatch order.
    pub fn write_log(&self) -> &[(u8, f64)] {
        &self.write_log
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.write_log.len()
    }

    /// Inject a permanent fault on one channel.
    pub fn fail_channel(&mut self, channel_id: u8) {
        if !self.failing_channels.contains(&channel_id) {
            self.failing_channels.push(channel_id);
        }
    }

    /// Inject total transport loss (every write fails).
    pub fn fail_all(&mut self, failing: bool) {
        self.fail_all = failing;
    }
}

impl ActuatorSink for SimulatedSink {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn set_channel_position(
        &mut self,
        channel_id: u8,
        position_us: f64,
    ) -> Result<(), ActuatorError> {
        if self.fail_all {
            return Err(ActuatorError::Timeout);
        }
        if self.failing_channels.contains(&channel_id) {
            return Err(ActuatorError::Disconnected(channel_id));
        }
        trace!(channel = channel_id, position_us, "sim write");
        self.last_position.insert(channel_id, position_us);
        self.write_log.push((channel_id, position_us));
        Ok(())
    }
}
