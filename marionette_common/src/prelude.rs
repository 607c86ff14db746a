//! Prelude module for common re-exports.
//!
//! Consumers can `use marionette_common::prelude::*;` and get the most
//! important types without listing individual paths.

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{DEFAULT_FRAME_RATE_HZ, MAX_CHANNELS};

// ─── Channels ───────────────────────────────────────────────────────
pub use crate::channel::{ChannelConfigError, ChannelLimits, ChannelTable};

// ─── Actuator Boundary ─────────────────────────────────────────────
pub use crate::sink::{ActuatorError, ActuatorSink, SimulatedSink};

// ─── Status ─────────────────────────────────────────────────────────
pub use crate::status::{AlertFlags, PlaybackStatus, StatusSnapshot, TickStats};

/// Default frame period as Duration (50 Hz).
pub const DEFAULT_FRAME_PERIOD: Duration =
    Duration::from_micros(1_000_000 / DEFAULT_FRAME_RATE_HZ as u64);
