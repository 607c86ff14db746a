//! System-wide constants for the Marionette workspace.
//!
//! Single source of truth for channel limits and timing defaults.
//! Imported by all crates — no duplication permitted.

use static_assertions::const_assert;

/// Maximum number of actuator channels the engine addresses.
///
/// Channel IDs are `0..MAX_CHANNELS`. The limits table and per-tick
/// snapshot are sized by this bound at compile time.
pub const MAX_CHANNELS: usize = 32;

/// Default playback tick frequency [Hz].
pub const DEFAULT_FRAME_RATE_HZ: u32 = 50;

/// Highest frame rate a sequence may request [Hz].
pub const MAX_FRAME_RATE_HZ: u32 = 200;

/// Consecutive all-channel dispatch failures before playback is stopped.
pub const DEFAULT_SINK_FAILURE_LIMIT: u32 = 5;

/// Lowest pulse width any channel limit may name [µs].
///
/// Outside 500–2500 µs hobby servo electronics are off-datasheet; a config
/// naming such a bound is malformed, not merely aggressive.
pub const PULSE_FLOOR_US: f64 = 500.0;

/// Highest pulse width any channel limit may name [µs].
pub const PULSE_CEIL_US: f64 = 2500.0;

/// Default configuration directory path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/marionette/config";

// Channel IDs travel as u8 throughout the engine.
const_assert!(MAX_CHANNELS <= u8::MAX as usize + 1);
// The snapshot fits comfortably on the tick task's stack.
const_assert!(MAX_CHANNELS <= 256);
