//! Safety validation: the gate between computed targets and the sink.
//!
//! Every position the sequencer computes passes through here before
//! dispatch. Out-of-range values are clamped rather than rejected (safe
//! degraded motion beats no motion); administrative flags and the emergency
//! latch hard-reject. The validator is also the emergency-stop choke point:
//! tripping it writes every enabled channel's emergency position directly,
//! bypassing the tick scheduler entirely.

use marionette_common::channel::{ChannelConfigError, ChannelLimits, ChannelTable};
use marionette_common::sink::{ActuatorError, ActuatorSink};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{error, info, warn};

/// Why a requested position was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectionReason {
    /// Emergency latch is set; all motion is blocked until operator reset.
    #[error("emergency stop active")]
    EmergencyActive,

    /// No limits configured for this channel.
    #[error("unknown channel {0}")]
    UnknownChannel(u8),

    /// Channel administratively disabled.
    #[error("channel {0} is disabled")]
    ChannelDisabled(u8),

    /// Channel flagged as in a forbidden zone; motion hard-rejected.
    #[error("channel {0} is flagged forbidden")]
    ForbiddenZone(u8),
}

/// Outcome of an emergency trip: which channels received their emergency
/// position and which writes failed.
#[derive(Debug, Default)]
pub struct EmergencyReport {
    /// Channels successfully commanded to `emergency_position_us`.
    pub commanded: Vec<u8>,
    /// Channels whose emergency write failed, with the sink error.
    pub failed: Vec<(u8, ActuatorError)>,
}

/// The clamp/reject gate plus the emergency latch.
///
/// Shared between the tick task and the control plane; the limits table
/// sits behind a `RwLock` (tick reads, reconfiguration writes) and the
/// latch is a bare atomic so tripping never waits on a lock.
#[derive(Debug)]
pub struct SafetyValidator {
    table: RwLock<ChannelTable>,
    emergency: AtomicBool,
}

impl SafetyValidator {
    /// Wrap a validated channel table.
    pub fn new(table: ChannelTable) -> Self {
        Self {
            table: RwLock::new(table),
            emergency: AtomicBool::new(false),
        }
    }

    /// Validate one requested position.
    ///
    /// Order: emergency latch → channel lookup → disabled → clamp into
    /// `[min, max]` → forbidden-zone override. Returns the clamped position
    /// on success.
    pub fn validate(&self, channel_id: u8, requested_us: f64) -> Result<f64, RejectionReason> {
        if self.emergency.load(Ordering::Acquire) {
            return Err(RejectionReason::EmergencyActive);
        }

        let table = self.read_table();
        let limits = table
            .get(channel_id)
            .ok_or(RejectionReason::UnknownChannel(channel_id))?;

        if !limits.enabled {
            return Err(RejectionReason::ChannelDisabled(channel_id));
        }

        let clamped = limits.clamp(requested_us);

        if limits.forbidden {
            return Err(RejectionReason::ForbiddenZone(channel_id));
        }

        Ok(clamped)
    }

    /// Whether the emergency latch is currently set.
    #[inline]
    pub fn emergency_active(&self) -> bool {
        self.emergency.load(Ordering::Acquire)
    }

    /// Trip the emergency stop.
    ///
    /// Sets the latch first (so any concurrent tick is rejected from this
    /// instant), then commands every enabled channel to its configured
    /// emergency position. Per-channel isolation holds even here: one
    /// failed write never blocks the remaining channels.
    pub fn trip_emergency(&self, sink: &mut dyn ActuatorSink) -> EmergencyReport {
        self.emergency.store(true, Ordering::Release);
        warn!("emergency stop tripped");

        let mut report = EmergencyReport::default();
        let table = self.read_table();
        for limits in table.iter_enabled() {
            match sink.set_channel_position(limits.channel_id, limits.emergency_position_us) {
                Ok(()) => report.commanded.push(limits.channel_id),
                Err(e) => {
                    error!(channel = limits.channel_id, error = %e, "emergency write failed");
                    report.failed.push((limits.channel_id, e));
                }
            }
        }
        report
    }

    /// Clear the emergency latch.
    ///
    /// Requires an explicit operator confirmation; returns whether the
    /// latch was actually cleared.
    pub fn reset_emergency(&self, confirmed: bool) -> bool {
        if !confirmed {
            warn!("emergency reset refused: not confirmed");
            return false;
        }
        let was_active = self.emergency.swap(false, Ordering::AcqRel);
        if was_active {
            info!("emergency latch cleared by operator");
        }
        was_active
    }

    /// Read access to the limits table.
    pub fn with_table<R>(&self, f: impl FnOnce(&ChannelTable) -> R) -> R {
        f(&self.read_table())
    }

    /// Replace one channel's limits (caller guarantees the channel is idle).
    pub fn replace_limits(&self, limits: ChannelLimits) -> Result<(), ChannelConfigError> {
        self.write_table(|t| t.replace(limits))
    }

    /// Set a channel's administrative enable flag.
    pub fn set_channel_enabled(
        &self,
        channel_id: u8,
        enabled: bool,
    ) -> Result<(), ChannelConfigError> {
        self.write_table(|t| t.set_enabled(channel_id, enabled))
    }

    /// Set a channel's forbidden-zone flag.
    pub fn set_channel_forbidden(
        &self,
        channel_id: u8,
        forbidden: bool,
    ) -> Result<(), ChannelConfigError> {
        self.write_table(|t| t.set_forbidden(channel_id, forbidden))
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, ChannelTable> {
        self.table.read().unwrap_or_else(|poison| poison.into_inner())
    }

    fn write_table<R>(&self, f: impl FnOnce(&mut ChannelTable) -> R) -> R {
        let mut guard = self
            .table
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_common::sink::SimulatedSink;

    fn limits(channel_id: u8) -> ChannelLimits {
        ChannelLimits {
            channel_id,
            min_position_us: 1000.0,
            max_position_us: 2000.0,
            home_position_us: 1500.0,
            emergency_position_us: 1200.0,
            max_speed: 0,
            max_acceleration: 0,
            enabled: true,
            forbidden: false,
        }
    }

    fn validator() -> SafetyValidator {
        let table = ChannelTable::from_limits(&[limits(0), limits(1)]).unwrap();
        SafetyValidator::new(table)
    }

    #[test]
    fn clamps_out_of_range_values() {
        let v = validator();
        assert_eq!(v.validate(0, 2500.0), Ok(2000.0));
        assert_eq!(v.validate(0, 500.0), Ok(1000.0));
        assert_eq!(v.validate(0, 1750.0), Ok(1750.0));
    }

    #[test]
    fn clamp_is_idempotent() {
        let v = validator();
        for requested in [-100.0, 500.0, 1500.0, 2500.0, 1e9] {
            let once = v.validate(0, requested).unwrap();
            assert_eq!(v.validate(0, once), Ok(once));
        }
    }

    #[test]
    fn unknown_channel_rejected() {
        let v = validator();
        assert_eq!(
            v.validate(9, 1500.0),
            Err(RejectionReason::UnknownChannel(9))
        );
    }

    #[test]
    fn disabled_channel_rejected() {
        let v = validator();
        v.set_channel_enabled(1, false).unwrap();
        assert_eq!(
            v.validate(1, 1500.0),
            Err(RejectionReason::ChannelDisabled(1))
        );
        // Channel 0 unaffected.
        assert!(v.validate(0, 1500.0).is_ok());
    }

    #[test]
    fn forbidden_zone_rejects_any_value() {
        let v = validator();
        v.set_channel_forbidden(0, true).unwrap();
        for requested in [1000.0, 1500.0, 2000.0] {
            assert_eq!(
                v.validate(0, requested),
                Err(RejectionReason::ForbiddenZone(0))
            );
        }
        v.set_channel_forbidden(0, false).unwrap();
        assert!(v.validate(0, 1500.0).is_ok());
    }

    #[test]
    fn emergency_trip_commands_enabled_channels() {
        let v = validator();
        v.set_channel_enabled(1, false).unwrap();

        let mut sink = SimulatedSink::new();
        let report = v.trip_emergency(&mut sink);

        assert_eq!(report.commanded, vec![0]);
        assert!(report.failed.is_empty());
        assert_eq!(sink.last_position(0), Some(1200.0));
        assert_eq!(sink.last_position(1), None);
    }

    #[test]
    fn emergency_blocks_validation_until_confirmed_reset() {
        let v = validator();
        let mut sink = SimulatedSink::new();
        v.trip_emergency(&mut sink);

        assert_eq!(v.validate(0, 1500.0), Err(RejectionReason::EmergencyActive));
        assert_eq!(v.validate(1, 1500.0), Err(RejectionReason::EmergencyActive));

        // Unconfirmed reset is refused.
        assert!(!v.reset_emergency(false));
        assert!(v.emergency_active());
        assert_eq!(v.validate(0, 1500.0), Err(RejectionReason::EmergencyActive));

        assert!(v.reset_emergency(true));
        assert!(!v.emergency_active());
        assert_eq!(v.validate(0, 1500.0), Ok(1500.0));
    }

    #[test]
    fn emergency_write_failures_are_isolated() {
        let v = validator();
        let mut sink = SimulatedSink::new();
        sink.fail_channel(0);

        let report = v.trip_emergency(&mut sink);
        assert_eq!(report.commanded, vec![1]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 0);
        // Channel 1 still received its emergency position.
        assert_eq!(sink.last_position(1), Some(1200.0));
    }

    #[test]
    fn reconfiguration_replaces_limits() {
        let v = validator();
        let mut new_limits = limits(0);
        new_limits.max_position_us = 1800.0;
        v.replace_limits(new_limits).unwrap();
        assert_eq!(v.validate(0, 2500.0), Ok(1800.0));
    }
}
