//! Channel limits table.
//!
//! Per-channel static configuration: hard pulse-width bounds, home and
//! emergency positions, and the speed/acceleration bytes forwarded to the
//! servo controller firmware. Loaded once at startup, mutable only through
//! explicit reconfiguration while the channel is idle.

use crate::consts::{MAX_CHANNELS, PULSE_CEIL_US, PULSE_FLOOR_US};
use serde::{Deserialize, Serialize};
use thiserror::Error;

fn default_true() -> bool {
    true
}

/// Error type for channel limit validation.
#[derive(Debug, Clone, Error)]
pub enum ChannelConfigError {
    /// Channel ID exceeds the compile-time channel bound.
    #[error("channel_id {0} out of range")]
    IdOutOfRange(u8),

    /// Two limit entries name the same channel.
    #[error("duplicate channel_id {0}")]
    DuplicateChannel(u8),

    /// `min_position_us >= max_position_us`.
    #[error("channel {channel_id}: min {min_us}µs must be below max {max_us}µs")]
    InvertedBounds {
        channel_id: u8,
        min_us: f64,
        max_us: f64,
    },

    /// A pulse bound falls outside the servo-electronics envelope.
    #[error("channel {channel_id}: {field} = {value}µs outside the pulse envelope")]
    PulseOutOfEnvelope {
        channel_id: u8,
        field: &'static str,
        value: f64,
    },

    /// Home or emergency position outside the channel's own [min, max].
    #[error("channel {channel_id}: {field} = {value}µs outside channel bounds")]
    PositionOutsideBounds {
        channel_id: u8,
        field: &'static str,
        value: f64,
    },

    /// A position value is NaN or infinite.
    #[error("channel {channel_id}: {field} is not a finite number")]
    NonFinite { channel_id: u8, field: &'static str },

    /// Lookup of a channel the table does not contain.
    #[error("unknown channel {0}")]
    UnknownChannel(u8),
}

/// Static limits for one actuator channel.
///
/// `max_speed` / `max_acceleration` are controller firmware bytes (0–255,
/// 0 = unlimited); the engine validates and forwards them but does not ramp
/// in software.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelLimits {
    /// Unique, stable channel identifier.
    pub channel_id: u8,
    /// Hard lower pulse-width bound [µs].
    pub min_position_us: f64,
    /// Hard upper pulse-width bound [µs].
    pub max_position_us: f64,
    /// Rest position commanded by homing [µs].
    pub home_position_us: f64,
    /// Position commanded on a safety trip [µs].
    pub emergency_position_us: f64,
    /// Firmware speed byte.
    #[serde(default)]
    pub max_speed: u8,
    /// Firmware acceleration byte.
    #[serde(default)]
    pub max_acceleration: u8,
    /// Administratively enabled for motion.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Administrative forbidden-zone override: hard-reject all motion.
    #[serde(default)]
    pub forbidden: bool,
}

impl ChannelLimits {
    /// Validate all invariants of a single entry.
    pub fn validate(&self) -> Result<(), ChannelConfigError> {
        let id = self.channel_id;
        if id as usize >= MAX_CHANNELS {
            return Err(ChannelConfigError::IdOutOfRange(id));
        }

        for (field, value) in [
            ("min_position_us", self.min_position_us),
            ("max_position_us", self.max_position_us),
            ("home_position_us", self.home_position_us),
            ("emergency_position_us", self.emergency_position_us),
        ] {
            if !value.is_finite() {
                return Err(ChannelConfigError::NonFinite {
                    channel_id: id,
                    field,
                });
            }
        }

        if self.min_position_us >= self.max_position_us {
            return Err(ChannelConfigError::InvertedBounds {
                channel_id: id,
                min_us: self.min_position_us,
                max_us: self.max_position_us,
            });
        }

        for (field, value) in [
            ("min_position_us", self.min_position_us),
            ("max_position_us", self.max_position_us),
        ] {
            if !(PULSE_FLOOR_US..=PULSE_CEIL_US).contains(&value) {
                return Err(ChannelConfigError::PulseOutOfEnvelope {
                    channel_id: id,
                    field,
                    value,
                });
            }
        }

        for (field, value) in [
            ("home_position_us", self.home_position_us),
            ("emergency_position_us", self.emergency_position_us),
        ] {
            if value < self.min_position_us || value > self.max_position_us {
                return Err(ChannelConfigError::PositionOutsideBounds {
                    channel_id: id,
                    field,
                    value,
                });
            }
        }

        Ok(())
    }

    /// Clamp a requested position into this channel's hard bounds.
    #[inline]
    pub fn clamp(&self, position_us: f64) -> f64 {
        position_us.clamp(self.min_position_us, self.max_position_us)
    }
}

/// Fixed-slot table of channel limits, indexed by channel ID.
///
/// Built once from validated configuration. Slot storage is a fixed array
/// so tick-path lookups are O(1) with no allocation.
#[derive(Debug, Clone)]
pub struct ChannelTable {
    slots: [Option<ChannelLimits>; MAX_CHANNELS],
    count: u8,
}

impl ChannelTable {
    /// Build a table from per-channel entries.
    ///
    /// Fails fast on the first invalid or duplicate entry; a table is
    /// either fully valid or not installed at all.
    pub fn from_limits(limits: &[ChannelLimits]) -> Result<Self, ChannelConfigError> {
        let mut slots = [None; MAX_CHANNELS];
        let mut count = 0u8;

        for entry in limits {
            entry.validate()?;
            let idx = entry.channel_id as usize;
            if slots[idx].is_some() {
                return Err(ChannelConfigError::DuplicateChannel(entry.channel_id));
            }
            slots[idx] = Some(*entry);
            count += 1;
        }

        Ok(Self { slots, count })
    }

    /// Number of configured channels.
    #[inline]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// True if no channels are configured.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Look up a channel's limits.
    #[inline]
    pub fn get(&self, channel_id: u8) -> Option<&ChannelLimits> {
        self.slots.get(channel_id as usize)?.as_ref()
    }

    /// Iterate over all configured channels in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelLimits> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Iterate over enabled channels only.
    pub fn iter_enabled(&self) -> impl Iterator<Item = &ChannelLimits> {
        self.iter().filter(|c| c.enabled)
    }

    /// Replace one channel's limits with a validated new entry.
    ///
    /// The entry must target an already-configured channel; reconfiguration
    /// never adds or removes channels at runtime.
    pub fn replace(&mut self, limits: ChannelLimits) -> Result<(), ChannelConfigError> {
        limits.validate()?;
        let slot = self
            .slots
            .get_mut(limits.channel_id as usize)
            .ok_or(ChannelConfigError::IdOutOfRange(limits.channel_id))?;
        if slot.is_none() {
            return Err(ChannelConfigError::UnknownChannel(limits.channel_id));
        }
        *slot = Some(limits);
        Ok(())
    }

    /// Set the administrative enable flag.
    pub fn set_enabled(&mut self, channel_id: u8, enabled: bool) -> Result<(), ChannelConfigError> {
        self.entry_mut(channel_id)?.enabled = enabled;
        Ok(())
    }

    /// Set the administrative forbidden-zone flag.
    pub fn set_forbidden(
        &mut self,
        channel_id: u8,
        forbidden: bool,
    ) -> Result<(), ChannelConfigError> {
        self.entry_mut(channel_id)?.forbidden = forbidden;
        Ok(())
    }

    fn entry_mut(&mut self, channel_id: u8) -> Result<&mut ChannelLimits, ChannelConfigError> {
        self.slots
            .get_mut(channel_id as usize)
            .and_then(Option::as_mut)
            .ok_or(ChannelConfigError::UnknownChannel(channel_id))
    }
}
