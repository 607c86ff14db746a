//! Animation sequences: named multi-channel keyframe collections.
//!
//! A `SequenceDef` is the declarative serialization-boundary structure
//! (loaded from JSON); `Sequence::compile` validates it completely and
//! produces the immutable form the playback engine reads. Compilation fails
//! closed: a sequence is either fully valid or never installed.

use crate::track::{Track, TrackError};
use marionette_common::consts::{DEFAULT_FRAME_RATE_HZ, MAX_CHANNELS, MAX_FRAME_RATE_HZ};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors rejecting a sequence definition at compile time.
#[derive(Debug, Clone, Error)]
pub enum SequenceError {
    /// Sequences are keyed by name in the library.
    #[error("sequence name is empty")]
    EmptyName,

    /// A sequence without tracks commands nothing.
    #[error("sequence '{name}' has no tracks")]
    NoTracks { name: String },

    /// Duration must be a positive finite number of seconds.
    #[error("sequence '{name}': duration {duration}s is not positive and finite")]
    InvalidDuration { name: String, duration: f64 },

    /// Duration must cover every track's last keyframe.
    #[error("sequence '{name}': duration {duration}s ends before last keyframe at {end}s")]
    DurationTooShort {
        name: String,
        duration: f64,
        end: f64,
    },

    /// Tick frequency outside the supported range.
    #[error("sequence '{name}': frame_rate {frame_rate}Hz outside [1, {max}]Hz",
            max = MAX_FRAME_RATE_HZ)]
    FrameRateOutOfRange { name: String, frame_rate: u32 },

    /// At most one track per channel.
    #[error("sequence '{name}': duplicate track for channel {channel_id}")]
    DuplicateChannelTrack { name: String, channel_id: u8 },

    /// Track channel beyond the engine's channel bound.
    #[error("sequence '{name}': track channel {channel_id} out of range")]
    ChannelOutOfRange { name: String, channel_id: u8 },

    /// A track failed its structural checks.
    #[error("sequence '{name}', channel {channel_id}: {source}")]
    Track {
        name: String,
        channel_id: u8,
        source: TrackError,
    },
}

fn default_frame_rate() -> u32 {
    DEFAULT_FRAME_RATE_HZ
}

/// Declarative sequence description — the serialization boundary.
///
/// ```json
/// {
///   "name": "head_turn",
///   "duration": 4.0,
///   "frame_rate": 50,
///   "loop": false,
///   "tracks": [
///     { "channel_id": 0, "keyframes": [
///         { "time_offset": 0.0, "position_us": 1500.0 },
///         { "time_offset": 2.0, "position_us": 2000.0, "easing": "ease_in_out" }
///     ]}
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceDef {
    /// Unique key in the sequence library.
    pub name: String,
    /// Total playback time [s].
    pub duration: f64,
    /// Tick frequency [Hz].
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Restart from the top when the end is reached.
    #[serde(rename = "loop", default)]
    pub looped: bool,
    /// Per-channel motion tracks.
    pub tracks: Vec<Track>,
}

/// One entry of a per-tick position snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelTarget {
    /// Channel to command.
    pub channel_id: u8,
    /// Interpolated target position [µs].
    pub position_us: f64,
}

/// Fixed-capacity per-tick snapshot — no allocation on the tick path.
pub type PositionSnapshot = heapless::Vec<ChannelTarget, MAX_CHANNELS>;

/// A compiled, immutable animation sequence.
///
/// Never mutated after compilation, so concurrent playbacks of the same
/// `Sequence` behind an `Arc` are safe by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    name: String,
    duration: f64,
    frame_rate: u32,
    looped: bool,
    tracks: Vec<Track>,
}

impl Sequence {
    /// Validate a definition completely and compile it.
    pub fn compile(def: SequenceDef) -> Result<Self, SequenceError> {
        let name = def.name;
        if name.is_empty() {
            return Err(SequenceError::EmptyName);
        }
        if def.tracks.is_empty() {
            return Err(SequenceError::NoTracks { name });
        }
        if !def.duration.is_finite() || def.duration <= 0.0 {
            return Err(SequenceError::InvalidDuration {
                name,
                duration: def.duration,
            });
        }
        if def.frame_rate == 0 || def.frame_rate > MAX_FRAME_RATE_HZ {
            return Err(SequenceError::FrameRateOutOfRange {
                name,
                frame_rate: def.frame_rate,
            });
        }

        let mut seen = [false; MAX_CHANNELS];
        for track in &def.tracks {
            let channel_id = track.channel_id;
            if channel_id as usize >= MAX_CHANNELS {
                return Err(SequenceError::ChannelOutOfRange { name, channel_id });
            }
            if seen[channel_id as usize] {
                return Err(SequenceError::DuplicateChannelTrack { name, channel_id });
            }
            seen[channel_id as usize] = true;

            track.validate().map_err(|source| SequenceError::Track {
                name: name.clone(),
                channel_id,
                source,
            })?;

            if track.end_offset() > def.duration {
                return Err(SequenceError::DurationTooShort {
                    name,
                    duration: def.duration,
                    end: track.end_offset(),
                });
            }
        }

        Ok(Self {
            name,
            duration: def.duration,
            frame_rate: def.frame_rate,
            looped: def.looped,
            tracks: def.tracks,
        })
    }

    /// Library key.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total playback time [s].
    #[inline]
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Tick frequency [Hz].
    #[inline]
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// One tick interval.
    #[inline]
    pub fn frame_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.frame_rate as u64)
    }

    /// Whether playback wraps at the end.
    #[inline]
    pub fn is_looping(&self) -> bool {
        self.looped
    }

    /// The compiled tracks.
    #[inline]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Channels this sequence commands.
    pub fn channel_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.tracks.iter().map(|t| t.channel_id)
    }

    /// Multi-channel snapshot at `t` seconds from sequence start.
    ///
    /// Every track yields a value at every `t` (boundary keyframes are
    /// held), so each channel the sequence commands always has a defined
    /// target.
    pub fn positions_at(&self, t: f64) -> PositionSnapshot {
        let mut snapshot = PositionSnapshot::new();
        for track in &self.tracks {
            // Capacity equals the channel bound and channels are unique;
            // the push cannot overflow.
            let _ = snapshot.push(ChannelTarget {
                channel_id: track.channel_id,
                position_us: track.position_at(t),
            });
        }
        snapshot
    }
}
