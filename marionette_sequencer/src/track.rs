//! Keyframe tracks: the per-channel motion curve.
//!
//! A track is an ordered list of `(time_offset, position_us, easing)`
//! control points for one channel. `position_at` is the interpolation
//! contract the whole engine rests on: before the first keyframe and after
//! the last it holds the boundary value, between keyframes it eases toward
//! the destination keyframe.

use crate::easing::EasingKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural errors in a track definition.
///
/// Raised at sequence compile time; a track that deserializes but fails
/// these checks is rejected before it can ever be played.
#[derive(Debug, Clone, Error)]
pub enum TrackError {
    /// A track must hold at least one keyframe.
    #[error("track has no keyframes")]
    Empty,

    /// Keyframes must be sorted ascending by time offset.
    #[error("keyframe {index} out of order (t={time_offset}s)")]
    Unsorted { index: usize, time_offset: f64 },

    /// No two keyframes may share a time offset.
    #[error("keyframe {index} repeats t={time_offset}s")]
    DuplicateTimeOffset { index: usize, time_offset: f64 },

    /// Offsets are relative to sequence start and cannot be negative.
    #[error("keyframe {index} has negative time offset {time_offset}s")]
    NegativeTimeOffset { index: usize, time_offset: f64 },

    /// Position values must be finite.
    #[error("keyframe {index} position is not a finite number")]
    NonFinitePosition { index: usize },

    /// The time stretch factor must be a positive finite number.
    #[error("speed_multiplier {0} must be finite and > 0")]
    InvalidSpeedMultiplier(f64),
}

/// One control point in a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Seconds from sequence start.
    pub time_offset: f64,
    /// Target pulse width at this point [µs].
    pub position_us: f64,
    /// Curve shaping the transition *into* this keyframe.
    #[serde(default)]
    pub easing: EasingKind,
}

fn default_speed_multiplier() -> f64 {
    1.0
}

/// The ordered keyframe list for one channel within a sequence.
///
/// Immutable once compiled into a [`crate::sequence::Sequence`]; the
/// invariants checked by [`Track::validate`] hold for every track the
/// engine ever evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Channel this track drives (foreign reference into the limits table).
    pub channel_id: u8,
    /// Internal time stretch: query time is divided by this factor, so
    /// values above 1 slow the track down and values below 1 speed it up.
    #[serde(default = "default_speed_multiplier")]
    pub speed_multiplier: f64,
    /// Control points, sorted ascending by `time_offset`.
    pub keyframes: Vec<Keyframe>,
}

impl Track {
    /// Check all structural invariants.
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.keyframes.is_empty() {
            return Err(TrackError::Empty);
        }
        if !self.speed_multiplier.is_finite() || self.speed_multiplier <= 0.0 {
            return Err(TrackError::InvalidSpeedMultiplier(self.speed_multiplier));
        }

        let mut prev: Option<f64> = None;
        for (index, kf) in self.keyframes.iter().enumerate() {
            if !kf.time_offset.is_finite() || kf.time_offset < 0.0 {
                return Err(TrackError::NegativeTimeOffset {
                    index,
                    time_offset: kf.time_offset,
                });
            }
            if !kf.position_us.is_finite() {
                return Err(TrackError::NonFinitePosition { index });
            }
            if let Some(prev_t) = prev {
                if kf.time_offset == prev_t {
                    return Err(TrackError::DuplicateTimeOffset {
                        index,
                        time_offset: kf.time_offset,
                    });
                }
                if kf.time_offset < prev_t {
                    return Err(TrackError::Unsorted {
                        index,
                        time_offset: kf.time_offset,
                    });
                }
            }
            prev = Some(kf.time_offset);
        }
        Ok(())
    }

    /// Raw time offset of the last keyframe [s].
    pub fn end_offset(&self) -> f64 {
        self.keyframes.last().map_or(0.0, |kf| kf.time_offset)
    }

    /// Interpolated position at `t` seconds from sequence start.
    ///
    /// Before the first keyframe and after the last, the boundary keyframe's
    /// position is held. Between two keyframes the *destination* keyframe's
    /// easing shapes the transition.
    pub fn position_at(&self, t: f64) -> f64 {
        let (Some(first), Some(last)) = (self.keyframes.first(), self.keyframes.last()) else {
            return 0.0;
        };

        // Effective query time under the track's internal stretch.
        let t = t / self.speed_multiplier;

        if t <= first.time_offset {
            return first.position_us;
        }
        if t >= last.time_offset {
            return last.position_us;
        }

        // Bracketing pair: kf_a.time_offset <= t < kf_b.time_offset.
        let b_idx = self
            .keyframes
            .partition_point(|kf| kf.time_offset <= t);
        let kf_a = &self.keyframes[b_idx - 1];
        let kf_b = &self.keyframes[b_idx];

        let span = kf_b.time_offset - kf_a.time_offset;
        let progress = ((t - kf_a.time_offset) / span).clamp(0.0, 1.0);
        let eased = kf_b.easing.apply(progress);

        kf_a.position_us + (kf_b.position_us - kf_a.position_us) * eased
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kf(t: f64, pos: f64, easing: EasingKind) -> Keyframe {
        Keyframe {
            time_offset: t,
            position_us: pos,
            easing,
        }
    }

    fn two_point_track() -> Track {
        Track {
            channel_id: 0,
            speed_multiplier: 1.0,
            keyframes: vec![
                kf(0.0, 1500.0, EasingKind::Linear),
                kf(2.0, 2000.0, EasingKind::EaseInOut),
            ],
        }
    }

    #[test]
    fn holds_boundary_values() {
        let track = two_point_track();
        assert_eq!(track.position_at(-1.0), 1500.0);
        assert_eq!(track.position_at(0.0), 1500.0);
        assert_eq!(track.position_at(2.0), 2000.0);
        assert_eq!(track.position_at(10.0), 2000.0);
    }

    #[test]
    fn ease_in_out_midpoint() {
        // 1500 + 500 * easeInOut(0.5) = 1750.
        let track = two_point_track();
        assert_eq!(track.position_at(1.0), 1750.0);
    }

    #[test]
    fn destination_easing_governs_transition() {
        // Quarter progress: easeInOut(0.25) = 0.125 → 1500 + 500*0.125.
        let track = two_point_track();
        assert_eq!(track.position_at(0.5), 1562.5);
    }

    #[test]
    fn single_keyframe_holds_everywhere() {
        let track = Track {
            channel_id: 0,
            speed_multiplier: 1.0,
            keyframes: vec![kf(1.0, 1234.0, EasingKind::Linear)],
        };
        assert_eq!(track.position_at(0.0), 1234.0);
        assert_eq!(track.position_at(1.0), 1234.0);
        assert_eq!(track.position_at(5.0), 1234.0);
    }

    #[test]
    fn bracketing_over_many_keyframes() {
        let track = Track {
            channel_id: 0,
            speed_multiplier: 1.0,
            keyframes: vec![
                kf(0.0, 1000.0, EasingKind::Linear),
                kf(1.0, 1100.0, EasingKind::Linear),
                kf(2.0, 1300.0, EasingKind::Linear),
                kf(4.0, 1700.0, EasingKind::Linear),
            ],
        };
        assert_eq!(track.position_at(0.5), 1050.0);
        assert_eq!(track.position_at(1.5), 1200.0);
        assert_eq!(track.position_at(3.0), 1500.0);
    }

    #[test]
    fn continuous_at_interior_keyframes() {
        let track = Track {
            channel_id: 0,
            speed_multiplier: 1.0,
            keyframes: vec![
                kf(0.0, 1000.0, EasingKind::Linear),
                kf(1.0, 1600.0, EasingKind::Elastic),
                kf(2.0, 1200.0, EasingKind::Bounce),
            ],
        };
        // Elastic's damped sine leaves a 2^-10-of-span residue approaching
        // its endpoint; 1 µs is below servo pulse resolution.
        let eps = 1e-9;
        for boundary in [1.0, 2.0] {
            let at = track.position_at(boundary);
            let before = track.position_at(boundary - eps);
            let after = track.position_at(boundary + eps);
            assert!((at - before).abs() < 1.0, "left limit at t={boundary}");
            assert!((at - after).abs() < 1.0, "right limit at t={boundary}");
        }
    }

    #[test]
    fn speed_multiplier_stretches_time() {
        let mut track = two_point_track();
        track.speed_multiplier = 2.0;
        // Effective query time is halved: t=2 behaves like t=1.
        assert_eq!(track.position_at(2.0), 1750.0);
        assert_eq!(track.position_at(4.0), 2000.0);

        track.speed_multiplier = 0.5;
        // Track runs twice as fast.
        assert_eq!(track.position_at(0.5), 1750.0);
        assert_eq!(track.position_at(1.0), 2000.0);
    }

    #[test]
    fn validate_accepts_well_formed() {
        assert!(two_point_track().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty() {
        let track = Track {
            channel_id: 0,
            speed_multiplier: 1.0,
            keyframes: vec![],
        };
        assert!(matches!(track.validate(), Err(TrackError::Empty)));
    }

    #[test]
    fn validate_rejects_unsorted() {
        let track = Track {
            channel_id: 0,
            speed_multiplier: 1.0,
            keyframes: vec![
                kf(1.0, 1500.0, EasingKind::Linear),
                kf(0.5, 1600.0, EasingKind::Linear),
            ],
        };
        assert!(matches!(
            track.validate(),
            Err(TrackError::Unsorted { index: 1, .. })
        ));
    }

    #[test]
    fn validate_rejects_duplicate_offsets() {
        let track = Track {
            channel_id: 0,
            speed_multiplier: 1.0,
            keyframes: vec![
                kf(1.0, 1500.0, EasingKind::Linear),
                kf(1.0, 1600.0, EasingKind::Linear),
            ],
        };
        assert!(matches!(
            track.validate(),
            Err(TrackError::DuplicateTimeOffset { index: 1, .. })
        ));
    }

    #[test]
    fn validate_rejects_negative_offset_and_bad_multiplier() {
        let mut track = two_point_track();
        track.keyframes[0].time_offset = -0.1;
        assert!(matches!(
            track.validate(),
            Err(TrackError::NegativeTimeOffset { index: 0, .. })
        ));

        let mut track = two_point_track();
        track.speed_multiplier = 0.0;
        assert!(matches!(
            track.validate(),
            Err(TrackError::InvalidSpeedMultiplier(_))
        ));
    }

    #[test]
    fn validate_rejects_nan_position() {
        let mut track = two_point_track();
        track.keyframes[1].position_us = f64::NAN;
        assert!(matches!(
            track.validate(),
            Err(TrackError::NonFinitePosition { index: 1 })
        ));
    }
}
