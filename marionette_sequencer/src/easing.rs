//! Easing curves applied between keyframes.
//!
//! Closed-form shaping functions over normalized progress `p ∈ [0, 1]`.
//! The exact formulas are part of the engine's contract — sequence authors
//! tune motion against them and tests pin them down.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Interpolation shaping between two keyframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EasingKind {
    /// Constant velocity.
    #[default]
    Linear,
    /// Accelerate from rest: `p²`.
    EaseIn,
    /// Decelerate to rest: `1 - (1-p)²`.
    EaseOut,
    /// Accelerate then decelerate.
    EaseInOut,
    /// Ease-in first half, hard snap-back curve second half.
    Bounce,
    /// Exponentially damped oscillation around the target.
    Elastic,
}

impl EasingKind {
    /// Apply the curve to a progress value.
    ///
    /// `p` outside `[0, 1]` is clamped first; every curve maps 0 → 0 and
    /// 1 → 1 (including Elastic, whose formula is only used strictly
    /// inside the interval).
    #[inline]
    pub fn apply(self, p: f64) -> f64 {
        let p = p.clamp(0.0, 1.0);
        match self {
            Self::Linear => p,
            Self::EaseIn => p * p,
            Self::EaseOut => 1.0 - (1.0 - p) * (1.0 - p),
            Self::EaseInOut => {
                if p < 0.5 {
                    2.0 * p * p
                } else {
                    1.0 - 2.0 * (1.0 - p) * (1.0 - p)
                }
            }
            Self::Bounce => {
                if p < 0.5 {
                    2.0 * p * p
                } else {
                    let q = 2.0 - 2.0 * p;
                    1.0 - 0.5 * q * q
                }
            }
            Self::Elastic => {
                if p == 0.0 || p == 1.0 {
                    p
                } else {
                    2.0_f64.powf(-10.0 * p) * ((p - 0.1) * (2.0 * PI) / 0.4).sin() + 1.0
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [EasingKind; 6] = [
        EasingKind::Linear,
        EasingKind::EaseIn,
        EasingKind::EaseOut,
        EasingKind::EaseInOut,
        EasingKind::Bounce,
        EasingKind::Elastic,
    ];

    #[test]
    fn identity_at_endpoints() {
        for kind in ALL {
            assert_eq!(kind.apply(0.0), 0.0, "{kind:?} at 0");
            assert_eq!(kind.apply(1.0), 1.0, "{kind:?} at 1");
        }
    }

    #[test]
    fn out_of_range_progress_is_clamped() {
        for kind in ALL {
            assert_eq!(kind.apply(-0.5), 0.0, "{kind:?} below 0");
            assert_eq!(kind.apply(1.5), 1.0, "{kind:?} above 1");
        }
    }

    #[test]
    fn linear_is_identity() {
        assert_eq!(EasingKind::Linear.apply(0.25), 0.25);
        assert_eq!(EasingKind::Linear.apply(0.75), 0.75);
    }

    #[test]
    fn ease_in_quadratic() {
        assert_eq!(EasingKind::EaseIn.apply(0.5), 0.25);
        assert!((EasingKind::EaseIn.apply(0.2) - 0.04).abs() < 1e-12);
    }

    #[test]
    fn ease_out_inverse_quadratic() {
        assert_eq!(EasingKind::EaseOut.apply(0.5), 0.75);
    }

    #[test]
    fn ease_in_out_midpoint_is_half() {
        assert_eq!(EasingKind::EaseInOut.apply(0.5), 0.5);
        assert_eq!(EasingKind::EaseInOut.apply(0.25), 0.125);
        assert_eq!(EasingKind::EaseInOut.apply(0.75), 0.875);
    }

    #[test]
    fn bounce_midpoint_continuity() {
        // Both branches meet at p = 0.5.
        assert_eq!(EasingKind::Bounce.apply(0.5), 0.5);
        assert!(EasingKind::Bounce.apply(0.499) < 0.5);
        assert!(EasingKind::Bounce.apply(0.501) > 0.5);
    }

    #[test]
    fn elastic_oscillates_past_target() {
        // The damped sine overshoots 1.0 inside the interval.
        let peak = (1..100)
            .map(|i| EasingKind::Elastic.apply(i as f64 / 100.0))
            .fold(f64::MIN, f64::max);
        assert!(peak > 1.0);
    }

    #[test]
    fn serde_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&EasingKind::EaseInOut).unwrap(),
            "\"ease_in_out\""
        );
        let kind: EasingKind = serde_json::from_str("\"bounce\"").unwrap();
        assert_eq!(kind, EasingKind::Bounce);
    }
}
