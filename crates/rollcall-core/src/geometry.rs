//! Eye openness ratio from six-point eye landmarks.
//!
//! The ratio compares the two lid-to-lid distances against the corner-to-corner
//! width of the eye:
//!
//! ```text
//! ratio = (|p2 - p6| + |p3 - p5|) / (2 * |p1 - p4|)
//! ```
//!
//! An open eye sits around 0.25–0.35 on typical landmark models and collapses
//! towards zero while the lids touch. The computation is purely geometric and
//! never fails: degenerate or malformed input yields exactly `0.0`, which the
//! blink detector sees as a closed-looking frame. One bad frame therefore
//! cannot abort a session, and a provider that keeps sending garbage simply
//! never produces a complete blink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FaceLandmarks, LandmarkPoint, EYE_POINTS};

/// Openness ratios for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpennessSample {
    pub left_ratio: f32,
    pub right_ratio: f32,
    /// Mean of both eyes; tolerates noise or occlusion on a single eye.
    pub combined_ratio: f32,
    pub timestamp: DateTime<Utc>,
}

/// Compute the openness ratio of one eye.
///
/// Returns `0.0` when the point count is not six, any coordinate is
/// non-finite, or the corner-to-corner distance is zero.
pub fn eye_openness(points: &[LandmarkPoint]) -> f32 {
    if points.len() != EYE_POINTS {
        return 0.0;
    }
    if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return 0.0;
    }

    let vertical_outer = points[1].distance(&points[5]);
    let vertical_inner = points[2].distance(&points[4]);
    let horizontal = points[0].distance(&points[3]);

    if horizontal <= f32::EPSILON {
        return 0.0;
    }

    let ratio = (vertical_outer + vertical_inner) / (2.0 * horizontal);
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

/// Compute both eye ratios and their mean for a frame.
pub fn openness_sample(face: &FaceLandmarks, timestamp: DateTime<Utc>) -> OpennessSample {
    let left_ratio = eye_openness(face.left.points());
    let right_ratio = eye_openness(face.right.points());

    OpennessSample {
        left_ratio,
        right_ratio,
        combined_ratio: (left_ratio + right_ratio) / 2.0,
        timestamp,
    }
}
