use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of landmark points describing one eye.
pub const EYE_POINTS: usize = 6;

/// A 2-D landmark coordinate in image space (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
}

impl LandmarkPoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &LandmarkPoint) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<(f32, f32)> for LandmarkPoint {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// The six ordered landmarks of one eye.
///
/// Order: outer corner, upper lid (outer), upper lid (inner), inner corner,
/// lower lid (inner), lower lid (outer). The provider may hand over a
/// malformed set (wrong count, NaN); geometry treats those as degenerate
/// rather than rejecting the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EyeLandmarks(pub Vec<LandmarkPoint>);

impl EyeLandmarks {
    pub fn points(&self) -> &[LandmarkPoint] {
        &self.0
    }
}

impl From<[LandmarkPoint; EYE_POINTS]> for EyeLandmarks {
    fn from(points: [LandmarkPoint; EYE_POINTS]) -> Self {
        Self(points.to_vec())
    }
}

/// Landmarks for both eyes of the single face in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub left: EyeLandmarks,
    pub right: EyeLandmarks,
}

/// One captured frame as delivered by the landmark provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub captured_at: DateTime<Utc>,
    /// `None` when the provider reports no face in the frame.
    pub landmarks: Option<FaceLandmarks>,
}

impl Frame {
    pub fn with_face(captured_at: DateTime<Utc>, landmarks: FaceLandmarks) -> Self {
        Self {
            captured_at,
            landmarks: Some(landmarks),
        }
    }

    pub fn without_face(captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            landmarks: None,
        }
    }

    pub fn face_present(&self) -> bool {
        self.landmarks.is_some()
    }
}

/// Result of an identity query against the enrolled population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMatch {
    pub candidate_id: Option<String>,
    /// Similarity confidence in `[0, 1]`.
    pub confidence: f32,
}

impl IdentityMatch {
    pub fn new(candidate_id: impl Into<String>, confidence: f32) -> Self {
        Self {
            candidate_id: Some(candidate_id.into()),
            confidence,
        }
    }

    /// A match that recognised nobody.
    pub fn unknown() -> Self {
        Self {
            candidate_id: None,
            confidence: 0.0,
        }
    }
}
