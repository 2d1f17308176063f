use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::{normalize, Plane};
use crate::pose::{JointName, LandmarkFrame};

/// A landmark or the midpoint of two landmarks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentPoint {
    Joint(JointName),
    Mid(JointName, JointName),
}

impl SegmentPoint {
    pub const MID_SHOULDER: SegmentPoint =
        SegmentPoint::Mid(JointName::LeftShoulder, JointName::RightShoulder);
    pub const MID_HIP: SegmentPoint = SegmentPoint::Mid(JointName::LeftHip, JointName::RightHip);

    pub fn resolve(self, frame: &LandmarkFrame, threshold: f32) -> Option<Vector3<f32>> {
        match self {
            SegmentPoint::Joint(j) => frame.point(j, threshold),
            SegmentPoint::Mid(a, b) => frame.midpoint(a, b, threshold),
        }
    }

    pub fn joints(self) -> Vec<JointName> {
        match self {
            SegmentPoint::Joint(j) => vec![j],
            SegmentPoint::Mid(a, b) => vec![a, b],
        }
    }
}

/// Body segments with a local coordinate frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Plane reference for shoulder and hip angles, girdle axis
    Trunk,
    /// Hip-to-hip axis for pelvic obliquity
    Pelvis,
}

impl Segment {
    /// (origin, axis target, reference)
    pub fn definition(self) -> (SegmentPoint, SegmentPoint, SegmentPoint) {
        use SegmentPoint::Joint;
        let right_hip = Joint(JointName::RightHip);
        match self {
            Segment::Trunk => (SegmentPoint::MID_HIP, SegmentPoint::MID_SHOULDER, right_hip),
            Segment::Pelvis => (SegmentPoint::MID_HIP, right_hip, SegmentPoint::MID_SHOULDER),
        }
    }
}

/// Local orthonormal frame of a segment
///
/// `longitudinal` runs from origin to the axis target, `anteroposterior` is
/// `longitudinal × (reference - origin)` and `lateral` completes the triple.
/// An invalid frame has zero axes and must not be used for projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnatomicalFrame {
    pub segment: Segment,
    pub origin: Vector3<f32>,
    pub longitudinal: Vector3<f32>,
    pub lateral: Vector3<f32>,
    pub anteroposterior: Vector3<f32>,
    pub valid: bool,
}

impl AnatomicalFrame {
    pub fn invalid(segment: Segment) -> Self {
        Self {
            segment,
            origin: Vector3::zeros(),
            longitudinal: Vector3::zeros(),
            lateral: Vector3::zeros(),
            anteroposterior: Vector3::zeros(),
            valid: false,
        }
    }

    /// Build from explicit points
    pub fn from_points(
        segment: Segment,
        origin: Vector3<f32>,
        target: Vector3<f32>,
        reference: Vector3<f32>,
        epsilon: f32,
    ) -> Self {
        let Some(longitudinal) = normalize(target - origin, epsilon) else {
            return Self::invalid(segment);
        };
        let Some(anteroposterior) = normalize(longitudinal.cross(&(reference - origin)), epsilon)
        else {
            return Self::invalid(segment);
        };
        let lateral = anteroposterior.cross(&longitudinal);
        Self {
            segment,
            origin,
            longitudinal,
            lateral,
            anteroposterior,
            valid: true,
        }
    }

    /// Build from a landmark frame; missing or low-confidence points give an invalid frame
    pub fn build(segment: Segment, frame: &LandmarkFrame, threshold: f32, epsilon: f32) -> Self {
        let (o, t, r) = segment.definition();
        match (
            o.resolve(frame, threshold),
            t.resolve(frame, threshold),
            r.resolve(frame, threshold),
        ) {
            (Some(o), Some(t), Some(r)) => Self::from_points(segment, o, t, r, epsilon),
            _ => Self::invalid(segment),
        }
    }

    /// The two axes spanning an anatomical plane
    pub fn plane_axes(&self, plane: Plane) -> (Vector3<f32>, Vector3<f32>) {
        match plane {
            Plane::Frontal => (self.longitudinal, self.lateral),
            Plane::Sagittal => (self.longitudinal, self.anteroposterior),
            Plane::Transverse => (self.lateral, self.anteroposterior),
        }
    }
}
