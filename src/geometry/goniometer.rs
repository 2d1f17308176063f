//! Joint angle computation.
//!
//! cos(θ) = (u · v) / (|u| |v|), clamped to [-1, 1]. Results are always in
//! [0°, 180°]; degenerate inputs return an invalid angle instead of NaN.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::frame::AnatomicalFrame;
use super::Plane;

/// cos値がこの範囲内なら共線とみなして 0° / 180° に丸める
const COLLINEAR_COS_EPS: f32 = 1e-6;

/// Raw interior angle with a validity flag
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawAngle {
    pub degrees: f32,
    pub valid: bool,
}

impl RawAngle {
    pub const INVALID: RawAngle = RawAngle {
        degrees: 0.0,
        valid: false,
    };

    fn valid(degrees: f32) -> Self {
        Self {
            degrees: degrees.clamp(0.0, 180.0),
            valid: true,
        }
    }
}

/// How a movement's clinical angle relates to the raw interior angle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleConversion {
    /// clinical = interior
    Identity,
    /// clinical = 180 - interior
    Complement,
}

impl AngleConversion {
    pub fn to_clinical(self, interior: f32) -> f32 {
        match self {
            AngleConversion::Identity => interior,
            AngleConversion::Complement => 180.0 - interior,
        }
    }

    /// Inverse of `to_clinical`; both conversions are involutions
    pub fn to_interior(self, clinical: f32) -> f32 {
        self.to_clinical(clinical)
    }
}

/// Angle between two vectors in full 3D
pub fn angle_between(u: Vector3<f32>, v: Vector3<f32>, epsilon: f32) -> RawAngle {
    let nu = u.norm();
    let nv = v.norm();
    if !(nu.is_finite() && nv.is_finite()) || nu < epsilon || nv < epsilon {
        return RawAngle::INVALID;
    }
    let cos = (u.dot(&v) / (nu * nv)).clamp(-1.0, 1.0);
    if cos >= 1.0 - COLLINEAR_COS_EPS {
        return RawAngle::valid(0.0);
    }
    if cos <= -1.0 + COLLINEAR_COS_EPS {
        return RawAngle::valid(180.0);
    }
    RawAngle::valid(cos.acos().to_degrees())
}

/// Interior angle at vertex `b` between `b→a` and `b→c`
pub fn angle_at(a: Vector3<f32>, b: Vector3<f32>, c: Vector3<f32>, epsilon: f32) -> RawAngle {
    angle_between(a - b, c - b, epsilon)
}

/// Angle between `u` and `v` after projecting both onto a plane of `frame`
pub fn angle_in_plane(
    u: Vector3<f32>,
    v: Vector3<f32>,
    frame: &AnatomicalFrame,
    plane: Plane,
    epsilon: f32,
) -> RawAngle {
    if !frame.valid {
        return RawAngle::INVALID;
    }
    let (a, b) = frame.plane_axes(plane);
    let project = |w: Vector3<f32>| Vector3::new(w.dot(&a), w.dot(&b), 0.0);
    angle_between(project(u), project(v), epsilon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Segment;

    fn v(x: f32, y: f32, z: f32) -> Vector3<f32> {
        Vector3::new(x, y, z)
    }

    #[test]
    fn test_right_angle() {
        let r = angle_at(v(0.0, 0.0, 0.0), v(0.5, 0.0, 0.0), v(0.5, 0.5, 0.0), 1e-6);
        assert!(r.valid);
        assert!((r.degrees - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_collinear_is_exact() {
        let straight = angle_at(v(0.0, 0.0, 0.0), v(0.5, 0.0, 0.0), v(1.0, 0.0, 0.0), 1e-6);
        assert_eq!(straight.degrees, 180.0);
        assert!(straight.valid);
        let folded = angle_at(v(1.0, 0.0, 0.0), v(0.0, 0.0, 0.0), v(2.0, 0.0, 0.0), 1e-6);
        assert_eq!(folded.degrees, 0.0);
        assert!(folded.valid);
    }

    #[test]
    fn test_coincident_points_invalid() {
        let r = angle_at(v(0.5, 0.5, 0.0), v(0.5, 0.5, 0.0), v(1.0, 0.0, 0.0), 1e-6);
        assert!(!r.valid);
        assert!(r.degrees.is_finite());
    }

    #[test]
    fn test_nan_input_invalid() {
        let r = angle_between(v(f32::NAN, 0.0, 0.0), v(1.0, 0.0, 0.0), 1e-6);
        assert!(!r.valid);
    }

    #[test]
    fn test_plane_projection_drops_out_of_plane_component() {
        // 体幹フレーム: 長軸 = 上, 外側 = -x, 前後 = -z
        let frame = AnatomicalFrame::from_points(
            Segment::Trunk,
            v(0.5, 0.55, 0.0),
            v(0.5, 0.25, 0.0),
            v(0.43, 0.55, 0.0),
            1e-6,
        );
        let down = v(0.0, 1.0, 0.0);
        // 前方45°・側方90°の腕: 前額面では90°
        let arm = v(1.0, 0.0, -1.0);
        let frontal = angle_in_plane(down, arm, &frame, Plane::Frontal, 1e-6);
        assert!((frontal.degrees - 90.0).abs() < 1e-3);
        let full = angle_between(down, arm, 1e-6);
        assert!((full.degrees - 90.0).abs() < 1e-3);
        let sagittal = angle_in_plane(down, v(0.0, 1.0, -1.0), &frame, Plane::Sagittal, 1e-6);
        assert!((sagittal.degrees - 45.0).abs() < 1e-3);
    }

    #[test]
    fn test_projection_onto_normal_is_invalid() {
        let frame = AnatomicalFrame::from_points(
            Segment::Trunk,
            v(0.5, 0.55, 0.0),
            v(0.5, 0.25, 0.0),
            v(0.43, 0.55, 0.0),
            1e-6,
        );
        let r = angle_in_plane(v(0.0, 1.0, 0.0), v(0.0, 0.0, -1.0), &frame, Plane::Frontal, 1e-6);
        assert!(!r.valid);
    }

    #[test]
    fn test_invalid_frame_gives_invalid_angle() {
        let frame = AnatomicalFrame::invalid(Segment::Trunk);
        let r = angle_in_plane(v(0.0, 1.0, 0.0), v(1.0, 0.0, 0.0), &frame, Plane::Frontal, 1e-6);
        assert!(!r.valid);
    }

    #[test]
    fn test_conversion() {
        assert_eq!(AngleConversion::Complement.to_clinical(30.0), 150.0);
        assert_eq!(AngleConversion::Identity.to_clinical(30.0), 30.0);
        assert_eq!(AngleConversion::Complement.to_interior(150.0), 30.0);
    }
}
