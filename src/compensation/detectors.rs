//! Stateless compensation detectors.
//!
//! Every detector reads the smoothed frame and the trunk and pelvis frames,
//! measures one geometric quantity per side, and classifies it against the
//! threshold entry it is handed. No boundary is hardcoded here.

use nalgebra::Vector3;

use super::thresholds::{Threshold, Unit, UnitAdapter};
use super::{CompensationType, Severity};
use crate::geometry::goniometer::{angle_at, angle_between};
use crate::geometry::{normalize, AnatomicalFrame, SegmentPoint};
use crate::pose::{JointName, LandmarkFrame, Side};

/// Everything a detector may look at for one frame
#[derive(Debug, Clone, Copy)]
pub struct DetectionInput<'a> {
    pub frame: &'a LandmarkFrame,
    pub trunk: &'a AnatomicalFrame,
    pub pelvis: &'a AnatomicalFrame,
    pub min_confidence: f32,
    pub epsilon: f32,
    /// Sternal notch height above the hip midpoint, in hip widths
    pub sternal_height_ratio: f32,
    /// Expected whole-limb : girdle ratio during arm elevation
    pub nominal_rhythm_ratio: f32,
}

impl<'a> DetectionInput<'a> {
    fn point(&self, joint: JointName) -> Option<Vector3<f32>> {
        self.frame.point(joint, self.min_confidence)
    }
}

/// Threshold breach seen on a single frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub kind: CompensationType,
    pub side: Side,
    pub severity: Severity,
    pub magnitude: f32,
    pub unit: Unit,
}

/// One detector's view of one frame
///
/// `evaluated` lists every side the detector could actually measure, breached
/// or not. A side missing from it had unusable landmarks on this frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub evaluated: Vec<Side>,
    pub candidates: Vec<Candidate>,
}

impl Detection {
    /// Whole-body measurement: the reported side is a direction, so every side
    /// counts as evaluated
    fn whole_body(candidate: Option<Candidate>) -> Self {
        Self {
            evaluated: vec![Side::Left, Side::Right, Side::Bilateral],
            candidates: candidate.into_iter().collect(),
        }
    }
}

pub type DetectorFn = fn(&DetectionInput<'_>, &Threshold, &dyn UnitAdapter) -> Detection;

/// Per-frame detector for a compensation type. Incomplete ROM is judged per
/// repetition by the measurement service and has no frame detector.
pub fn detector_for(kind: CompensationType) -> Option<DetectorFn> {
    match kind {
        CompensationType::ShoulderHiking => Some(shoulder_hiking),
        CompensationType::TrunkLean => Some(trunk_lean),
        CompensationType::KneeValgus => Some(knee_valgus),
        CompensationType::HeelLift => Some(heel_lift),
        CompensationType::PelvicTilt => Some(pelvic_tilt),
        CompensationType::WristDeviation => Some(wrist_deviation),
        CompensationType::ShoulderCompensation => Some(shoulder_compensation),
        CompensationType::IncompleteRom => None,
    }
}

/// Non-positive magnitudes never breach
fn candidate(
    kind: CompensationType,
    side: Side,
    magnitude: f32,
    threshold: &Threshold,
) -> Option<Candidate> {
    if magnitude <= 0.0 {
        return None;
    }
    threshold.classify(magnitude).map(|severity| Candidate {
        kind,
        side,
        severity,
        magnitude,
        unit: threshold.unit,
    })
}

/// Measure left and right independently
fn per_side(
    kind: CompensationType,
    threshold: &Threshold,
    mut measure: impl FnMut(Side) -> Option<f32>,
) -> Detection {
    let mut out = Detection::default();
    for side in [Side::Left, Side::Right] {
        let Some(magnitude) = measure(side) else {
            continue;
        };
        out.evaluated.push(side);
        out.candidates.extend(candidate(kind, side, magnitude, threshold));
    }
    out
}

/// Sternal notch estimate from the hips and the trunk axis alone
///
/// The notch sits on the trunk's longitudinal axis, `sternal_height_ratio`
/// hip widths above the hip midpoint. Neither head posture nor shoulder
/// elevation moves it.
pub fn sternal_notch(input: &DetectionInput<'_>) -> Option<Vector3<f32>> {
    let trunk = input.trunk;
    if !trunk.valid {
        return None;
    }
    let left = input.point(JointName::LeftHip)?;
    let right = input.point(JointName::RightHip)?;
    let width = (left - right).norm();
    if width < input.epsilon {
        return None;
    }
    let hips = (left + right) * 0.5;
    Some(hips + trunk.longitudinal * (width * input.sternal_height_ratio))
}

/// Elevation of the shoulder point about the sternal notch, signed (up positive)
pub fn girdle_elevation(input: &DetectionInput<'_>, side: Side) -> Option<f32> {
    let trunk = input.trunk;
    let sternum = sternal_notch(input)?;
    let shoulder = input.point(side.pick(JointName::LeftShoulder, JointName::RightShoulder))?;
    let v = shoulder - sternum;
    let up = v.dot(&trunk.longitudinal);
    let lateral = v.dot(&trunk.lateral).abs();
    if lateral < input.epsilon {
        return None;
    }
    Some(up.atan2(lateral).to_degrees())
}

/// 3D angle between the trunk's downward axis and the upper arm
pub fn arm_elevation(input: &DetectionInput<'_>, side: Side) -> Option<f32> {
    let shoulders = SegmentPoint::MID_SHOULDER.resolve(input.frame, input.min_confidence)?;
    let hips = SegmentPoint::MID_HIP.resolve(input.frame, input.min_confidence)?;
    let shoulder = input.point(side.pick(JointName::LeftShoulder, JointName::RightShoulder))?;
    let elbow = input.point(side.pick(JointName::LeftElbow, JointName::RightElbow))?;
    let angle = angle_between(hips - shoulders, elbow - shoulder, input.epsilon);
    angle.valid.then_some(angle.degrees)
}

/// Girdle elevation beyond what the arm position explains
pub fn shoulder_hiking(
    input: &DetectionInput<'_>,
    threshold: &Threshold,
    _adapter: &dyn UnitAdapter,
) -> Detection {
    per_side(CompensationType::ShoulderHiking, threshold, |side| {
        let girdle = girdle_elevation(input, side)?;
        let arm = arm_elevation(input, side)?;
        Some(girdle - arm / (1.0 + input.nominal_rhythm_ratio))
    })
}

/// Lateral trunk lean from vertical in the image plane
pub fn trunk_lean(
    input: &DetectionInput<'_>,
    threshold: &Threshold,
    _adapter: &dyn UnitAdapter,
) -> Detection {
    let trunk = input.trunk;
    if !trunk.valid {
        return Detection::default();
    }
    let axis = trunk.longitudinal;
    // y下向きなので上方向成分は -y
    let lean = axis.x.abs().atan2(-axis.y).to_degrees();

    let (Some(left_hip), Some(hips)) = (
        input.point(JointName::LeftHip),
        SegmentPoint::MID_HIP.resolve(input.frame, input.min_confidence),
    ) else {
        return Detection::default();
    };
    let toward_left = left_hip.x - hips.x;
    let side = if toward_left.abs() < input.epsilon || axis.x.abs() < input.epsilon {
        Side::Bilateral
    } else if axis.x.signum() == toward_left.signum() {
        Side::Left
    } else {
        Side::Right
    };
    Detection::whole_body(candidate(CompensationType::TrunkLean, side, lean, threshold))
}

/// Medial knee displacement from the hip–ankle line
pub fn knee_valgus(
    input: &DetectionInput<'_>,
    threshold: &Threshold,
    adapter: &dyn UnitAdapter,
) -> Detection {
    use JointName::*;
    per_side(CompensationType::KneeValgus, threshold, |side| {
        let hip = input.point(side.pick(LeftHip, RightHip))?;
        let knee = input.point(side.pick(LeftKnee, RightKnee))?;
        let ankle = input.point(side.pick(LeftAnkle, RightAnkle))?;
        let other_hip = input.point(side.pick(RightHip, LeftHip))?;

        let axis = ankle - hip;
        let limb_length = axis.norm();
        let u = normalize(axis, input.epsilon)?;
        let offset = (knee - hip) - u * (knee - hip).dot(&u);
        let medial = other_hip - hip;
        let medial = normalize(medial - u * medial.dot(&u), input.epsilon)?;

        // 外側へのずれは外反ではない
        let shift = offset.dot(&medial).max(0.0);
        adapter.distance_in(shift, limb_length, threshold.unit)
    })
}

/// Heel raised above the forefoot
pub fn heel_lift(
    input: &DetectionInput<'_>,
    threshold: &Threshold,
    _adapter: &dyn UnitAdapter,
) -> Detection {
    use JointName::*;
    per_side(CompensationType::HeelLift, threshold, |side| {
        let heel = input.point(side.pick(LeftHeel, RightHeel))?;
        let toe = input.point(side.pick(LeftFootIndex, RightFootIndex))?;
        let v = toe - heel;
        let horizontal = (v.x * v.x + v.z * v.z).sqrt();
        if horizontal < input.epsilon {
            return None;
        }
        // つま先が踵より下 (y大) なら踵が浮いている
        Some(v.y.atan2(horizontal).to_degrees())
    })
}

/// Frontal pelvic obliquity from the pelvis axis; reported on the dropped side
pub fn pelvic_tilt(
    input: &DetectionInput<'_>,
    threshold: &Threshold,
    _adapter: &dyn UnitAdapter,
) -> Detection {
    let pelvis = input.pelvis;
    if !pelvis.valid {
        return Detection::default();
    }
    // 長軸は股関節中点 → 右股関節
    let axis = pelvis.longitudinal;
    if axis.x.abs() < input.epsilon {
        return Detection::default();
    }
    let tilt = axis.y.abs().atan2(axis.x.abs()).to_degrees();
    let side = if axis.y > 0.0 { Side::Right } else { Side::Left };
    Detection::whole_body(candidate(CompensationType::PelvicTilt, side, tilt, threshold))
}

/// Hand axis deviating from the forearm axis
pub fn wrist_deviation(
    input: &DetectionInput<'_>,
    threshold: &Threshold,
    _adapter: &dyn UnitAdapter,
) -> Detection {
    use JointName::*;
    per_side(CompensationType::WristDeviation, threshold, |side| {
        let elbow = input.point(side.pick(LeftElbow, RightElbow))?;
        let wrist = input.point(side.pick(LeftWrist, RightWrist))?;
        let hand = SegmentPoint::Mid(
            side.pick(LeftIndex, RightIndex),
            side.pick(LeftPinky, RightPinky),
        )
        .resolve(input.frame, input.min_confidence)?;
        let interior = angle_at(elbow, wrist, hand, input.epsilon);
        interior.valid.then(|| 180.0 - interior.degrees)
    })
}

/// Upper arm drifting away from the trunk when it should stay still
pub fn shoulder_compensation(
    input: &DetectionInput<'_>,
    threshold: &Threshold,
    _adapter: &dyn UnitAdapter,
) -> Detection {
    per_side(CompensationType::ShoulderCompensation, threshold, |side| {
        arm_elevation(input, side)
    })
}
