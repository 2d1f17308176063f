//! Synthetic landmark sequences with known ground truth.
//!
//! Poses are built in the same image space the runtime measures in (see
//! [`crate::geometry`]): a subject facing the camera, the subject's left at
//! larger `x`, up = `-y`, anterior = `-z`. Every movement is posed so that its
//! clinical angle, as defined by [`Movement`], equals the requested target.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::clinical::Movement;
use crate::compensation::CompensationType;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::geometry::{normalize, ANTERIOR, DOWN, UP};
use crate::pose::{JointName, Landmark, LandmarkFrame, RawFrame, Schema, SchemaAdapter, Side};

// 体型 (正規化画像座標)
const SHOULDER_HALF_WIDTH: f32 = 0.1;
const HIP_HALF_WIDTH: f32 = 0.075;
const UPPER_ARM: f32 = 0.15;
const FOREARM: f32 = 0.13;
const HAND: f32 = 0.06;
const THIGH: f32 = 0.2;
const SHANK: f32 = 0.2;

const DEFAULT_CONFIDENCE: f32 = 0.95;

/// Fault injected on top of the posed movement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Injection {
    /// Medial knee shift as percent of hip–ankle length
    KneeValgus { percent: f32, side: Side },
    /// Upper body rotated about the hip midpoint toward `side`
    TrunkLean { degrees: f32, side: Side },
    /// `side` hip and leg lowered
    PelvicDrop { degrees: f32, side: Side },
    HeelLift { degrees: f32, side: Side },
    /// Extra shoulder girdle elevation beyond the arm's rhythm
    ShoulderHiking { degrees: f32, side: Side },
    WristDeviation { degrees: f32, side: Side },
    /// Whole arm swung forward
    ShoulderCompensation { degrees: f32, side: Side },
}

impl Injection {
    pub fn kind(&self) -> CompensationType {
        match self {
            Injection::KneeValgus { .. } => CompensationType::KneeValgus,
            Injection::TrunkLean { .. } => CompensationType::TrunkLean,
            Injection::PelvicDrop { .. } => CompensationType::PelvicTilt,
            Injection::HeelLift { .. } => CompensationType::HeelLift,
            Injection::ShoulderHiking { .. } => CompensationType::ShoulderHiking,
            Injection::WristDeviation { .. } => CompensationType::WristDeviation,
            Injection::ShoulderCompensation { .. } => CompensationType::ShoulderCompensation,
        }
    }

    pub fn side(&self) -> Side {
        match *self {
            Injection::KneeValgus { side, .. }
            | Injection::TrunkLean { side, .. }
            | Injection::PelvicDrop { side, .. }
            | Injection::HeelLift { side, .. }
            | Injection::ShoulderHiking { side, .. }
            | Injection::WristDeviation { side, .. }
            | Injection::ShoulderCompensation { side, .. } => side,
        }
    }

    pub fn expected(&self) -> ExpectedCompensation {
        ExpectedCompensation {
            kind: self.kind(),
            side: self.side(),
        }
    }

    /// Whether the fault changes the movement's primary angle
    pub fn perturbs(&self, movement: Movement) -> bool {
        match self {
            Injection::KneeValgus { .. } => matches!(
                movement,
                Movement::KneeFlexion | Movement::HipFlexion | Movement::HipAbduction
            ),
            // 上肢は体幹と一緒に回転するので体幹基準の角度は不変
            Injection::TrunkLean { .. } => {
                matches!(movement, Movement::HipFlexion | Movement::HipAbduction)
            }
            Injection::ShoulderCompensation { .. } => movement.is_shoulder(),
            Injection::PelvicDrop { .. }
            | Injection::HeelLift { .. }
            | Injection::ShoulderHiking { .. }
            | Injection::WristDeviation { .. } => false,
        }
    }

    /// Landmarks the matching detector needs
    pub fn required_joints(&self) -> &'static [JointName] {
        use JointName::*;
        match self {
            Injection::HeelLift { .. } => &[LeftHeel, RightHeel, LeftFootIndex, RightFootIndex],
            Injection::WristDeviation { .. } => &[LeftIndex, RightIndex, LeftPinky, RightPinky],
            Injection::ShoulderHiking { .. } => &[LeftShoulder, RightShoulder, LeftHip, RightHip],
            _ => &[LeftShoulder, RightShoulder, LeftHip, RightHip, LeftKnee, RightKnee],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedAngle {
    pub movement: Movement,
    pub side: Side,
    pub degrees: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExpectedCompensation {
    pub kind: CompensationType,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroundTruth {
    /// `None` when an injected fault changes the primary angle
    pub primary_angle: Option<f32>,
    #[serde(default)]
    pub secondary_angles: Vec<ExpectedAngle>,
    #[serde(default)]
    pub expected_compensations: Vec<ExpectedCompensation>,
}

/// What to generate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRequest {
    pub movement: Movement,
    pub side: Side,
    pub target_deg: f32,
    #[serde(default)]
    pub injections: Vec<Injection>,
    /// Per-joint confidence overrides
    #[serde(default)]
    pub confidence: BTreeMap<JointName, f32>,
}

impl CaseRequest {
    pub fn new(movement: Movement, side: Side, target_deg: f32) -> Self {
        Self {
            movement,
            side,
            target_deg,
            injections: Vec::new(),
            confidence: BTreeMap::new(),
        }
    }

    pub fn inject(mut self, injection: Injection) -> Self {
        self.injections.push(injection);
        self
    }

    pub fn with_confidence(mut self, joint: JointName, confidence: f32) -> Self {
        self.confidence.insert(joint, confidence);
        self
    }

    pub fn name(&self) -> String {
        let mut name = format!("{}_{}_{:.0}", self.movement, self.side, self.target_deg);
        for i in &self.injections {
            name.push('+');
            name.push_str(i.kind().as_str());
        }
        name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticTestCase {
    pub name: String,
    pub movement: Movement,
    pub side: Side,
    pub target_deg: f32,
    #[serde(default)]
    pub injections: Vec<Injection>,
    pub frames: Vec<RawFrame>,
    pub ground_truth: GroundTruth,
}

/// Point set under construction
#[derive(Debug, Clone)]
struct Skeleton {
    points: BTreeMap<JointName, Vector3<f32>>,
}

fn side_sign(side: Side) -> f32 {
    match side {
        Side::Right => -1.0,
        _ => 1.0,
    }
}

/// Outward lateral direction for a side
fn outward(side: Side) -> Vector3<f32> {
    Vector3::new(side_sign(side), 0.0, 0.0)
}

/// Unit vector perpendicular to `dir`, preferring the image x axis
fn perpendicular(dir: Vector3<f32>) -> Vector3<f32> {
    let x = Vector3::x();
    normalize(x - dir * dir.dot(&x), 1e-3)
        .or_else(|| normalize(ANTERIOR - dir * dir.dot(&ANTERIOR), 1e-3))
        .unwrap_or(x)
}

fn arm_joints(side: Side) -> [JointName; 5] {
    use JointName::*;
    [
        side.pick(LeftElbow, RightElbow),
        side.pick(LeftWrist, RightWrist),
        side.pick(LeftPinky, RightPinky),
        side.pick(LeftIndex, RightIndex),
        side.pick(LeftThumb, RightThumb),
    ]
}

fn leg_joints(side: Side) -> [JointName; 4] {
    use JointName::*;
    [
        side.pick(LeftKnee, RightKnee),
        side.pick(LeftAnkle, RightAnkle),
        side.pick(LeftHeel, RightHeel),
        side.pick(LeftFootIndex, RightFootIndex),
    ]
}

fn is_upper_body(joint: JointName) -> bool {
    use JointName::*;
    !matches!(
        joint,
        LeftHip
            | RightHip
            | LeftKnee
            | RightKnee
            | LeftAnkle
            | RightAnkle
            | LeftHeel
            | RightHeel
            | LeftFootIndex
            | RightFootIndex
    )
}

impl Skeleton {
    /// Upright, arms hanging, facing the camera
    fn neutral() -> Self {
        use JointName::*;
        let mut s = Self {
            points: BTreeMap::new(),
        };
        let p = Vector3::new;
        s.set(Nose, p(0.5, 0.13, -0.02));
        s.set(LeftEyeInner, p(0.51, 0.14, -0.01));
        s.set(LeftEye, p(0.52, 0.14, -0.01));
        s.set(LeftEyeOuter, p(0.53, 0.14, -0.01));
        s.set(RightEyeInner, p(0.49, 0.14, -0.01));
        s.set(RightEye, p(0.48, 0.14, -0.01));
        s.set(RightEyeOuter, p(0.47, 0.14, -0.01));
        s.set(LeftEar, p(0.54, 0.15, 0.0));
        s.set(RightEar, p(0.46, 0.15, 0.0));
        s.set(MouthLeft, p(0.51, 0.17, -0.01));
        s.set(MouthRight, p(0.49, 0.17, -0.01));
        for side in [Side::Left, Side::Right] {
            let sx = side_sign(side);
            s.set(
                side.pick(LeftShoulder, RightShoulder),
                p(0.5 + sx * SHOULDER_HALF_WIDTH, 0.25, 0.0),
            );
            s.set(side.pick(LeftHip, RightHip), p(0.5 + sx * HIP_HALF_WIDTH, 0.55, 0.0));
            s.place_arm(side, DOWN, DOWN, DOWN);
            s.place_leg(side, DOWN, DOWN);
        }
        s
    }

    fn get(&self, joint: JointName) -> Vector3<f32> {
        self.points.get(&joint).copied().unwrap_or_else(Vector3::zeros)
    }

    fn set(&mut self, joint: JointName, p: Vector3<f32>) {
        self.points.insert(joint, p);
    }

    fn translate(&mut self, joints: &[JointName], by: Vector3<f32>) {
        for j in joints {
            if let Some(p) = self.points.get_mut(j) {
                *p += by;
            }
        }
    }

    fn mid(&self, a: JointName, b: JointName) -> Vector3<f32> {
        (self.get(a) + self.get(b)) * 0.5
    }

    fn place_hand(&mut self, side: Side, dir: Vector3<f32>) {
        use JointName::*;
        let wrist = self.get(side.pick(LeftWrist, RightWrist));
        let spread = perpendicular(dir) * side_sign(side);
        let tip = wrist + dir * HAND;
        self.set(side.pick(LeftIndex, RightIndex), tip + spread * 0.01);
        self.set(side.pick(LeftPinky, RightPinky), tip - spread * 0.01);
        self.set(side.pick(LeftThumb, RightThumb), wrist + dir * (HAND * 0.5) + spread * 0.015);
    }

    fn place_arm(
        &mut self,
        side: Side,
        upper: Vector3<f32>,
        fore: Vector3<f32>,
        hand: Vector3<f32>,
    ) {
        use JointName::*;
        let shoulder = self.get(side.pick(LeftShoulder, RightShoulder));
        let elbow = shoulder + upper * UPPER_ARM;
        self.set(side.pick(LeftElbow, RightElbow), elbow);
        self.set(side.pick(LeftWrist, RightWrist), elbow + fore * FOREARM);
        self.place_hand(side, hand);
    }

    fn place_leg(&mut self, side: Side, thigh: Vector3<f32>, shank: Vector3<f32>) {
        use JointName::*;
        let hip = self.get(side.pick(LeftHip, RightHip));
        let knee = hip + thigh * THIGH;
        let ankle = knee + shank * SHANK;
        self.set(side.pick(LeftKnee, RightKnee), knee);
        self.set(side.pick(LeftAnkle, RightAnkle), ankle);
        self.set(side.pick(LeftHeel, RightHeel), ankle + DOWN * 0.02 - ANTERIOR * 0.02);
        self.set(side.pick(LeftFootIndex, RightFootIndex), ankle + DOWN * 0.02 + ANTERIOR * 0.08);
    }

    /// Same construction as the runtime: on the trunk axis, `height_ratio` hip
    /// widths above the hip midpoint
    fn sternum(&self, height_ratio: f32) -> Vector3<f32> {
        use JointName::*;
        let hips = self.mid(LeftHip, RightHip);
        let axis = self.mid(LeftShoulder, RightShoulder) - hips;
        let width = (self.get(LeftHip) - self.get(RightHip)).norm();
        hips + normalize(axis, 1e-6).unwrap_or(UP) * (width * height_ratio)
    }

    /// Raise the shoulder (arm follows rigidly) so its girdle elevation grows by `degrees`
    fn elevate_girdle(&mut self, side: Side, degrees: f32, sternal_height: f32) {
        let shoulder_joint = side.pick(JointName::LeftShoulder, JointName::RightShoulder);
        let sternum = self.sternum(sternal_height);
        let v = self.get(shoulder_joint) - sternum;
        let horizontal = v.x.abs();
        let rise = v.dot(&UP);
        let current = rise.atan2(horizontal);
        let shift = horizontal * (current + degrees.to_radians()).tan() - rise;
        let by = UP * shift;
        self.translate(&[shoulder_joint], by);
        self.translate(&arm_joints(side), by);
    }

    fn apply(&mut self, injection: &Injection, sternal_height: f32) {
        use JointName::*;
        match *injection {
            Injection::KneeValgus { percent, side } => {
                for s in side.sides() {
                    let hip = self.get(s.pick(LeftHip, RightHip));
                    let other = self.get(s.pick(RightHip, LeftHip));
                    let axis = self.get(s.pick(LeftAnkle, RightAnkle)) - hip;
                    let Some(u) = normalize(axis, 1e-6) else { continue };
                    let medial = other - hip;
                    let Some(medial) = normalize(medial - u * medial.dot(&u), 1e-6) else {
                        continue;
                    };
                    let by = medial * (percent / 100.0 * axis.norm());
                    self.translate(&[s.pick(LeftKnee, RightKnee)], by);
                }
            }
            Injection::TrunkLean { degrees, side } => {
                let pivot = self.mid(LeftHip, RightHip);
                let (sin, cos) = degrees.to_radians().sin_cos();
                let k = side_sign(side) * sin;
                for (joint, p) in self.points.iter_mut() {
                    if !is_upper_body(*joint) {
                        continue;
                    }
                    let d = *p - pivot;
                    *p = pivot + Vector3::new(cos * d.x - k * d.y, k * d.x + cos * d.y, d.z);
                }
            }
            Injection::PelvicDrop { degrees, side } => {
                let width = (self.get(LeftHip).x - self.get(RightHip).x).abs();
                let by = DOWN * (width * degrees.to_radians().tan());
                for s in side.sides() {
                    self.translate(&[s.pick(LeftHip, RightHip)], by);
                    self.translate(&leg_joints(*s), by);
                }
            }
            Injection::HeelLift { degrees, side } => {
                for s in side.sides() {
                    let heel_joint = s.pick(LeftHeel, RightHeel);
                    let toe = self.get(s.pick(LeftFootIndex, RightFootIndex));
                    let back = self.get(heel_joint) - toe;
                    let len = back.norm();
                    let Some(back) = normalize(back, 1e-6) else { continue };
                    let (sin, cos) = degrees.to_radians().sin_cos();
                    self.set(heel_joint, toe + (back * cos + UP * sin) * len);
                }
            }
            Injection::ShoulderHiking { degrees, side } => {
                for s in side.sides() {
                    self.elevate_girdle(*s, degrees, sternal_height);
                }
            }
            Injection::WristDeviation { degrees, side } => {
                for s in side.sides() {
                    let elbow = self.get(s.pick(LeftElbow, RightElbow));
                    let wrist = self.get(s.pick(LeftWrist, RightWrist));
                    let Some(dir) = normalize(wrist - elbow, 1e-6) else { continue };
                    let lateral = perpendicular(dir) * side_sign(*s);
                    let (sin, cos) = degrees.to_radians().sin_cos();
                    self.place_hand(*s, dir * cos + lateral * sin);
                }
            }
            Injection::ShoulderCompensation { degrees, side } => {
                let (sin, cos) = degrees.to_radians().sin_cos();
                for s in side.sides() {
                    let shoulder = self.get(s.pick(LeftShoulder, RightShoulder));
                    for joint in arm_joints(*s) {
                        let d = self.get(joint) - shoulder;
                        // x軸まわりに前方へ回転 (下向き → 前方 -z)
                        let r = Vector3::new(d.x, d.y * cos + d.z * sin, -d.y * sin + d.z * cos);
                        self.set(joint, shoulder + r);
                    }
                }
            }
        }
    }
}

/// Builds synthetic cases from one `Config`
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    schema: Schema,
    frames_per_case: usize,
    frame_interval_ms: u64,
    noise: f32,
    nominal_ratio: f32,
    sternal_height: f32,
    rng: StdRng,
}

impl SyntheticGenerator {
    pub fn new(config: &Config) -> Self {
        let v = &config.validation;
        Self {
            schema: v.schema,
            frames_per_case: v.frames_per_case.max(1),
            frame_interval_ms: v.frame_interval_ms,
            noise: v.noise,
            nominal_ratio: config.rhythm.nominal_ratio,
            sternal_height: config.measurement.sternal_height_ratio,
            rng: StdRng::seed_from_u64(v.seed),
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_noise(mut self, noise: f32) -> Self {
        self.noise = noise.max(0.0);
        self
    }

    pub fn schema(&self) -> Schema {
        self.schema
    }

    /// Noise-free landmark frame for a request
    pub fn pose(&self, request: &CaseRequest, timestamp_ms: u64) -> LandmarkFrame {
        let skeleton = self.skeleton(request);
        let mut frame = LandmarkFrame::new(self.schema, timestamp_ms);
        for (joint, p) in &skeleton.points {
            if !self.schema.contains(*joint) {
                continue;
            }
            let confidence = request
                .confidence
                .get(joint)
                .copied()
                .unwrap_or(DEFAULT_CONFIDENCE);
            frame.insert(*joint, Landmark::new(p.x, p.y, p.z, confidence));
        }
        frame
    }

    fn skeleton(&self, request: &CaseRequest) -> Skeleton {
        let mut s = Skeleton::neutral();
        let theta = request.target_deg.to_radians();
        let (sin, cos) = theta.sin_cos();

        for side in request.side.sides() {
            let side = *side;
            let out = outward(side);
            match request.movement {
                Movement::ShoulderFlexion | Movement::ShoulderAbduction => {
                    let girdle = request.target_deg / (1.0 + self.nominal_ratio);
                    s.elevate_girdle(side, girdle, self.sternal_height);
                    let lateral = if request.movement == Movement::ShoulderAbduction {
                        out
                    } else {
                        ANTERIOR
                    };
                    let dir = DOWN * cos + lateral * sin;
                    s.place_arm(side, dir, dir, dir);
                }
                Movement::ElbowFlexion => {
                    let fore = DOWN * cos + ANTERIOR * sin;
                    s.place_arm(side, DOWN, fore, fore);
                }
                Movement::KneeFlexion => {
                    // 下腿は後方 (+z) へ
                    s.place_leg(side, DOWN, DOWN * cos - ANTERIOR * sin);
                }
                Movement::HipFlexion => {
                    s.place_leg(side, DOWN * cos + ANTERIOR * sin, DOWN);
                }
                Movement::HipAbduction => {
                    let dir = DOWN * cos + out * sin;
                    s.place_leg(side, dir, dir);
                }
            }
        }

        // 体幹の傾きは他の注入の後に回す
        let (lean, rest): (Vec<&Injection>, Vec<&Injection>) = request
            .injections
            .iter()
            .partition(|i| matches!(i, Injection::TrunkLean { .. }));
        for injection in rest.into_iter().chain(lean) {
            s.apply(injection, self.sternal_height);
        }
        s
    }

    fn ground_truth(&self, request: &CaseRequest) -> GroundTruth {
        let movement = request.movement;
        let sides = request.side.sides();
        let perturbed = request.injections.iter().any(|i| i.perturbs(movement));

        let mut secondary_angles: Vec<ExpectedAngle> = Vec::new();
        if !perturbed {
            for side in sides {
                for (m, s) in movement.secondary(*side) {
                    let posed = sides.contains(&s);
                    let knee_under_hip =
                        movement == Movement::HipFlexion && m == Movement::KneeFlexion;
                    let degrees = if m == movement && posed {
                        request.target_deg
                    } else if knee_under_hip && posed {
                        // 下腿を鉛直に残すので膝は股関節と同じだけ屈曲
                        request.target_deg
                    } else {
                        0.0
                    };
                    if !secondary_angles.iter().any(|e| e.movement == m && e.side == s) {
                        secondary_angles.push(ExpectedAngle {
                            movement: m,
                            side: s,
                            degrees,
                        });
                    }
                }
            }
        }

        let mut expected_compensations: Vec<ExpectedCompensation> =
            request.injections.iter().map(Injection::expected).collect();
        expected_compensations.sort();
        expected_compensations.dedup();

        GroundTruth {
            primary_angle: (!perturbed).then_some(request.target_deg),
            secondary_angles,
            expected_compensations,
        }
    }

    fn jitter(&mut self, frame: &mut LandmarkFrame) {
        if self.noise <= 0.0 {
            return;
        }
        // 一様分布 [-a, a] の標準偏差は a/√3
        let a = self.noise * 3f32.sqrt();
        for lm in frame.landmarks.values_mut() {
            lm.x += self.rng.gen_range(-a..=a);
            lm.y += self.rng.gen_range(-a..=a);
            lm.z += self.rng.gen_range(-a..=a);
        }
    }

    pub fn generate(&mut self, request: &CaseRequest) -> Result<SyntheticTestCase> {
        let (lo, hi) = request.movement.range();
        if !(lo..=hi).contains(&request.target_deg) {
            return Err(Error::ConfigValidation(format!(
                "{} target {:.1} outside physiological range [{}, {}]",
                request.movement, request.target_deg, lo, hi
            )));
        }

        let adapter = SchemaAdapter::new();
        let mut frames = Vec::with_capacity(self.frames_per_case);
        for i in 0..self.frames_per_case {
            let mut frame = self.pose(request, i as u64 * self.frame_interval_ms);
            self.jitter(&mut frame);
            frames.push(adapter.encode(&frame, self.schema));
        }

        Ok(SyntheticTestCase {
            name: request.name(),
            movement: request.movement,
            side: request.side,
            target_deg: request.target_deg,
            injections: request.injections.clone(),
            frames,
            ground_truth: self.ground_truth(request),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::goniometer::angle_at;

    fn generator() -> SyntheticGenerator {
        SyntheticGenerator::new(&Config::default()).with_noise(0.0)
    }

    #[test]
    fn test_neutral_pose_is_upright() {
        let f = generator().pose(&CaseRequest::new(Movement::KneeFlexion, Side::Left, 0.0), 0);
        let hip = f.get(JointName::LeftHip).unwrap();
        let knee = f.get(JointName::LeftKnee).unwrap();
        let shoulder = f.get(JointName::LeftShoulder).unwrap();
        // y下向き: 肩は腰より上 (yが小さい)
        assert!(shoulder.y < hip.y);
        assert!(knee.y > hip.y);
        let right_shoulder = f.get(JointName::RightShoulder).unwrap();
        assert!(shoulder.x > right_shoulder.x);
    }

    #[test]
    fn test_knee_pose_reproduces_interior_angle() {
        let f = generator().pose(&CaseRequest::new(Movement::KneeFlexion, Side::Right, 150.0), 0);
        let a = angle_at(
            f.point(JointName::RightHip, 0.3).unwrap(),
            f.point(JointName::RightKnee, 0.3).unwrap(),
            f.point(JointName::RightAnkle, 0.3).unwrap(),
            1e-6,
        );
        assert!((a.degrees - 30.0).abs() < 1e-3);
    }

    #[test]
    fn test_movenet_encoding_drops_feet() {
        let mut g = generator().with_schema(Schema::MoveNet17);
        let case = g
            .generate(&CaseRequest::new(Movement::ElbowFlexion, Side::Left, 90.0))
            .unwrap();
        assert_eq!(case.frames[0].points.len(), 17);
        assert_eq!(case.frames[0].schema, "movenet_17");
    }

    #[test]
    fn test_out_of_range_target_rejected() {
        let err = generator()
            .generate(&CaseRequest::new(Movement::HipAbduction, Side::Left, 90.0))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigValidation(_)));
    }

    #[test]
    fn test_ground_truth_marks_perturbed_primary() {
        let mut g = generator();
        let request =
            CaseRequest::new(Movement::KneeFlexion, Side::Left, 60.0).inject(Injection::KneeValgus {
                percent: 12.0,
                side: Side::Left,
            });
        let case = g.generate(&request).unwrap();
        assert_eq!(case.ground_truth.primary_angle, None);
        assert_eq!(
            case.ground_truth.expected_compensations,
            vec![ExpectedCompensation {
                kind: CompensationType::KneeValgus,
                side: Side::Left
            }]
        );
    }

    #[test]
    fn test_hip_flexion_secondary_knee() {
        let g = generator();
        let gt = g.ground_truth(&CaseRequest::new(Movement::HipFlexion, Side::Left, 90.0));
        let knee = gt
            .secondary_angles
            .iter()
            .find(|e| e.movement == Movement::KneeFlexion)
            .unwrap();
        assert_eq!(knee.degrees, 90.0);
        assert_eq!(knee.side, Side::Left);
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let config = Config::default();
        let req = CaseRequest::new(Movement::ElbowFlexion, Side::Left, 45.0);
        let a = SyntheticGenerator::new(&config).generate(&req).unwrap();
        let b = SyntheticGenerator::new(&config).generate(&req).unwrap();
        assert_eq!(a.frames, b.frames);
        let clean = generator().generate(&req).unwrap();
        assert_ne!(a.frames[0], clean.frames[0]);
    }

    #[test]
    fn test_confidence_override() {
        let req = CaseRequest::new(Movement::KneeFlexion, Side::Right, 90.0)
            .with_confidence(JointName::RightKnee, 0.1);
        let f = generator().pose(&req, 0);
        assert_eq!(f.get(JointName::RightKnee).unwrap().confidence, 0.1);
        assert_eq!(f.get(JointName::LeftKnee).unwrap().confidence, DEFAULT_CONFIDENCE);
    }
}
