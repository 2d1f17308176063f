use serde::{Deserialize, Serialize};
use tracing::debug;

use super::movement::{AngleSource, Movement};
use crate::compensation::detectors::{girdle_elevation, DetectionInput};
use crate::compensation::{Compensation, CompensationType, Severity, ThresholdConfig};
use crate::config::{MeasurementConfig, RhythmConfig};
use crate::error::{Error, Result};
use crate::geometry::goniometer::{angle_between, angle_in_plane};
use crate::geometry::{FrameBuilder, Plane, Segment, SegmentPoint};
use crate::pose::{JointName, LandmarkFrame, Side};

/// One joint angle, raw and clinical
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointAngleMeasurement {
    pub joint: JointName,
    pub movement: Movement,
    pub side: Side,
    /// Interior angle, 0..=180
    pub raw_angle: f32,
    /// Negative for extension in sagittal movements
    pub clinical_angle: f32,
    /// `None` = full 3D
    pub plane: Option<Plane>,
    /// Lowest confidence among the landmarks used
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClinicalGrade {
    Excellent,
    Good,
    Fair,
    Limited,
}

impl ClinicalGrade {
    pub fn from_percent(percent_of_target: f32) -> Self {
        if percent_of_target >= 90.0 {
            ClinicalGrade::Excellent
        } else if percent_of_target >= 75.0 {
            ClinicalGrade::Good
        } else if percent_of_target >= 50.0 {
            ClinicalGrade::Fair
        } else {
            ClinicalGrade::Limited
        }
    }
}

/// Whole-limb vs shoulder-girdle contribution to arm elevation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RhythmAssessment {
    pub limb_deg: f32,
    pub girdle_deg: f32,
    /// (limb - girdle) / girdle
    pub ratio: f32,
    pub within_band: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalJointMeasurement {
    pub primary: JointAngleMeasurement,
    pub secondary: Vec<JointAngleMeasurement>,
    pub target_angle: f32,
    pub percent_of_target: f32,
    pub grade: ClinicalGrade,
    /// 0..=1
    pub quality: f32,
    pub rhythm: Option<RhythmAssessment>,
    pub compensations: Vec<Compensation>,
    pub timestamp_ms: u64,
}

const WARNING_QUALITY_COST: f32 = 0.1;
const CRITICAL_QUALITY_COST: f32 = 0.25;

/// Composes goniometer output into graded clinical measurements
#[derive(Debug, Clone)]
pub struct ClinicalMeasurementService {
    measurement: MeasurementConfig,
    rhythm: RhythmConfig,
}

impl ClinicalMeasurementService {
    pub fn new(measurement: &MeasurementConfig, rhythm: &RhythmConfig) -> Self {
        Self {
            measurement: measurement.clone(),
            rhythm: rhythm.clone(),
        }
    }

    pub fn target(&self, movement: Movement) -> f32 {
        self.measurement.target(movement)
    }

    /// Required landmarks must be present and usable, else the joint is skipped
    fn check_landmarks(
        &self,
        movement: Movement,
        side: Side,
        frame: &LandmarkFrame,
    ) -> Result<f32> {
        let threshold = self.measurement.min_confidence;
        let mut confidence = 1.0f32;
        for joint in movement.required_joints(side) {
            let lm = frame.get(joint).ok_or(Error::MissingLandmark(joint))?;
            if !lm.is_valid(threshold) {
                return Err(Error::LowConfidence {
                    joint,
                    confidence: lm.confidence,
                    threshold,
                });
            }
            confidence = confidence.min(lm.confidence);
        }
        Ok(confidence)
    }

    /// Primary angle of one movement on one side
    pub fn measure_angle(
        &self,
        movement: Movement,
        side: Side,
        frame: &LandmarkFrame,
        frames: &mut FrameBuilder,
    ) -> Result<JointAngleMeasurement> {
        let confidence = self.check_landmarks(movement, side, frame)?;
        let threshold = self.measurement.min_confidence;
        let eps = frames.epsilon();
        let joint = movement.vertex(side);
        let resolve =
            |p: SegmentPoint| p.resolve(frame, threshold).ok_or(Error::MissingLandmark(joint));

        let (u, v) = match movement.source(side) {
            AngleSource::Vertex(a, b, c) => {
                let b = resolve(b)?;
                (resolve(a)? - b, resolve(c)? - b)
            }
            AngleSource::Segments { reference, moving } => (
                resolve(reference.1)? - resolve(reference.0)?,
                resolve(moving.1)? - resolve(moving.0)?,
            ),
        };

        let plane = movement.plane();
        let trunk = match plane {
            Some(_) => {
                let trunk = frames.frame(Segment::Trunk, frame);
                if !trunk.valid {
                    return Err(Error::DegenerateGeometry(format!(
                        "trunk frame unavailable for {} {}",
                        side, movement
                    )));
                }
                Some(trunk)
            }
            None => None,
        };
        let raw = match (plane, &trunk) {
            (Some(plane), Some(trunk)) => angle_in_plane(u, v, trunk, plane, eps),
            _ => angle_between(u, v, eps),
        };
        if !raw.valid {
            return Err(Error::DegenerateGeometry(format!(
                "zero-length segment in {} {}",
                side, movement
            )));
        }

        let mut clinical_angle = movement.conversion().to_clinical(raw.degrees);
        if let (Some(Plane::Sagittal), Some(trunk)) = (plane, &trunk) {
            // 後方かつ水平より下なら伸展
            if v.dot(&trunk.anteroposterior) < 0.0 && v.dot(&u) > 0.0 {
                clinical_angle = -clinical_angle;
            }
        }

        Ok(JointAngleMeasurement {
            joint,
            movement,
            side,
            raw_angle: raw.degrees,
            clinical_angle,
            plane,
            confidence,
        })
    }

    /// Scapulohumeral rhythm for shoulder movements; `None` when the girdle
    /// contribution is too small to form a ratio
    pub fn rhythm(
        &self,
        side: Side,
        limb_deg: f32,
        frame: &LandmarkFrame,
        frames: &mut FrameBuilder,
    ) -> Option<RhythmAssessment> {
        let trunk = frames.frame(Segment::Trunk, frame);
        let pelvis = frames.frame(Segment::Pelvis, frame);
        let input = DetectionInput {
            frame,
            trunk: &trunk,
            pelvis: &pelvis,
            min_confidence: self.measurement.min_confidence,
            epsilon: frames.epsilon(),
            sternal_height_ratio: self.measurement.sternal_height_ratio,
            nominal_rhythm_ratio: self.rhythm.nominal_ratio,
        };
        let girdle_deg = girdle_elevation(&input, side)?;
        if girdle_deg < self.rhythm.min_girdle_deg {
            return None;
        }
        let ratio = (limb_deg - girdle_deg) / girdle_deg;
        Some(RhythmAssessment {
            limb_deg,
            girdle_deg,
            ratio,
            within_band: (self.rhythm.band_min..=self.rhythm.band_max).contains(&ratio),
        })
    }

    /// Full clinical measurement. `compensations` are the episodes already
    /// confirmed for this frame; only those relevant to the movement and side
    /// are attached.
    pub fn measure(
        &self,
        movement: Movement,
        side: Side,
        frame: &LandmarkFrame,
        frames: &mut FrameBuilder,
        compensations: &[Compensation],
    ) -> Result<ClinicalJointMeasurement> {
        let primary = self.measure_angle(movement, side, frame, frames)?;

        let secondary = movement
            .secondary(side)
            .into_iter()
            .filter_map(|(m, s)| match self.measure_angle(m, s, frame, frames) {
                Ok(a) => Some(a),
                Err(e) => {
                    debug!("secondary {} {} skipped: {}", s, m, e);
                    None
                }
            })
            .collect();

        let target_angle = self.target(movement);
        let percent_of_target = primary.clinical_angle / target_angle * 100.0;

        let rhythm = if movement.is_shoulder() {
            self.rhythm(side, primary.clinical_angle, frame, frames)
        } else {
            None
        };

        let relevant = movement.relevant_compensations();
        let compensations: Vec<Compensation> = compensations
            .iter()
            .filter(|c| relevant.contains(&c.kind))
            .filter(|c| !c.kind.is_limb_specific() || c.side == side || c.side == Side::Bilateral)
            .cloned()
            .collect();

        let mut quality = primary.confidence;
        if rhythm.is_some_and(|r| !r.within_band) {
            quality *= self.rhythm.quality_penalty;
        }
        for c in &compensations {
            quality -= match c.severity {
                Severity::Warning => WARNING_QUALITY_COST,
                Severity::Critical => CRITICAL_QUALITY_COST,
            };
        }

        Ok(ClinicalJointMeasurement {
            primary,
            secondary,
            target_angle,
            percent_of_target,
            grade: ClinicalGrade::from_percent(percent_of_target),
            quality: quality.clamp(0.0, 1.0),
            rhythm,
            compensations,
            timestamp_ms: frame.timestamp_ms,
        })
    }

    /// Repetition-level range check against the target
    ///
    /// `peak_deg` is the largest clinical angle reached during the repetition.
    pub fn assess_repetition(
        &self,
        movement: Movement,
        side: Side,
        peak_deg: f32,
        thresholds: &ThresholdConfig,
        start_ms: u64,
        end_ms: u64,
    ) -> Option<Compensation> {
        let threshold = thresholds.get(CompensationType::IncompleteRom)?;
        let deficit = (100.0 - peak_deg / self.target(movement) * 100.0).max(0.0);
        let severity = threshold.classify(deficit)?;
        Some(Compensation {
            kind: CompensationType::IncompleteRom,
            severity,
            side,
            magnitude: deficit,
            unit: threshold.unit,
            start_ms,
            end_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::geometry::{FrameCache, ManualClock};
    use crate::pose::{Landmark, Schema};
    use std::sync::Arc;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    fn builder() -> FrameBuilder {
        let cache = FrameCache::new(&CacheConfig::default(), Arc::new(ManualClock::new(0)));
        FrameBuilder::new(cache, 0.3, 1e-6)
    }

    fn service() -> ClinicalMeasurementService {
        ClinicalMeasurementService::new(&MeasurementConfig::default(), &RhythmConfig::default())
    }

    fn leg(knee_deg: f32, confidence: f32) -> LandmarkFrame {
        let mut f = LandmarkFrame::new(Schema::MoveNet17, 100);
        let phi = knee_deg.to_radians();
        f.insert(JointName::RightHip, Landmark::new(0.43, 0.55, 0.0, 0.9));
        f.insert(JointName::RightKnee, Landmark::new(0.43, 0.75, 0.0, confidence));
        f.insert(
            JointName::RightAnkle,
            Landmark::new(0.43, 0.75 + 0.2 * phi.cos(), 0.2 * phi.sin(), 0.9),
        );
        f
    }

    #[test]
    fn test_knee_flexion_complement() {
        let m = service()
            .measure_angle(Movement::KneeFlexion, Side::Right, &leg(90.0, 0.9), &mut builder())
            .unwrap();
        assert!(approx_eq(m.raw_angle, 90.0, 1e-3));
        assert!(approx_eq(m.clinical_angle, 90.0, 1e-3));
        assert_eq!(m.joint, JointName::RightKnee);
        assert_eq!(m.plane, None);

        let m = service()
            .measure_angle(Movement::KneeFlexion, Side::Right, &leg(30.0, 0.9), &mut builder())
            .unwrap();
        assert!(approx_eq(m.raw_angle, 150.0, 1e-3));
        assert!(approx_eq(m.clinical_angle, 30.0, 1e-3));
    }

    #[test]
    fn test_low_confidence_vertex() {
        let err = service()
            .measure_angle(Movement::KneeFlexion, Side::Right, &leg(90.0, 0.1), &mut builder())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::LowConfidence { joint: JointName::RightKnee, .. }
        ));
    }

    #[test]
    fn test_missing_landmark() {
        let err = service()
            .measure_angle(Movement::KneeFlexion, Side::Left, &leg(90.0, 0.9), &mut builder())
            .unwrap_err();
        assert!(matches!(err, Error::MissingLandmark(_)));
    }

    #[test]
    fn test_grade_bands() {
        assert_eq!(ClinicalGrade::from_percent(95.0), ClinicalGrade::Excellent);
        assert_eq!(ClinicalGrade::from_percent(90.0), ClinicalGrade::Excellent);
        assert_eq!(ClinicalGrade::from_percent(80.0), ClinicalGrade::Good);
        assert_eq!(ClinicalGrade::from_percent(50.0), ClinicalGrade::Fair);
        assert_eq!(ClinicalGrade::from_percent(49.9), ClinicalGrade::Limited);
    }

    #[test]
    fn test_percent_of_target_and_quality() {
        let m = service()
            .measure(Movement::KneeFlexion, Side::Right, &leg(108.0, 0.9), &mut builder(), &[])
            .unwrap();
        // 108 / 135
        assert!(approx_eq(m.percent_of_target, 80.0, 0.01));
        assert_eq!(m.grade, ClinicalGrade::Good);
        assert!(approx_eq(m.quality, 0.9, 1e-6));
        assert!(m.rhythm.is_none());
    }

    #[test]
    fn test_attached_compensations_lower_quality() {
        let episode = |kind, side| Compensation {
            kind,
            severity: Severity::Critical,
            side,
            magnitude: 12.0,
            unit: crate::compensation::Unit::Percent,
            start_ms: 0,
            end_ms: 100,
        };
        let comps = vec![
            episode(CompensationType::KneeValgus, Side::Right),
            episode(CompensationType::KneeValgus, Side::Left),
            episode(CompensationType::ShoulderHiking, Side::Right),
        ];
        let m = service()
            .measure(Movement::KneeFlexion, Side::Right, &leg(90.0, 0.9), &mut builder(), &comps)
            .unwrap();
        assert_eq!(m.compensations.len(), 1);
        assert!(approx_eq(m.quality, 0.65, 1e-6));
    }

    /// Standing upper body, left arm swung `flexion_deg` forward (negative = backward)
    fn arm_swing(flexion_deg: f32) -> LandmarkFrame {
        let mut f = LandmarkFrame::new(Schema::BlazePose33, 100);
        let (sin, cos) = flexion_deg.to_radians().sin_cos();
        f.insert(JointName::LeftShoulder, Landmark::new(0.6, 0.25, 0.0, 0.9));
        f.insert(JointName::RightShoulder, Landmark::new(0.4, 0.25, 0.0, 0.9));
        f.insert(JointName::LeftHip, Landmark::new(0.575, 0.55, 0.0, 0.9));
        f.insert(JointName::RightHip, Landmark::new(0.425, 0.55, 0.0, 0.9));
        // 前方は -z
        f.insert(
            JointName::LeftElbow,
            Landmark::new(0.6, 0.25 + 0.15 * cos, -0.15 * sin, 0.9),
        );
        f
    }

    #[test]
    fn test_shoulder_flexion_is_signed() {
        let svc = service();
        let forward = svc
            .measure_angle(Movement::ShoulderFlexion, Side::Left, &arm_swing(40.0), &mut builder())
            .unwrap();
        assert!(approx_eq(forward.clinical_angle, 40.0, 1e-3));

        let backward = svc
            .measure_angle(Movement::ShoulderFlexion, Side::Left, &arm_swing(-40.0), &mut builder())
            .unwrap();
        assert!(approx_eq(backward.raw_angle, 40.0, 1e-3));
        assert!(approx_eq(backward.clinical_angle, -40.0, 1e-3));

        // 頭上を越えた後方は過屈曲のまま
        let overhead = svc
            .measure_angle(Movement::ShoulderFlexion, Side::Left, &arm_swing(170.0), &mut builder())
            .unwrap();
        assert!(approx_eq(overhead.clinical_angle, 170.0, 1e-3));
        let past = svc
            .measure_angle(Movement::ShoulderFlexion, Side::Left, &arm_swing(190.0), &mut builder())
            .unwrap();
        assert!(approx_eq(past.clinical_angle, 170.0, 1e-3));
    }

    #[test]
    fn test_hip_extension_grades_limited() {
        let mut f = arm_swing(0.0);
        let (sin, cos) = (-20f32).to_radians().sin_cos();
        f.insert(
            JointName::RightKnee,
            Landmark::new(0.425, 0.55 + 0.2 * cos, -0.2 * sin, 0.9),
        );
        let m = service()
            .measure(Movement::HipFlexion, Side::Right, &f, &mut builder(), &[])
            .unwrap();
        assert!(approx_eq(m.primary.clinical_angle, -20.0, 1e-3));
        assert!(m.percent_of_target < 0.0);
        assert_eq!(m.grade, ClinicalGrade::Limited);
    }

    #[test]
    fn test_rhythm_ignores_head_position() {
        use crate::config::Config;
        use crate::synthetic::{CaseRequest, SyntheticGenerator};

        let generator = SyntheticGenerator::new(&Config::default()).with_noise(0.0);
        let request = CaseRequest::new(Movement::ShoulderAbduction, Side::Left, 160.0);
        let upright = generator.pose(&request, 0);
        let mut tucked = upright.clone();
        // 頭だけ前下方へ
        for ear in [JointName::LeftEar, JointName::RightEar] {
            let lm = tucked.landmarks.get_mut(&ear).unwrap();
            lm.y += 0.05;
            lm.z -= 0.03;
        }

        let svc = service();
        let a = svc.rhythm(Side::Left, 160.0, &upright, &mut builder()).unwrap();
        let b = svc.rhythm(Side::Left, 160.0, &tucked, &mut builder()).unwrap();
        assert!(a.within_band && b.within_band);
        assert!(approx_eq(a.ratio, 8.0, 1e-2), "ratio {}", a.ratio);
        assert_eq!(a, b);
    }

    #[test]
    fn test_incomplete_rom_on_repetition() {
        let svc = service();
        let th = ThresholdConfig::default();
        // 目標135°に対して81° = 60%
        let c = svc
            .assess_repetition(Movement::KneeFlexion, Side::Left, 81.0, &th, 0, 2000)
            .unwrap();
        assert_eq!(c.kind, CompensationType::IncompleteRom);
        assert_eq!(c.severity, Severity::Warning);
        assert!(approx_eq(c.magnitude, 40.0, 0.01));
        assert!(svc
            .assess_repetition(Movement::KneeFlexion, Side::Left, 130.0, &th, 0, 2000)
            .is_none());
    }
}
