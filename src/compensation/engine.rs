use tracing::trace;

use super::detectors::{detector_for, Candidate, Detection, DetectionInput};
use super::persistence::PersistenceFilter;
use super::thresholds::{ThresholdConfig, UnitAdapter};
use super::{Compensation, CompensationType};
use crate::config::CompensationConfig;
use crate::pose::Side;

/// Runs the detectors for a set of compensation types and debounces the result
pub struct CompensationEngine {
    persistence: PersistenceFilter,
    adapter: Box<dyn UnitAdapter>,
}

impl CompensationEngine {
    pub fn new(config: &CompensationConfig, adapter: Box<dyn UnitAdapter>) -> Self {
        Self {
            persistence: PersistenceFilter::new(config.dwell_ms, config.retention_ms),
            adapter,
        }
    }

    /// Single-frame detections without touching episode state
    ///
    /// Types without a threshold entry or without a frame detector are skipped.
    pub fn detect(
        &self,
        input: &DetectionInput<'_>,
        thresholds: &ThresholdConfig,
        kinds: &[CompensationType],
    ) -> Vec<(CompensationType, Detection)> {
        kinds
            .iter()
            .filter_map(|&kind| Some((kind, detector_for(kind)?, thresholds.get(kind)?)))
            .map(|(kind, detect, threshold)| {
                (kind, detect(input, threshold, self.adapter.as_ref()))
            })
            .collect()
    }

    /// Evaluate one frame; returns episodes confirmed on it
    pub fn evaluate(
        &mut self,
        timestamp_ms: u64,
        input: &DetectionInput<'_>,
        thresholds: &ThresholdConfig,
        kinds: &[CompensationType],
    ) -> Vec<Compensation> {
        let mut evaluated: Vec<(CompensationType, Side)> = Vec::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        for (kind, detection) in self.detect(input, thresholds, kinds) {
            evaluated.extend(detection.evaluated.iter().map(|&side| (kind, side)));
            candidates.extend(detection.candidates);
        }
        if !candidates.is_empty() {
            trace!("t={} candidates: {:?}", timestamp_ms, candidates);
        }
        self.persistence.observe(timestamp_ms, &evaluated, &candidates)
    }

    pub fn record(&mut self, episode: Compensation) {
        self.persistence.record(episode);
    }

    pub fn confirmed(&self) -> &[Compensation] {
        self.persistence.confirmed()
    }

    pub fn active(&self) -> Vec<&Compensation> {
        self.persistence.active()
    }

    pub fn reset(&mut self) {
        self.persistence.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compensation::{LimbLengthAdapter, Threshold, Unit};
    use crate::geometry::{AnatomicalFrame, Segment};
    use crate::pose::{JointName, Landmark, LandmarkFrame, Schema};

    fn engine(dwell_ms: u64) -> CompensationEngine {
        let config = CompensationConfig {
            dwell_ms,
            ..Default::default()
        };
        CompensationEngine::new(&config, Box::new(LimbLengthAdapter))
    }

    fn leaning(degrees: f32) -> LandmarkFrame {
        let mut f = LandmarkFrame::new(Schema::MoveNet17, 0);
        let dx = 0.3 * degrees.to_radians().tan();
        f.insert(JointName::LeftShoulder, Landmark::new(0.6 + dx, 0.25, 0.0, 0.9));
        f.insert(JointName::RightShoulder, Landmark::new(0.4 + dx, 0.25, 0.0, 0.9));
        f.insert(JointName::LeftHip, Landmark::new(0.57, 0.55, 0.0, 0.9));
        f.insert(JointName::RightHip, Landmark::new(0.43, 0.55, 0.0, 0.9));
        f
    }

    /// Left knee pushed 12% of the hip–ankle length toward the midline
    fn valgus_left(knee_confidence: f32) -> LandmarkFrame {
        let mut f = leaning(0.0);
        f.insert(JointName::LeftKnee, Landmark::new(0.57 - 0.048, 0.75, 0.0, knee_confidence));
        f.insert(JointName::RightKnee, Landmark::new(0.43, 0.75, 0.0, 0.9));
        f.insert(JointName::LeftAnkle, Landmark::new(0.57, 0.95, 0.0, 0.9));
        f.insert(JointName::RightAnkle, Landmark::new(0.43, 0.95, 0.0, 0.9));
        f
    }

    fn run(
        engine: &mut CompensationEngine,
        t: u64,
        frame: &LandmarkFrame,
        th: &ThresholdConfig,
        kinds: &[CompensationType],
    ) -> Vec<Compensation> {
        let trunk = AnatomicalFrame::build(Segment::Trunk, frame, 0.3, 1e-6);
        let pelvis = AnatomicalFrame::build(Segment::Pelvis, frame, 0.3, 1e-6);
        let input = DetectionInput {
            frame,
            trunk: &trunk,
            pelvis: &pelvis,
            min_confidence: 0.3,
            epsilon: 1e-6,
            sternal_height_ratio: 0.3 / 0.14,
            nominal_rhythm_ratio: 8.0,
        };
        engine.evaluate(t, &input, th, kinds)
    }

    const LEAN: &[CompensationType] = &[CompensationType::TrunkLean];

    #[test]
    fn test_threshold_table_drives_classification() {
        let frame = leaning(12.0);
        let mut e = engine(0);
        let defaults = ThresholdConfig::default();
        let out = run(&mut e, 0, &frame, &defaults, LEAN);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, CompensationType::TrunkLean);
        assert_eq!(out[0].side, Side::Left);

        let mut strict = defaults.clone();
        strict
            .tune(CompensationType::TrunkLean, Threshold::new(15.0, 30.0, Unit::Degrees))
            .unwrap();
        let mut e = engine(0);
        assert!(run(&mut e, 0, &frame, &strict, LEAN).is_empty());
    }

    #[test]
    fn test_missing_entry_disables_detector() {
        let frame = leaning(25.0);
        let mut th = ThresholdConfig::default();
        th.entries.remove(&CompensationType::TrunkLean);
        let mut e = engine(0);
        assert!(run(&mut e, 0, &frame, &th, LEAN).is_empty());
    }

    #[test]
    fn test_low_confidence_frame_does_not_split_episode() {
        let th = ThresholdConfig::default();
        let kinds = &[CompensationType::KneeValgus];
        let mut e = engine(250);
        let mut emitted = 0;
        for i in 0..40u64 {
            let confidence = if i == 20 { 0.1 } else { 0.9 };
            emitted += run(&mut e, i * 33, &valgus_left(confidence), &th, kinds).len();
        }
        assert_eq!(emitted, 1);
        assert_eq!(e.confirmed().len(), 1);
        let ep = &e.confirmed()[0];
        assert_eq!(ep.side, Side::Left);
        assert_eq!(ep.start_ms, 0);
        assert_eq!(ep.end_ms, 39 * 33);
    }

    #[test]
    fn test_detect_reports_measured_sides() {
        let frame = valgus_left(0.1);
        let trunk = AnatomicalFrame::build(Segment::Trunk, &frame, 0.3, 1e-6);
        let pelvis = AnatomicalFrame::build(Segment::Pelvis, &frame, 0.3, 1e-6);
        let input = DetectionInput {
            frame: &frame,
            trunk: &trunk,
            pelvis: &pelvis,
            min_confidence: 0.3,
            epsilon: 1e-6,
            sternal_height_ratio: 0.3 / 0.14,
            nominal_rhythm_ratio: 8.0,
        };
        let th = ThresholdConfig::default();
        let kinds = [CompensationType::KneeValgus, CompensationType::IncompleteRom];
        let out = engine(0).detect(&input, &th, &kinds);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, CompensationType::KneeValgus);
        assert_eq!(out[0].1.evaluated, vec![Side::Right]);
    }
}
