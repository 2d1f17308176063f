use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use tracing::{debug, info};

use crate::clinical::{ClinicalJointMeasurement, ClinicalMeasurementService, Movement};
use crate::compensation::{
    Compensation, CompensationEngine, CompensationType, DetectionInput, LimbLengthAdapter,
    ThresholdConfig, UnitAdapter,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::feedback::{FeedbackPrioritizer, PrioritizedCompensation};
use crate::geometry::{Clock, FrameBuilder, FrameCache, Segment, SystemClock};
use crate::pose::{JointName, LandmarkFrame, RawFrame, SchemaAdapter, Side};
use crate::tracker::LandmarkSmoother;

fn serialize_display<S: Serializer>(
    error: &Error,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Measurement failure scoped to one joint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JointError {
    pub joint: JointName,
    pub side: Side,
    #[serde(serialize_with = "serialize_display")]
    pub error: Error,
}

/// Result of one ingested frame
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameReport {
    pub timestamp_ms: u64,
    /// At least one joint was measured
    pub valid: bool,
    /// Joints whose sample was held instead of filtered
    pub stale: Vec<JointName>,
    pub measurements: Vec<ClinicalJointMeasurement>,
    pub errors: Vec<JointError>,
    /// Episodes confirmed on this frame
    pub new_compensations: Vec<Compensation>,
}

#[derive(Debug, Clone, Copy)]
struct Peak {
    degrees: f32,
    start_ms: u64,
    end_ms: u64,
}

/// Owns every piece of per-session state: filter history, frame cache,
/// compensation episodes and the session's threshold copy.
///
/// Single writer: all mutation goes through `&mut self`. The context is `Send`
/// and may be handed to a consumer thread, but it is never shared.
pub struct ProcessingContext {
    adapter: SchemaAdapter,
    smoother: LandmarkSmoother,
    frames: FrameBuilder,
    service: ClinicalMeasurementService,
    engine: CompensationEngine,
    prioritizer: FeedbackPrioritizer,
    thresholds: ThresholdConfig,
    min_confidence: f32,
    sternal_height_ratio: f32,
    nominal_rhythm_ratio: f32,
    active: Option<(Movement, Side)>,
    latest: BTreeMap<JointName, ClinicalJointMeasurement>,
    peaks: BTreeMap<Side, Peak>,
    last_timestamp_ms: Option<u64>,
}

/// Runtime context: wall clock and limb-length unit conversion
pub fn build_context(config: &Config) -> ProcessingContext {
    build_context_with(config, Arc::new(SystemClock::new()), Box::new(LimbLengthAdapter))
}

/// Same wiring with an injected clock and unit adapter
pub fn build_context_with(
    config: &Config,
    clock: Arc<dyn Clock>,
    unit_adapter: Box<dyn UnitAdapter>,
) -> ProcessingContext {
    let m = &config.measurement;
    let cache = FrameCache::new(&config.cache, clock);
    info!(
        "processing context: min_confidence={} dwell={}ms thresholds v{} ({} entries)",
        m.min_confidence,
        config.compensation.dwell_ms,
        config.thresholds.version,
        config.thresholds.entries.len()
    );
    ProcessingContext {
        adapter: SchemaAdapter::new(),
        smoother: LandmarkSmoother::from_config(&config.filter, m.min_confidence),
        frames: FrameBuilder::new(cache, m.min_confidence, m.epsilon),
        service: ClinicalMeasurementService::new(m, &config.rhythm),
        engine: CompensationEngine::new(&config.compensation, unit_adapter),
        prioritizer: FeedbackPrioritizer::new(&config.feedback),
        thresholds: config.thresholds.clone(),
        min_confidence: m.min_confidence,
        sternal_height_ratio: m.sternal_height_ratio,
        nominal_rhythm_ratio: config.rhythm.nominal_ratio,
        active: None,
        latest: BTreeMap::new(),
        peaks: BTreeMap::new(),
        last_timestamp_ms: None,
    }
}

impl ProcessingContext {
    /// Select the movement being performed. Pending repetition peaks are dropped.
    pub fn set_movement(&mut self, movement: Movement, side: Side) {
        if self.active != Some((movement, side)) {
            debug!("active movement: {} {}", side, movement);
            self.peaks.clear();
        }
        self.active = Some((movement, side));
    }

    pub fn active_movement(&self) -> Option<(Movement, Side)> {
        self.active
    }

    /// Adapt a raw frame and process it. A schema mismatch is returned before any
    /// state is touched.
    pub fn ingest(&mut self, raw: &RawFrame) -> Result<FrameReport> {
        let frame = self.adapter.adapt(raw)?;
        Ok(self.ingest_frame(&frame))
    }

    /// Process an already canonical frame
    pub fn ingest_frame(&mut self, frame: &LandmarkFrame) -> FrameReport {
        let t = frame.timestamp_ms;
        if self.last_timestamp_ms.is_some_and(|last| t <= last) {
            debug!("non-monotonic frame at {}ms dropped", t);
            return FrameReport {
                timestamp_ms: t,
                ..Default::default()
            };
        }
        self.last_timestamp_ms = Some(t);

        let smoothed = self.smoother.smooth(frame);
        let trunk = self.frames.frame(Segment::Trunk, &smoothed.frame);
        let pelvis = self.frames.frame(Segment::Pelvis, &smoothed.frame);

        let kinds: &[CompensationType] = match self.active {
            Some((movement, _)) => movement.relevant_compensations(),
            None => &CompensationType::ALL,
        };
        let input = DetectionInput {
            frame: &smoothed.frame,
            trunk: &trunk,
            pelvis: &pelvis,
            min_confidence: self.min_confidence,
            epsilon: self.frames.epsilon(),
            sternal_height_ratio: self.sternal_height_ratio,
            nominal_rhythm_ratio: self.nominal_rhythm_ratio,
        };
        let new_compensations = self.engine.evaluate(t, &input, &self.thresholds, kinds);
        let ongoing: Vec<Compensation> = self.engine.active().into_iter().cloned().collect();

        let mut report = FrameReport {
            timestamp_ms: t,
            stale: smoothed.stale.iter().copied().collect(),
            new_compensations,
            ..Default::default()
        };

        let Some((movement, side)) = self.active else {
            return report;
        };
        for &s in side.sides() {
            match self
                .service
                .measure(movement, s, &smoothed.frame, &mut self.frames, &ongoing)
            {
                Ok(m) => {
                    let angle = m.primary.clinical_angle;
                    let peak = self.peaks.entry(s).or_insert(Peak {
                        degrees: angle,
                        start_ms: t,
                        end_ms: t,
                    });
                    peak.degrees = peak.degrees.max(angle);
                    peak.end_ms = t;
                    self.latest.insert(m.primary.joint, m.clone());
                    report.measurements.push(m);
                }
                Err(error) => {
                    debug!("{} {} not measured at {}ms: {}", s, movement, t, error);
                    report.errors.push(JointError {
                        joint: movement.vertex(s),
                        side: s,
                        error,
                    });
                }
            }
        }
        report.valid = !report.measurements.is_empty();
        report
    }

    /// Close the current repetition and judge its range against the target
    pub fn complete_repetition(&mut self) -> Vec<Compensation> {
        let Some((movement, _)) = self.active else {
            return Vec::new();
        };
        let peaks = std::mem::take(&mut self.peaks);
        let mut out = Vec::new();
        for (side, peak) in peaks {
            if let Some(c) = self.service.assess_repetition(
                movement,
                side,
                peak.degrees,
                &self.thresholds,
                peak.start_ms,
                peak.end_ms,
            ) {
                debug!(
                    "{} {} repetition peak {:.1}: {:?}",
                    side, movement, peak.degrees, c.severity
                );
                self.engine.record(c.clone());
                out.push(c);
            }
        }
        out
    }

    pub fn latest_measurement(&self, joint: JointName) -> Option<&ClinicalJointMeasurement> {
        self.latest.get(&joint)
    }

    /// Ranked compensations as of the last ingested frame
    pub fn prioritized_compensations(&self) -> Vec<PrioritizedCompensation> {
        self.prioritizer
            .prioritize(self.engine.confirmed(), self.last_timestamp_ms.unwrap_or(0))
    }

    pub fn confirmed_compensations(&self) -> &[Compensation] {
        self.engine.confirmed()
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Swap in a new threshold document; the old one stays on failure
    pub fn reload_thresholds(&mut self, next: ThresholdConfig) -> Result<()> {
        self.thresholds.reload(next)?;
        info!("thresholds reloaded (v{})", self.thresholds.version);
        Ok(())
    }

    /// (hits, misses) of the frame cache
    pub fn cache_stats(&self) -> (u64, u64) {
        self.frames.cache().stats()
    }

    /// Forget all session state except configuration and the active movement
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.frames.clear();
        self.engine.reset();
        self.latest.clear();
        self.peaks.clear();
        self.last_timestamp_ms = None;
    }
}
