use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::config::FilterConfig;
use crate::pose::{JointName, Landmark, LandmarkFrame};

/// Exponential smoothing weight for a cutoff frequency (Hz) at step `dt` (s)
fn alpha(dt: f32, cutoff_hz: f32) -> f32 {
    let tau = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    1.0 / (1.0 + tau / dt)
}

/// One Euro state for a single coordinate axis
#[derive(Debug, Clone, Copy)]
struct Axis {
    value: f32,
    /// 平滑化済みの速度
    velocity: f32,
}

impl Axis {
    /// 初回サンプル: 速度ゼロで開始
    fn seed(value: f32) -> Self {
        Self { value, velocity: 0.0 }
    }

    /// `dt` must be positive and already clamped
    fn step(&mut self, sample: f32, dt: f32, config: &FilterConfig) -> f32 {
        let raw_velocity = (sample - self.value) / dt;
        let a_d = alpha(dt, config.d_cutoff);
        self.velocity += a_d * (raw_velocity - self.velocity);

        let cutoff = config.min_cutoff + config.beta * self.velocity.abs();
        self.value += alpha(dt, cutoff) * (sample - self.value);
        self.value
    }
}

/// Filter state for one canonical landmark (x, y, z filtered independently)
#[derive(Debug, Clone)]
struct LandmarkFilter {
    axes: [Axis; 3],
    last_timestamp_ms: u64,
    last_output: Landmark,
}

impl LandmarkFilter {
    fn new(first: Landmark, timestamp_ms: u64) -> Self {
        Self {
            axes: [Axis::seed(first.x), Axis::seed(first.y), Axis::seed(first.z)],
            last_timestamp_ms: timestamp_ms,
            last_output: first,
        }
    }

    fn apply(
        &mut self,
        sample: Landmark,
        dt: f32,
        timestamp_ms: u64,
        config: &FilterConfig,
    ) -> Landmark {
        let [ax, ay, az] = &mut self.axes;
        let x = ax.step(sample.x, dt, config);
        let y = ay.step(sample.y, dt, config);
        let z = az.step(sample.z, dt, config);
        self.last_timestamp_ms = timestamp_ms;
        self.last_output = Landmark::new(x, y, z, sample.confidence);
        self.last_output
    }
}

/// Output of one smoothing pass
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedFrame {
    pub frame: LandmarkFrame,
    /// Joints whose output was held or passed through without updating state
    pub stale: BTreeSet<JointName>,
}

impl SmoothedFrame {
    pub fn is_stale(&self, joint: JointName) -> bool {
        self.stale.contains(&joint)
    }
}

/// Per-landmark One Euro smoothing for whole frames
///
/// A sample is only fed to its filter when its confidence is usable and its
/// timestamp is strictly after the previous accepted one. Rejected samples leave
/// the filter untouched; the output holds the last good position and carries the
/// rejected sample's confidence so downstream gating still sees it.
pub struct LandmarkSmoother {
    config: FilterConfig,
    min_confidence: f32,
    filters: HashMap<JointName, LandmarkFilter>,
}

impl LandmarkSmoother {
    pub fn new(config: FilterConfig, min_confidence: f32) -> Self {
        Self {
            config,
            min_confidence,
            filters: HashMap::new(),
        }
    }

    pub fn from_config(config: &FilterConfig, min_confidence: f32) -> Self {
        Self::new(config.clone(), min_confidence)
    }

    pub fn smooth(&mut self, frame: &LandmarkFrame) -> SmoothedFrame {
        let t = frame.timestamp_ms;
        let max_dt = self.config.max_dt_ms as f32 / 1000.0;
        let mut out = LandmarkFrame::new(frame.schema, t);
        let mut stale = BTreeSet::new();

        for (&joint, &sample) in &frame.landmarks {
            let usable = sample.is_valid(self.min_confidence)
                && sample.x.is_finite()
                && sample.y.is_finite()
                && sample.z.is_finite();

            let smoothed = match self.filters.get_mut(&joint) {
                None if usable => {
                    self.filters.insert(joint, LandmarkFilter::new(sample, t));
                    sample
                }
                None => {
                    stale.insert(joint);
                    sample
                }
                Some(state) => {
                    let dt_ms = t as i64 - state.last_timestamp_ms as i64;
                    if !usable || dt_ms <= 0 {
                        debug!(%joint, dt_ms, confidence = sample.confidence, "holding landmark");
                        stale.insert(joint);
                        Landmark {
                            confidence: sample.confidence,
                            ..state.last_output
                        }
                    } else {
                        let dt = (dt_ms as f32 / 1000.0).min(max_dt);
                        state.apply(sample, dt, t, &self.config)
                    }
                }
            };
            out.insert(joint, smoothed);
        }

        SmoothedFrame { frame: out, stale }
    }

    pub fn reset(&mut self) {
        self.filters.clear();
    }
}
