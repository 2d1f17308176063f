//! Accuracy harness over synthetic ground truth.
//!
//! Every case runs through a fresh context from [`build_context`], the same
//! factory the runtime uses. Accuracy shortfalls are reported, never raised: the
//! report carries a boolean verdict instead.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::clinical::Movement;
use crate::compensation::{CompensationType, Severity, Unit};
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::build_context;
use crate::pose::{Schema, Side};
use crate::synthetic::{
    CaseRequest, ExpectedCompensation, Injection, SyntheticGenerator, SyntheticTestCase,
};

const SWEEP_STEP_DEG: usize = 30;
/// Recall/precision below this triggers a recommendation
const DETECTION_FLOOR: f32 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationCase {
    pub name: String,
    pub movement: Movement,
    pub side: Side,
    pub expected: Option<f32>,
    pub measured: Option<f32>,
    pub absolute_error: Option<f32>,
    /// measured - expected
    pub signed_error: Option<f32>,
    pub passed: bool,
    pub expected_compensations: Vec<ExpectedCompensation>,
    pub detected_compensations: Vec<ExpectedCompensation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedError {
    pub case: String,
    #[serde(rename = "type")]
    pub kind: CompensationType,
    pub side: Side,
    pub severity: Severity,
    pub magnitude: f32,
    pub unit: Unit,
    /// Matches an injected fault
    pub expected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationMetrics {
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    #[serde(rename = "MAE")]
    pub mae: f32,
    #[serde(rename = "RMSE")]
    pub rmse: f32,
    pub pass_rate: f32,
    pub tolerance_deg: f32,
    /// Mean absolute error of secondary angles
    pub secondary_mae: Option<f32>,
    pub total_cases: usize,
    pub angle_cases: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub detected_errors: Vec<DetectedError>,
    pub metrics: ValidationMetrics,
    pub recommendations: Vec<String>,
    pub largest_errors: Vec<ValidationCase>,
    pub cases: Vec<ValidationCase>,
    pub meets_acceptance: bool,
}

struct CaseOutcome {
    case: ValidationCase,
    detected: Vec<DetectedError>,
    secondary_errors: Vec<f32>,
}

/// Drives generated or annotated cases through the runtime pipeline
pub struct ValidationPipeline {
    config: Config,
}

impl ValidationPipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Angle sweep in 30° steps inside each movement's range, plus the range end
    pub fn sweep(movements: &[Movement], sides: &[Side]) -> Vec<CaseRequest> {
        let mut out = Vec::new();
        for &movement in movements {
            let (lo, hi) = movement.range();
            let mut angles: Vec<f32> = (0..=180)
                .step_by(SWEEP_STEP_DEG)
                .map(|a| a as f32)
                .filter(|a| (lo..=hi).contains(a))
                .collect();
            if angles.last().map_or(true, |last| *last < hi) {
                angles.push(hi);
            }
            for &side in sides {
                for &angle in &angles {
                    out.push(CaseRequest::new(movement, side, angle));
                }
            }
        }
        out
    }

    /// One case per fault type that the schema can observe
    pub fn fault_battery(schema: Schema, movements: &[Movement]) -> Vec<CaseRequest> {
        use Side::{Left, Right};
        let faults = [
            (
                Movement::KneeFlexion,
                Left,
                60.0,
                Injection::KneeValgus { percent: 12.0, side: Left },
            ),
            (
                Movement::ShoulderAbduction,
                Left,
                90.0,
                Injection::TrunkLean { degrees: 15.0, side: Right },
            ),
            (
                Movement::HipAbduction,
                Left,
                20.0,
                Injection::PelvicDrop { degrees: 8.0, side: Right },
            ),
            (
                Movement::KneeFlexion,
                Left,
                30.0,
                Injection::HeelLift { degrees: 15.0, side: Left },
            ),
            (
                Movement::ShoulderFlexion,
                Right,
                120.0,
                Injection::ShoulderHiking { degrees: 12.0, side: Right },
            ),
            (
                Movement::ElbowFlexion,
                Left,
                90.0,
                Injection::WristDeviation { degrees: 20.0, side: Left },
            ),
            (
                Movement::ElbowFlexion,
                Right,
                90.0,
                Injection::ShoulderCompensation { degrees: 30.0, side: Right },
            ),
        ];
        faults
            .into_iter()
            .filter(|(m, ..)| movements.contains(m))
            .filter(|(.., i)| i.required_joints().iter().all(|j| schema.contains(*j)))
            .map(|(m, s, deg, i)| CaseRequest::new(m, s, deg).inject(i))
            .collect()
    }

    /// Default battery: sweep over both sides plus the fault battery
    pub fn battery(&self, movements: &[Movement], sides: &[Side]) -> Vec<CaseRequest> {
        let mut requests = Self::sweep(movements, sides);
        requests.extend(Self::fault_battery(self.config.validation.schema, movements));
        requests
    }

    /// Generate and evaluate requests with the configured seed
    pub fn run(&self, requests: &[CaseRequest]) -> Result<ValidationReport> {
        let mut generator = SyntheticGenerator::new(&self.config);
        let cases = requests
            .iter()
            .map(|r| generator.generate(r))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.run_cases(&cases))
    }

    pub fn run_default(&self) -> Result<ValidationReport> {
        self.run(&self.battery(&Movement::ALL, &[Side::Left, Side::Right]))
    }

    /// Evaluate already generated or externally annotated cases
    pub fn run_cases(&self, cases: &[SyntheticTestCase]) -> ValidationReport {
        let outcomes: Vec<CaseOutcome> = cases.iter().map(|c| self.evaluate(c)).collect();
        let report = self.aggregate(outcomes);
        info!(
            "validation: {} cases, MAE {:.2}°, RMSE {:.2}°, pass rate {:.1}%, F1 {:.2}",
            report.metrics.total_cases,
            report.metrics.mae,
            report.metrics.rmse,
            report.metrics.pass_rate * 100.0,
            report.metrics.f1
        );
        if !report.meets_acceptance {
            warn!("validation below acceptance threshold");
        }
        report
    }

    fn evaluate(&self, case: &SyntheticTestCase) -> CaseOutcome {
        let mut ctx = build_context(&self.config);
        ctx.set_movement(case.movement, case.side);

        let mut last = BTreeMap::new();
        let mut failure = None;
        for raw in &case.frames {
            match ctx.ingest(raw) {
                Ok(report) => {
                    for m in report.measurements {
                        last.insert(m.primary.side, m);
                    }
                    failure = report.errors.last().map(|e| e.error.to_string());
                }
                Err(e) => failure = Some(e.to_string()),
            }
        }

        let gt = &case.ground_truth;
        let tolerance = self.config.validation.tolerance_deg;

        // 両側の場合は誤差の大きい側を採用
        let worst = last
            .values()
            .max_by(|a, b| {
                let ea = gt.primary_angle.map_or(0.0, |e| (a.primary.clinical_angle - e).abs());
                let eb = gt.primary_angle.map_or(0.0, |e| (b.primary.clinical_angle - e).abs());
                ea.total_cmp(&eb)
            })
            .map(|m| m.primary.clinical_angle);
        let measured = if last.len() == case.side.sides().len() { worst } else { None };

        let signed_error = gt.primary_angle.zip(measured).map(|(e, m)| m - e);
        let absolute_error = signed_error.map(f32::abs);
        let passed = match gt.primary_angle {
            Some(_) => absolute_error.is_some_and(|e| e <= tolerance),
            None => true,
        };

        let mut secondary_errors = Vec::new();
        for expected in &gt.secondary_angles {
            let found = last
                .values()
                .flat_map(|m| m.secondary.iter())
                .find(|a| a.movement == expected.movement && a.side == expected.side);
            if let Some(a) = found {
                secondary_errors.push((a.clinical_angle - expected.degrees).abs());
            }
        }

        let expected_set: BTreeSet<ExpectedCompensation> =
            gt.expected_compensations.iter().copied().collect();
        let mut detected_set = BTreeSet::new();
        let mut detected = Vec::new();
        for c in ctx.confirmed_compensations() {
            let key = ExpectedCompensation {
                kind: c.kind,
                side: c.side,
            };
            if detected_set.insert(key) {
                detected.push(DetectedError {
                    case: case.name.clone(),
                    kind: c.kind,
                    side: c.side,
                    severity: c.severity,
                    magnitude: c.magnitude,
                    unit: c.unit,
                    expected: expected_set.contains(&key),
                });
            }
        }

        CaseOutcome {
            case: ValidationCase {
                name: case.name.clone(),
                movement: case.movement,
                side: case.side,
                expected: gt.primary_angle,
                measured,
                absolute_error,
                signed_error,
                passed,
                expected_compensations: expected_set.into_iter().collect(),
                detected_compensations: detected_set.into_iter().collect(),
                failure: if measured.is_none() { failure } else { None },
            },
            detected,
            secondary_errors,
        }
    }

    fn aggregate(&self, outcomes: Vec<CaseOutcome>) -> ValidationReport {
        let v = &self.config.validation;

        let angle_cases: Vec<&ValidationCase> = outcomes
            .iter()
            .map(|o| &o.case)
            .filter(|c| c.expected.is_some())
            .collect();
        let errors: Vec<f32> = angle_cases.iter().filter_map(|c| c.absolute_error).collect();
        let mae = mean(&errors);
        let rmse = mean(&errors.iter().map(|e| e * e).collect::<Vec<_>>()).sqrt();
        let pass_rate = ratio(
            angle_cases.iter().filter(|c| c.passed).count(),
            angle_cases.len(),
        );

        let secondary: Vec<f32> = outcomes
            .iter()
            .flat_map(|o| o.secondary_errors.iter().copied())
            .collect();
        let secondary_mae = (!secondary.is_empty()).then(|| mean(&secondary));

        let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
        for o in &outcomes {
            let expected: BTreeSet<_> = o.case.expected_compensations.iter().collect();
            let detected: BTreeSet<_> = o.case.detected_compensations.iter().collect();
            tp += expected.intersection(&detected).count();
            fp += detected.difference(&expected).count();
            fn_ += expected.difference(&detected).count();
        }
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        let metrics = ValidationMetrics {
            precision,
            recall,
            f1,
            mae,
            rmse,
            pass_rate,
            tolerance_deg: v.tolerance_deg,
            secondary_mae,
            total_cases: outcomes.len(),
            angle_cases: angle_cases.len(),
        };

        let mut largest: Vec<ValidationCase> = angle_cases
            .iter()
            .filter(|c| !c.passed || c.absolute_error.is_some())
            .map(|c| (*c).clone())
            .collect();
        // 未計測は最大誤差として先頭に
        largest.sort_by(|a, b| {
            let ea = a.absolute_error.unwrap_or(f32::INFINITY);
            let eb = b.absolute_error.unwrap_or(f32::INFINITY);
            eb.total_cmp(&ea)
        });
        largest.truncate(v.top_errors);

        let cases: Vec<ValidationCase> = outcomes.iter().map(|o| o.case.clone()).collect();
        let recommendations = self.recommendations(&metrics, &cases);
        let detected_errors = outcomes.into_iter().flat_map(|o| o.detected).collect();

        ValidationReport {
            detected_errors,
            meets_acceptance: pass_rate >= v.min_pass_rate,
            metrics,
            recommendations,
            largest_errors: largest,
            cases,
        }
    }

    fn recommendations(
        &self,
        metrics: &ValidationMetrics,
        cases: &[ValidationCase],
    ) -> Vec<String> {
        let v = &self.config.validation;
        let mut out = Vec::new();

        if metrics.pass_rate < v.min_pass_rate {
            out.push(format!(
                "pass rate {:.1}% is below the required {:.1}% at ±{}°",
                metrics.pass_rate * 100.0,
                v.min_pass_rate * 100.0,
                v.tolerance_deg
            ));
        }

        let mut by_movement: BTreeMap<Movement, Vec<&ValidationCase>> = BTreeMap::new();
        for c in cases.iter().filter(|c| c.expected.is_some()) {
            by_movement.entry(c.movement).or_default().push(c);
        }
        for (movement, list) in by_movement {
            let unmeasured = list.iter().filter(|c| c.measured.is_none()).count();
            if unmeasured > 0 {
                out.push(format!(
                    "{}: {} of {} cases produced no measurement",
                    movement,
                    unmeasured,
                    list.len()
                ));
            }
            let signed: Vec<f32> = list.iter().filter_map(|c| c.signed_error).collect();
            let bias = mean(&signed);
            let spread = mean(&signed.iter().map(|e| (e - bias).abs()).collect::<Vec<_>>());
            // 誤差がほぼ一定なら変換か軸の符号の誤り
            if bias.abs() > v.tolerance_deg && spread < bias.abs() / 4.0 {
                out.push(format!(
                    "{}: systematic offset of {:+.1}°, \
                     check the clinical angle conversion and vertical axis sign",
                    movement, bias
                ));
            } else if mean(&signed.iter().map(|e| e.abs()).collect::<Vec<_>>()) > v.tolerance_deg {
                out.push(format!(
                    "{}: mean error exceeds ±{}°, check landmark confidence and smoothing",
                    movement, v.tolerance_deg
                ));
            }
        }

        let missed: BTreeSet<CompensationType> = cases
            .iter()
            .flat_map(|c| {
                c.expected_compensations
                    .iter()
                    .filter(|e| !c.detected_compensations.contains(e))
                    .map(|e| e.kind)
            })
            .collect();
        if metrics.recall < DETECTION_FLOOR && !missed.is_empty() {
            out.push(format!(
                "missed compensations: {}; consider lowering warning thresholds",
                join(&missed)
            ));
        }
        let spurious: BTreeSet<CompensationType> = cases
            .iter()
            .flat_map(|c| {
                c.detected_compensations
                    .iter()
                    .filter(|d| !c.expected_compensations.contains(d))
                    .map(|d| d.kind)
            })
            .collect();
        if metrics.precision < DETECTION_FLOOR && !spurious.is_empty() {
            out.push(format!(
                "false positive compensations: {}; consider raising thresholds or dwell time",
                join(&spurious)
            ));
        }

        if out.is_empty() {
            out.push("all movements within tolerance; no action needed".to_string());
        }
        out
    }
}

fn join(kinds: &BTreeSet<CompensationType>) -> String {
    kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Zero denominator means nothing could go wrong
fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        1.0
    } else {
        num as f32 / den as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::RawFrame;

    #[test]
    fn test_sweep_respects_range() {
        let cases = ValidationPipeline::sweep(&[Movement::HipAbduction], &[Side::Left]);
        let angles: Vec<f32> = cases.iter().map(|c| c.target_deg).collect();
        assert_eq!(angles, vec![0.0, 30.0, 45.0]);

        let cases =
            ValidationPipeline::sweep(&[Movement::ShoulderFlexion], &[Side::Left, Side::Right]);
        assert_eq!(cases.len(), 14);
    }

    #[test]
    fn test_fault_battery_filters_by_schema() {
        let blaze = ValidationPipeline::fault_battery(Schema::BlazePose33, &Movement::ALL);
        let movenet = ValidationPipeline::fault_battery(Schema::MoveNet17, &Movement::ALL);
        assert_eq!(blaze.len(), 7);
        assert_eq!(movenet.len(), 5);
    }

    #[test]
    fn test_ratio_zero_denominator() {
        assert_eq!(ratio(0, 0), 1.0);
        assert_eq!(ratio(1, 4), 0.25);
    }

    #[test]
    fn test_unmeasured_case_fails() {
        let config = Config::default();
        let pipeline = ValidationPipeline::new(&config);
        let mut generator = SyntheticGenerator::new(&config);
        let mut case = generator
            .generate(&CaseRequest::new(Movement::KneeFlexion, Side::Left, 90.0))
            .unwrap();
        // 全フレームを不正なスキーマに差し替え
        case.frames = vec![RawFrame {
            schema: "openpose_25".to_string(),
            timestamp_ms: 0,
            points: Vec::new(),
        }];
        let report = pipeline.run_cases(&[case]);
        assert_eq!(report.metrics.pass_rate, 0.0);
        assert!(!report.meets_acceptance);
        assert!(report.cases[0].failure.is_some());
        assert_eq!(report.largest_errors.len(), 1);
    }

    #[test]
    fn test_report_json_shape() {
        let config = Config::default();
        let pipeline = ValidationPipeline::new(&config);
        let report = pipeline
            .run(&[CaseRequest::new(Movement::ElbowFlexion, Side::Left, 60.0)])
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["metrics"]["MAE"].is_number());
        assert!(json["metrics"]["RMSE"].is_number());
        assert!(json["metrics"]["f1"].is_number());
        assert!(json["detectedErrors"].is_array());
        assert!(json["recommendations"].is_array());
        assert_eq!(json["meetsAcceptance"], true);
    }
}
