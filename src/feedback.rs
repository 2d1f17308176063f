//! Ranks confirmed compensations for user-facing cues.
//!
//! priority = injury risk × severity weight × recency/duration weight
//!
//! Duration boosts an episode up to 3× (capped at two seconds); recency decays
//! it with a half life measured from the episode's last observed frame.

use std::cmp::Ordering;

use serde::Serialize;

use crate::compensation::{Compensation, CompensationType};
use crate::config::FeedbackConfig;

/// 継続時間ボーナスの上限 (秒)
const MAX_DURATION_BONUS_S: f32 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrioritizedCompensation {
    pub compensation: Compensation,
    pub priority: f32,
}

#[derive(Debug, Clone)]
pub struct FeedbackPrioritizer {
    top_n: usize,
    half_life_ms: u64,
}

impl FeedbackPrioritizer {
    pub fn new(config: &FeedbackConfig) -> Self {
        Self {
            top_n: config.top_n,
            half_life_ms: config.recency_half_life_ms,
        }
    }

    pub fn priority(&self, c: &Compensation, now_ms: u64) -> f32 {
        let duration_s = (c.duration_ms() as f32 / 1000.0).min(MAX_DURATION_BONUS_S);
        let age = now_ms.saturating_sub(c.end_ms) as f32;
        let recency = 0.5f32.powf(age / self.half_life_ms.max(1) as f32);
        c.kind.injury_risk_weight() * c.severity.weight() * (1.0 + duration_s) * recency
    }

    /// Highest-priority episode per type, at most `top_n` types
    pub fn prioritize(
        &self,
        compensations: &[Compensation],
        now_ms: u64,
    ) -> Vec<PrioritizedCompensation> {
        let mut ranked: Vec<PrioritizedCompensation> = compensations
            .iter()
            .map(|c| PrioritizedCompensation {
                compensation: c.clone(),
                priority: self.priority(c, now_ms),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.compensation
                        .kind
                        .injury_risk_weight()
                        .partial_cmp(&a.compensation.kind.injury_risk_weight())
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.compensation.start_ms.cmp(&b.compensation.start_ms))
        });

        let mut seen: Vec<CompensationType> = Vec::with_capacity(self.top_n);
        ranked.retain(|p| {
            if seen.len() >= self.top_n || seen.contains(&p.compensation.kind) {
                return false;
            }
            seen.push(p.compensation.kind);
            true
        });
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compensation::{Severity, Unit};
    use crate::pose::Side;

    fn comp(
        kind: CompensationType,
        severity: Severity,
        start_ms: u64,
        end_ms: u64,
    ) -> Compensation {
        Compensation {
            kind,
            severity,
            side: Side::Left,
            magnitude: 1.0,
            unit: Unit::Degrees,
            start_ms,
            end_ms,
        }
    }

    fn prioritizer() -> FeedbackPrioritizer {
        FeedbackPrioritizer::new(&FeedbackConfig::default())
    }

    #[test]
    fn test_risk_and_severity_order() {
        let list = vec![
            comp(CompensationType::WristDeviation, Severity::Warning, 0, 500),
            comp(CompensationType::KneeValgus, Severity::Warning, 0, 500),
            comp(CompensationType::HeelLift, Severity::Critical, 0, 500),
        ];
        let out = prioritizer().prioritize(&list, 500);
        let kinds: Vec<_> = out.iter().map(|p| p.compensation.kind).collect();
        // heel_lift 0.5×2 = 1.0, knee_valgus 1.0×1 = 1.0 -> 同点はリスク重み順
        assert_eq!(
            kinds,
            vec![
                CompensationType::KneeValgus,
                CompensationType::HeelLift,
                CompensationType::WristDeviation
            ]
        );
    }

    #[test]
    fn test_top_n_distinct_types() {
        let list = vec![
            comp(CompensationType::KneeValgus, Severity::Critical, 0, 500),
            comp(CompensationType::KneeValgus, Severity::Warning, 600, 900),
            comp(CompensationType::TrunkLean, Severity::Warning, 0, 900),
            comp(CompensationType::PelvicTilt, Severity::Warning, 0, 900),
            comp(CompensationType::HeelLift, Severity::Warning, 0, 900),
        ];
        let out = prioritizer().prioritize(&list, 900);
        assert_eq!(out.len(), 3);
        assert_eq!(
            out.iter()
                .filter(|p| p.compensation.kind == CompensationType::KneeValgus)
                .count(),
            1
        );
        assert!(out
            .iter()
            .all(|p| p.compensation.kind != CompensationType::HeelLift));
    }

    #[test]
    fn test_full_tie_prefers_earliest() {
        let list = vec![
            comp(CompensationType::KneeValgus, Severity::Warning, 400, 900),
            comp(CompensationType::KneeValgus, Severity::Warning, 100, 600),
        ];
        let p = FeedbackPrioritizer::new(&FeedbackConfig {
            top_n: 3,
            recency_half_life_ms: u64::MAX,
        });
        let out = p.prioritize(&list, 900);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].compensation.start_ms, 100);
    }

    #[test]
    fn test_stale_episode_decays() {
        let p = prioritizer();
        let c = comp(CompensationType::TrunkLean, Severity::Warning, 0, 1000);
        let fresh = p.priority(&c, 1000);
        let old = p.priority(&c, 4000);
        assert!((old - fresh / 2.0).abs() < 1e-4);
    }
}
