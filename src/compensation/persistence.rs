use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::detectors::Candidate;
use super::{Compensation, CompensationType};
use crate::pose::Side;

#[derive(Debug, Clone, Copy)]
struct Track {
    onset_ms: u64,
    /// Index into `PersistenceFilter::episodes` once confirmed
    episode: Option<usize>,
}

/// Debounces per-frame candidates into compensation episodes
///
/// A (type, side) breach is confirmed once it has persisted for `dwell_ms`
/// without interruption. A confirmed episode is reported exactly once and then
/// extended in place (end time, peak severity, peak magnitude) until a frame
/// measures that type and side without breaching. Frames where the side could
/// not be measured neither extend nor end the episode.
///
/// Finished episodes are kept for `retention_ms` after their end, then dropped.
#[derive(Debug)]
pub struct PersistenceFilter {
    dwell_ms: u64,
    retention_ms: u64,
    tracks: HashMap<(CompensationType, Side), Track>,
    episodes: Vec<Compensation>,
}

impl PersistenceFilter {
    pub fn new(dwell_ms: u64, retention_ms: u64) -> Self {
        Self {
            dwell_ms,
            retention_ms,
            tracks: HashMap::new(),
            episodes: Vec::new(),
        }
    }

    /// Feed one frame; returns episodes confirmed on this frame
    ///
    /// `evaluated` lists every (type, side) a detector actually measured. Tracks
    /// outside it are left alone, so a movement switch or a landmark dropping
    /// below the confidence threshold does not split an episode.
    pub fn observe(
        &mut self,
        timestamp_ms: u64,
        evaluated: &[(CompensationType, Side)],
        candidates: &[Candidate],
    ) -> Vec<Compensation> {
        let mut confirmed = Vec::new();

        for c in candidates {
            let key = (c.kind, c.side);
            let track = self.tracks.entry(key).or_insert(Track {
                onset_ms: timestamp_ms,
                episode: None,
            });

            match track.episode {
                Some(idx) => {
                    let ep = &mut self.episodes[idx];
                    ep.end_ms = ep.end_ms.max(timestamp_ms);
                    ep.severity = ep.severity.max(c.severity);
                    ep.magnitude = ep.magnitude.max(c.magnitude);
                }
                None if timestamp_ms.saturating_sub(track.onset_ms) >= self.dwell_ms => {
                    let ep = Compensation {
                        kind: c.kind,
                        severity: c.severity,
                        side: c.side,
                        magnitude: c.magnitude,
                        unit: c.unit,
                        start_ms: track.onset_ms,
                        end_ms: timestamp_ms,
                    };
                    debug!(
                        "compensation confirmed: {} {} {:.1}{} ({:?})",
                        ep.kind, ep.side, ep.magnitude, ep.unit, ep.severity
                    );
                    track.episode = Some(self.episodes.len());
                    self.episodes.push(ep.clone());
                    confirmed.push(ep);
                }
                None => {}
            }
        }

        // 計測できたのに候補が出なかった側だけ途切れたとみなす
        self.tracks.retain(|key, _| {
            !evaluated.contains(key) || candidates.iter().any(|c| (c.kind, c.side) == *key)
        });

        self.prune(timestamp_ms);
        confirmed
    }

    /// Drop finished episodes that ended more than `retention_ms` before `now_ms`
    fn prune(&mut self, now_ms: u64) {
        let horizon = now_ms.saturating_sub(self.retention_ms);
        let ongoing: HashSet<usize> = self.tracks.values().filter_map(|t| t.episode).collect();
        let keep: Vec<bool> = self
            .episodes
            .iter()
            .enumerate()
            .map(|(idx, ep)| ongoing.contains(&idx) || ep.end_ms >= horizon)
            .collect();
        if keep.iter().all(|k| *k) {
            return;
        }

        // 残すエピソードの新しい添字
        let mut remap = Vec::with_capacity(keep.len());
        let mut next = 0;
        for &k in &keep {
            remap.push(next);
            if k {
                next += 1;
            }
        }
        for track in self.tracks.values_mut() {
            if let Some(idx) = track.episode.as_mut() {
                *idx = remap[*idx];
            }
        }
        let dropped = keep.len() - next;
        let mut flags = keep.into_iter();
        self.episodes.retain(|_| flags.next().unwrap_or(true));
        debug!("dropped {} episodes older than {}ms", dropped, horizon);
    }

    /// Record an episode judged outside the per-frame stream (e.g. per repetition)
    pub fn record(&mut self, episode: Compensation) {
        let end_ms = episode.end_ms;
        self.episodes.push(episode);
        self.prune(end_ms);
    }

    /// Retained episodes in confirmation order
    pub fn confirmed(&self) -> &[Compensation] {
        &self.episodes
    }

    /// Confirmed episodes whose breach is still ongoing
    pub fn active(&self) -> Vec<&Compensation> {
        self.tracks
            .values()
            .filter_map(|t| t.episode)
            .map(|idx| &self.episodes[idx])
            .collect()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.episodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compensation::{Severity, Unit};

    fn valgus(magnitude: f32, severity: Severity) -> Candidate {
        Candidate {
            kind: CompensationType::KneeValgus,
            side: Side::Left,
            severity,
            magnitude,
            unit: Unit::Percent,
        }
    }

    const EVAL: &[(CompensationType, Side)] = &[
        (CompensationType::KneeValgus, Side::Left),
        (CompensationType::KneeValgus, Side::Right),
    ];

    fn filter(dwell_ms: u64) -> PersistenceFilter {
        PersistenceFilter::new(dwell_ms, 60_000)
    }

    #[test]
    fn test_single_frame_breach_not_confirmed() {
        let mut p = filter(250);
        assert!(p.observe(0, EVAL, &[valgus(12.0, Severity::Critical)]).is_empty());
        assert!(p.observe(33, EVAL, &[]).is_empty());
        assert!(p.confirmed().is_empty());
    }

    #[test]
    fn test_breach_one_frame_short_of_dwell() {
        let mut p = filter(250);
        for t in (0..=200).step_by(50) {
            assert!(p.observe(t, EVAL, &[valgus(6.0, Severity::Warning)]).is_empty());
        }
        assert!(p.confirmed().is_empty());
    }

    #[test]
    fn test_breach_for_exactly_dwell_confirms_once() {
        let mut p = filter(250);
        let mut emitted = 0;
        for t in (0..=250).step_by(50) {
            emitted += p.observe(t, EVAL, &[valgus(6.0, Severity::Warning)]).len();
        }
        assert_eq!(emitted, 1);
        for t in (300..=600).step_by(50) {
            emitted += p.observe(t, EVAL, &[valgus(11.0, Severity::Critical)]).len();
        }
        assert_eq!(emitted, 1);

        let ep = &p.confirmed()[0];
        assert_eq!(ep.start_ms, 0);
        assert_eq!(ep.end_ms, 600);
        assert_eq!(ep.severity, Severity::Critical);
        assert_eq!(ep.magnitude, 11.0);
        assert_eq!(p.active().len(), 1);
    }

    #[test]
    fn test_gap_starts_new_episode() {
        let mut p = filter(100);
        for t in [0, 50, 100] {
            p.observe(t, EVAL, &[valgus(6.0, Severity::Warning)]);
        }
        p.observe(150, EVAL, &[]);
        assert!(p.active().is_empty());
        for t in [200, 250, 300] {
            p.observe(t, EVAL, &[valgus(6.0, Severity::Warning)]);
        }
        assert_eq!(p.confirmed().len(), 2);
        assert_eq!(p.confirmed()[1].start_ms, 200);
    }

    #[test]
    fn test_unevaluated_type_keeps_track() {
        let mut p = filter(100);
        p.observe(0, EVAL, &[valgus(6.0, Severity::Warning)]);
        p.observe(50, &[(CompensationType::TrunkLean, Side::Bilateral)], &[]);
        let out = p.observe(100, EVAL, &[valgus(6.0, Severity::Warning)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].start_ms, 0);
    }

    #[test]
    fn test_unmeasured_side_keeps_episode() {
        let mut p = filter(100);
        for t in [0, 50, 100] {
            p.observe(t, EVAL, &[valgus(12.0, Severity::Critical)]);
        }
        // 左膝の信頼度が落ちた1フレーム: 右だけ計測できた
        let right_only = &[(CompensationType::KneeValgus, Side::Right)];
        p.observe(150, right_only, &[]);
        assert_eq!(p.active().len(), 1);
        for t in [200, 250] {
            assert!(p.observe(t, EVAL, &[valgus(12.0, Severity::Critical)]).is_empty());
        }
        assert_eq!(p.confirmed().len(), 1);
        assert_eq!(p.confirmed()[0].start_ms, 0);
        assert_eq!(p.confirmed()[0].end_ms, 250);
    }

    #[test]
    fn test_old_episodes_are_dropped() {
        let mut p = PersistenceFilter::new(0, 1000);
        p.observe(0, EVAL, &[valgus(6.0, Severity::Warning)]);
        p.observe(100, EVAL, &[]);
        for t in [500, 600] {
            p.observe(t, EVAL, &[valgus(7.0, Severity::Warning)]);
        }
        assert_eq!(p.confirmed().len(), 2);

        // 2件目は継続中なので保持期間を過ぎても残る
        p.observe(1500, &[], &[]);
        assert_eq!(p.confirmed().len(), 1);
        assert_eq!(p.confirmed()[0].start_ms, 500);
        assert_eq!(p.active().len(), 1);

        let out = p.observe(1600, EVAL, &[valgus(9.0, Severity::Warning)]);
        assert!(out.is_empty());
        assert_eq!(p.confirmed()[0].end_ms, 1600);
        assert_eq!(p.confirmed()[0].magnitude, 9.0);
    }

    #[test]
    fn test_history_stays_bounded() {
        let mut p = PersistenceFilter::new(0, 1000);
        for i in 0..10_000u64 {
            let t = i * 100;
            let candidates = if i % 2 == 0 {
                vec![valgus(6.0, Severity::Warning)]
            } else {
                Vec::new()
            };
            p.observe(t, EVAL, &candidates);
        }
        assert!(p.confirmed().len() <= 6, "{} episodes kept", p.confirmed().len());
    }
}
