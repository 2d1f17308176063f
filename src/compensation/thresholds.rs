//! Clinical thresholds for the compensation detectors.
//!
//! ```toml
//! [thresholds]
//! version = 1
//!
//! [thresholds.entries.knee_valgus]
//! warning = 5.0
//! critical = 10.0
//! unit = "percent"
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{CompensationType, Severity};
use crate::error::{Error, Result};

pub const THRESHOLD_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Degrees,
    /// Percent of a reference length (limb length, target angle)
    Percent,
    /// Absolute distance in normalized image coordinates
    Normalized,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Unit::Degrees => "deg",
            Unit::Percent => "%",
            Unit::Normalized => "norm",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f32,
    pub critical: f32,
    pub unit: Unit,
}

impl Threshold {
    pub fn new(warning: f32, critical: f32, unit: Unit) -> Self {
        Self {
            warning,
            critical,
            unit,
        }
    }

    /// Severity of a magnitude, `None` below the warning boundary
    pub fn classify(&self, magnitude: f32) -> Option<Severity> {
        if !magnitude.is_finite() {
            None
        } else if magnitude >= self.critical {
            Some(Severity::Critical)
        } else if magnitude >= self.warning {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    fn validate(&self, kind: CompensationType) -> Result<()> {
        if !self.warning.is_finite() || !self.critical.is_finite() {
            return Err(Error::ConfigValidation(format!(
                "{}: thresholds must be finite",
                kind
            )));
        }
        if self.warning < 0.0 {
            return Err(Error::ConfigValidation(format!(
                "{}: warning {} is negative",
                kind, self.warning
            )));
        }
        if self.critical <= self.warning {
            return Err(Error::ConfigValidation(format!(
                "{}: critical {} must be greater than warning {}",
                kind, self.critical, self.warning
            )));
        }
        if !kind.supported_units().contains(&self.unit) {
            return Err(Error::ConfigValidation(format!(
                "{}: unit '{}' is not supported",
                kind, self.unit
            )));
        }
        Ok(())
    }
}

/// Versioned map of compensation type to threshold
///
/// Immutable while a measurement pass runs. `reload` and `tune` validate before
/// anything is swapped, so a failed call leaves the previous entries in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_entries")]
    pub entries: BTreeMap<CompensationType, Threshold>,
}

fn default_version() -> u32 { THRESHOLD_SCHEMA_VERSION }

fn default_entries() -> BTreeMap<CompensationType, Threshold> {
    use CompensationType::*;
    BTreeMap::from([
        (ShoulderHiking, Threshold::new(8.0, 15.0, Unit::Degrees)),
        (TrunkLean, Threshold::new(10.0, 20.0, Unit::Degrees)),
        (KneeValgus, Threshold::new(5.0, 10.0, Unit::Percent)),
        (HeelLift, Threshold::new(10.0, 20.0, Unit::Degrees)),
        (PelvicTilt, Threshold::new(5.0, 10.0, Unit::Degrees)),
        (IncompleteRom, Threshold::new(25.0, 50.0, Unit::Percent)),
        (WristDeviation, Threshold::new(15.0, 25.0, Unit::Degrees)),
        (ShoulderCompensation, Threshold::new(20.0, 35.0, Unit::Degrees)),
    ])
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            entries: default_entries(),
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != THRESHOLD_SCHEMA_VERSION {
            return Err(Error::ConfigValidation(format!(
                "unsupported threshold version {} (expected {})",
                self.version, THRESHOLD_SCHEMA_VERSION
            )));
        }
        for (kind, threshold) in &self.entries {
            threshold.validate(*kind)?;
        }
        Ok(())
    }

    pub fn get(&self, kind: CompensationType) -> Option<&Threshold> {
        self.entries.get(&kind)
    }

    /// Replace every entry with `next` after validating it
    pub fn reload(&mut self, next: ThresholdConfig) -> Result<()> {
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Types with no entry. Their detectors never run, so a partial table
    /// silently disables everything it leaves out.
    pub fn uncovered(&self) -> Vec<CompensationType> {
        CompensationType::ALL
            .into_iter()
            .filter(|kind| !self.entries.contains_key(kind))
            .collect()
    }

    /// Change one entry; the whole document is re-validated
    pub fn tune(&mut self, kind: CompensationType, threshold: Threshold) -> Result<()> {
        let mut next = self.clone();
        next.entries.insert(kind, threshold);
        self.reload(next)
    }
}

/// Converts between distance conventions used by different landmark layouts
///
/// Some deployments express distance thresholds as a percentage of limb length,
/// others as an absolute distance in normalized image units. The clinically
/// correct mapping is not settled, so detectors go through this trait.
pub trait UnitAdapter: Send + Sync {
    /// Express `distance` (normalized units) in `unit`, given the reference limb length
    fn distance_in(&self, distance: f32, limb_length: f32, unit: Unit) -> Option<f32>;
}

/// Percent = distance / limb length × 100
#[derive(Debug, Clone, Copy, Default)]
pub struct LimbLengthAdapter;

impl UnitAdapter for LimbLengthAdapter {
    fn distance_in(&self, distance: f32, limb_length: f32, unit: Unit) -> Option<f32> {
        match unit {
            Unit::Normalized => Some(distance),
            Unit::Percent if limb_length > f32::EPSILON => Some(distance / limb_length * 100.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        ThresholdConfig::default().validate().unwrap();
    }

    #[test]
    fn test_critical_below_warning_rejected() {
        let mut cfg = ThresholdConfig::default();
        cfg.entries.insert(
            CompensationType::TrunkLean,
            Threshold::new(20.0, 10.0, Unit::Degrees),
        );
        assert!(matches!(cfg.validate(), Err(Error::ConfigValidation(_))));
    }

    #[test]
    fn test_critical_equal_warning_rejected() {
        let mut cfg = ThresholdConfig::default();
        cfg.entries.insert(
            CompensationType::HeelLift,
            Threshold::new(10.0, 10.0, Unit::Degrees),
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unsupported_unit_rejected() {
        let mut cfg = ThresholdConfig::default();
        cfg.entries.insert(
            CompensationType::TrunkLean,
            Threshold::new(5.0, 10.0, Unit::Percent),
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_tune_failure_keeps_previous() {
        let mut cfg = ThresholdConfig::default();
        let before = cfg.clone();
        let err = cfg.tune(
            CompensationType::KneeValgus,
            Threshold::new(12.0, 6.0, Unit::Percent),
        );
        assert!(err.is_err());
        assert_eq!(cfg, before);

        cfg.tune(
            CompensationType::KneeValgus,
            Threshold::new(6.0, 12.0, Unit::Percent),
        )
        .unwrap();
        assert_eq!(cfg.get(CompensationType::KneeValgus).unwrap().warning, 6.0);
    }

    #[test]
    fn test_uncovered_lists_removed_entries() {
        let mut cfg = ThresholdConfig::default();
        assert!(cfg.uncovered().is_empty());
        cfg.entries.remove(&CompensationType::HeelLift);
        cfg.entries.remove(&CompensationType::IncompleteRom);
        assert_eq!(
            cfg.uncovered(),
            vec![CompensationType::HeelLift, CompensationType::IncompleteRom]
        );
    }

    #[test]
    fn test_classify() {
        let t = Threshold::new(5.0, 10.0, Unit::Percent);
        assert_eq!(t.classify(4.9), None);
        assert_eq!(t.classify(5.0), Some(Severity::Warning));
        assert_eq!(t.classify(12.0), Some(Severity::Critical));
        assert_eq!(t.classify(f32::NAN), None);
    }

    #[test]
    fn test_limb_length_adapter() {
        let a = LimbLengthAdapter;
        assert_eq!(a.distance_in(0.04, 0.4, Unit::Normalized), Some(0.04));
        let pct = a.distance_in(0.04, 0.4, Unit::Percent).unwrap();
        assert!((pct - 10.0).abs() < 1e-4);
        assert_eq!(a.distance_in(0.04, 0.0, Unit::Percent), None);
        assert_eq!(a.distance_in(0.04, 0.4, Unit::Degrees), None);
    }

    #[test]
    fn test_toml_round_trip_shape() {
        let src = r#"
            version = 1
            [entries.knee_valgus]
            warning = 5.0
            critical = 10.0
            unit = "percent"
        "#;
        let cfg: ThresholdConfig = toml::from_str(src).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.entries.len(), 1);
        assert_eq!(cfg.get(CompensationType::KneeValgus).unwrap().unit, Unit::Percent);
    }
}
