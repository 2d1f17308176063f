use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::clinical::Movement;
use crate::compensation::ThresholdConfig;
use crate::error::Error;
use crate::pose::Schema;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub measurement: MeasurementConfig,
    #[serde(default)]
    pub rhythm: RhythmConfig,
    #[serde(default)]
    pub compensation: CompensationConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

/// One Euro Filter設定
#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    /// 最小カットオフ周波数 (Hz)。小さいほど静止時に滑らか
    #[serde(default = "default_min_cutoff")]
    pub min_cutoff: f32,
    /// 速度係数。大きいほど速い動きへの追従が良い
    #[serde(default = "default_beta")]
    pub beta: f32,
    /// 微分用カットオフ周波数 (Hz)
    #[serde(default = "default_d_cutoff")]
    pub d_cutoff: f32,
    /// dtの上限 (ms)。フレーム欠落後の大ジャンプを抑える
    #[serde(default = "default_max_dt_ms")]
    pub max_dt_ms: u64,
}

fn default_min_cutoff() -> f32 { 1.5 }
fn default_beta() -> f32 { 0.3 }
fn default_d_cutoff() -> f32 { 1.0 }
fn default_max_dt_ms() -> u64 { 500 }

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_cutoff: default_min_cutoff(),
            beta: default_beta(),
            d_cutoff: default_d_cutoff(),
            max_dt_ms: default_max_dt_ms(),
        }
    }
}

/// 解剖学的座標系キャッシュ設定
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// タイムスタンプ丸め単位 (ms)
    #[serde(default = "default_precision_ms")]
    pub precision_ms: u64,
    /// エントリ有効期間 (ms)
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_precision_ms() -> u64 { 1 }
fn default_ttl_ms() -> u64 { 1000 }
fn default_max_entries() -> usize { 256 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            precision_ms: default_precision_ms(),
            ttl_ms: default_ttl_ms(),
            max_entries: default_max_entries(),
        }
    }
}

/// 関節角度計測設定
#[derive(Debug, Deserialize, Clone)]
pub struct MeasurementConfig {
    /// これ未満の信頼度のランドマークは使わない
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// ゼロ長ベクトル判定
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
    /// 運動ごとの目標角度 (度)。未指定の運動は標準値
    #[serde(default = "default_targets")]
    pub targets: BTreeMap<Movement, f32>,
    /// 胸骨切痕の高さ (股関節中点から体幹軸方向、股関節幅の倍数)
    #[serde(default = "default_sternal_height_ratio")]
    pub sternal_height_ratio: f32,
}

fn default_min_confidence() -> f32 { 0.3 }
fn default_epsilon() -> f32 { 1e-6 }
fn default_targets() -> BTreeMap<Movement, f32> {
    Movement::ALL.iter().map(|m| (*m, m.default_target())).collect()
}
fn default_sternal_height_ratio() -> f32 { 2.0 }

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            epsilon: default_epsilon(),
            targets: default_targets(),
            sternal_height_ratio: default_sternal_height_ratio(),
        }
    }
}

impl MeasurementConfig {
    pub fn target(&self, movement: Movement) -> f32 {
        self.targets
            .get(&movement)
            .copied()
            .unwrap_or_else(|| movement.default_target())
    }
}

/// 肩甲上腕リズム設定
#[derive(Debug, Deserialize, Clone)]
pub struct RhythmConfig {
    /// 上腕 : 肩甲帯 の標準比
    #[serde(default = "default_nominal_ratio")]
    pub nominal_ratio: f32,
    #[serde(default = "default_band_min")]
    pub band_min: f32,
    #[serde(default = "default_band_max")]
    pub band_max: f32,
    /// これ未満の肩甲帯挙上では比を計算しない (度)
    #[serde(default = "default_min_girdle_deg")]
    pub min_girdle_deg: f32,
    /// 範囲外のときの品質係数
    #[serde(default = "default_quality_penalty")]
    pub quality_penalty: f32,
}

fn default_nominal_ratio() -> f32 { 8.0 }
fn default_band_min() -> f32 { 5.0 }
fn default_band_max() -> f32 { 12.0 }
fn default_min_girdle_deg() -> f32 { 2.0 }
fn default_quality_penalty() -> f32 { 0.8 }

impl Default for RhythmConfig {
    fn default() -> Self {
        Self {
            nominal_ratio: default_nominal_ratio(),
            band_min: default_band_min(),
            band_max: default_band_max(),
            min_girdle_deg: default_min_girdle_deg(),
            quality_penalty: default_quality_penalty(),
        }
    }
}

/// 代償動作検出設定
#[derive(Debug, Deserialize, Clone)]
pub struct CompensationConfig {
    /// 連続してこの時間を超えたら確定 (ms)
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: u64,
    /// 終了してからこの時間を過ぎたエピソードは履歴から捨てる (ms)
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
}

fn default_dwell_ms() -> u64 { 250 }
fn default_retention_ms() -> u64 { 60_000 }

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            dwell_ms: default_dwell_ms(),
            retention_ms: default_retention_ms(),
        }
    }
}

/// フィードバック優先度設定
#[derive(Debug, Deserialize, Clone)]
pub struct FeedbackConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// 経過時間による減衰の半減期 (ms)
    #[serde(default = "default_recency_half_life_ms")]
    pub recency_half_life_ms: u64,
}

fn default_top_n() -> usize { 3 }
fn default_recency_half_life_ms() -> u64 { 3000 }

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            recency_half_life_ms: default_recency_half_life_ms(),
        }
    }
}

/// 合成データ検証設定
#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    /// 合格とみなす誤差 (度)
    #[serde(default = "default_tolerance_deg")]
    pub tolerance_deg: f32,
    #[serde(default = "default_min_pass_rate")]
    pub min_pass_rate: f32,
    #[serde(default = "default_frames_per_case")]
    pub frames_per_case: usize,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// 座標ノイズの標準偏差 (正規化座標)
    #[serde(default = "default_noise")]
    pub noise: f32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_schema")]
    pub schema: Schema,
    /// レポートに載せる誤差上位件数
    #[serde(default = "default_top_errors")]
    pub top_errors: usize,
}

fn default_tolerance_deg() -> f32 { 5.0 }
fn default_min_pass_rate() -> f32 { 0.9 }
fn default_frames_per_case() -> usize { 15 }
fn default_frame_interval_ms() -> u64 { 33 }
fn default_noise() -> f32 { 0.001 }
fn default_seed() -> u64 { 42 }
fn default_schema() -> Schema { Schema::BlazePose33 }
fn default_top_errors() -> usize { 10 }

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            tolerance_deg: default_tolerance_deg(),
            min_pass_rate: default_min_pass_rate(),
            frames_per_case: default_frames_per_case(),
            frame_interval_ms: default_frame_interval_ms(),
            noise: default_noise(),
            seed: default_seed(),
            schema: default_schema(),
            top_errors: default_top_errors(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::ConfigValidation(msg.into())
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// ファイルが無いときだけデフォルトにフォールバックする。
    /// 壊れたファイルや不正な値はエラー。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> std::result::Result<(), Error> {
        let f = &self.filter;
        if !(f.min_cutoff > 0.0 && f.d_cutoff > 0.0) {
            return Err(invalid("filter cutoffs must be positive"));
        }
        if !(f.beta >= 0.0) {
            return Err(invalid("filter.beta must be non-negative"));
        }
        if f.max_dt_ms == 0 {
            return Err(invalid("filter.max_dt_ms must be positive"));
        }

        if self.cache.precision_ms == 0 || self.cache.max_entries == 0 {
            return Err(invalid("cache.precision_ms and cache.max_entries must be positive"));
        }

        let m = &self.measurement;
        if !(0.0..=1.0).contains(&m.min_confidence) {
            return Err(invalid(format!(
                "measurement.min_confidence {} outside [0, 1]",
                m.min_confidence
            )));
        }
        if !(m.epsilon > 0.0) {
            return Err(invalid("measurement.epsilon must be positive"));
        }
        if !(m.sternal_height_ratio > 0.0 && m.sternal_height_ratio.is_finite()) {
            return Err(invalid("measurement.sternal_height_ratio must be positive"));
        }
        for (movement, target) in &m.targets {
            if !(target.is_finite() && *target > 0.0) {
                return Err(invalid(format!("target for {} must be positive", movement)));
            }
        }

        let r = &self.rhythm;
        if !(r.band_min > 0.0 && r.band_min < r.band_max) {
            return Err(invalid(format!(
                "rhythm band [{}, {}] is empty",
                r.band_min, r.band_max
            )));
        }
        if !(r.band_min..=r.band_max).contains(&r.nominal_ratio) {
            return Err(invalid("rhythm.nominal_ratio must lie inside the band"));
        }
        if !(r.quality_penalty > 0.0 && r.quality_penalty <= 1.0) {
            return Err(invalid("rhythm.quality_penalty must be in (0, 1]"));
        }
        if !(r.min_girdle_deg > 0.0) {
            return Err(invalid("rhythm.min_girdle_deg must be positive"));
        }

        if self.compensation.retention_ms == 0 {
            return Err(invalid("compensation.retention_ms must be positive"));
        }

        if self.feedback.top_n == 0 || self.feedback.recency_half_life_ms == 0 {
            return Err(invalid("feedback.top_n and recency_half_life_ms must be positive"));
        }

        let v = &self.validation;
        if !(v.tolerance_deg > 0.0) || !(0.0..=1.0).contains(&v.min_pass_rate) {
            return Err(invalid("validation tolerance/pass rate out of range"));
        }
        if v.frames_per_case == 0 || v.frame_interval_ms == 0 {
            return Err(invalid(
                "validation.frames_per_case and frame_interval_ms must be positive",
            ));
        }
        if !(v.noise >= 0.0) {
            return Err(invalid("validation.noise must be non-negative"));
        }

        self.thresholds.validate()?;
        for kind in self.thresholds.uncovered() {
            warn!("no threshold entry for {}; its detector is disabled", kind);
        }
        Ok(())
    }
}
