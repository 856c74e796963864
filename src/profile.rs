//! Per-individual threshold profiles
//!
//! A `ThresholdProfile` carries the four band cut-points and per-modality
//! weight multipliers for one individual. Personalization happens only here,
//! once per setup or recalibration, so the classifier never adjusts anything
//! per call. Two adjustments compose in a fixed order on top of the default
//! boundaries:
//!
//! 1. trait adjustment (weight multipliers, wider Calm region)
//! 2. baseline calibration (bounded offset of the lower boundaries)
//!
//! The Crisis-entry boundary never ends up below its default.

use crate::error::AttuneError;
use crate::types::{Modality, ModalitySignal};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Built-in band boundaries: Shutdown | Calm | Elevated | Escalating | Crisis
pub const DEFAULT_BAND_BOUNDARIES: [f64; 4] = [0.20, 0.45, 0.65, 0.85];

/// Largest shift baseline calibration may apply
pub const MAX_BASELINE_OFFSET: f64 = 0.15;

/// Narrowest band width an adjustment may leave behind
pub const MIN_BAND_WIDTH: f64 = 0.02;

/// Recommended resting sample length for calibration
pub const RECOMMENDED_BASELINE_SECS: i64 = 45;

/// How a profile was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    Default,
    BaselineCalibrated,
    DiagnosisAdjusted,
}

/// Declared behavioral trait category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitCategory {
    /// Repetitive self-soothing movement (rocking, flapping)
    RepetitiveMovement,
    /// Repetitive self-soothing vocalization
    VocalRepetition,
    /// Facial expression is a weak arousal indicator for this individual
    ReducedFacialExpression,
    /// High baseline motor activity
    HighActivity,
    /// Heightened sensitivity to sound
    SensorySensitive,
}

impl TraitCategory {
    pub const ALL: [TraitCategory; 5] = [
        TraitCategory::RepetitiveMovement,
        TraitCategory::VocalRepetition,
        TraitCategory::ReducedFacialExpression,
        TraitCategory::HighActivity,
        TraitCategory::SensorySensitive,
    ];

    /// Lookup table entry for this category
    pub fn adjustment(&self) -> TraitAdjustment {
        let (pose, face, voice, movement, vocal) = match self {
            TraitCategory::RepetitiveMovement => (0.6, 1.0, 1.0, 1.3, 1.0),
            TraitCategory::VocalRepetition => (1.0, 1.0, 0.6, 1.0, 1.3),
            TraitCategory::ReducedFacialExpression => (1.2, 0.5, 1.2, 1.0, 1.0),
            TraitCategory::HighActivity => (0.7, 1.0, 1.0, 1.2, 1.0),
            TraitCategory::SensorySensitive => (1.0, 1.2, 0.8, 1.0, 1.1),
        };
        TraitAdjustment {
            modality_weight_multipliers: BTreeMap::from([
                (Modality::Pose, pose),
                (Modality::Face, face),
                (Modality::Voice, voice),
            ]),
            movement_threshold_multiplier: movement,
            vocal_threshold_multiplier: vocal,
        }
    }
}

/// Weight and threshold changes associated with a trait category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitAdjustment {
    pub modality_weight_multipliers: BTreeMap<Modality, f64>,
    /// Calm-region widening for movement-driven arousal (never below 1)
    pub movement_threshold_multiplier: f64,
    /// Calm-region widening for vocal-driven arousal (never below 1)
    pub vocal_threshold_multiplier: f64,
}

impl TraitAdjustment {
    /// Effective Calm-region widening factor
    pub fn calm_widening(&self) -> f64 {
        self.movement_threshold_multiplier
            .max(self.vocal_threshold_multiplier)
            .max(1.0)
    }
}

/// Signals recorded while the individual is known to be at rest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineSample {
    pub signals: Vec<ModalitySignal>,
}

impl BaselineSample {
    pub fn new(signals: Vec<ModalitySignal>) -> Self {
        Self { signals }
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Time spanned by the sample
    pub fn duration(&self) -> Duration {
        let first = self.signals.iter().map(|s| s.timestamp).min();
        let last = self.signals.iter().map(|s| s.timestamp).max();
        match (first, last) {
            (Some(first), Some(last)) => last - first,
            _ => Duration::zero(),
        }
    }

    /// Confidence- and multiplier-weighted mean value, if any weight is present
    pub fn weighted_average(&self, multipliers: &BTreeMap<Modality, f64>) -> Option<f64> {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for signal in self.signals.iter().filter(|s| s.is_finite()) {
            let weight = signal.confidence * multipliers.get(&signal.modality).copied().unwrap_or(1.0);
            weighted_sum += weight * signal.value;
            total_weight += weight;
        }
        if total_weight > f64::EPSILON {
            Some(weighted_sum / total_weight)
        } else {
            None
        }
    }
}

/// Calibrated band boundaries and modality weights for one individual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProfileRecord")]
pub struct ThresholdProfile {
    band_boundaries: [f64; 4],
    modality_weight_multipliers: BTreeMap<Modality, f64>,
    source: ProfileSource,
    trait_category: Option<TraitCategory>,
    baseline_offset: f64,
}

/// Unvalidated wire shape of a profile
#[derive(Deserialize)]
struct ProfileRecord {
    band_boundaries: [f64; 4],
    #[serde(default)]
    modality_weight_multipliers: BTreeMap<Modality, f64>,
    source: ProfileSource,
    #[serde(default)]
    trait_category: Option<TraitCategory>,
    #[serde(default)]
    baseline_offset: f64,
}

impl TryFrom<ProfileRecord> for ThresholdProfile {
    type Error = AttuneError;

    fn try_from(record: ProfileRecord) -> Result<Self, Self::Error> {
        let mut profile = ThresholdProfile::new(
            record.band_boundaries,
            record.modality_weight_multipliers,
            record.source,
        )?;
        profile.trait_category = record.trait_category;
        profile.baseline_offset = record.baseline_offset;
        Ok(profile)
    }
}

impl Default for ThresholdProfile {
    fn default() -> Self {
        Self {
            band_boundaries: DEFAULT_BAND_BOUNDARIES,
            modality_weight_multipliers: neutral_multipliers(),
            source: ProfileSource::Default,
            trait_category: None,
            baseline_offset: 0.0,
        }
    }
}

impl ThresholdProfile {
    /// Create a validated profile
    pub fn new(
        band_boundaries: [f64; 4],
        modality_weight_multipliers: BTreeMap<Modality, f64>,
        source: ProfileSource,
    ) -> Result<Self, AttuneError> {
        validate_boundaries(&band_boundaries)?;
        validate_multipliers(&modality_weight_multipliers)?;
        Ok(Self {
            band_boundaries,
            modality_weight_multipliers,
            source,
            trait_category: None,
            baseline_offset: 0.0,
        })
    }

    pub fn band_boundaries(&self) -> &[f64; 4] {
        &self.band_boundaries
    }

    /// Entry point of the most severe band
    pub fn crisis_boundary(&self) -> f64 {
        self.band_boundaries[3]
    }

    /// Weight multiplier for a modality (1.0 when unspecified)
    pub fn multiplier(&self, modality: Modality) -> f64 {
        self.modality_weight_multipliers
            .get(&modality)
            .copied()
            .unwrap_or(1.0)
    }

    pub fn modality_weight_multipliers(&self) -> &BTreeMap<Modality, f64> {
        &self.modality_weight_multipliers
    }

    pub fn source(&self) -> ProfileSource {
        self.source
    }

    pub fn trait_category(&self) -> Option<TraitCategory> {
        self.trait_category
    }

    /// Offset applied by baseline calibration (0 when uncalibrated)
    pub fn baseline_offset(&self) -> f64 {
        self.baseline_offset
    }

    /// Load a profile from JSON, rejecting invalid boundaries
    pub fn from_json(json: &str) -> Result<Self, AttuneError> {
        serde_json::from_str(json).map_err(|e| AttuneError::InvalidProfile(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, AttuneError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Build a personalized profile from default boundaries, an optional resting
/// baseline sample, and an optional trait category.
///
/// With neither adjustment the defaults come back unchanged.
pub fn build_threshold_profile(
    default_boundaries: [f64; 4],
    baseline: Option<&BaselineSample>,
    trait_category: Option<TraitCategory>,
) -> Result<ThresholdProfile, AttuneError> {
    validate_boundaries(&default_boundaries)?;

    let mut boundaries = default_boundaries;
    let mut multipliers = neutral_multipliers();
    let mut source = ProfileSource::Default;

    if let Some(category) = trait_category {
        let adjustment = category.adjustment();
        validate_multipliers(&adjustment.modality_weight_multipliers)?;
        multipliers = adjustment.modality_weight_multipliers.clone();
        boundaries = widen_calm_region(boundaries, adjustment.calm_widening());
        source = ProfileSource::DiagnosisAdjusted;
    }

    let mut baseline_offset = 0.0;
    if let Some(sample) = baseline.filter(|s| !s.is_empty()) {
        if sample.duration() < Duration::seconds(RECOMMENDED_BASELINE_SECS) {
            warn!(
                duration_secs = sample.duration().num_seconds(),
                recommended_secs = RECOMMENDED_BASELINE_SECS,
                "baseline sample is shorter than recommended"
            );
        }
        match sample.weighted_average(&multipliers) {
            Some(average) => {
                let calm_center = (default_boundaries[0] + default_boundaries[1]) / 2.0;
                let requested =
                    (average - calm_center).clamp(-MAX_BASELINE_OFFSET, MAX_BASELINE_OFFSET);
                let (shifted, applied) = shift_lower_boundaries(boundaries, requested);
                boundaries = shifted;
                baseline_offset = applied;
                source = ProfileSource::BaselineCalibrated;
            }
            None => warn!("baseline sample carries no confidence; skipping calibration"),
        }
    }

    // Crisis entry never drops below the supplied default
    boundaries[3] = boundaries[3].max(default_boundaries[3]);

    let mut profile = ThresholdProfile::new(boundaries, multipliers, source)?;
    profile.trait_category = trait_category;
    profile.baseline_offset = baseline_offset;

    info!(
        source = ?profile.source,
        trait_category = ?trait_category,
        baseline_offset,
        boundaries = ?profile.band_boundaries,
        "threshold profile built"
    );
    Ok(profile)
}

fn neutral_multipliers() -> BTreeMap<Modality, f64> {
    Modality::ALL.iter().map(|m| (*m, 1.0)).collect()
}

/// Stretch the Calm band upward; later boundaries only move up to keep order.
///
/// The Calm edge is capped so the two bands above it still fit below 1.0 at
/// the minimum width.
fn widen_calm_region(mut b: [f64; 4], factor: f64) -> [f64; 4] {
    let factor = factor.max(1.0);
    let widened = (b[0] + (b[1] - b[0]) * factor).min(1.0 - 2.0 * MIN_BAND_WIDTH);
    if widened <= b[1] {
        return b;
    }
    b[1] = widened;
    if b[2] < b[1] + MIN_BAND_WIDTH {
        b[2] = b[1] + MIN_BAND_WIDTH;
        if b[3] < b[2] + MIN_BAND_WIDTH {
            b[3] = (b[2] + MIN_BAND_WIDTH).min(1.0);
        }
    }
    b
}

/// Add `offset` to the three lower boundaries, leaving Crisis entry alone.
///
/// The offset is first narrowed so that Shutdown entry stays at or above 0
/// and Escalating keeps its minimum width below Crisis; the shift is uniform,
/// so the lower bands keep their widths. Returns the offset actually applied.
fn shift_lower_boundaries(mut b: [f64; 4], offset: f64) -> ([f64; 4], f64) {
    let lowest = -b[0];
    let highest = (b[3] - b[2] - MIN_BAND_WIDTH).max(0.0);
    let applied = offset.clamp(lowest, highest);
    for boundary in b.iter_mut().take(3) {
        *boundary += applied;
    }
    b[0] = b[0].max(0.0);
    (b, applied)
}

fn validate_boundaries(boundaries: &[f64; 4]) -> Result<(), AttuneError> {
    if boundaries.iter().any(|b| !b.is_finite() || *b < 0.0 || *b > 1.0) {
        return Err(AttuneError::InvalidProfile(format!(
            "boundaries must be finite and within [0, 1]: {:?}",
            boundaries
        )));
    }
    if boundaries.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(AttuneError::InvalidProfile(format!(
            "boundaries must be strictly increasing: {:?}",
            boundaries
        )));
    }
    Ok(())
}

fn validate_multipliers(multipliers: &BTreeMap<Modality, f64>) -> Result<(), AttuneError> {
    match multipliers.iter().find(|(_, m)| !m.is_finite() || **m < 0.0) {
        Some((modality, m)) => Err(AttuneError::InvalidProfile(format!(
            "multiplier for {} must be finite and non-negative, got {}",
            modality.as_str(),
            m
        ))),
        None => Ok(()),
    }
}
