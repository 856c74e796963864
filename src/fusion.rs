//! Multimodal fusion
//!
//! Combines 0-3 modality signals into one arousal score. Each present
//! modality is weighted by `confidence × profile multiplier`; weights are
//! normalized over the present modalities only. Fused confidence is the
//! weakest individual confidence scaled by cross-modal agreement, so
//! confident but disagreeing modalities still yield low trust.

use crate::profile::ThresholdProfile;
use crate::types::{Modality, ModalitySignal};
use std::collections::BTreeMap;
use tracing::debug;

/// Score reported when no modality carries weight
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Output of a single fusion call
#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutcome {
    /// Weighted arousal score (0-1)
    pub score: f64,
    /// Agreement-penalized confidence (0-1)
    pub confidence: f64,
    /// Normalized weight per present modality (sums to 1 when non-empty)
    pub contributions: BTreeMap<Modality, f64>,
}

impl FusionOutcome {
    /// Neutral outcome for frames without usable signal
    pub fn insufficient() -> Self {
        Self {
            score: NEUTRAL_SCORE,
            confidence: 0.0,
            contributions: BTreeMap::new(),
        }
    }

    pub fn is_insufficient(&self) -> bool {
        self.contributions.is_empty()
    }
}

/// Stateless confidence-adaptive fusion
pub struct FusionEngine;

impl FusionEngine {
    /// Fuse the present modality signals under `profile`.
    ///
    /// Duplicate modalities keep the most confident signal. Non-finite and
    /// zero-weight signals are treated as absent.
    pub fn fuse(signals: &[ModalitySignal], profile: &ThresholdProfile) -> FusionOutcome {
        let present = select_present(signals, profile);
        let total_weight: f64 = present.iter().map(|(_, weight)| weight).sum();

        if present.is_empty() || total_weight <= f64::EPSILON {
            debug!(
                signals = signals.len(),
                reason = "insufficient_signal",
                "no weighted modality; using neutral score"
            );
            return FusionOutcome::insufficient();
        }

        let mut score = 0.0;
        let mut contributions = BTreeMap::new();
        for (signal, weight) in &present {
            let share = weight / total_weight;
            score += share * signal.value;
            contributions.insert(signal.modality, share);
        }

        let values: Vec<f64> = present.iter().map(|(s, _)| s.value).collect();
        let agreement = agreement(&values);
        let weakest = present
            .iter()
            .map(|(s, _)| s.confidence)
            .fold(f64::INFINITY, f64::min);
        let confidence = (agreement * weakest).clamp(0.0, 1.0);

        FusionOutcome {
            score: score.clamp(0.0, 1.0),
            confidence,
            contributions,
        }
    }
}

/// `max(0, 1 - 2 × population stddev)` of the modality values
pub fn agreement(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 1.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (1.0 - 2.0 * variance.sqrt()).max(0.0)
}

fn select_present<'a>(
    signals: &'a [ModalitySignal],
    profile: &ThresholdProfile,
) -> Vec<(&'a ModalitySignal, f64)> {
    let mut best: BTreeMap<Modality, &ModalitySignal> = BTreeMap::new();
    for signal in signals {
        if !signal.is_finite() {
            debug!(modality = signal.modality.as_str(), "skipping non-finite signal");
            continue;
        }
        match best.get(&signal.modality) {
            Some(existing) if existing.confidence >= signal.confidence => {}
            _ => {
                best.insert(signal.modality, signal);
            }
        }
    }

    best.into_values()
        .map(|signal| {
            let weight = signal.confidence.clamp(0.0, 1.0) * profile.multiplier(signal.modality);
            (signal, weight)
        })
        .filter(|(_, weight)| *weight > 0.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{build_threshold_profile, TraitCategory, DEFAULT_BAND_BOUNDARIES};
    use chrono::Utc;

    fn signal(modality: Modality, value: f64, confidence: f64) -> ModalitySignal {
        ModalitySignal::new(modality, value, confidence, Utc::now())
    }

    #[test]
    fn test_no_signal_is_neutral() {
        let outcome = FusionEngine::fuse(&[], &ThresholdProfile::default());
        assert_eq!(outcome.score, NEUTRAL_SCORE);
        assert_eq!(outcome.confidence, 0.0);
        assert!(outcome.is_insufficient());
    }

    #[test]
    fn test_zero_confidence_everywhere_is_neutral() {
        let signals = [signal(Modality::Pose, 0.9, 0.0), signal(Modality::Face, 0.1, 0.0)];
        let outcome = FusionEngine::fuse(&signals, &ThresholdProfile::default());
        assert_eq!(outcome.score, NEUTRAL_SCORE);
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_single_modality_passes_through() {
        let signals = [signal(Modality::Voice, 0.37, 0.64)];
        let outcome = FusionEngine::fuse(&signals, &ThresholdProfile::default());
        assert_eq!(outcome.score, 0.37);
        assert_eq!(outcome.confidence, 0.64);
        assert_eq!(outcome.contributions.get(&Modality::Voice), Some(&1.0));
    }

    #[test]
    fn test_disagreement_penalizes_confidence() {
        let profile = ThresholdProfile::default();
        let split = FusionEngine::fuse(
            &[signal(Modality::Pose, 0.2, 0.8), signal(Modality::Face, 0.8, 0.8)],
            &profile,
        );
        let agreeing = FusionEngine::fuse(
            &[signal(Modality::Pose, 0.5, 0.8), signal(Modality::Face, 0.5, 0.8)],
            &profile,
        );
        assert!((split.score - 0.5).abs() < 1e-12);
        assert!(split.confidence < agreeing.confidence);
        // stddev 0.3 -> agreement 0.4
        assert!((split.confidence - 0.32).abs() < 1e-9);
        assert!((agreeing.confidence - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_pose_face_conflict_scenario() {
        let signals = [signal(Modality::Pose, 0.1, 0.9), signal(Modality::Face, 0.9, 0.9)];
        let outcome = FusionEngine::fuse(&signals, &ThresholdProfile::default());
        assert!((outcome.score - 0.5).abs() < 1e-9);
        assert!(outcome.confidence < 0.9 / 2.0);
        // stddev 0.4 -> agreement 0.2
        assert!((outcome.confidence - 0.18).abs() < 1e-9);
        assert!(!outcome.contributions.contains_key(&Modality::Voice));
    }

    #[test]
    fn test_confidence_drives_weights() {
        let signals = [signal(Modality::Pose, 0.0, 0.25), signal(Modality::Face, 1.0, 0.75)];
        let outcome = FusionEngine::fuse(&signals, &ThresholdProfile::default());
        assert!((outcome.score - 0.75).abs() < 1e-12);
        let total: f64 = outcome.contributions.values().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_profile_multipliers_shift_weights() {
        let profile = build_threshold_profile(
            DEFAULT_BAND_BOUNDARIES,
            None,
            Some(TraitCategory::RepetitiveMovement),
        )
        .unwrap();
        let signals = [signal(Modality::Pose, 1.0, 0.8), signal(Modality::Face, 0.0, 0.8)];
        let outcome = FusionEngine::fuse(&signals, &profile);
        // Pose weight 0.8 * 0.6, Face weight 0.8 * 1.0
        assert!((outcome.score - 0.375).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_modality_keeps_most_confident() {
        let signals = [signal(Modality::Face, 0.9, 0.3), signal(Modality::Face, 0.2, 0.7)];
        let outcome = FusionEngine::fuse(&signals, &ThresholdProfile::default());
        assert_eq!(outcome.score, 0.2);
        assert_eq!(outcome.confidence, 0.7);
    }

    #[test]
    fn test_agreement_floor() {
        assert_eq!(agreement(&[0.0, 1.0]), 0.0);
        assert_eq!(agreement(&[0.4]), 1.0);
    }
}
