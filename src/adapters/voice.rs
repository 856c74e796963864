//! Voice extractor adapter
//!
//! Prosodic arousal is blended from loudness, pitch height, and pitch variability.
//! Unvoiced frames are still emitted; their voiced probability becomes the confidence.

use super::{all_finite, scale_unit, ExtractorFrame, FeatureAdapter};
use crate::types::{Modality, ModalitySignal};
use tracing::warn;

/// Pitch range (Hz) mapped onto `[0, 1]`; tuned for children's voices
const PITCH_FLOOR_HZ: f64 = 200.0;
const PITCH_CEILING_HZ: f64 = 600.0;
/// Loudness range (dB SPL) mapped onto `[0, 1]`
const LOUDNESS_FLOOR_DB: f64 = 40.0;
const LOUDNESS_CEILING_DB: f64 = 90.0;
/// Pitch variability (semitones) treated as maximal
const MAX_PITCH_VARIABILITY_ST: f64 = 6.0;

const LOUDNESS_WEIGHT: f64 = 0.4;
const PITCH_WEIGHT: f64 = 0.35;
const VARIABILITY_WEIGHT: f64 = 0.25;

/// Adapter for voice prosody features
#[derive(Debug, Clone)]
pub struct VoiceAdapter {
    pitch_floor_hz: f64,
    pitch_ceiling_hz: f64,
}

impl Default for VoiceAdapter {
    fn default() -> Self {
        Self {
            pitch_floor_hz: PITCH_FLOOR_HZ,
            pitch_ceiling_hz: PITCH_CEILING_HZ,
        }
    }
}

impl VoiceAdapter {
    /// Create an adapter with a custom pitch range (e.g. for adult voices)
    pub fn with_pitch_range(pitch_floor_hz: f64, pitch_ceiling_hz: f64) -> Self {
        Self {
            pitch_floor_hz,
            pitch_ceiling_hz,
        }
    }
}

impl FeatureAdapter for VoiceAdapter {
    fn modality(&self) -> Modality {
        Modality::Voice
    }

    fn adapt(&self, frame: &ExtractorFrame) -> Option<ModalitySignal> {
        let voice = frame.voice.as_ref()?;
        if !all_finite(&[
            voice.pitch_hz,
            voice.pitch_variability_st,
            voice.loudness_db,
            voice.voiced_probability,
        ]) {
            warn!(timestamp = %frame.timestamp, "dropping voice features with non-finite values");
            return None;
        }

        let loudness = scale_unit(voice.loudness_db, LOUDNESS_FLOOR_DB, LOUDNESS_CEILING_DB);
        let pitch = scale_unit(voice.pitch_hz, self.pitch_floor_hz, self.pitch_ceiling_hz);
        let variability = scale_unit(voice.pitch_variability_st, 0.0, MAX_PITCH_VARIABILITY_ST);
        let value =
            LOUDNESS_WEIGHT * loudness + PITCH_WEIGHT * pitch + VARIABILITY_WEIGHT * variability;

        Some(ModalitySignal::new(
            Modality::Voice,
            value,
            voice.voiced_probability,
            frame.timestamp,
        ))
    }
}
