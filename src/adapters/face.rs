//! Face extractor adapter
//!
//! Distress-related action units are averaged on the 0-5 FACS intensity scale.

use super::{all_finite, scale_unit, ExtractorFrame, FeatureAdapter};
use crate::types::{Modality, ModalitySignal};
use tracing::warn;

/// Upper end of the FACS intensity scale
const MAX_AU_INTENSITY: f64 = 5.0;

/// Adapter for facial expression features
#[derive(Debug, Clone, Default)]
pub struct FaceAdapter;

impl FeatureAdapter for FaceAdapter {
    fn modality(&self) -> Modality {
        Modality::Face
    }

    fn adapt(&self, frame: &ExtractorFrame) -> Option<ModalitySignal> {
        let face = frame.face.as_ref()?;
        // Brow lowering and lip stretch carry the most weight for distress
        let weighted = [
            (face.brow_lowerer, 0.3),
            (face.upper_lid_raiser, 0.15),
            (face.lip_corner_depressor, 0.2),
            (face.lip_stretcher, 0.25),
            (face.jaw_drop, 0.1),
        ];
        let raw: Vec<f64> = weighted.iter().map(|(v, _)| *v).collect();
        if !all_finite(&raw) || !face.detection_confidence.is_finite() {
            warn!(timestamp = %frame.timestamp, "dropping face features with non-finite values");
            return None;
        }

        let value: f64 = weighted
            .iter()
            .map(|(intensity, weight)| scale_unit(*intensity, 0.0, MAX_AU_INTENSITY) * weight)
            .sum();

        Some(ModalitySignal::new(
            Modality::Face,
            value,
            face.detection_confidence,
            frame.timestamp,
        ))
    }
}
