//! Feature extractor adapters
//!
//! This module provides adapters that map raw extractor feature vectors onto
//! the common `ModalitySignal` record (value and confidence in `[0, 1]`).
//! Extractors are black boxes; a frame carries whatever they detected and a
//! missing modality is simply `None`.

mod face;
mod pose;
mod voice;

pub use face::FaceAdapter;
pub use pose::PoseAdapter;
pub use voice::VoiceAdapter;

use crate::error::AttuneError;
use crate::types::{Modality, ModalitySignal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body-movement features from the pose extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseFeatures {
    /// Mean keypoint speed in body-lengths per second
    pub movement_speed: f64,
    /// Mean change in speed between frames (body-lengths per second squared)
    pub movement_jerk: f64,
    /// Shoulder/limb tension estimate (0-1)
    pub posture_tension: f64,
    /// Fraction of keypoints visible with good quality (0-1)
    pub keypoint_visibility: f64,
}

/// Facial action-unit intensities (0-5) from the face extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceFeatures {
    pub brow_lowerer: f64,
    pub upper_lid_raiser: f64,
    pub lip_corner_depressor: f64,
    pub lip_stretcher: f64,
    pub jaw_drop: f64,
    /// Face detection confidence (0-1)
    pub detection_confidence: f64,
}

/// Voice prosody features from the audio extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceFeatures {
    /// Fundamental frequency (Hz)
    pub pitch_hz: f64,
    /// Pitch standard deviation over the frame (semitones)
    pub pitch_variability_st: f64,
    /// Loudness (dB SPL)
    pub loudness_db: f64,
    /// Probability that the frame contains voiced speech (0-1)
    pub voiced_probability: f64,
}

/// Everything the extractors produced for one processed frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorFrame {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<PoseFeatures>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face: Option<FaceFeatures>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceFeatures>,
}

/// Trait for modality adapters
pub trait FeatureAdapter {
    /// Modality this adapter produces
    fn modality(&self) -> Modality;

    /// Map the frame's features for this modality to a signal, or `None`
    /// when the modality is absent from the frame
    fn adapt(&self, frame: &ExtractorFrame) -> Option<ModalitySignal>;
}

/// Runs every modality adapter over a frame
pub struct FrameAdapter {
    adapters: Vec<Box<dyn FeatureAdapter + Send + Sync>>,
}

impl Default for FrameAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAdapter {
    /// Create a frame adapter with the pose, face, and voice adapters
    pub fn new() -> Self {
        Self {
            adapters: vec![
                Box::new(PoseAdapter::default()),
                Box::new(FaceAdapter::default()),
                Box::new(VoiceAdapter::default()),
            ],
        }
    }

    /// Replace the adapter for `adapter.modality()`, or add it when no
    /// adapter covers that modality yet
    pub fn with_adapter(mut self, adapter: Box<dyn FeatureAdapter + Send + Sync>) -> Self {
        let modality = adapter.modality();
        match self.adapters.iter().position(|a| a.modality() == modality) {
            Some(idx) => self.adapters[idx] = adapter,
            None => self.adapters.push(adapter),
        }
        self
    }

    /// Modalities covered, in adapter order
    pub fn modalities(&self) -> Vec<Modality> {
        self.adapters.iter().map(|a| a.modality()).collect()
    }

    /// Adapt one frame into its present modality signals
    pub fn adapt_frame(&self, frame: &ExtractorFrame) -> Vec<ModalitySignal> {
        self.adapters
            .iter()
            .filter_map(|adapter| adapter.adapt(frame))
            .collect()
    }
}

/// Parse a JSON array of extractor frames
pub fn parse_frames_array(json: &str) -> Result<Vec<ExtractorFrame>, AttuneError> {
    let frames: Vec<ExtractorFrame> = serde_json::from_str(json)?;
    Ok(frames)
}

/// Parse NDJSON (one extractor frame per line)
pub fn parse_frames_ndjson(ndjson: &str) -> Result<Vec<ExtractorFrame>, AttuneError> {
    let mut frames = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let frame = serde_json::from_str::<ExtractorFrame>(trimmed).map_err(|e| {
            AttuneError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
        })?;
        frames.push(frame);
    }
    Ok(frames)
}

/// Linearly map `raw` from `[floor, ceiling]` onto `[0, 1]`
pub(crate) fn scale_unit(raw: f64, floor: f64, ceiling: f64) -> f64 {
    if ceiling <= floor {
        return 0.0;
    }
    ((raw - floor) / (ceiling - floor)).clamp(0.0, 1.0)
}

/// True when every value is finite
pub(crate) fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}
