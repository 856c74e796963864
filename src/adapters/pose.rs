//! Pose extractor adapter
//!
//! Movement energy is blended from keypoint speed, jerk, and posture tension.

use super::{all_finite, scale_unit, ExtractorFrame, FeatureAdapter};
use crate::types::{Modality, ModalitySignal};
use tracing::warn;

/// Speed (body-lengths/s) treated as maximal movement
const MAX_MOVEMENT_SPEED: f64 = 2.0;
/// Jerk treated as maximal agitation
const MAX_MOVEMENT_JERK: f64 = 1.0;

const SPEED_WEIGHT: f64 = 0.5;
const JERK_WEIGHT: f64 = 0.3;
const TENSION_WEIGHT: f64 = 0.2;

/// Adapter for body-movement features
#[derive(Debug, Clone)]
pub struct PoseAdapter {
    max_speed: f64,
    max_jerk: f64,
}

impl Default for PoseAdapter {
    fn default() -> Self {
        Self {
            max_speed: MAX_MOVEMENT_SPEED,
            max_jerk: MAX_MOVEMENT_JERK,
        }
    }
}

impl PoseAdapter {
    /// Create an adapter with custom movement reference ranges
    pub fn with_ranges(max_speed: f64, max_jerk: f64) -> Self {
        Self { max_speed, max_jerk }
    }
}

impl FeatureAdapter for PoseAdapter {
    fn modality(&self) -> Modality {
        Modality::Pose
    }

    fn adapt(&self, frame: &ExtractorFrame) -> Option<ModalitySignal> {
        let pose = frame.pose.as_ref()?;
        if !all_finite(&[
            pose.movement_speed,
            pose.movement_jerk,
            pose.posture_tension,
            pose.keypoint_visibility,
        ]) {
            warn!(timestamp = %frame.timestamp, "dropping pose features with non-finite values");
            return None;
        }

        let speed = scale_unit(pose.movement_speed, 0.0, self.max_speed);
        let jerk = scale_unit(pose.movement_jerk, 0.0, self.max_jerk);
        let tension = pose.posture_tension.clamp(0.0, 1.0);
        let value = SPEED_WEIGHT * speed + JERK_WEIGHT * jerk + TENSION_WEIGHT * tension;

        Some(ModalitySignal::new(
            Modality::Pose,
            value,
            pose.keypoint_visibility,
            frame.timestamp,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::PoseFeatures;
    use chrono::Utc;

    fn frame_with(pose: PoseFeatures) -> ExtractorFrame {
        ExtractorFrame {
            timestamp: Utc::now(),
            pose: Some(pose),
            face: None,
            voice: None,
        }
    }

    #[test]
    fn test_pose_blend() {
        let frame = frame_with(PoseFeatures {
            movement_speed: 1.0,
            movement_jerk: 0.5,
            posture_tension: 0.5,
            keypoint_visibility: 0.85,
        });
        let signal = PoseAdapter::default().adapt(&frame).unwrap();
        // 0.5 * 0.5 + 0.3 * 0.5 + 0.2 * 0.5
        assert!((signal.value - 0.5).abs() < 1e-12);
        assert!((signal.confidence - 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_saturates_at_reference_ceiling() {
        let frame = frame_with(PoseFeatures {
            movement_speed: 9.0,
            movement_jerk: 4.0,
            posture_tension: 3.0,
            keypoint_visibility: 1.0,
        });
        let signal = PoseAdapter::default().adapt(&frame).unwrap();
        assert!((signal.value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_is_absent() {
        let frame = frame_with(PoseFeatures {
            movement_speed: f64::NAN,
            movement_jerk: 0.0,
            posture_tension: 0.0,
            keypoint_visibility: 1.0,
        });
        assert!(PoseAdapter::default().adapt(&frame).is_none());
    }

    #[test]
    fn test_missing_pose_is_absent() {
        let frame = ExtractorFrame {
            timestamp: Utc::now(),
            pose: None,
            face: None,
            voice: None,
        };
        assert!(PoseAdapter::default().adapt(&frame).is_none());
    }
}
