//! Core types for the Synheart Attune pipeline
//!
//! This module defines the records that flow between stages: per-modality
//! signals, fused readings, caregiver emotion readings, and co-regulation events.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Independent sensing channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Pose,
    Face,
    Voice,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Pose, Modality::Face, Modality::Voice];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Pose => "pose",
            Modality::Face => "face",
            Modality::Voice => "voice",
        }
    }
}

/// One modality's normalized output for a single processed frame.
///
/// A modality with no detection is absent from the frame rather than
/// reported with a zero value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalitySignal {
    pub modality: Modality,
    /// Arousal-related intensity (0-1)
    pub value: f64,
    /// Detection reliability (0-1)
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl ModalitySignal {
    /// Create a signal, clamping value and confidence into `[0, 1]`
    pub fn new(modality: Modality, value: f64, confidence: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            modality,
            value: value.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.confidence.is_finite()
    }
}

/// Arousal severity band, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Shutdown,
    Calm,
    Elevated,
    Escalating,
    Crisis,
}

impl Band {
    pub const ALL: [Band; 5] = [
        Band::Shutdown,
        Band::Calm,
        Band::Elevated,
        Band::Escalating,
        Band::Crisis,
    ];

    /// Severity rank, 0 for `Shutdown` through 4 for `Crisis`
    pub fn ordinal(&self) -> i32 {
        match self {
            Band::Shutdown => 0,
            Band::Calm => 1,
            Band::Elevated => 2,
            Band::Escalating => 3,
            Band::Crisis => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Shutdown => "shutdown",
            Band::Calm => "calm",
            Band::Elevated => "elevated",
            Band::Escalating => "escalating",
            Band::Crisis => "crisis",
        }
    }
}

/// Result of one classification cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedReading {
    /// Fused arousal score (0-1)
    pub score: f64,
    /// Instant band for `score`
    pub band: Band,
    /// Cross-modal confidence (0-1)
    pub confidence: f64,
    /// Normalized weight each present modality carried in the fusion
    pub contributions: BTreeMap<Modality, f64>,
    pub timestamp: DateTime<Utc>,
}

/// Caregiver emotion category reported by the caregiver-side extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaregiverEmotion {
    Neutral,
    Calm,
    Happy,
    Sad,
    Anxious,
    Frustrated,
    Angry,
    Surprised,
}

/// Caregiver emotional state for a single processed frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionReading {
    pub emotion: CaregiverEmotion,
    /// Valence (-1 to 1)
    pub valence: f64,
    /// Arousal (0-1)
    pub arousal: f64,
    pub timestamp: DateTime<Utc>,
}

impl EmotionReading {
    /// Create a reading, clamping valence and arousal into range
    pub fn new(
        emotion: CaregiverEmotion,
        valence: f64,
        arousal: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            emotion,
            valence: valence.clamp(-1.0, 1.0),
            arousal: arousal.clamp(0.0, 1.0),
            timestamp,
        }
    }
}

/// Which party's change preceded the other's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadDirection {
    CaregiverLeads,
    ChildLeads,
    Simultaneous,
}

/// Co-regulation event classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynchronyClass {
    /// Calm caregiver state followed by child de-escalation
    Supportive,
    /// High caregiver arousal accompanied by child escalation
    Adverse,
    /// Correlated movement without a supportive or adverse pattern
    Mirroring,
}

/// A window of lagged caregiver/child correlation above threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoRegulationEvent {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Signed lag in milliseconds; positive when the caregiver leads
    pub lag_ms: i64,
    /// Pearson correlation at the best lag
    pub correlation: f64,
    pub direction: LeadDirection,
    pub classification: SynchronyClass,
    /// Child band ordinal at window end minus ordinal at window start
    pub child_band_delta: i32,
    pub caregiver_dominant_emotion: CaregiverEmotion,
}

impl CoRegulationEvent {
    pub fn lag(&self) -> Duration {
        Duration::milliseconds(self.lag_ms)
    }

    pub fn lag_secs(&self) -> f64 {
        self.lag_ms as f64 / 1000.0
    }
}
