//! Runtime configuration
//!
//! All durations are wall-clock seconds so smoothing and scanning behave the
//! same regardless of the incoming frame rate.

use crate::error::AttuneError;
use serde::{Deserialize, Serialize};

/// Default ring buffer capacity for jitter suppression
pub const DEFAULT_HISTORY_CAPACITY: usize = 5;
/// Default maximum age of a buffered reading that still votes
pub const DEFAULT_SMOOTHING_MAX_AGE_SECS: f64 = 10.0;
/// Default time a candidate band must persist before it is displayed
pub const DEFAULT_SUSTAIN_SECS: f64 = 20.0;
/// Default cap on per-subject session history (2 hours at 3 Hz)
pub const DEFAULT_MAX_SESSION_HISTORY: usize = 21_600;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttuneConfig {
    pub classifier: ClassifierConfig,
    pub coregulation: CoRegulationConfig,
    pub session: SessionConfig,
}

impl AttuneConfig {
    /// Load configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, AttuneError> {
        let config: AttuneConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, AttuneError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), AttuneError> {
        self.classifier.validate()?;
        self.coregulation.validate()?;
        if self.session.max_history == 0 {
            return Err(AttuneError::InvalidConfig(
                "session.max_history must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Band classifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Number of recent instant readings in the majority vote
    pub history_capacity: usize,
    /// Readings older than this (relative to the newest) do not vote
    pub smoothing_max_age_secs: f64,
    /// Sustain duration for the displayed band
    pub sustain_secs: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            smoothing_max_age_secs: DEFAULT_SMOOTHING_MAX_AGE_SECS,
            sustain_secs: DEFAULT_SUSTAIN_SECS,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), AttuneError> {
        if self.history_capacity == 0 {
            return Err(AttuneError::InvalidConfig(
                "classifier.history_capacity must be at least 1".to_string(),
            ));
        }
        require_positive("classifier.smoothing_max_age_secs", self.smoothing_max_age_secs)?;
        require_positive("classifier.sustain_secs", self.sustain_secs)?;
        Ok(())
    }
}

/// Co-regulation scan settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoRegulationConfig {
    /// Spacing of the common resampling grid
    pub resample_step_secs: f64,
    /// Width of each correlation window
    pub window_secs: f64,
    /// Distance between consecutive window starts
    pub stride_secs: f64,
    /// Lags searched in both directions
    pub max_lag_secs: f64,
    /// Minimum |correlation| for an event
    pub correlation_threshold: f64,
    /// Lags within this magnitude count as simultaneous
    pub lag_epsilon_secs: f64,
    /// Minimum fraction of window samples that must pair up at a lag
    pub min_overlap_ratio: f64,
    /// Caregiver arousal at or below this is treated as calm
    pub calm_arousal_ceiling: f64,
    /// Caregiver arousal at or above this is treated as high
    pub high_arousal_floor: f64,
    /// Merge overlapping windows that agree on classification and direction
    pub merge_overlapping: bool,
}

impl Default for CoRegulationConfig {
    fn default() -> Self {
        Self {
            resample_step_secs: 1.0,
            window_secs: 30.0,
            stride_secs: 5.0,
            max_lag_secs: 10.0,
            correlation_threshold: 0.7,
            lag_epsilon_secs: 0.5,
            min_overlap_ratio: 0.6,
            calm_arousal_ceiling: 0.45,
            high_arousal_floor: 0.6,
            merge_overlapping: true,
        }
    }
}

impl CoRegulationConfig {
    pub fn validate(&self) -> Result<(), AttuneError> {
        require_positive("coregulation.resample_step_secs", self.resample_step_secs)?;
        require_positive("coregulation.window_secs", self.window_secs)?;
        require_positive("coregulation.stride_secs", self.stride_secs)?;
        if !self.max_lag_secs.is_finite() || self.max_lag_secs < 0.0 {
            return Err(AttuneError::InvalidConfig(
                "coregulation.max_lag_secs must be non-negative".to_string(),
            ));
        }
        if self.stride_secs >= self.window_secs {
            return Err(AttuneError::InvalidConfig(format!(
                "coregulation.stride_secs ({}) must be smaller than window_secs ({})",
                self.stride_secs, self.window_secs
            )));
        }
        if !(self.correlation_threshold > 0.0 && self.correlation_threshold <= 1.0) {
            return Err(AttuneError::InvalidConfig(
                "coregulation.correlation_threshold must be in (0, 1]".to_string(),
            ));
        }
        if !(self.min_overlap_ratio > 0.0 && self.min_overlap_ratio <= 1.0) {
            return Err(AttuneError::InvalidConfig(
                "coregulation.min_overlap_ratio must be in (0, 1]".to_string(),
            ));
        }
        if self.calm_arousal_ceiling >= self.high_arousal_floor {
            return Err(AttuneError::InvalidConfig(
                "coregulation.calm_arousal_ceiling must be below high_arousal_floor".to_string(),
            ));
        }
        Ok(())
    }
}

/// Session bookkeeping settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Readings retained per subject; oldest evicted first
    pub max_history: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_SESSION_HISTORY,
        }
    }
}

fn require_positive(name: &str, value: f64) -> Result<(), AttuneError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(AttuneError::InvalidConfig(format!(
            "{} must be positive, got {}",
            name, value
        )))
    }
}
