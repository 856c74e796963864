//! Band classification with two-tier stabilization
//!
//! - Instant: the fused score is mapped through the profile's four cut-points.
//! - Tier A: majority vote over a small ring buffer of recent instant
//!   readings, ties going to the most recent band among the tied candidates.
//! - Tier B: the displayed band only changes after a candidate band has been
//!   observed continuously for the sustain duration (wall-clock).
//!
//! The classifier owns its ring buffer and must be driven by a single writer.
//! It never looks up an individual; every call receives its profile.

use crate::config::ClassifierConfig;
use crate::fusion::FusionEngine;
use crate::profile::ThresholdProfile;
use crate::types::{Band, FusedReading, ModalitySignal};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Map a score onto a band using four strictly increasing cut-points
pub fn band_for_score(score: f64, boundaries: &[f64; 4]) -> Band {
    if score < boundaries[0] {
        Band::Shutdown
    } else if score < boundaries[1] {
        Band::Calm
    } else if score < boundaries[2] {
        Band::Elevated
    } else if score < boundaries[3] {
        Band::Escalating
    } else {
        Band::Crisis
    }
}

/// Tier A output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothedBand {
    pub band: Band,
    /// Mean confidence of the voting readings
    pub confidence: f64,
    /// Number of readings that voted
    pub votes: usize,
}

/// Tier B hysteresis filter keyed on wall-clock time
#[derive(Debug, Clone)]
pub struct SustainFilter {
    sustain: Duration,
    stabilized: Option<Band>,
    candidate: Option<(Band, DateTime<Utc>)>,
}

impl SustainFilter {
    pub fn new(sustain: Duration) -> Self {
        Self {
            sustain,
            stabilized: None,
            candidate: None,
        }
    }

    pub fn stabilized(&self) -> Option<Band> {
        self.stabilized
    }

    /// Feed one instant band observed at `at`; returns the stabilized band
    pub fn observe(&mut self, band: Band, at: DateTime<Utc>) -> Option<Band> {
        if self.stabilized == Some(band) {
            self.candidate = None;
            return self.stabilized;
        }

        match self.candidate {
            Some((candidate, since)) if candidate == band && at >= since => {
                if at - since >= self.sustain {
                    debug!(
                        from = ?self.stabilized,
                        to = band.as_str(),
                        held_ms = (at - since).num_milliseconds(),
                        "stabilized band changed"
                    );
                    self.stabilized = Some(band);
                    self.candidate = None;
                }
            }
            _ => self.candidate = Some((band, at)),
        }
        self.stabilized
    }

    pub fn reset(&mut self) {
        self.stabilized = None;
        self.candidate = None;
    }
}

/// Stateful classifier: fusion, band lookup, and stabilization
#[derive(Debug, Clone)]
pub struct BandClassifier {
    history: VecDeque<FusedReading>,
    capacity: usize,
    max_age: Duration,
    sustain: SustainFilter,
}

impl Default for BandClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

impl BandClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let capacity = config.history_capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            max_age: secs_to_duration(config.smoothing_max_age_secs),
            sustain: SustainFilter::new(secs_to_duration(config.sustain_secs)),
        }
    }

    /// Classify one frame.
    ///
    /// The reading is stamped with the newest signal timestamp, or the current
    /// time when no signal is present. When replaying recorded frames, use
    /// `classify_at` with the frame time instead: an empty frame stamped with
    /// the current time jumps ahead of the recording and restarts the sustain
    /// candidate.
    pub fn classify(
        &mut self,
        signals: &[ModalitySignal],
        profile: Option<&ThresholdProfile>,
    ) -> FusedReading {
        let at = signals
            .iter()
            .map(|s| s.timestamp)
            .max()
            .unwrap_or_else(Utc::now);
        self.classify_at(signals, profile, at)
    }

    /// Classify one frame observed at `at`; falls back to the default
    /// profile when none is supplied
    pub fn classify_at(
        &mut self,
        signals: &[ModalitySignal],
        profile: Option<&ThresholdProfile>,
        at: DateTime<Utc>,
    ) -> FusedReading {
        let fallback;
        let profile = match profile {
            Some(profile) => profile,
            None => {
                fallback = ThresholdProfile::default();
                &fallback
            }
        };

        let outcome = FusionEngine::fuse(signals, profile);
        let band = band_for_score(outcome.score, profile.band_boundaries());
        let reading = FusedReading {
            score: outcome.score,
            band,
            confidence: outcome.confidence,
            contributions: outcome.contributions,
            timestamp: at,
        };
        self.record(reading.clone());
        reading
    }

    /// Push an already-fused reading through both stabilization tiers
    pub fn record(&mut self, reading: FusedReading) {
        self.sustain.observe(reading.band, reading.timestamp);
        self.history.push_back(reading);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    /// Tier A majority vote, or `None` before the first reading
    pub fn smoothed(&self) -> Option<SmoothedBand> {
        let newest = self.history.back()?.timestamp;
        let voters: Vec<&FusedReading> = self
            .history
            .iter()
            .filter(|r| newest - r.timestamp <= self.max_age)
            .collect();

        let mut counts = [0usize; 5];
        for reading in &voters {
            counts[reading.band.ordinal() as usize] += 1;
        }
        let top = counts.iter().copied().max().unwrap_or(0);

        // Recency tie-break: newest reading whose band is among the leaders
        let band = voters
            .iter()
            .rev()
            .map(|r| r.band)
            .find(|b| counts[b.ordinal() as usize] == top)?;
        let confidence = voters.iter().map(|r| r.confidence).sum::<f64>() / voters.len() as f64;

        Some(SmoothedBand {
            band,
            confidence,
            votes: voters.len(),
        })
    }

    /// Tier B sustained band, or `None` before the first stabilization
    pub fn get_stabilized(&self) -> Option<Band> {
        self.sustain.stabilized()
    }

    /// Copy of the ring buffer, oldest first
    pub fn recent(&self) -> Vec<FusedReading> {
        self.history.iter().cloned().collect()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.sustain.reset();
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::milliseconds((secs * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::DEFAULT_BAND_BOUNDARIES;
    use crate::types::Modality;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap()
    }

    fn reading(band: Band, confidence: f64, at: DateTime<Utc>) -> FusedReading {
        FusedReading {
            score: 0.5,
            band,
            confidence,
            contributions: BTreeMap::new(),
            timestamp: at,
        }
    }

    #[test]
    fn test_band_lookup_edges() {
        let b = DEFAULT_BAND_BOUNDARIES;
        assert_eq!(band_for_score(0.0, &b), Band::Shutdown);
        assert_eq!(band_for_score(0.20, &b), Band::Calm);
        assert_eq!(band_for_score(0.449, &b), Band::Calm);
        assert_eq!(band_for_score(0.45, &b), Band::Elevated);
        assert_eq!(band_for_score(0.70, &b), Band::Escalating);
        assert_eq!(band_for_score(0.85, &b), Band::Crisis);
        assert_eq!(band_for_score(1.0, &b), Band::Crisis);
    }

    #[test]
    fn test_missing_profile_uses_defaults() {
        let mut classifier = BandClassifier::default();
        let signals = [ModalitySignal::new(Modality::Pose, 0.3, 0.9, t0())];
        let reading = classifier.classify(&signals, None);
        assert_eq!(reading.band, Band::Calm);
        assert_eq!(reading.timestamp, t0());
    }

    #[test]
    fn test_empty_frame_is_neutral_elevated() {
        let mut classifier = BandClassifier::default();
        let reading = classifier.classify_at(&[], None, t0());
        assert_eq!(reading.score, 0.5);
        assert_eq!(reading.confidence, 0.0);
        assert_eq!(reading.band, Band::Elevated);
    }

    #[test]
    fn test_single_outlier_does_not_flip_vote() {
        let mut classifier = BandClassifier::default();
        let bands = [Band::Calm, Band::Calm, Band::Crisis, Band::Calm, Band::Calm];
        for (i, band) in bands.iter().enumerate() {
            classifier.record(reading(*band, 0.8, t0() + Duration::seconds(i as i64)));
        }
        let smoothed = classifier.smoothed().unwrap();
        assert_eq!(smoothed.band, Band::Calm);
        assert_eq!(smoothed.votes, 5);

        // Outlier as the newest reading still loses the vote
        classifier.record(reading(Band::Crisis, 0.8, t0() + Duration::seconds(5)));
        assert_eq!(classifier.smoothed().unwrap().band, Band::Calm);
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut classifier = BandClassifier::default();
        for i in 0..8 {
            classifier.record(reading(Band::Calm, 0.5, t0() + Duration::seconds(i)));
        }
        let recent = classifier.recent();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].timestamp, t0() + Duration::seconds(3));
    }

    #[test]
    fn test_tie_prefers_most_recent_band() {
        let mut classifier = BandClassifier::default();
        let bands = [Band::Elevated, Band::Calm, Band::Elevated, Band::Calm];
        for (i, band) in bands.iter().enumerate() {
            classifier.record(reading(*band, 0.5, t0() + Duration::seconds(i as i64)));
        }
        assert_eq!(classifier.smoothed().unwrap().band, Band::Calm);

        classifier.record(reading(Band::Shutdown, 0.5, t0() + Duration::seconds(4)));
        // Elevated 2, Calm 2, Shutdown 1
        assert_eq!(classifier.smoothed().unwrap().band, Band::Calm);
    }

    #[test]
    fn test_smoothed_confidence_is_mean() {
        let mut classifier = BandClassifier::default();
        for (i, c) in [0.2, 0.4, 0.6].iter().enumerate() {
            classifier.record(reading(Band::Calm, *c, t0() + Duration::seconds(i as i64)));
        }
        assert!((classifier.smoothed().unwrap().confidence - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_stale_readings_do_not_vote() {
        let mut classifier = BandClassifier::default();
        classifier.record(reading(Band::Crisis, 0.9, t0()));
        classifier.record(reading(Band::Crisis, 0.9, t0() + Duration::seconds(1)));
        classifier.record(reading(Band::Calm, 0.9, t0() + Duration::seconds(30)));
        let smoothed = classifier.smoothed().unwrap();
        assert_eq!(smoothed.band, Band::Calm);
        assert_eq!(smoothed.votes, 1);
    }

    #[test]
    fn test_sustain_boundary() {
        let sustain = Duration::seconds(20);
        let epsilon = Duration::milliseconds(1);

        let mut filter = SustainFilter::new(sustain);
        assert_eq!(filter.observe(Band::Calm, t0()), None);
        assert_eq!(filter.observe(Band::Calm, t0() + sustain - epsilon), None);

        let mut filter = SustainFilter::new(sustain);
        filter.observe(Band::Calm, t0());
        assert_eq!(filter.observe(Band::Calm, t0() + sustain + epsilon), Some(Band::Calm));
    }

    #[test]
    fn test_sustain_resets_on_interruption() {
        let mut filter = SustainFilter::new(Duration::seconds(20));
        filter.observe(Band::Calm, t0());
        filter.observe(Band::Calm, t0() + Duration::seconds(25));
        assert_eq!(filter.stabilized(), Some(Band::Calm));

        filter.observe(Band::Escalating, t0() + Duration::seconds(30));
        filter.observe(Band::Elevated, t0() + Duration::seconds(40));
        filter.observe(Band::Escalating, t0() + Duration::seconds(45));
        // Candidate restarted at 45s, so 60s is only 15s in
        assert_eq!(
            filter.observe(Band::Escalating, t0() + Duration::seconds(60)),
            Some(Band::Calm)
        );
        assert_eq!(
            filter.observe(Band::Escalating, t0() + Duration::seconds(66)),
            Some(Band::Escalating)
        );
    }

    #[test]
    fn test_returning_to_stabilized_clears_candidate() {
        let mut filter = SustainFilter::new(Duration::seconds(10));
        filter.observe(Band::Calm, t0());
        filter.observe(Band::Calm, t0() + Duration::seconds(10));
        filter.observe(Band::Crisis, t0() + Duration::seconds(11));
        filter.observe(Band::Calm, t0() + Duration::seconds(12));
        filter.observe(Band::Crisis, t0() + Duration::seconds(13));
        assert_eq!(
            filter.observe(Band::Crisis, t0() + Duration::seconds(21)),
            Some(Band::Calm)
        );
    }

    #[test]
    fn test_classifier_stabilizes_through_frames() {
        let mut classifier = BandClassifier::default();
        assert_eq!(classifier.get_stabilized(), None);
        for i in 0..=25 {
            let at = t0() + Duration::seconds(i);
            let signals = [ModalitySignal::new(Modality::Face, 0.3, 0.9, at)];
            classifier.classify(&signals, None);
        }
        assert_eq!(classifier.get_stabilized(), Some(Band::Calm));
    }
}
