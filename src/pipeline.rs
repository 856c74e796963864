//! Pipeline orchestration
//!
//! Stateful processors wiring the stages together:
//! FeatureAdapter → FusionEngine → BandClassifier → history →
//! CoRegulationDetector → SessionAggregator.

use crate::adapters::{ExtractorFrame, FrameAdapter};
use crate::classifier::{BandClassifier, SmoothedBand};
use crate::config::AttuneConfig;
use crate::coregulation::CoRegulationDetector;
use crate::error::AttuneError;
use crate::profile::ThresholdProfile;
use crate::session::{SessionAggregator, SessionSummary};
use crate::types::{Band, CoRegulationEvent, EmotionReading, FusedReading, ModalitySignal};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use tracing::debug;
use uuid::Uuid;

pub use crate::profile::build_threshold_profile;

/// Scan two histories with the default detector settings.
///
/// # Example
/// ```ignore
/// let events = run_co_regulation_scan(&child_history, &caregiver_history);
/// for event in events {
///     println!("{:?} at lag {}s", event.classification, event.lag_secs());
/// }
/// ```
pub fn run_co_regulation_scan(
    child_history: &[FusedReading],
    caregiver_history: &[EmotionReading],
) -> Vec<CoRegulationEvent> {
    CoRegulationDetector::default().detect(child_history, caregiver_history)
}

/// Stateful per-child processor.
///
/// Owns the classifier ring buffer, the active profile and a bounded
/// session history of every instant reading.
pub struct ArousalProcessor {
    adapter: FrameAdapter,
    classifier: BandClassifier,
    profile: ThresholdProfile,
    history: VecDeque<FusedReading>,
    max_history: usize,
}

impl Default for ArousalProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ArousalProcessor {
    /// Create a processor with default settings and the default profile
    pub fn new() -> Self {
        Self::with_config(&AttuneConfig::default())
    }

    /// Create a processor from configuration
    pub fn with_config(config: &AttuneConfig) -> Self {
        Self {
            adapter: FrameAdapter::new(),
            classifier: BandClassifier::new(&config.classifier),
            profile: ThresholdProfile::default(),
            history: VecDeque::new(),
            max_history: config.session.max_history.max(1),
        }
    }

    /// Use `profile` for every subsequent reading
    pub fn with_profile(mut self, profile: ThresholdProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Replace the profile wholesale (recalibration)
    pub fn set_profile(&mut self, profile: ThresholdProfile) {
        debug!(source = ?profile.source(), "threshold profile replaced");
        self.profile = profile;
    }

    pub fn profile(&self) -> &ThresholdProfile {
        &self.profile
    }

    /// Adapt and classify one extractor frame
    pub fn process_frame(&mut self, frame: &ExtractorFrame) -> FusedReading {
        let signals = self.adapter.adapt_frame(frame);
        self.classify_at(&signals, frame.timestamp)
    }

    /// Classify already-adapted signals, stamped with the newest signal
    /// time. Prefer `classify_at` or `process_frame` for recorded sessions,
    /// where an empty frame would otherwise be stamped with the current time.
    pub fn classify(&mut self, signals: &[ModalitySignal]) -> FusedReading {
        let reading = self.classifier.classify(signals, Some(&self.profile));
        self.push_history(reading.clone());
        reading
    }

    /// Classify already-adapted signals observed at `at`
    pub fn classify_at(&mut self, signals: &[ModalitySignal], at: DateTime<Utc>) -> FusedReading {
        let reading = self.classifier.classify_at(signals, Some(&self.profile), at);
        self.push_history(reading.clone());
        reading
    }

    /// Displayed band, `None` before the first stabilization
    pub fn get_stabilized(&self) -> Option<Band> {
        self.classifier.get_stabilized()
    }

    pub fn smoothed(&self) -> Option<SmoothedBand> {
        self.classifier.smoothed()
    }

    /// Copy of the session history, oldest first
    pub fn history_snapshot(&self) -> Vec<FusedReading> {
        self.history.iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Clear the classifier state and session history; the profile is kept
    pub fn reset(&mut self) {
        self.classifier.reset();
        self.history.clear();
    }

    fn push_history(&mut self, reading: FusedReading) {
        self.history.push_back(reading);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }
}

/// Bounded caregiver emotion history
#[derive(Debug, Clone)]
pub struct CaregiverTracker {
    history: VecDeque<EmotionReading>,
    max_history: usize,
}

impl Default for CaregiverTracker {
    fn default() -> Self {
        Self::new(AttuneConfig::default().session.max_history)
    }
}

impl CaregiverTracker {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: VecDeque::new(),
            max_history: max_history.max(1),
        }
    }

    /// Record a reading; valence and arousal are clamped into range
    pub fn record(&mut self, reading: EmotionReading) {
        let reading = EmotionReading::new(
            reading.emotion,
            reading.valence,
            reading.arousal,
            reading.timestamp,
        );
        if !reading.arousal.is_finite() || !reading.valence.is_finite() {
            debug!("dropping caregiver reading with non-finite values");
            return;
        }
        self.history.push_back(reading);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&EmotionReading> {
        self.history.back()
    }

    /// Copy of the history, oldest first
    pub fn snapshot(&self) -> Vec<EmotionReading> {
        self.history.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

/// One child/caregiver session.
///
/// Each subject's state sits behind its own lock, so child frames and
/// caregiver frames can be recorded from different threads. Scans work on
/// snapshots and never hold a subject lock while correlating.
pub struct CoRegulationSession {
    id: Uuid,
    child: Mutex<ArousalProcessor>,
    caregiver: Mutex<CaregiverTracker>,
    detector: CoRegulationDetector,
    events: Mutex<Vec<CoRegulationEvent>>,
}

impl Default for CoRegulationSession {
    fn default() -> Self {
        Self::new(&AttuneConfig::default())
    }
}

impl CoRegulationSession {
    pub fn new(config: &AttuneConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            child: Mutex::new(ArousalProcessor::with_config(config)),
            caregiver: Mutex::new(CaregiverTracker::new(config.session.max_history)),
            detector: CoRegulationDetector::new(config.coregulation.clone()),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Use `profile` for the child's readings
    pub fn with_profile(self, profile: ThresholdProfile) -> Self {
        self.child.lock().set_profile(profile);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn set_profile(&self, profile: ThresholdProfile) {
        self.child.lock().set_profile(profile);
    }

    pub fn record_child_frame(&self, frame: &ExtractorFrame) -> FusedReading {
        self.child.lock().process_frame(frame)
    }

    pub fn classify_child(&self, signals: &[ModalitySignal]) -> FusedReading {
        self.child.lock().classify(signals)
    }

    pub fn classify_child_at(&self, signals: &[ModalitySignal], at: DateTime<Utc>) -> FusedReading {
        self.child.lock().classify_at(signals, at)
    }

    pub fn record_caregiver(&self, reading: EmotionReading) {
        self.caregiver.lock().record(reading);
    }

    pub fn child_stabilized(&self) -> Option<Band> {
        self.child.lock().get_stabilized()
    }

    pub fn child_history(&self) -> Vec<FusedReading> {
        self.child.lock().history_snapshot()
    }

    pub fn caregiver_history(&self) -> Vec<EmotionReading> {
        self.caregiver.lock().snapshot()
    }

    /// Scan the current histories and replace the session's event list
    pub fn scan(&self) -> Vec<CoRegulationEvent> {
        let (child, caregiver) = self.snapshots();
        let events = self.detector.detect(&child, &caregiver);
        *self.events.lock() = events.clone();
        events
    }

    /// Like `scan`, abortable between windows through `cancel`. A cancelled
    /// scan leaves the previous event list untouched.
    pub fn scan_with_cancel(
        &self,
        cancel: &AtomicBool,
    ) -> Result<Vec<CoRegulationEvent>, AttuneError> {
        let (child, caregiver) = self.snapshots();
        let events = self.detector.detect_with_cancel(&child, &caregiver, cancel)?;
        *self.events.lock() = events.clone();
        Ok(events)
    }

    /// Events from the most recent completed scan
    pub fn events(&self) -> Vec<CoRegulationEvent> {
        self.events.lock().clone()
    }

    /// Summarize the child history with the last scan's events
    pub fn summary(&self) -> SessionSummary {
        let child = self.child_history();
        let events = self.events();
        let mut summary = SessionAggregator::summarize(&child, &events);
        summary.session_id = Some(self.id);
        summary
    }

    fn snapshots(&self) -> (Vec<FusedReading>, Vec<EmotionReading>) {
        let child = self.child.lock().history_snapshot();
        let caregiver = self.caregiver.lock().snapshot();
        (child, caregiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FaceFeatures;
    use crate::profile::{TraitCategory, DEFAULT_BAND_BOUNDARIES};
    use crate::types::{CaregiverEmotion, LeadDirection, Modality, SynchronyClass};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;
    use std::sync::{mpsc, Arc};
    use std::thread;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, 18, 0, 0).unwrap()
    }

    fn face(value: f64, at: DateTime<Utc>) -> Vec<ModalitySignal> {
        vec![ModalitySignal::new(Modality::Face, value, 0.9, at)]
    }

    /// Caregiver calms at 10s, child follows at 13s
    fn record_de_escalation(session: &CoRegulationSession) {
        for s in 0..=60 {
            let at = t0() + Duration::seconds(s);
            session.classify_child_at(&face(if s < 13 { 0.7 } else { 0.1 }, at), at);
            let (emotion, arousal) = if s < 10 {
                (CaregiverEmotion::Frustrated, 0.8)
            } else {
                (CaregiverEmotion::Calm, 0.1)
            };
            session.record_caregiver(EmotionReading::new(emotion, 0.0, arousal, at));
        }
    }

    #[test]
    fn test_process_frame_through_adapters() {
        let mut processor = ArousalProcessor::new();
        let frame = ExtractorFrame {
            timestamp: t0(),
            pose: None,
            face: Some(FaceFeatures {
                brow_lowerer: 0.0,
                upper_lid_raiser: 0.0,
                lip_corner_depressor: 0.0,
                lip_stretcher: 0.0,
                jaw_drop: 0.0,
                detection_confidence: 0.95,
            }),
            voice: None,
        };
        let reading = processor.process_frame(&frame);
        assert_eq!(reading.band, Band::Shutdown);
        assert_eq!(reading.timestamp, t0());
        assert_eq!(reading.confidence, 0.95);
        assert_eq!(processor.history_len(), 1);
    }

    #[test]
    fn test_empty_frame_degrades() {
        let mut processor = ArousalProcessor::new();
        let frame = ExtractorFrame {
            timestamp: t0(),
            pose: None,
            face: None,
            voice: None,
        };
        let reading = processor.process_frame(&frame);
        assert_eq!(reading.score, 0.5);
        assert_eq!(reading.confidence, 0.0);
        assert_eq!(reading.timestamp, t0());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut config = AttuneConfig::default();
        config.session.max_history = 3;
        let mut processor = ArousalProcessor::with_config(&config);
        for s in 0..10 {
            let at = t0() + Duration::seconds(s);
            processor.classify_at(&face(0.3, at), at);
        }
        let history = processor.history_snapshot();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].timestamp, t0() + Duration::seconds(7));
    }

    #[test]
    fn test_profile_is_applied() {
        let profile =
            build_threshold_profile(DEFAULT_BAND_BOUNDARIES, None, Some(TraitCategory::HighActivity))
                .unwrap();
        let calm_edge = profile.band_boundaries()[1];
        let mut processor = ArousalProcessor::new().with_profile(profile);
        let reading = processor.classify_at(&face(0.46, t0()), t0());
        // Default profile would call 0.46 Elevated
        assert!(calm_edge > 0.46);
        assert_eq!(reading.band, Band::Calm);
    }

    #[test]
    fn test_processor_stabilizes() {
        let mut processor = ArousalProcessor::new();
        for s in 0..=21 {
            let at = t0() + Duration::seconds(s);
            processor.classify_at(&face(0.75, at), at);
        }
        assert_eq!(processor.get_stabilized(), Some(Band::Escalating));
        assert_eq!(processor.smoothed().unwrap().band, Band::Escalating);

        processor.reset();
        assert_eq!(processor.get_stabilized(), None);
        assert_eq!(processor.history_len(), 0);
    }

    #[test]
    fn test_caregiver_tracker_clamps_and_bounds() {
        let mut tracker = CaregiverTracker::new(2);
        tracker.record(EmotionReading {
            emotion: CaregiverEmotion::Angry,
            valence: -3.0,
            arousal: 1.7,
            timestamp: t0(),
        });
        assert_eq!(tracker.latest().unwrap().arousal, 1.0);
        assert_eq!(tracker.latest().unwrap().valence, -1.0);

        for s in 1..5 {
            tracker.record(EmotionReading::new(
                CaregiverEmotion::Calm,
                0.2,
                0.2,
                t0() + Duration::seconds(s),
            ));
        }
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_session_scan_and_summary() {
        let session = CoRegulationSession::default();
        record_de_escalation(&session);

        let events = session.scan();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].classification, SynchronyClass::Supportive);
        assert_eq!(events[0].direction, LeadDirection::CaregiverLeads);
        assert_eq!(session.events(), events);

        let summary = session.summary();
        assert_eq!(summary.session_id, Some(session.id()));
        assert_eq!(summary.total_readings, 61);
        assert_eq!(summary.coregulation.supportive, 1);
        assert_eq!(summary.dominant_band, Some(Band::Shutdown));
    }

    #[test]
    fn test_cancelled_scan_keeps_previous_events() {
        let session = CoRegulationSession::default();
        record_de_escalation(&session);
        let first = session.scan();

        let cancel = AtomicBool::new(false);
        cancel.store(true, Ordering::Relaxed);
        let result = session.scan_with_cancel(&cancel);
        assert!(matches!(result, Err(AttuneError::ScanCancelled { .. })));
        assert_eq!(session.events(), first);
    }

    #[test]
    fn test_subjects_recorded_from_separate_threads() {
        let session = Arc::new(CoRegulationSession::default());

        let caregiver_session = Arc::clone(&session);
        let caregiver = thread::spawn(move || {
            for s in 0..120 {
                caregiver_session.record_caregiver(EmotionReading::new(
                    CaregiverEmotion::Neutral,
                    0.0,
                    0.3,
                    t0() + Duration::seconds(s),
                ));
            }
        });
        for s in 0..120 {
            let at = t0() + Duration::seconds(s);
            session.classify_child_at(&face(0.3, at), at);
        }
        caregiver.join().unwrap();

        assert_eq!(session.child_history().len(), 120);
        assert_eq!(session.caregiver_history().len(), 120);
        // Flat series never correlate
        assert!(session.scan().is_empty());
    }

    #[test]
    fn test_scan_while_child_is_classified() {
        let session = Arc::new(CoRegulationSession::default());
        for s in 0..=60 {
            let (emotion, arousal) = if s < 10 {
                (CaregiverEmotion::Frustrated, 0.8)
            } else {
                (CaregiverEmotion::Calm, 0.1)
            };
            session.record_caregiver(EmotionReading::new(
                emotion,
                0.0,
                arousal,
                t0() + Duration::seconds(s),
            ));
        }

        let (progress_tx, progress_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let child_session = Arc::clone(&session);
        let child = thread::spawn(move || {
            for s in 0..=60 {
                let at = t0() + Duration::seconds(s);
                child_session.classify_child_at(&face(if s < 13 { 0.7 } else { 0.1 }, at), at);
                if s % 10 == 9 {
                    progress_tx.send(s).unwrap();
                    resume_rx.recv().unwrap();
                }
            }
        });

        let mut last_len = 0;
        for _ in progress_rx.iter() {
            let seen = session.child_history().len();
            assert!(seen >= last_len);
            last_len = seen;
            // Let the child thread keep classifying while this scan runs
            resume_tx.send(()).unwrap();
            let events = session.scan();
            assert_eq!(session.events(), events);
        }
        child.join().unwrap();

        assert_eq!(session.child_history().len(), 61);
        let expected =
            run_co_regulation_scan(&session.child_history(), &session.caregiver_history());
        assert_eq!(session.scan(), expected);
        assert_eq!(expected.len(), 1);
        assert_eq!(expected[0].classification, SynchronyClass::Supportive);
    }

    #[test]
    fn test_free_scan_function() {
        let session = CoRegulationSession::default();
        record_de_escalation(&session);
        let events = run_co_regulation_scan(&session.child_history(), &session.caregiver_history());
        assert_eq!(events, session.scan());
    }
}
