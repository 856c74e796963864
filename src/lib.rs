//! Synheart Attune - On-device arousal fusion and co-regulation analysis
//!
//! Attune turns per-frame pose, face and voice features into a fused arousal
//! reading for a child, stabilizes the displayed band, and scans child and
//! caregiver histories for lagged co-regulation:
//! feature adaptation → fusion → band classification → history →
//! co-regulation scan → session summary.
//!
//! ## Modules
//!
//! - **Per-frame path**: `adapters`, `fusion`, `classifier` (never fails; degrades)
//! - **Personalization**: `profile` (validated once at setup)
//! - **Batch analysis**: `coregulation`, `session`
//! - **Orchestration**: `pipeline`

pub mod adapters;
pub mod classifier;
pub mod config;
pub mod coregulation;
pub mod error;
pub mod fusion;
pub mod pipeline;
pub mod profile;
pub mod session;
pub mod types;

pub use adapters::{ExtractorFrame, FeatureAdapter, FrameAdapter};
pub use classifier::{BandClassifier, SmoothedBand};
pub use config::AttuneConfig;
pub use coregulation::CoRegulationDetector;
pub use error::AttuneError;
pub use fusion::FusionEngine;
pub use pipeline::{
    build_threshold_profile, run_co_regulation_scan, ArousalProcessor, CaregiverTracker,
    CoRegulationSession,
};
pub use profile::{BaselineSample, ProfileSource, ThresholdProfile, TraitCategory};
pub use session::{SessionAggregator, SessionSummary};
pub use types::{
    Band, CaregiverEmotion, CoRegulationEvent, EmotionReading, FusedReading, LeadDirection,
    Modality, ModalitySignal, SynchronyClass,
};

/// Attune version
pub const ATTUNE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for emitted records
pub const PRODUCER_NAME: &str = "synheart-attune";
