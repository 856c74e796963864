//! Session aggregation
//!
//! Reduces a classified history (and any co-regulation events found over it)
//! into a distribution summary for reporting.

use crate::types::{Band, CoRegulationEvent, FusedReading, LeadDirection, SynchronyClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Total of `band_basis_points`
pub const BASIS_POINTS_TOTAL: u32 = 10_000;

/// Counts of co-regulation events by classification and direction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoRegulationTally {
    pub total: usize,
    pub supportive: usize,
    pub adverse: usize,
    pub mirroring: usize,
    pub caregiver_leads: usize,
    pub child_leads: usize,
    pub simultaneous: usize,
}

impl CoRegulationTally {
    pub fn from_events(events: &[CoRegulationEvent]) -> Self {
        let mut tally = Self {
            total: events.len(),
            ..Self::default()
        };
        for event in events {
            match event.classification {
                SynchronyClass::Supportive => tally.supportive += 1,
                SynchronyClass::Adverse => tally.adverse += 1,
                SynchronyClass::Mirroring => tally.mirroring += 1,
            }
            match event.direction {
                LeadDirection::CaregiverLeads => tally.caregiver_leads += 1,
                LeadDirection::ChildLeads => tally.child_leads += 1,
                LeadDirection::Simultaneous => tally.simultaneous += 1,
            }
        }
        tally
    }
}

/// Distribution summary of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub total_readings: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    /// Readings per band (every band present, zero when unseen)
    pub band_counts: BTreeMap<Band, usize>,
    /// Share of readings per band, in percent
    pub band_percentages: BTreeMap<Band, f64>,
    /// Share of readings per band in 1/100 of a percent; sums to exactly 10000
    /// for a non-empty session
    pub band_basis_points: BTreeMap<Band, u32>,
    /// Wall-clock seconds attributed to each band
    pub time_in_band_secs: BTreeMap<Band, f64>,
    /// Most frequent band; ties go to the more severe band
    pub dominant_band: Option<Band>,
    /// Most severe band reached
    pub peak_band: Option<Band>,
    pub mean_score: f64,
    pub mean_confidence: f64,
    /// Adjacent readings whose instant band differs
    pub band_transitions: usize,
    pub coregulation: CoRegulationTally,
}

/// Stateless reducer from history to `SessionSummary`
pub struct SessionAggregator;

impl SessionAggregator {
    pub fn summarize(readings: &[FusedReading], events: &[CoRegulationEvent]) -> SessionSummary {
        let mut ordered: Vec<&FusedReading> = readings.iter().collect();
        ordered.sort_by_key(|r| r.timestamp);

        let mut band_counts: BTreeMap<Band, usize> = Band::ALL.iter().map(|b| (*b, 0)).collect();
        for reading in &ordered {
            *band_counts.entry(reading.band).or_insert(0) += 1;
        }

        let total = ordered.len();
        let band_basis_points = basis_points(&band_counts, total);
        let band_percentages = band_basis_points
            .iter()
            .map(|(band, bp)| (*band, *bp as f64 / 100.0))
            .collect();

        let dominant_band = if total == 0 {
            None
        } else {
            // max_by keeps the last maximum, and bands iterate mildest first
            band_counts
                .iter()
                .max_by(|a, b| a.1.cmp(b.1))
                .map(|(band, _)| *band)
        };
        let peak_band = ordered.iter().map(|r| r.band).max();

        let (mean_score, mean_confidence) = if total == 0 {
            (0.0, 0.0)
        } else {
            let n = total as f64;
            (
                ordered.iter().map(|r| r.score).sum::<f64>() / n,
                ordered.iter().map(|r| r.confidence).sum::<f64>() / n,
            )
        };

        let band_transitions = ordered
            .windows(2)
            .filter(|pair| pair[0].band != pair[1].band)
            .count();

        let started_at = ordered.first().map(|r| r.timestamp);
        let ended_at = ordered.last().map(|r| r.timestamp);
        let duration_secs = match (started_at, ended_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        };

        SessionSummary {
            session_id: None,
            total_readings: total,
            started_at,
            ended_at,
            duration_secs,
            band_counts,
            band_percentages,
            band_basis_points,
            time_in_band_secs: time_in_band(&ordered),
            dominant_band,
            peak_band,
            mean_score,
            mean_confidence,
            band_transitions,
            coregulation: CoRegulationTally::from_events(events),
        }
    }
}

/// Largest-remainder apportionment of 10000 basis points
fn basis_points(counts: &BTreeMap<Band, usize>, total: usize) -> BTreeMap<Band, u32> {
    let mut result: BTreeMap<Band, u32> = Band::ALL.iter().map(|b| (*b, 0)).collect();
    if total == 0 {
        return result;
    }

    let total = total as u64;
    let mut remainders: Vec<(Band, u64)> = Vec::with_capacity(counts.len());
    let mut assigned = 0u64;
    for (band, count) in counts {
        let scaled = *count as u64 * BASIS_POINTS_TOTAL as u64;
        let floor = scaled / total;
        assigned += floor;
        result.insert(*band, floor as u32);
        remainders.push((*band, scaled % total));
    }

    // Largest remainder first, more severe band on ties
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
    let leftover = BASIS_POINTS_TOTAL as u64 - assigned;
    for (band, _) in remainders.iter().take(leftover as usize) {
        if let Some(bp) = result.get_mut(band) {
            *bp += 1;
        }
    }
    result
}

/// Each reading holds its band until the next one; the final reading is
/// credited with the median sampling step
fn time_in_band(ordered: &[&FusedReading]) -> BTreeMap<Band, f64> {
    let mut result: BTreeMap<Band, f64> = Band::ALL.iter().map(|b| (*b, 0.0)).collect();
    if ordered.is_empty() {
        return result;
    }

    let mut steps: Vec<f64> = ordered
        .windows(2)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0)
        .collect();
    for (reading, step) in ordered.iter().zip(&steps) {
        *result.entry(reading.band).or_insert(0.0) += step;
    }

    steps.sort_by(|a, b| a.total_cmp(b));
    let tail = if steps.is_empty() {
        0.0
    } else {
        steps[steps.len() / 2]
    };
    if let Some(last) = ordered.last() {
        *result.entry(last.band).or_insert(0.0) += tail;
    }
    result
}
