//! Co-regulation detection
//!
//! Finds windows where caregiver arousal and child arousal move together with
//! a time lag, and tells apart who moved first.
//!
//! Both histories are resampled onto a common fixed-step grid spanning their
//! overlap. Scalar series (child fused score, caregiver arousal) use linear
//! interpolation; categorical series (child band, caregiver emotion) use the
//! nearest reading. A window slides across the grid and, for each candidate
//! lag, Pearson correlation is computed between `child[i]` and
//! `caregiver[i - lag]`. A positive lag therefore means the caregiver leads.

use crate::config::CoRegulationConfig;
use crate::error::AttuneError;
use crate::types::{
    Band, CaregiverEmotion, CoRegulationEvent, EmotionReading, FusedReading, LeadDirection,
    SynchronyClass,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Correlations closer than this are treated as equal (smaller |lag| wins)
const CORRELATION_TIE_EPSILON: f64 = 1e-9;
/// Variances at or below this make a correlation undefined
const MIN_VARIANCE: f64 = 1e-12;
/// Fewest paired samples a correlation may rest on
const MIN_PAIRED_SAMPLES: usize = 3;

/// Both histories resampled onto one grid
#[derive(Debug, Clone)]
struct AlignedSeries {
    times: Vec<DateTime<Utc>>,
    child: Vec<f64>,
    child_band: Vec<Band>,
    caregiver: Vec<f64>,
    caregiver_emotion: Vec<CaregiverEmotion>,
}

impl AlignedSeries {
    fn build(
        child: &[FusedReading],
        caregiver: &[EmotionReading],
        step: Duration,
        min_span: Duration,
    ) -> Result<Self, AttuneError> {
        if child.len() < 2 || caregiver.len() < 2 {
            return Err(AttuneError::AlignmentFailure(format!(
                "need at least two readings per subject (child {}, caregiver {})",
                child.len(),
                caregiver.len()
            )));
        }

        let mut child_points: Vec<(DateTime<Utc>, f64, Band)> = child
            .iter()
            .filter(|r| r.score.is_finite())
            .map(|r| (r.timestamp, r.score, r.band))
            .collect();
        child_points.sort_by_key(|p| p.0);
        let mut caregiver_points: Vec<(DateTime<Utc>, f64, CaregiverEmotion)> = caregiver
            .iter()
            .filter(|r| r.arousal.is_finite())
            .map(|r| (r.timestamp, r.arousal, r.emotion))
            .collect();
        caregiver_points.sort_by_key(|p| p.0);

        let (Some(child_first), Some(child_last)) = (child_points.first(), child_points.last())
        else {
            return Err(AttuneError::AlignmentFailure("child history has no finite scores".into()));
        };
        let (Some(care_first), Some(care_last)) =
            (caregiver_points.first(), caregiver_points.last())
        else {
            return Err(AttuneError::AlignmentFailure(
                "caregiver history has no finite arousal".into(),
            ));
        };

        let start = child_first.0.max(care_first.0);
        let end = child_last.0.min(care_last.0);
        if end <= start {
            return Err(AttuneError::AlignmentFailure(format!(
                "histories do not overlap (child {} to {}, caregiver {} to {})",
                child_first.0, child_last.0, care_first.0, care_last.0
            )));
        }
        if end - start < min_span {
            return Err(AttuneError::AlignmentFailure(format!(
                "overlap of {}s is shorter than one window ({}s)",
                (end - start).num_seconds(),
                min_span.num_seconds()
            )));
        }

        let step_ms = step.num_milliseconds().max(1);
        let steps = (end - start).num_milliseconds() / step_ms;
        let times: Vec<DateTime<Utc>> = (0..=steps)
            .map(|k| start + Duration::milliseconds(k * step_ms))
            .collect();

        let child_times: Vec<DateTime<Utc>> = child_points.iter().map(|p| p.0).collect();
        let child_values: Vec<f64> = child_points.iter().map(|p| p.1).collect();
        let care_times: Vec<DateTime<Utc>> = caregiver_points.iter().map(|p| p.0).collect();
        let care_values: Vec<f64> = caregiver_points.iter().map(|p| p.1).collect();

        let mut aligned = AlignedSeries {
            times: Vec::with_capacity(times.len()),
            child: Vec::with_capacity(times.len()),
            child_band: Vec::with_capacity(times.len()),
            caregiver: Vec::with_capacity(times.len()),
            caregiver_emotion: Vec::with_capacity(times.len()),
        };
        for t in times {
            aligned.child.push(interpolate(&child_times, &child_values, t));
            aligned
                .child_band
                .push(child_points[nearest(&child_times, t)].2);
            aligned.caregiver.push(interpolate(&care_times, &care_values, t));
            aligned
                .caregiver_emotion
                .push(caregiver_points[nearest(&care_times, t)].2);
            aligned.times.push(t);
        }
        Ok(aligned)
    }

    fn len(&self) -> usize {
        self.times.len()
    }
}

/// Linear interpolation, holding the end values outside the sampled range
fn interpolate(times: &[DateTime<Utc>], values: &[f64], t: DateTime<Utc>) -> f64 {
    let idx = times.partition_point(|x| *x <= t);
    if idx == 0 {
        return values[0];
    }
    if idx >= times.len() {
        return values[times.len() - 1];
    }
    let (t0, t1) = (times[idx - 1], times[idx]);
    let (v0, v1) = (values[idx - 1], values[idx]);
    let span = (t1 - t0).num_milliseconds();
    if span <= 0 {
        return v1;
    }
    let frac = (t - t0).num_milliseconds() as f64 / span as f64;
    v0 + (v1 - v0) * frac
}

/// Index of the reading nearest to `t` (earlier reading wins ties)
fn nearest(times: &[DateTime<Utc>], t: DateTime<Utc>) -> usize {
    let idx = times.partition_point(|x| *x <= t);
    if idx == 0 {
        return 0;
    }
    if idx >= times.len() {
        return times.len() - 1;
    }
    if t - times[idx - 1] <= times[idx] - t {
        idx - 1
    } else {
        idx
    }
}

/// Pearson correlation, `None` when either side is flat
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs[..n].iter().zip(&ys[..n]) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= MIN_VARIANCE || var_y <= MIN_VARIANCE {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

/// Best lag found for one window, in grid steps
#[derive(Debug, Clone, Copy)]
struct LagMatch {
    lag_steps: i64,
    correlation: f64,
}

/// A window above threshold, still in grid indices
#[derive(Debug, Clone, Copy)]
struct WindowHit {
    start_idx: usize,
    end_idx: usize,
    lag_steps: i64,
    correlation: f64,
    direction: LeadDirection,
    classification: SynchronyClass,
}

/// Lagged cross-correlation scanner over two subject histories
#[derive(Debug, Clone, Default)]
pub struct CoRegulationDetector {
    config: CoRegulationConfig,
}

impl CoRegulationDetector {
    pub fn new(config: CoRegulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CoRegulationConfig {
        &self.config
    }

    /// Scan both histories for co-regulation events.
    ///
    /// Histories that cannot be aligned yield an empty list.
    pub fn detect(
        &self,
        child: &[FusedReading],
        caregiver: &[EmotionReading],
    ) -> Vec<CoRegulationEvent> {
        let never = AtomicBool::new(false);
        self.detect_with_cancel(child, caregiver, &never)
            .unwrap_or_default()
    }

    /// Like `detect`, but checks `cancel` before every window and stops with
    /// `ScanCancelled` once it is set
    pub fn detect_with_cancel(
        &self,
        child: &[FusedReading],
        caregiver: &[EmotionReading],
        cancel: &AtomicBool,
    ) -> Result<Vec<CoRegulationEvent>, AttuneError> {
        self.detect_until(child, caregiver, |_| cancel.load(Ordering::Relaxed))
    }

    /// Like `detect`, but asks `should_stop` before every window, passing the
    /// number of windows scanned so far
    pub fn detect_until<F>(
        &self,
        child: &[FusedReading],
        caregiver: &[EmotionReading],
        mut should_stop: F,
    ) -> Result<Vec<CoRegulationEvent>, AttuneError>
    where
        F: FnMut(usize) -> bool,
    {
        let step = secs_to_duration(self.config.resample_step_secs);
        let window = secs_to_duration(self.config.window_secs);

        let series = match AlignedSeries::build(child, caregiver, step, window) {
            Ok(series) => series,
            Err(AttuneError::AlignmentFailure(reason)) => {
                debug!(%reason, "co-regulation scan skipped");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let step_secs = self.config.resample_step_secs;
        let window_len = ((self.config.window_secs / step_secs).round() as usize).max(2);
        let stride = ((self.config.stride_secs / step_secs).round() as usize).max(1);
        let max_lag = (self.config.max_lag_secs / step_secs).round() as i64;
        let min_pairs = ((window_len as f64 * self.config.min_overlap_ratio).ceil() as usize)
            .max(MIN_PAIRED_SAMPLES);

        let mut hits = Vec::new();
        let mut windows_scanned = 0usize;
        let mut start_idx = 0usize;
        while start_idx + window_len <= series.len() {
            if should_stop(windows_scanned) {
                info!(windows_scanned, "co-regulation scan cancelled");
                return Err(AttuneError::ScanCancelled { windows_scanned });
            }
            let end_idx = start_idx + window_len - 1;

            if let Some(best) = best_lag(&series, start_idx, end_idx, max_lag, min_pairs) {
                if best.correlation.abs() > self.config.correlation_threshold {
                    hits.push(self.classify_window(&series, start_idx, end_idx, best));
                }
            }

            windows_scanned += 1;
            start_idx += stride;
        }

        if self.config.merge_overlapping {
            hits = merge_hits(hits);
        }
        let events: Vec<CoRegulationEvent> = hits
            .iter()
            .map(|hit| self.to_event(&series, hit))
            .collect();

        info!(
            windows_scanned,
            grid_samples = series.len(),
            events = events.len(),
            "co-regulation scan complete"
        );
        Ok(events)
    }

    fn classify_window(
        &self,
        series: &AlignedSeries,
        start_idx: usize,
        end_idx: usize,
        best: LagMatch,
    ) -> WindowHit {
        let lag_secs = best.lag_steps as f64 * self.config.resample_step_secs;
        let direction = if lag_secs.abs() <= self.config.lag_epsilon_secs {
            LeadDirection::Simultaneous
        } else if lag_secs > 0.0 {
            LeadDirection::CaregiverLeads
        } else {
            LeadDirection::ChildLeads
        };

        let band_delta = band_delta(series, start_idx, end_idx);
        let midpoint = start_idx + (end_idx - start_idx + 1) / 2;
        let late_caregiver = mean(&series.caregiver[midpoint..=end_idx]);

        let classification = if best.correlation > 0.0
            && band_delta < 0
            && late_caregiver <= self.config.calm_arousal_ceiling
        {
            SynchronyClass::Supportive
        } else if best.correlation > 0.0
            && band_delta > 0
            && late_caregiver >= self.config.high_arousal_floor
        {
            SynchronyClass::Adverse
        } else {
            SynchronyClass::Mirroring
        };

        WindowHit {
            start_idx,
            end_idx,
            lag_steps: best.lag_steps,
            correlation: best.correlation,
            direction,
            classification,
        }
    }

    fn to_event(&self, series: &AlignedSeries, hit: &WindowHit) -> CoRegulationEvent {
        let lag_ms = (hit.lag_steps as f64 * self.config.resample_step_secs * 1000.0).round() as i64;
        CoRegulationEvent {
            window_start: series.times[hit.start_idx],
            window_end: series.times[hit.end_idx],
            lag_ms,
            correlation: hit.correlation,
            direction: hit.direction,
            classification: hit.classification,
            child_band_delta: band_delta(series, hit.start_idx, hit.end_idx),
            caregiver_dominant_emotion: dominant_emotion(
                &series.caregiver_emotion[hit.start_idx..=hit.end_idx],
            ),
        }
    }
}

/// Search lags `0, 1, -1, 2, -2, ...` so that near-ties keep the smaller lag
fn best_lag(
    series: &AlignedSeries,
    start_idx: usize,
    end_idx: usize,
    max_lag: i64,
    min_pairs: usize,
) -> Option<LagMatch> {
    let mut best: Option<LagMatch> = None;
    let mut child_buf = Vec::with_capacity(end_idx - start_idx + 1);
    let mut care_buf = Vec::with_capacity(end_idx - start_idx + 1);

    let lags = std::iter::once(0).chain((1..=max_lag).flat_map(|k| [k, -k]));
    for lag in lags {
        child_buf.clear();
        care_buf.clear();
        for i in start_idx..=end_idx {
            let j = i as i64 - lag;
            if j < 0 || j as usize >= series.len() {
                continue;
            }
            child_buf.push(series.child[i]);
            care_buf.push(series.caregiver[j as usize]);
        }
        if child_buf.len() < min_pairs {
            continue;
        }
        let Some(r) = pearson(&child_buf, &care_buf) else {
            continue;
        };
        let better = match best {
            None => true,
            Some(current) => r.abs() > current.correlation.abs() + CORRELATION_TIE_EPSILON,
        };
        if better {
            best = Some(LagMatch {
                lag_steps: lag,
                correlation: r,
            });
        }
    }
    best
}

/// Merge overlapping hits that agree on classification and direction; the
/// strongest window supplies lag and correlation
fn merge_hits(hits: Vec<WindowHit>) -> Vec<WindowHit> {
    let mut merged: Vec<WindowHit> = Vec::with_capacity(hits.len());
    for hit in hits {
        match merged.last_mut() {
            Some(last)
                if hit.start_idx <= last.end_idx
                    && hit.classification == last.classification
                    && hit.direction == last.direction =>
            {
                last.end_idx = last.end_idx.max(hit.end_idx);
                if hit.correlation.abs() > last.correlation.abs() + CORRELATION_TIE_EPSILON {
                    last.correlation = hit.correlation;
                    last.lag_steps = hit.lag_steps;
                }
            }
            _ => merged.push(hit),
        }
    }
    merged
}

fn band_delta(series: &AlignedSeries, start_idx: usize, end_idx: usize) -> i32 {
    series.child_band[end_idx].ordinal() - series.child_band[start_idx].ordinal()
}

/// Most frequent emotion; ties go to the one seen most recently
fn dominant_emotion(emotions: &[CaregiverEmotion]) -> CaregiverEmotion {
    let mut counts: Vec<(CaregiverEmotion, usize, usize)> = Vec::new();
    for (idx, emotion) in emotions.iter().enumerate() {
        match counts.iter_mut().find(|(e, _, _)| e == emotion) {
            Some(entry) => {
                entry.1 += 1;
                entry.2 = idx;
            }
            None => counts.push((*emotion, 1, idx)),
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)))
        .map(|(emotion, _, _)| emotion)
        .unwrap_or(CaregiverEmotion::Neutral)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::milliseconds((secs * 1000.0).round() as i64)
}
