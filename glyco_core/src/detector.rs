//! Basal study: quiet periods and pump suspensions.
//!
//! While no insulin or carbohydrate is active, glycemia drift is
//! attributed to basal delivery. Each quiet stretch, cut at clock-hour
//! boundaries, becomes a [`BasalSegment`] with a recommended basal rate.
//! Separately, a basal rate of zero while the pump was delivering marks a
//! suspension; resuming yields a [`SuspensionNote`] with the insulin the
//! suspension withheld.

use crate::config::ModelConfig;
use crate::types::Instant;
use chrono::Timelike;
use serde::Serialize;

/// Observable detector state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    Idle,
    Open,
    Suspended,
}

/// One closed quiet period and the basal rate it suggests
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BasalSegment {
    pub start: Instant,
    pub end: Instant,
    pub start_glycemia: f64,
    pub end_glycemia: f64,
    pub glycemia_delta: f64,
    pub insulin_delta: f64,
    pub profile_basal: f64,
    pub recommended_basal: f64,
    /// Closed by the end of the run window rather than by the data
    pub last: bool,
}

/// A pump suspension that has ended
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SuspensionNote {
    pub suspended_at: Instant,
    pub resumed_at: Instant,
    /// Rate (u/h) that was delivered before the suspension
    pub rate: f64,
    pub insulin_avoided: f64,
}

/// What a basal-rate-actual event did to the pump state
#[derive(Clone, Debug, PartialEq)]
pub enum BasalChange {
    Suspended,
    Resumed(SuspensionNote),
    Unchanged,
}

impl BasalChange {
    /// Whether the event interrupted or restored delivery
    pub fn is_interruption(&self) -> bool {
        !matches!(self, BasalChange::Unchanged)
    }
}

/// Inputs of one detector step
#[derive(Clone, Copy, Debug)]
pub struct StepObservation {
    pub at: Instant,
    /// Real reading recorded at this instant
    pub reading: Option<f64>,
    /// No insulin or carbohydrate activity
    pub quiet: bool,
    /// Profile basal rate (u/h) in effect
    pub profile_basal: f64,
}

#[derive(Clone, Debug, PartialEq)]
struct OpenSegment {
    start: Instant,
    start_glycemia: f64,
    latest_glycemia: f64,
    profile_basal: f64,
}

#[derive(Clone, Debug, PartialEq)]
struct Suspension {
    since: Instant,
    rate: f64,
}

/// Round to the nearest multiple of `granularity`
pub fn round_to(value: f64, granularity: f64) -> f64 {
    let rounded = (value / granularity).round() * granularity;
    // Strip binary noise such as 0.8500000000000001
    (rounded * 1e6).round() / 1e6
}

/// Basal study and suspension tracker of one run
#[derive(Clone, Debug, Default)]
pub struct Detector {
    segment: Option<OpenSegment>,
    suspension: Option<Suspension>,
    delivering: Option<f64>,
}

impl Detector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DetectorState {
        if self.suspension.is_some() {
            DetectorState::Suspended
        } else if self.segment.is_some() {
            DetectorState::Open
        } else {
            DetectorState::Idle
        }
    }

    /// Record the actual basal rate reported by the pump
    pub fn observe_basal(&mut self, at: Instant, rate: f64) -> BasalChange {
        if rate <= 0.0 {
            if self.suspension.is_some() {
                return BasalChange::Unchanged;
            }
            return match self.delivering.take() {
                Some(previous) => {
                    tracing::debug!("{} - basal suspended (was {} u/h)", at, previous);
                    self.suspension = Some(Suspension {
                        since: at,
                        rate: previous,
                    });
                    BasalChange::Suspended
                }
                None => BasalChange::Unchanged,
            };
        }

        self.delivering = Some(rate);
        match self.suspension.take() {
            Some(suspension) => {
                let hours = (at - suspension.since).num_seconds() as f64 / 3600.0;
                let note = SuspensionNote {
                    suspended_at: suspension.since,
                    resumed_at: at,
                    rate: suspension.rate,
                    insulin_avoided: hours * suspension.rate,
                };
                tracing::debug!(
                    "{} - basal resumed, {:.2}u avoided",
                    at,
                    note.insulin_avoided
                );
                BasalChange::Resumed(note)
            }
            None => BasalChange::Unchanged,
        }
    }

    /// Advance the basal study by one step, returning a segment it closed
    pub fn step(&mut self, obs: &StepObservation, model: &ModelConfig) -> Option<BasalSegment> {
        let Some(mut segment) = self.segment.take() else {
            if obs.quiet {
                if let Some(glycemia) = obs.reading {
                    self.open(obs, glycemia);
                }
            }
            return None;
        };

        if let Some(glycemia) = obs.reading {
            segment.latest_glycemia = glycemia;
        }

        if !obs.quiet {
            return Some(close(segment, obs.at, false, model));
        }

        match obs.reading {
            Some(glycemia) if hour_key(segment.start) != hour_key(obs.at) => {
                let closed = close(segment, obs.at, false, model);
                self.open(obs, glycemia);
                Some(closed)
            }
            _ => {
                self.segment = Some(segment);
                None
            }
        }
    }

    /// Close the open segment, if any, at the end of the run window
    pub fn finish(&mut self, at: Instant, model: &ModelConfig) -> Option<BasalSegment> {
        self.segment
            .take()
            .map(|segment| close(segment, at, true, model))
    }

    fn open(&mut self, obs: &StepObservation, glycemia: f64) {
        tracing::debug!("{} - basal study segment opened at {}", obs.at, glycemia);
        self.segment = Some(OpenSegment {
            start: obs.at,
            start_glycemia: glycemia,
            latest_glycemia: glycemia,
            profile_basal: obs.profile_basal,
        });
    }
}

fn hour_key(at: Instant) -> (chrono::NaiveDate, u32) {
    (at.date(), at.hour())
}

fn close(segment: OpenSegment, end: Instant, last: bool, model: &ModelConfig) -> BasalSegment {
    let glycemia_delta = segment.latest_glycemia - segment.start_glycemia;
    let insulin_delta = glycemia_delta / model.reference_sensitivity;
    let recommended_basal = round_to(
        (segment.profile_basal + insulin_delta).max(0.0),
        model.basal_rounding,
    );

    BasalSegment {
        start: segment.start,
        end,
        start_glycemia: segment.start_glycemia,
        end_glycemia: segment.latest_glycemia,
        glycemia_delta,
        insulin_delta,
        profile_basal: segment.profile_basal,
        recommended_basal,
        last,
    }
}
