//! Run output: named series plus per-episode records.

use crate::audit::BolusAudit;
use crate::detector::{BasalSegment, SuspensionNote};
use crate::evaluator::Verdict;
use crate::summary::{MealRatio, PeriodCarbs, RangeCrossing, RatioChange};
use crate::types::Instant;
use chrono::Duration;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Offset separating the points of a step or marker drawn at one instant
pub fn epsilon() -> Duration {
    Duration::microseconds(1)
}

/// Name of an output series
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesName {
    /// CGM and scan readings
    Glycemia,
    Strip,
    Ketone,
    Bolus,
    MicroBolus,
    Carbs,
    /// Line from bolus glycemia to the reported target
    Target,
    PredictedGlycemia,
    Iob,
    Cob,
    BasalActual,
    BasalProfile,
    BasalInterruption,
    BasalAdjustment,
    /// Days since the previous reservoir change
    ReservoirAge,
    /// Days since the previous cannula change
    CannulaAge,
}

impl SeriesName {
    pub const ALL: [SeriesName; 16] = [
        SeriesName::Glycemia,
        SeriesName::Strip,
        SeriesName::Ketone,
        SeriesName::Bolus,
        SeriesName::MicroBolus,
        SeriesName::Carbs,
        SeriesName::Target,
        SeriesName::PredictedGlycemia,
        SeriesName::Iob,
        SeriesName::Cob,
        SeriesName::BasalActual,
        SeriesName::BasalProfile,
        SeriesName::BasalInterruption,
        SeriesName::BasalAdjustment,
        SeriesName::ReservoirAge,
        SeriesName::CannulaAge,
    ];
}

impl fmt::Display for SeriesName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SeriesName::Glycemia => "glycemia",
            SeriesName::Strip => "strip",
            SeriesName::Ketone => "ketone",
            SeriesName::Bolus => "bolus",
            SeriesName::MicroBolus => "micro_bolus",
            SeriesName::Carbs => "carbs",
            SeriesName::Target => "target",
            SeriesName::PredictedGlycemia => "predicted_glycemia",
            SeriesName::Iob => "iob",
            SeriesName::Cob => "cob",
            SeriesName::BasalActual => "basal_actual",
            SeriesName::BasalProfile => "basal_profile",
            SeriesName::BasalInterruption => "basal_interruption",
            SeriesName::BasalAdjustment => "basal_adjustment",
            SeriesName::ReservoirAge => "reservoir_age",
            SeriesName::CannulaAge => "cannula_age",
        };
        f.write_str(name)
    }
}

/// One point of a series; `None` breaks the line
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub at: Instant,
    pub value: Option<f64>,
}

/// Everything one engine run produced
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunOutput {
    pub label: String,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
    pub series: BTreeMap<SeriesName, Vec<SeriesPoint>>,
    pub segments: Vec<BasalSegment>,
    pub suspensions: Vec<SuspensionNote>,
    pub verdicts: Vec<Verdict>,
    pub audits: Vec<BolusAudit>,
    /// Episodes opened in the window and still open at its end
    pub unfinished_episodes: usize,
    pub daily_carbs: Vec<PeriodCarbs>,
    pub ratio_changes: Vec<RatioChange>,
    pub meal_ratios: Vec<MealRatio>,
    pub range_crossings: Vec<RangeCrossing>,
}

impl RunOutput {
    pub fn new(label: impl Into<String>, start: Instant, end: Instant) -> Self {
        Self {
            label: label.into(),
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }

    pub fn push(&mut self, name: SeriesName, at: Instant, value: Option<f64>) {
        self.series
            .entry(name)
            .or_default()
            .push(SeriesPoint { at, value });
    }

    /// Isolated marker: a spike from 0 to `value` and a line break
    pub fn push_marker(&mut self, name: SeriesName, at: Instant, value: f64) {
        self.push(name, at - epsilon(), Some(0.0));
        self.push(name, at, Some(value));
        self.push(name, at + epsilon(), None);
    }

    /// Step change from `previous` to `value` at `at`
    pub fn push_step(&mut self, name: SeriesName, at: Instant, previous: Option<f64>, value: f64) {
        self.push(name, at - epsilon(), previous);
        self.push(name, at, Some(value));
    }

    /// Series by name, empty when nothing was emitted
    pub fn series(&self, name: SeriesName) -> &[SeriesPoint] {
        self.series.get(&name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Value of a series at an exact instant
    pub fn value_at(&self, name: SeriesName, at: Instant) -> Option<f64> {
        self.series(name)
            .iter()
            .rev()
            .find(|point| point.at == at)
            .and_then(|point| point.value)
    }
}
