//! Day-level summaries of a run.
//!
//! Carbohydrates per meal period, carb-ratio changes per meal period, the
//! scheduled ratio in effect at each meal, and the instants glycemia leaves
//! or re-enters the target range.

use crate::output::SeriesPoint;
use crate::timeline::Timeline;
use crate::types::{Instant, MealPeriod, ScheduleKind};
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Carbohydrates taken during one meal period of one day
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeriodCarbs {
    pub day: NaiveDate,
    pub period: MealPeriod,
    pub grams: f64,
    /// Percentage of the day's total
    pub share: f64,
}

/// Group carb intakes by day and meal period
pub fn carbs_by_period(intakes: &[(Instant, f64)]) -> Vec<PeriodCarbs> {
    let mut grams: BTreeMap<(NaiveDate, MealPeriod), f64> = BTreeMap::new();
    let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();

    for (at, amount) in intakes {
        let day = at.date();
        *grams.entry((day, MealPeriod::of(at.time()))).or_default() += amount;
        *totals.entry(day).or_default() += amount;
    }

    grams
        .into_iter()
        .map(|((day, period), grams)| {
            let total = totals.get(&day).copied().unwrap_or(0.0);
            let share = if total > 0.0 { grams / total * 100.0 } else { 0.0 };
            PeriodCarbs {
                day,
                period,
                grams,
                share,
            }
        })
        .collect()
}

/// A reported carb ratio that differs from the last one seen for its meal
/// period
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RatioChange {
    pub at: Instant,
    pub period: MealPeriod,
    pub previous: Option<f64>,
    pub ratio: f64,
}

/// Last reported carb ratio per meal period
#[derive(Clone, Debug, Default)]
pub struct RatioTracker {
    current: BTreeMap<MealPeriod, f64>,
}

impl RatioTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reported ratio, returning the change it makes
    pub fn observe(&mut self, at: Instant, ratio: f64) -> Option<RatioChange> {
        let period = MealPeriod::of(at.time());
        let previous = self.current.insert(period, ratio);
        if previous == Some(ratio) {
            return None;
        }
        Some(RatioChange {
            at,
            period,
            previous,
            ratio,
        })
    }
}

/// Time of day each meal's scheduled ratio is read at
pub const MEAL_TIMES: [(MealPeriod, u32); 4] = [
    (MealPeriod::Breakfast, 8),
    (MealPeriod::Lunch, 12),
    (MealPeriod::Afternoon, 16),
    (MealPeriod::Dinner, 19),
];

/// Ratio schedule value in effect at a meal time
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MealRatio {
    pub day: NaiveDate,
    pub period: MealPeriod,
    pub ratio: f64,
}

/// Scheduled ratio at every meal time inside `[start, end)`
pub fn scheduled_meal_ratios(timeline: &Timeline, start: Instant, end: Instant) -> Vec<MealRatio> {
    let mut ratios = Vec::new();
    let mut day = start.date();

    while day.and_time(NaiveTime::MIN) < end {
        for (period, hour) in MEAL_TIMES {
            let Some(time) = NaiveTime::from_hms_opt(hour, 0, 0) else {
                continue;
            };
            let at = day.and_time(time);
            if at < start || at >= end {
                continue;
            }
            if let Some(ratio) = timeline.resolve_schedule(ScheduleKind::Ratio, at) {
                ratios.push(MealRatio { day, period, ratio });
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    ratios
}

/// Which edge of the target range glycemia crossed, and in which direction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Crossing {
    HyperStart,
    HyperEnd,
    HypoStart,
    HypoEnd,
}

impl fmt::Display for Crossing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Crossing::HyperStart => "hyper-start",
            Crossing::HyperEnd => "hyper-end",
            Crossing::HypoStart => "hypo-start",
            Crossing::HypoEnd => "hypo-end",
        };
        f.write_str(name)
    }
}

/// Interpolated instant at which glycemia crossed a range limit
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RangeCrossing {
    pub at: Instant,
    pub crossing: Crossing,
    pub limit: f64,
}

/// Instant on the segment `(x0, y0)`–`(x1, y1)` where it meets `limit`
fn interpolate(x0: Instant, y0: f64, x1: Instant, y1: f64, limit: f64) -> Instant {
    let fraction = (limit - y0) / (y1 - y0);
    let span = (x1 - x0).num_milliseconds() as f64;
    x0 + Duration::milliseconds((span * fraction).round() as i64)
}

/// Range crossings between consecutive readings, in time order
///
/// A reading exactly on a limit counts as inside the range.
pub fn range_crossings(points: &[SeriesPoint], low: f64, high: f64) -> Vec<RangeCrossing> {
    let readings: Vec<(Instant, f64)> = points
        .iter()
        .filter_map(|point| point.value.map(|value| (point.at, value)))
        .collect();

    let mut crossings = Vec::new();
    for pair in readings.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        let mut push = |crossing, limit| {
            crossings.push(RangeCrossing {
                at: interpolate(x0, y0, x1, y1, limit),
                crossing,
                limit,
            });
        };

        if y1 > y0 {
            if y0 < low && y1 >= low {
                push(Crossing::HypoEnd, low);
            }
            if y0 <= high && y1 > high {
                push(Crossing::HyperStart, high);
            }
        } else if y1 < y0 {
            if y0 > high && y1 <= high {
                push(Crossing::HyperEnd, high);
            }
            if y0 >= low && y1 < low {
                push(Crossing::HypoStart, low);
            }
        }
    }
    crossings
}
