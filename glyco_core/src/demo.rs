//! Deterministic synthetic day for trying the tool without device data.

use crate::ingest::{build_timeline, Record};
use crate::timeline::Timeline;
use crate::types::{EventKind, Instant, ScheduleKind};
use chrono::{Duration, NaiveDate, NaiveTime};

/// Meals of the synthetic day: time, carbs, ratio, bolus when it differs
/// from carbs / ratio
const MEALS: [((u32, u32), f64, f64, Option<f64>); 5] = [
    ((8, 0), 45.0, 14.0, None),
    ((8, 30), 20.0, 14.0, None),
    ((11, 58), 20.0, 25.0, Some(1.92)),
    ((16, 0), 35.0, 25.0, None),
    ((19, 0), 15.0, 25.0, None),
];

const MEAL_SENSITIVITY: f64 = 150.0;

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// CGM level of the synthetic day at a time of day
fn glycemia_at(time: NaiveTime) -> f64 {
    if time < hm(6, 0) {
        307.0
    } else if time < hm(12, 0) {
        100.0
    } else if time < hm(18, 0) {
        150.0
    } else {
        50.0
    }
}

/// Records of the synthetic day
///
/// A CGM reading every 5 minutes, a night correction at 03:00, five meal
/// boluses (breakfast taken in two helpings), basal and carb-ratio
/// schedules and a half-hour pump suspension.
pub fn synthetic_day(day: NaiveDate) -> Vec<Record> {
    let midnight = day.and_time(NaiveTime::MIN);
    let at = |time: NaiveTime| -> Instant { day.and_time(time) };
    let mut records = Vec::new();

    records.push(Record::schedule(
        midnight,
        ScheduleKind::Basal,
        &[(hm(0, 0), 0.8), (hm(6, 0), 0.9), (hm(22, 0), 0.8)],
    ));
    records.push(Record::schedule(
        midnight,
        ScheduleKind::Ratio,
        &[(hm(0, 0), 25.0), (hm(6, 0), 14.0), (hm(11, 0), 25.0)],
    ));
    records.push(Record::event(midnight, EventKind::BasalRateActual, 0.8));

    let mut ts = midnight;
    while ts < midnight + Duration::days(1) {
        records.push(Record::event(ts, EventKind::Cgm, glycemia_at(ts.time())));
        ts += Duration::minutes(5);
    }

    let night = at(hm(3, 0));
    records.push(Record::event(night, EventKind::InsulinSensitivity, 200.0));
    records.push(Record::event(night, EventKind::Bolus, 0.98));
    records.push(Record::event(night, EventKind::GlycemiaBolusBase, 307.0));

    for ((hour, minute), carbs, ratio, bolus) in MEALS {
        let ts = at(hm(hour, minute));
        records.push(Record::event(ts, EventKind::Carbs, carbs));
        records.push(Record::event(ts, EventKind::InsulinSensitivity, MEAL_SENSITIVITY));
        records.push(Record::event(ts, EventKind::InsulinCarbRatio, ratio));
        records.push(Record::event(ts, EventKind::Bolus, bolus.unwrap_or(carbs / ratio)));
    }

    records.push(Record::event(at(hm(14, 0)), EventKind::BasalRateActual, 0.0));
    records.push(Record::event(at(hm(14, 30)), EventKind::BasalRateActual, 0.9));

    records.sort_by_key(Record::time);
    records
}

/// Timeline of the synthetic day
pub fn synthetic_timeline(day: NaiveDate) -> Timeline {
    build_timeline(&synthetic_day(day)).0
}
