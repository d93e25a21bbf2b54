//! Core domain types for the glycemia study engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Instants and typed clinical events
//! - Units and glycemia normalisation
//! - Time-of-day schedules (ratio, sensitivity, basal, override)
//! - Meal periods used to group dosing decisions

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Device-local timestamp. Pumps and sensors report wall-clock time, and the
/// hour-of-day logic (schedules, basal segments, meal periods) follows it.
pub type Instant = NaiveDateTime;

/// mg/dL per mmol/L
pub const GLYCEMIA_MMOL_TO_MG: f64 = 18.0182;

// ============================================================================
// Event Types
// ============================================================================

/// Kind of a clinical event attached to an instant
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Cgm,
    Scan,
    Strip,
    Ketone,
    Carbs,
    Bolus,
    MicroBolus,
    ReservoirChange,
    CannulaChange,
    BasalRateActual,
    BasalRateProfile,
    InsulinCarbRatio,
    InsulinSensitivity,
    GlycemiaBolusBase,
    GlycemiaBolusTarget,
    InsulinOnBoard,
}

impl EventKind {
    /// Number of event kinds, i.e. slots in a timeline entry
    pub const COUNT: usize = 16;

    pub const ALL: [EventKind; EventKind::COUNT] = [
        EventKind::Cgm,
        EventKind::Scan,
        EventKind::Strip,
        EventKind::Ketone,
        EventKind::Carbs,
        EventKind::Bolus,
        EventKind::MicroBolus,
        EventKind::ReservoirChange,
        EventKind::CannulaChange,
        EventKind::BasalRateActual,
        EventKind::BasalRateProfile,
        EventKind::InsulinCarbRatio,
        EventKind::InsulinSensitivity,
        EventKind::GlycemiaBolusBase,
        EventKind::GlycemiaBolusTarget,
        EventKind::InsulinOnBoard,
    ];

    /// Slot index of this kind inside a timeline entry
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether the event is a real glycemia measurement usable as a reading
    pub fn is_reading(self) -> bool {
        matches!(self, EventKind::Cgm | EventKind::Scan | EventKind::Strip)
    }

    /// Whether the event value is a glycemia (and must be stored in mg/dL)
    pub fn is_glycemia(self) -> bool {
        self.is_reading()
            || matches!(
                self,
                EventKind::GlycemiaBolusBase | EventKind::GlycemiaBolusTarget
            )
    }

    /// The unit values of this kind are stored in after ingestion
    pub fn canonical_unit(self) -> Unit {
        match self {
            EventKind::Cgm
            | EventKind::Scan
            | EventKind::Strip
            | EventKind::GlycemiaBolusBase
            | EventKind::GlycemiaBolusTarget => Unit::MgDl,
            EventKind::Ketone => Unit::MmolL,
            EventKind::Carbs => Unit::Gram,
            EventKind::Bolus | EventKind::MicroBolus | EventKind::InsulinOnBoard => Unit::Insulin,
            EventKind::BasalRateActual | EventKind::BasalRateProfile => Unit::InsulinPerHour,
            EventKind::InsulinCarbRatio => Unit::GramPerInsulin,
            EventKind::InsulinSensitivity => Unit::MgDlPerInsulin,
            EventKind::ReservoirChange | EventKind::CannulaChange => Unit::Count,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Cgm => "cgm",
            EventKind::Scan => "scan",
            EventKind::Strip => "strip",
            EventKind::Ketone => "ketone",
            EventKind::Carbs => "carbs",
            EventKind::Bolus => "bolus",
            EventKind::MicroBolus => "micro_bolus",
            EventKind::ReservoirChange => "reservoir_change",
            EventKind::CannulaChange => "cannula_change",
            EventKind::BasalRateActual => "basal_rate_actual",
            EventKind::BasalRateProfile => "basal_rate_profile",
            EventKind::InsulinCarbRatio => "insulin_carb_ratio",
            EventKind::InsulinSensitivity => "insulin_sensitivity",
            EventKind::GlycemiaBolusBase => "glycemia_bolus_base",
            EventKind::GlycemiaBolusTarget => "glycemia_bolus_target",
            EventKind::InsulinOnBoard => "insulin_on_board",
        };
        f.write_str(name)
    }
}

/// Measurement unit carried by an event
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Unit {
    #[serde(rename = "mg/dL")]
    MgDl,
    #[serde(rename = "mmol/L")]
    MmolL,
    #[serde(rename = "g")]
    Gram,
    #[serde(rename = "u")]
    Insulin,
    #[serde(rename = "u/h")]
    InsulinPerHour,
    #[serde(rename = "g/u")]
    GramPerInsulin,
    #[serde(rename = "mg/dL/u")]
    MgDlPerInsulin,
    #[serde(rename = "mmol/L/u")]
    MmolLPerInsulin,
    #[serde(rename = "")]
    Count,
}

impl Unit {
    /// Parse a vendor unit label
    pub fn parse(label: &str) -> Option<Unit> {
        let unit = match label.trim() {
            "mg/dL" | "mg/dl" => Unit::MgDl,
            "mmol/L" | "mmol/l" => Unit::MmolL,
            "g" | "grams" => Unit::Gram,
            "u" | "U" | "Units" => Unit::Insulin,
            "u/h" | "U/h" | "Units/hour" => Unit::InsulinPerHour,
            "g/u" | "g/U" => Unit::GramPerInsulin,
            "mg/dL/u" | "mg/dL /u" | "mg/dL/U" => Unit::MgDlPerInsulin,
            "mmol/L/u" | "mmol/L/U" => Unit::MmolLPerInsulin,
            "" => Unit::Count,
            _ => return None,
        };
        Some(unit)
    }

    /// Label used when writing records back out
    pub fn label(self) -> &'static str {
        match self {
            Unit::MgDl => "mg/dL",
            Unit::MmolL => "mmol/L",
            Unit::Gram => "g",
            Unit::Insulin => "u",
            Unit::InsulinPerHour => "u/h",
            Unit::GramPerInsulin => "g/u",
            Unit::MgDlPerInsulin => "mg/dL/u",
            Unit::MmolLPerInsulin => "mmol/L/u",
            Unit::Count => "",
        }
    }
}

/// A clinical event: a value with its unit, stored in canonical units
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TypedEvent {
    pub kind: EventKind,
    pub value: f64,
    pub unit: Unit,
}

impl TypedEvent {
    /// Build an event already expressed in the kind's canonical unit
    pub fn new(kind: EventKind, value: f64) -> Self {
        Self {
            kind,
            value,
            unit: kind.canonical_unit(),
        }
    }

    /// Build an event from a vendor value and unit, converting glycemia
    /// (and sensitivity) from mmol/L to mg/dL.
    ///
    /// Returns `None` when the unit cannot express this kind.
    pub fn normalized(kind: EventKind, value: f64, unit: Unit) -> Option<Self> {
        let canonical = kind.canonical_unit();
        let value = match (canonical, unit) {
            (c, u) if c == u => value,
            (Unit::MgDl, Unit::MmolL) => value * GLYCEMIA_MMOL_TO_MG,
            (Unit::MgDlPerInsulin, Unit::MmolLPerInsulin) => value * GLYCEMIA_MMOL_TO_MG,
            (Unit::Count, _) => value,
            _ => return None,
        };
        Some(Self::new(kind, value))
    }
}

// ============================================================================
// Schedule Types
// ============================================================================

/// Kind of a published time-of-day schedule
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Sensitivity,
    Ratio,
    Basal,
    Override,
}

impl ScheduleKind {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Time-of-day schedule: each breakpoint is active until the next one, and
/// the latest breakpoint of the day stays active past midnight until the
/// first breakpoint of the next day.
#[derive(Clone, Debug, PartialEq)]
pub struct Schedule {
    pub kind: ScheduleKind,
    pub breakpoints: BTreeMap<NaiveTime, f64>,
}

impl Schedule {
    pub fn new(kind: ScheduleKind, breakpoints: BTreeMap<NaiveTime, f64>) -> Self {
        Self { kind, breakpoints }
    }

    /// Value active at the given time of day
    ///
    /// Returns `None` only for a schedule without breakpoints.
    pub fn value_at(&self, time: NaiveTime) -> Option<f64> {
        self.breakpoints
            .range(..=time)
            .next_back()
            .or_else(|| self.breakpoints.iter().next_back())
            .map(|(_, value)| *value)
    }
}

// ============================================================================
// Meal Periods
// ============================================================================

/// Period of the day a dosing decision belongs to
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MealPeriod {
    Night,
    Breakfast,
    Lunch,
    Afternoon,
    Dinner,
    Evening,
}

impl MealPeriod {
    pub fn of(time: NaiveTime) -> MealPeriod {
        match time.hour() {
            0..=6 => MealPeriod::Night,
            7..=10 => MealPeriod::Breakfast,
            11..=14 => MealPeriod::Lunch,
            15..=18 => MealPeriod::Afternoon,
            19..=20 => MealPeriod::Dinner,
            _ => MealPeriod::Evening,
        }
    }
}

impl fmt::Display for MealPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MealPeriod::Night => "night",
            MealPeriod::Breakfast => "breakfast",
            MealPeriod::Lunch => "lunch",
            MealPeriod::Afternoon => "afternoon",
            MealPeriod::Dinner => "dinner",
            MealPeriod::Evening => "evening",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn ratio_schedule() -> Schedule {
        let mut breakpoints = BTreeMap::new();
        breakpoints.insert(hm(6, 0), 20.0);
        breakpoints.insert(hm(12, 0), 25.0);
        breakpoints.insert(hm(18, 0), 22.0);
        Schedule::new(ScheduleKind::Ratio, breakpoints)
    }

    #[test]
    fn test_schedule_value_within_day() {
        let schedule = ratio_schedule();
        assert_eq!(schedule.value_at(hm(7, 15)), Some(20.0));
        assert_eq!(schedule.value_at(hm(13, 0)), Some(25.0));
        assert_eq!(schedule.value_at(hm(23, 0)), Some(22.0));
    }

    #[test]
    fn test_schedule_wraps_past_midnight() {
        let schedule = ratio_schedule();
        assert_eq!(schedule.value_at(hm(2, 0)), Some(22.0));
    }

    #[test]
    fn test_schedule_breakpoint_is_inclusive() {
        let schedule = ratio_schedule();
        assert_eq!(schedule.value_at(hm(12, 0)), Some(25.0));
        assert_eq!(schedule.value_at(hm(11, 59)), Some(20.0));
    }

    #[test]
    fn test_empty_schedule_has_no_value() {
        let schedule = Schedule::new(ScheduleKind::Basal, BTreeMap::new());
        assert_eq!(schedule.value_at(hm(8, 0)), None);
    }

    #[test]
    fn test_normalize_mmol_glycemia() {
        let event = TypedEvent::normalized(EventKind::Cgm, 10.0, Unit::MmolL).unwrap();
        assert_eq!(event.unit, Unit::MgDl);
        assert!((event.value - 180.182).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_rejects_incompatible_unit() {
        assert!(TypedEvent::normalized(EventKind::Bolus, 1.0, Unit::Gram).is_none());
    }

    #[test]
    fn test_event_kind_indices_are_dense() {
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_meal_periods() {
        assert_eq!(MealPeriod::of(hm(3, 0)), MealPeriod::Night);
        assert_eq!(MealPeriod::of(hm(8, 0)), MealPeriod::Breakfast);
        assert_eq!(MealPeriod::of(hm(11, 58)), MealPeriod::Lunch);
        assert_eq!(MealPeriod::of(hm(16, 0)), MealPeriod::Afternoon);
        assert_eq!(MealPeriod::of(hm(19, 0)), MealPeriod::Dinner);
        assert_eq!(MealPeriod::of(hm(22, 30)), MealPeriod::Evening);
    }
}
