//! Engine: one chronological fold over the timeline.
//!
//! Each run owns its pools, prediction, detector and evaluator. The fold
//! starts at the first timeline entry so that doses injected before the
//! window are still active inside it, and emits output only for instants
//! in `[start, end)`. Nothing at or after `end` is read.
//!
//! Per instant, in order:
//! 1. basal events (suspension and resume)
//! 2. readings
//! 3. kinetics advance (absorb, evict)
//! 4. predicted glycemia moves by the absorbed effect
//! 5. episodes whose anchor was evicted close
//! 6. new doses and carb loads enter the pools
//! 7. IOB/COB, prediction ends when both pools are empty
//! 8. basal study
//! 9. series emission
//!
//! Day summaries (carbs per meal period, ratio changes, scheduled meal
//! ratios, range crossings) are derived once the fold is done.

use crate::audit::audit_bolus;
use crate::config::ModelConfig;
use crate::detector::{BasalChange, BasalSegment, Detector, StepObservation};
use crate::evaluator::{Evaluator, Intake};
use crate::kinetics::{ActiveCarbLoad, ActiveDose, DoseParams, KineticsState};
use crate::output::{epsilon, RunOutput, SeriesName};
use crate::predictor::Predictor;
use crate::resolve::{resolve_param, Resolved};
use crate::summary::{carbs_by_period, range_crossings, scheduled_meal_ratios, RatioTracker};
use crate::timeline::{Timeline, TimelineEntry};
use crate::types::{EventKind, Instant, ScheduleKind};
use crate::{Error, Result};
use chrono::{Duration, NaiveDate, NaiveTime};

/// Window and constants of one run
#[derive(Clone, Debug)]
pub struct RunParams {
    pub start: Instant,
    /// Exclusive
    pub end: Instant,
    /// Annotation only
    pub label: String,
    pub model: ModelConfig,
}

impl RunParams {
    pub fn new(start: Instant, end: Instant, label: impl Into<String>, model: ModelConfig) -> Self {
        Self {
            start,
            end,
            label: label.into(),
            model,
        }
    }

    /// Whole calendar day
    pub fn for_day(day: NaiveDate, model: ModelConfig) -> Self {
        let (start, end) = day_window(day);
        Self::new(start, end, day.to_string(), model)
    }
}

/// Midnight to midnight window of a calendar day
pub fn day_window(day: NaiveDate) -> (Instant, Instant) {
    let start = day.and_time(NaiveTime::MIN);
    (start, start + Duration::days(1))
}

/// Run the engine over one window
pub fn run(timeline: &Timeline, params: &RunParams) -> Result<RunOutput> {
    if params.end <= params.start {
        return Err(Error::InvalidWindow(format!(
            "end {} is not after start {}",
            params.end, params.start
        )));
    }
    params.model.validate()?;

    let mut state = RunState::new(params);
    let mut output = RunOutput::new(params.label.clone(), params.start, params.end);

    for (at, entry) in timeline.range(..params.end) {
        state.step(*at, entry, timeline, &mut output);
    }
    state.finish(timeline, &mut output);

    tracing::info!(
        "Run '{}': {} verdicts, {} basal segments, {} audits",
        output.label,
        output.verdicts.len(),
        output.segments.len(),
        output.audits.len()
    );
    Ok(output)
}

/// Independent runs over the last `days` calendar days of the timeline,
/// newest first
pub fn run_daily(timeline: &Timeline, days: u32, model: &ModelConfig) -> Result<Vec<RunOutput>> {
    let last = timeline.last_instant().ok_or(Error::EmptyTimeline)?;
    let last_day = last.date();

    (0..days)
        .map(|offset| {
            let day = last_day - Duration::days(i64::from(offset));
            run(timeline, &RunParams::for_day(day, model.clone()))
        })
        .collect()
}

/// Mutable state threaded through the fold
struct RunState<'a> {
    params: &'a RunParams,
    kinetics: KineticsState,
    predictor: Predictor,
    detector: Detector,
    evaluator: Evaluator,
    ratios: RatioTracker,
    carb_intakes: Vec<(Instant, f64)>,
    last_reading: Option<f64>,
    basal_actual: Option<f64>,
    basal_profile: Option<f64>,
    last_reservoir_change: Option<Instant>,
    last_cannula_change: Option<Instant>,
    last_in_window: Option<Instant>,
}

impl<'a> RunState<'a> {
    fn new(params: &'a RunParams) -> Self {
        Self {
            params,
            kinetics: KineticsState::new(),
            predictor: Predictor::new(),
            detector: Detector::new(),
            evaluator: Evaluator::new(),
            ratios: RatioTracker::new(),
            carb_intakes: Vec::new(),
            last_reading: None,
            basal_actual: None,
            basal_profile: None,
            last_reservoir_change: None,
            last_cannula_change: None,
            last_in_window: None,
        }
    }

    fn model(&self) -> &'a ModelConfig {
        &self.params.model
    }

    fn step(&mut self, at: Instant, entry: &TimelineEntry, timeline: &Timeline, output: &mut RunOutput) {
        let in_window = at >= self.params.start;
        let model = self.model();

        self.observe_basal(at, entry, in_window, output);
        let fresh_reading = self.observe_readings(at, entry, in_window, output);

        if let Some(ratio) = entry.value(EventKind::InsulinCarbRatio) {
            if let Some(change) = self.ratios.observe(at, ratio) {
                if in_window {
                    output.ratio_changes.push(change);
                }
            }
        }

        let step = self.kinetics.advance(at, model);
        self.predictor.apply(&step);

        let evicted: Vec<_> = step
            .evicted_doses
            .iter()
            .map(|dose| dose.id)
            .chain(step.evicted_loads.iter().map(|load| load.id))
            .collect();
        if !evicted.is_empty() {
            let final_glycemia = self.last_reading.or(self.predictor.value());
            if let Some(verdict) = self
                .evaluator
                .close_evicted(&evicted, at, final_glycemia, model)
            {
                if in_window && verdict.opened_at >= self.params.start {
                    output.verdicts.push(verdict);
                }
            }
        }

        self.take_intake(at, entry, timeline, in_window, output);

        let iob = self.kinetics.iob();
        let cob = self.kinetics.cob();
        let predicted = self.predictor.value();
        if self.kinetics.is_empty() {
            self.predictor.terminate();
        }

        if !in_window {
            return;
        }
        self.last_in_window = Some(at);

        let threshold = model.activity_threshold;
        let quiet = iob.map_or(true, |v| v < threshold) && cob.map_or(true, |v| v < threshold);
        let profile_basal = self
            .basal_profile
            .or_else(|| timeline.resolve_schedule(ScheduleKind::Basal, at))
            .unwrap_or(0.0);
        let observation = StepObservation {
            at,
            reading: fresh_reading,
            quiet,
            profile_basal,
        };
        if let Some(segment) = self.detector.step(&observation, model) {
            emit_segment(output, segment);
        }

        output.push(SeriesName::Iob, at, iob);
        output.push(SeriesName::Cob, at, cob);
        output.push(SeriesName::PredictedGlycemia, at, predicted);
    }

    fn observe_basal(&mut self, at: Instant, entry: &TimelineEntry, in_window: bool, output: &mut RunOutput) {
        if let Some(rate) = entry.value(EventKind::BasalRateActual) {
            let change = self.detector.observe_basal(at, rate);
            if in_window {
                output.push_step(SeriesName::BasalActual, at, self.basal_actual, rate);
                if change.is_interruption() {
                    output.push_marker(SeriesName::BasalInterruption, at, 1.0);
                }
            }
            if let BasalChange::Resumed(note) = change {
                self.evaluator.withhold(note.insulin_avoided);
                if in_window {
                    output.suspensions.push(note);
                }
            }
            self.basal_actual = Some(rate);
        }

        if let Some(rate) = entry.value(EventKind::BasalRateProfile) {
            if in_window {
                output.push_step(SeriesName::BasalProfile, at, self.basal_profile, rate);
            }
            self.basal_profile = Some(rate);
        }
    }

    /// Record readings and device changes, returning a real reading taken
    /// at this instant
    fn observe_readings(
        &mut self,
        at: Instant,
        entry: &TimelineEntry,
        in_window: bool,
        output: &mut RunOutput,
    ) -> Option<f64> {
        let mut fresh = None;
        for kind in [EventKind::Cgm, EventKind::Scan, EventKind::Strip] {
            if let Some(glycemia) = entry.value(kind) {
                fresh = Some(glycemia);
                if in_window {
                    let name = match kind {
                        EventKind::Strip => SeriesName::Strip,
                        _ => SeriesName::Glycemia,
                    };
                    output.push(name, at, Some(glycemia));
                }
            }
        }
        if fresh.is_some() {
            self.last_reading = fresh;
        }

        if in_window {
            if let Some(ketone) = entry.value(EventKind::Ketone) {
                output.push(SeriesName::Ketone, at, Some(ketone));
            }
        }

        if entry.get(EventKind::ReservoirChange).is_some() {
            if let (true, Some(previous)) = (in_window, self.last_reservoir_change) {
                output.push_marker(SeriesName::ReservoirAge, at, days_between(previous, at));
            }
            self.last_reservoir_change = Some(at);
        }
        if entry.get(EventKind::CannulaChange).is_some() {
            if let (true, Some(previous)) = (in_window, self.last_cannula_change) {
                output.push_marker(SeriesName::CannulaAge, at, days_between(previous, at));
            }
            self.last_cannula_change = Some(at);
        }

        fresh
    }

    fn take_intake(
        &mut self,
        at: Instant,
        entry: &TimelineEntry,
        timeline: &Timeline,
        in_window: bool,
        output: &mut RunOutput,
    ) {
        let positive = |kind| entry.value(kind).filter(|v: &f64| *v > 0.0);
        let bolus = positive(EventKind::Bolus);
        let micro_bolus = positive(EventKind::MicroBolus);
        let carbs = positive(EventKind::Carbs);
        if bolus.is_none() && micro_bolus.is_none() && carbs.is_none() {
            return;
        }

        let model = self.model();
        let params = resolve_dose_params(at, entry, timeline, model, in_window);
        let base_glycemia = entry.value(EventKind::GlycemiaBolusBase);
        let pump_iob = entry.value(EventKind::InsulinOnBoard);

        if self.kinetics.is_empty() {
            self.predictor.terminate();
        }
        if let Some(seed) = base_glycemia.or(self.last_reading) {
            if self.predictor.seed(seed) {
                tracing::debug!("{} - prediction seeded at {}", at, seed);
            }
        }

        let bolus_id = bolus.map(|amount| {
            let mut dose = ActiveDose::new(at, amount, params);
            dose.base_glycemia = base_glycemia;
            dose.pump_iob = pump_iob;
            self.kinetics.add_dose(dose)
        });
        if let Some(amount) = micro_bolus {
            let mut dose = ActiveDose::new(at, amount, params);
            dose.automated = true;
            self.kinetics.add_dose(dose);
        }
        let carbs_id = carbs.map(|grams| {
            self.kinetics
                .add_carbs(ActiveCarbLoad::new(at, grams, params.ratio, params.sensitivity))
        });

        self.evaluator.record(&Intake {
            at,
            bolus: bolus_id.zip(bolus),
            micro_bolus,
            carbs: carbs_id.zip(carbs),
            params,
            base_glycemia,
        });

        if !in_window {
            return;
        }

        if let Some(amount) = bolus {
            output.push_marker(SeriesName::Bolus, at, amount);
            let glycemia = base_glycemia.or(self.last_reading);
            output
                .audits
                .push(audit_bolus(at, amount, glycemia, carbs, pump_iob, &params));

            if let (Some(target), Some(glycemia)) =
                (entry.value(EventKind::GlycemiaBolusTarget), glycemia)
            {
                let line = TargetLine {
                    from: at,
                    glycemia,
                    target,
                    window: model.insulin_activity(),
                };
                line.emit(output, self.params.end);
            }
        }
        if let Some(amount) = micro_bolus {
            output.push_marker(SeriesName::MicroBolus, at, amount);
        }
        if let Some(grams) = carbs {
            output.push_marker(SeriesName::Carbs, at, grams);
            self.carb_intakes.push((at, grams));
        }
    }

    fn finish(&mut self, timeline: &Timeline, output: &mut RunOutput) {
        if let Some(at) = self.last_in_window {
            if let Some(segment) = self.detector.finish(at, self.model()) {
                emit_segment(output, segment);
            }
        }

        output.unfinished_episodes = self
            .evaluator
            .open_episode()
            .filter(|episode| episode.opened_at >= self.params.start)
            .map_or(0, |_| 1);

        if let Some(points) = output.series.get_mut(&SeriesName::Target) {
            points.sort_by_key(|point| point.at);
        }

        let model = self.model();
        output.daily_carbs = carbs_by_period(&self.carb_intakes);
        output.meal_ratios = scheduled_meal_ratios(timeline, self.params.start, self.params.end);
        output.range_crossings = range_crossings(
            output.series(SeriesName::Glycemia),
            model.range_low,
            model.range_high,
        );
    }
}

/// Line from the glycemia at a bolus to its target one activity window
/// later
struct TargetLine {
    from: Instant,
    glycemia: f64,
    target: f64,
    window: Duration,
}

impl TargetLine {
    /// Value on the line at `at`
    fn value_at(&self, at: Instant) -> f64 {
        let fraction = (at - self.from).num_milliseconds() as f64
            / self.window.num_milliseconds() as f64;
        self.glycemia + (self.target - self.glycemia) * fraction.clamp(0.0, 1.0)
    }

    /// Emit the line, cut short at the window end
    fn emit(&self, output: &mut RunOutput, end: Instant) {
        output.push(SeriesName::Target, self.from, Some(self.glycemia));

        let reached = self.from + self.window;
        if reached + epsilon() < end {
            output.push(SeriesName::Target, reached, Some(self.target));
            output.push(SeriesName::Target, reached + epsilon(), None);
            return;
        }

        let last = end - epsilon();
        if last > self.from {
            output.push(SeriesName::Target, last, Some(self.value_at(last)));
        }
    }
}

/// Resolve ratio, sensitivity and target for doses at one instant
fn resolve_dose_params(
    at: Instant,
    entry: &TimelineEntry,
    timeline: &Timeline,
    model: &ModelConfig,
    in_window: bool,
) -> DoseParams {
    let params = DoseParams {
        ratio: resolve_param(
            entry.value(EventKind::InsulinCarbRatio),
            timeline.resolve_schedule(ScheduleKind::Ratio, at),
            model.default_ratio,
        ),
        sensitivity: resolve_param(
            entry.value(EventKind::InsulinSensitivity),
            timeline.resolve_schedule(ScheduleKind::Sensitivity, at),
            model.default_sensitivity,
        ),
        target: resolve_param(
            entry.value(EventKind::GlycemiaBolusTarget),
            None,
            model.default_target,
        ),
    };

    note_fallback(at, "ratio", &params.ratio, in_window);
    note_fallback(at, "sensitivity", &params.sensitivity, in_window);
    note_fallback(at, "target", &params.target, in_window);
    params
}

fn note_fallback(at: Instant, name: &str, resolved: &Resolved, in_window: bool) {
    if !resolved.is_fallback() {
        return;
    }
    if in_window {
        tracing::warn!("{} - no {} known, using default {}", at, name, resolved.value);
    } else {
        tracing::debug!("{} - no {} known, using default {}", at, name, resolved.value);
    }
}

fn emit_segment(output: &mut RunOutput, segment: BasalSegment) {
    let name = SeriesName::BasalAdjustment;
    let continues = output
        .series(name)
        .last()
        .map_or(false, |point| point.at >= segment.start);
    if !continues {
        output.push(name, segment.start, Some(0.0));
    }
    output.push(name, segment.start + epsilon(), Some(segment.recommended_basal));
    output.push(name, segment.end, Some(segment.recommended_basal));
    output.push(name, segment.end + epsilon(), Some(0.0));
    output.segments.push(segment);
}

fn days_between(from: Instant, to: Instant) -> f64 {
    (to - from).num_seconds() as f64 / 86_400.0
}
