//! Dosing-accuracy evaluation.
//!
//! An episode opens on a bolus and/or carb intake while no other episode
//! is open, collects the corrections and rescue carbs that follow, and
//! closes in the step where its anchoring entry leaves the pool. At
//! closure the outcome is compared to the target and the ratio or
//! sensitivity the data would have called for is derived.

use crate::config::ModelConfig;
use crate::kinetics::{DoseParams, EntryId};
use crate::resolve::ParamSource;
use crate::types::{Instant, MealPeriod};
use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeKind {
    /// Carbs with a bolus at the same instant
    Meal,
    /// Bolus without carbs
    Correction,
    /// Carbs without a bolus
    Snack,
}

impl fmt::Display for EpisodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeKind::Meal => write!(f, "meal"),
            EpisodeKind::Correction => write!(f, "correction"),
            EpisodeKind::Snack => write!(f, "snack"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Correct,
    TooMuchInsulin,
    TooLittleInsulin,
    Inconclusive,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Correct => write!(f, "correct"),
            Classification::TooMuchInsulin => write!(f, "too-much-insulin"),
            Classification::TooLittleInsulin => write!(f, "too-little-insulin"),
            Classification::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

/// Classify an episode outcome
///
/// A correction and a rescue in the same episode point both ways and are
/// never arbitrated. Otherwise a low outcome or a rescue is evidence of
/// too much insulin, a high outcome or a correction of too little.
///
/// The suggested ratio or sensitivity is not consulted: a verdict does not
/// depend on which parameter the episode derived.
pub fn classify(final_delta: f64, band: f64, corrected: bool, rescued: bool) -> Classification {
    if corrected && rescued {
        return Classification::Inconclusive;
    }
    let low = final_delta < -band || rescued;
    let high = final_delta > band || corrected;
    match (low, high) {
        (true, false) => Classification::TooMuchInsulin,
        (false, true) => Classification::TooLittleInsulin,
        (true, true) => Classification::Inconclusive,
        (false, false) => Classification::Correct,
    }
}

/// Doses and carbs recorded at one instant
#[derive(Clone, Copy, Debug)]
pub struct Intake {
    pub at: Instant,
    /// Pool id and amount of a requested bolus
    pub bolus: Option<(EntryId, f64)>,
    pub micro_bolus: Option<f64>,
    /// Pool id and grams of a carb load
    pub carbs: Option<(EntryId, f64)>,
    pub params: DoseParams,
    pub base_glycemia: Option<f64>,
}

/// An episode still waiting for its anchor to be absorbed
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Episode {
    pub opened_at: Instant,
    pub kind: EpisodeKind,
    pub anchor: EntryId,
    pub carbs: f64,
    pub rescue_carbs: f64,
    pub bolus_insulin: f64,
    pub correction_insulin: f64,
    pub insulin_avoided: f64,
    pub base_glycemia: Option<f64>,
    pub params: DoseParams,
}

/// Outcome of one closed episode
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Verdict {
    pub opened_at: Instant,
    pub closed_at: Instant,
    pub kind: EpisodeKind,
    pub meal_period: MealPeriod,
    pub carbs: f64,
    pub rescue_carbs: f64,
    pub bolus_insulin: f64,
    pub correction_insulin: f64,
    pub insulin_avoided: f64,
    pub base_glycemia: Option<f64>,
    pub final_glycemia: f64,
    pub target: f64,
    pub ratio_used: f64,
    pub ratio_source: ParamSource,
    pub sensitivity_used: f64,
    pub sensitivity_source: ParamSource,
    pub final_delta: f64,
    pub required_correction: f64,
    pub suggested_ratio: Option<f64>,
    pub suggested_sensitivity: Option<f64>,
    /// Relative gap between the suggested and the used parameter
    pub discrepancy: Option<f64>,
    pub discrepancy_flagged: bool,
    pub classification: Classification,
}

impl Episode {
    /// Judge the episode against the glycemia observed at its closure
    pub fn conclude(&self, closed_at: Instant, final_glycemia: f64, model: &ModelConfig) -> Verdict {
        let target = self.params.target.value;
        let ratio_used = self.params.ratio.value;
        let sensitivity_used = self.params.sensitivity.value;

        let final_delta = final_glycemia - target;
        let required_correction = final_delta / sensitivity_used;
        let delivered = self.bolus_insulin + self.correction_insulin - self.insulin_avoided;

        let (suggested_ratio, suggested_sensitivity) = match self.kind {
            EpisodeKind::Meal | EpisodeKind::Snack => {
                let needed = delivered + required_correction;
                let ratio = (needed > 0.0).then(|| (self.carbs + self.rescue_carbs) / needed);
                (ratio, None)
            }
            EpisodeKind::Correction => {
                let sensitivity = self
                    .base_glycemia
                    .filter(|_| delivered > 0.0)
                    .map(|base| (base - final_glycemia).abs() / delivered);
                (None, sensitivity)
            }
        };

        let discrepancy = match (suggested_ratio, suggested_sensitivity) {
            (Some(ratio), _) => Some((ratio - ratio_used) / ratio_used),
            (None, Some(sensitivity)) => Some((sensitivity - sensitivity_used) / sensitivity_used),
            (None, None) => None,
        };
        let discrepancy_flagged = discrepancy
            .map(|d| d.abs() > model.discrepancy_threshold)
            .unwrap_or(false);

        let classification = classify(
            final_delta,
            model.correct_band,
            self.correction_insulin > 0.0,
            self.rescue_carbs > 0.0,
        );

        Verdict {
            opened_at: self.opened_at,
            closed_at,
            kind: self.kind,
            meal_period: MealPeriod::of(self.opened_at.time()),
            carbs: self.carbs,
            rescue_carbs: self.rescue_carbs,
            bolus_insulin: self.bolus_insulin,
            correction_insulin: self.correction_insulin,
            insulin_avoided: self.insulin_avoided,
            base_glycemia: self.base_glycemia,
            final_glycemia,
            target,
            ratio_used,
            ratio_source: self.params.ratio.source,
            sensitivity_used,
            sensitivity_source: self.params.sensitivity.source,
            final_delta,
            required_correction,
            suggested_ratio,
            suggested_sensitivity,
            discrepancy,
            discrepancy_flagged,
            classification,
        }
    }
}

/// Episode tracker of one run; at most one episode is open at a time
#[derive(Clone, Debug, Default)]
pub struct Evaluator {
    open: Option<Episode>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_episode(&self) -> Option<&Episode> {
        self.open.as_ref()
    }

    /// Attach an intake to the open episode or open a new one
    ///
    /// Returns `true` when the intake opened an episode.
    pub fn record(&mut self, intake: &Intake) -> bool {
        let bolus = intake.bolus.map(|(_, amount)| amount).unwrap_or(0.0);
        let micro = intake.micro_bolus.unwrap_or(0.0);
        let carbs = intake.carbs.map(|(_, grams)| grams).unwrap_or(0.0);

        if let Some(episode) = self.open.as_mut() {
            episode.correction_insulin += bolus + micro;
            episode.rescue_carbs += carbs;
            return false;
        }

        let (kind, anchor) = match (intake.bolus, intake.carbs) {
            (Some((dose, _)), Some(_)) => (EpisodeKind::Meal, dose),
            (Some((dose, _)), None) => (EpisodeKind::Correction, dose),
            (None, Some((load, _))) => (EpisodeKind::Snack, load),
            (None, None) => return false,
        };

        tracing::debug!("{} - {} episode opened", intake.at, kind);
        self.open = Some(Episode {
            opened_at: intake.at,
            kind,
            anchor,
            carbs,
            rescue_carbs: 0.0,
            bolus_insulin: bolus + micro,
            correction_insulin: 0.0,
            insulin_avoided: 0.0,
            base_glycemia: intake.base_glycemia,
            params: intake.params,
        });
        true
    }

    /// Credit insulin withheld by a pump suspension to the open episode
    pub fn withhold(&mut self, insulin: f64) {
        if let Some(episode) = self.open.as_mut() {
            episode.insulin_avoided += insulin;
        }
    }

    /// Close the open episode if its anchor is among the evicted entries
    ///
    /// The episode is dropped with a warning when no glycemia is known at
    /// closure.
    pub fn close_evicted(
        &mut self,
        evicted: &[EntryId],
        at: Instant,
        final_glycemia: Option<f64>,
        model: &ModelConfig,
    ) -> Option<Verdict> {
        let anchor = self.open.as_ref()?.anchor;
        if !evicted.contains(&anchor) {
            return None;
        }
        let episode = self.open.take()?;

        match final_glycemia {
            Some(glycemia) => Some(episode.conclude(at, glycemia, model)),
            None => {
                tracing::warn!(
                    "{} - no glycemia known to close the episode opened at {}, dropping it",
                    at,
                    episode.opened_at
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::resolve_param;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> Instant {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn params(ratio: Option<f64>, sensitivity: Option<f64>, target: Option<f64>) -> DoseParams {
        DoseParams {
            ratio: resolve_param(ratio, None, 25.0),
            sensitivity: resolve_param(sensitivity, None, 151.0),
            target: resolve_param(target, None, 110.0),
        }
    }

    fn meal_intake() -> Intake {
        Intake {
            at: at(8, 0),
            bolus: Some((1, 2.0)),
            micro_bolus: None,
            carbs: Some((2, 40.0)),
            params: params(Some(20.0), Some(150.0), Some(120.0)),
            base_glycemia: Some(140.0),
        }
    }

    #[test]
    fn test_meal_episode_verdict() {
        let model = ModelConfig::default();
        let mut evaluator = Evaluator::new();
        assert!(evaluator.record(&meal_intake()));
        assert_eq!(evaluator.open_episode().unwrap().kind, EpisodeKind::Meal);

        let verdict = evaluator
            .close_evicted(&[1], at(10, 0), Some(125.0), &model)
            .unwrap();

        assert_eq!(verdict.final_delta, 5.0);
        assert!((verdict.required_correction - 5.0 / 150.0).abs() < 1e-9);
        assert!((verdict.suggested_ratio.unwrap() - 19.672).abs() < 1e-3);
        assert!(!verdict.discrepancy_flagged);
        assert_eq!(verdict.classification, Classification::Correct);
        assert_eq!(verdict.meal_period, MealPeriod::Breakfast);
        assert!(evaluator.open_episode().is_none());
    }

    #[test]
    fn test_correction_episode_verdict() {
        let model = ModelConfig::default();
        let mut evaluator = Evaluator::new();
        evaluator.record(&Intake {
            at: at(3, 0),
            bolus: Some((7, 1.0)),
            micro_bolus: None,
            carbs: None,
            params: params(None, None, None),
            base_glycemia: Some(200.0),
        });

        let verdict = evaluator
            .close_evicted(&[7], at(5, 0), Some(120.0), &model)
            .unwrap();

        assert_eq!(verdict.kind, EpisodeKind::Correction);
        assert_eq!(verdict.sensitivity_used, 151.0);
        assert_eq!(verdict.sensitivity_source, ParamSource::Fallback);
        assert_eq!(verdict.suggested_sensitivity, Some(80.0));
        assert!(verdict.discrepancy_flagged);
        assert_eq!(verdict.final_delta, 10.0);
        assert_eq!(verdict.classification, Classification::Correct);
    }

    #[test]
    fn test_mid_episode_events_accumulate() {
        let model = ModelConfig::default();
        let mut evaluator = Evaluator::new();
        evaluator.record(&meal_intake());

        evaluator.record(&Intake {
            at: at(9, 0),
            bolus: None,
            micro_bolus: Some(0.3),
            carbs: None,
            params: params(None, None, None),
            base_glycemia: None,
        });
        evaluator.withhold(0.1);

        let episode = evaluator.open_episode().unwrap();
        assert!((episode.correction_insulin - 0.3).abs() < 1e-9);
        assert!((episode.insulin_avoided - 0.1).abs() < 1e-9);

        let verdict = evaluator
            .close_evicted(&[1], at(10, 0), Some(200.0), &model)
            .unwrap();
        assert_eq!(verdict.classification, Classification::TooLittleInsulin);
    }

    #[test]
    fn test_unrelated_eviction_keeps_episode_open() {
        let model = ModelConfig::default();
        let mut evaluator = Evaluator::new();
        evaluator.record(&meal_intake());

        assert!(evaluator
            .close_evicted(&[2], at(9, 0), Some(120.0), &model)
            .is_none());
        assert!(evaluator.open_episode().is_some());
    }

    #[test]
    fn test_episode_without_glycemia_is_dropped() {
        let model = ModelConfig::default();
        let mut evaluator = Evaluator::new();
        evaluator.record(&meal_intake());

        assert!(evaluator.close_evicted(&[1], at(10, 0), None, &model).is_none());
        assert!(evaluator.open_episode().is_none());
    }

    #[test]
    fn test_micro_bolus_alone_opens_nothing() {
        let mut evaluator = Evaluator::new();
        let opened = evaluator.record(&Intake {
            at: at(9, 0),
            bolus: None,
            micro_bolus: Some(0.2),
            carbs: None,
            params: params(None, None, None),
            base_glycemia: None,
        });
        assert!(!opened);
        assert!(evaluator.open_episode().is_none());
    }

    #[test]
    fn test_classification_precedence() {
        assert_eq!(classify(0.0, 40.0, true, true), Classification::Inconclusive);
        assert_eq!(classify(-60.0, 40.0, false, false), Classification::TooMuchInsulin);
        assert_eq!(classify(10.0, 40.0, false, true), Classification::TooMuchInsulin);
        assert_eq!(classify(60.0, 40.0, false, false), Classification::TooLittleInsulin);
        assert_eq!(classify(-60.0, 40.0, true, false), Classification::Inconclusive);
        assert_eq!(classify(40.0, 40.0, false, false), Classification::Correct);
    }
}
