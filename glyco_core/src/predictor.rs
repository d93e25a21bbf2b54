//! Predicted glycemia.
//!
//! The prediction starts from a real reading when a dose or carb load
//! enters empty pools, then moves by the glycemic effect of everything
//! absorbed since the previous step. It ends when both pools are empty
//! and is never extrapolated past the last processed instant.

use crate::kinetics::KineticsStep;

/// Glycemia change (mg/dL) caused by one kinetics step
///
/// Carbohydrate raises glycemia by `absorbed / ratio × sensitivity`,
/// insulin lowers it by `absorbed × sensitivity`, each entry with the
/// parameters it was resolved with.
pub fn glycemia_delta(step: &KineticsStep) -> f64 {
    let rise: f64 = step
        .carbs
        .iter()
        .map(|effect| effect.absorbed / effect.ratio * effect.sensitivity)
        .sum();
    let fall: f64 = step
        .insulin
        .iter()
        .map(|effect| effect.absorbed * effect.sensitivity)
        .sum();
    rise - fall
}

/// Evolving predicted glycemia of one run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Predictor {
    value: Option<f64>,
}

impl Predictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn is_seeded(&self) -> bool {
        self.value.is_some()
    }

    /// Start predicting from a real reading
    ///
    /// Has no effect while a prediction is already running. Returns
    /// whether the reading was taken.
    pub fn seed(&mut self, glycemia: f64) -> bool {
        if self.value.is_some() {
            return false;
        }
        self.value = Some(glycemia);
        true
    }

    /// Move the prediction by the effect of a kinetics step
    pub fn apply(&mut self, step: &KineticsStep) -> Option<f64> {
        if let Some(value) = self.value.as_mut() {
            *value += glycemia_delta(step);
        }
        self.value
    }

    /// Stop predicting; the next dose or carb load reseeds
    pub fn terminate(&mut self) {
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetics::{CarbEffect, InsulinEffect};

    fn step(insulin: &[(f64, f64)], carbs: &[(f64, f64, f64)]) -> KineticsStep {
        KineticsStep {
            insulin: insulin
                .iter()
                .map(|&(absorbed, sensitivity)| InsulinEffect {
                    dose: 1,
                    absorbed,
                    sensitivity,
                })
                .collect(),
            carbs: carbs
                .iter()
                .map(|&(absorbed, ratio, sensitivity)| CarbEffect {
                    load: 2,
                    absorbed,
                    ratio,
                    sensitivity,
                })
                .collect(),
            ..KineticsStep::default()
        }
    }

    #[test]
    fn test_delta_combines_carbs_and_insulin() {
        // 10g at ratio 20 with sensitivity 150 raises by 75,
        // 0.2u at sensitivity 150 lowers by 30
        let delta = glycemia_delta(&step(&[(0.2, 150.0)], &[(10.0, 20.0, 150.0)]));
        assert!((delta - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_delta_sums_entries_with_own_parameters() {
        let delta = glycemia_delta(&step(&[(0.1, 100.0), (0.1, 200.0)], &[]));
        assert!((delta + 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_unseeded_prediction_stays_undefined() {
        let mut predictor = Predictor::new();
        assert_eq!(predictor.apply(&step(&[(0.5, 150.0)], &[])), None);
    }

    #[test]
    fn test_seed_only_when_idle() {
        let mut predictor = Predictor::new();
        assert!(predictor.seed(140.0));
        assert!(!predictor.seed(200.0));
        assert_eq!(predictor.value(), Some(140.0));

        predictor.apply(&step(&[(0.1, 150.0)], &[]));
        assert!((predictor.value().unwrap() - 125.0).abs() < 1e-9);

        predictor.terminate();
        assert!(!predictor.is_seeded());
        assert!(predictor.seed(200.0));
    }
}
