//! Bolus calculator audit.
//!
//! Recomputes what a bolus calculator should have recommended from the
//! glycemia, target, sensitivity and ratio in effect, and compares it with
//! the amount actually injected.

use crate::kinetics::DoseParams;
use crate::types::{Instant, MealPeriod};
use serde::Serialize;

/// Recomputed recommendation for one bolus
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BolusAudit {
    pub at: Instant,
    pub meal_period: MealPeriod,
    pub glycemia: Option<f64>,
    pub target: f64,
    pub sensitivity: f64,
    pub ratio: f64,
    pub carbs: Option<f64>,
    pub pump_iob: Option<f64>,
    /// Insulin needed to bring glycemia to target, net of insulin on board
    pub correction: f64,
    pub carbs_insulin: f64,
    pub computed: f64,
    pub injected: f64,
    /// Injected minus computed
    pub difference: f64,
}

/// Audit a bolus of `injected` units given at `at`
pub fn audit_bolus(
    at: Instant,
    injected: f64,
    glycemia: Option<f64>,
    carbs: Option<f64>,
    pump_iob: Option<f64>,
    params: &DoseParams,
) -> BolusAudit {
    let target = params.target.value;
    let sensitivity = params.sensitivity.value;
    let ratio = params.ratio.value;

    let mut correction = glycemia
        .map(|gly| (gly - target) / sensitivity)
        .unwrap_or(0.0);
    if let Some(iob) = pump_iob.filter(|iob| *iob > 0.0) {
        correction -= correction.min(iob);
    }

    let carbs_insulin = carbs
        .filter(|grams| *grams > 0.0)
        .map(|grams| grams / ratio)
        .unwrap_or(0.0);
    let computed = carbs_insulin + correction;

    BolusAudit {
        at,
        meal_period: MealPeriod::of(at.time()),
        glycemia,
        target,
        sensitivity,
        ratio,
        carbs,
        pump_iob,
        correction,
        carbs_insulin,
        computed,
        injected,
        difference: injected - computed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::resolve_param;
    use chrono::NaiveDate;

    fn noon() -> Instant {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(11, 58, 0)
            .unwrap()
    }

    fn params() -> DoseParams {
        DoseParams {
            ratio: resolve_param(Some(25.0), None, 25.0),
            sensitivity: resolve_param(Some(150.0), None, 151.0),
            target: resolve_param(Some(110.0), None, 110.0),
        }
    }

    #[test]
    fn test_meal_with_correction() {
        let audit = audit_bolus(noon(), 1.92, Some(185.0), Some(20.0), None, &params());
        assert!((audit.correction - 0.5).abs() < 1e-9);
        assert!((audit.carbs_insulin - 0.8).abs() < 1e-9);
        assert!((audit.computed - 1.3).abs() < 1e-9);
        assert!((audit.difference - 0.62).abs() < 1e-9);
        assert_eq!(audit.meal_period, MealPeriod::Lunch);
    }

    #[test]
    fn test_pump_iob_reduces_correction() {
        let audit = audit_bolus(noon(), 0.3, Some(185.0), None, Some(0.2), &params());
        assert!((audit.correction - 0.3).abs() < 1e-9);

        // Insulin on board larger than the correction cancels it entirely
        let audit = audit_bolus(noon(), 0.3, Some(185.0), None, Some(2.0), &params());
        assert_eq!(audit.correction, 0.0);
    }

    #[test]
    fn test_no_glycemia_means_no_correction() {
        let audit = audit_bolus(noon(), 1.0, None, Some(25.0), None, &params());
        assert_eq!(audit.correction, 0.0);
        assert!((audit.computed - 1.0).abs() < 1e-9);
        assert!(audit.difference.abs() < 1e-9);
    }
}
