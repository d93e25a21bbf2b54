//! Three-tier resolution of dosing parameters.
//!
//! A dose's ratio, sensitivity and target come from, in order: the value
//! recorded on the event itself, the published schedule at that time of
//! day, and finally a configured fallback constant.

use serde::{Deserialize, Serialize};

/// Where a resolved parameter came from
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamSource {
    Explicit,
    Schedule,
    Fallback,
}

/// A parameter value together with its provenance
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Resolved {
    pub value: f64,
    pub source: ParamSource,
}

impl Resolved {
    pub fn is_fallback(&self) -> bool {
        self.source == ParamSource::Fallback
    }
}

/// Resolve a parameter: explicit value, then schedule value, then fallback
///
/// Non-finite and non-positive candidates are skipped; a ratio or
/// sensitivity of zero would make every downstream division meaningless.
pub fn resolve_param(explicit: Option<f64>, scheduled: Option<f64>, fallback: f64) -> Resolved {
    let usable = |v: &f64| v.is_finite() && *v > 0.0;

    if let Some(value) = explicit.filter(usable) {
        Resolved {
            value,
            source: ParamSource::Explicit,
        }
    } else if let Some(value) = scheduled.filter(usable) {
        Resolved {
            value,
            source: ParamSource::Schedule,
        }
    } else {
        Resolved {
            value: fallback,
            source: ParamSource::Fallback,
        }
    }
}
