//! Active-insulin and active-carbohydrate pools.
//!
//! Absorption is linear: a dose is absorbed evenly over the insulin
//! activity window, carbohydrates at a fixed rate in grams per hour until
//! the load is exhausted. Every pool entry keeps its cumulative absorbed
//! amount, so each [`KineticsState::advance`] reports exactly what was
//! absorbed since the previous one and an entry contributes its nominal
//! amount over its life, whatever the spacing of the steps.

use crate::config::{EvictionClock, ModelConfig};
use crate::resolve::Resolved;
use crate::types::Instant;
use serde::Serialize;

/// Identifier of a pool entry, unique within one run
pub type EntryId = u64;

/// Parameters resolved for a dose or carb load when it enters the pool
#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
pub struct DoseParams {
    pub ratio: Resolved,
    pub sensitivity: Resolved,
    pub target: Resolved,
}

/// An insulin dose still being absorbed
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ActiveDose {
    pub id: EntryId,
    pub amount: f64,
    pub injected_at: Instant,
    pub params: DoseParams,
    /// Glycemia the dose was computed from, when known
    pub base_glycemia: Option<f64>,
    /// Insulin on board reported by the pump at injection
    pub pump_iob: Option<f64>,
    /// Delivered by the pump's automation rather than requested
    pub automated: bool,
    absorbed: f64,
}

impl ActiveDose {
    pub fn new(injected_at: Instant, amount: f64, params: DoseParams) -> Self {
        Self {
            id: 0,
            amount,
            injected_at,
            params,
            base_glycemia: None,
            pump_iob: None,
            automated: false,
            absorbed: 0.0,
        }
    }

    pub fn absorbed(&self) -> f64 {
        self.absorbed
    }

    pub fn remaining(&self) -> f64 {
        self.amount - self.absorbed
    }
}

/// A carbohydrate intake still being absorbed
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ActiveCarbLoad {
    pub id: EntryId,
    pub amount: f64,
    pub taken_at: Instant,
    pub ratio: Resolved,
    pub sensitivity: Resolved,
    absorbed: f64,
}

impl ActiveCarbLoad {
    pub fn new(taken_at: Instant, amount: f64, ratio: Resolved, sensitivity: Resolved) -> Self {
        Self {
            id: 0,
            amount,
            taken_at,
            ratio,
            sensitivity,
            absorbed: 0.0,
        }
    }

    pub fn absorbed(&self) -> f64 {
        self.absorbed
    }

    pub fn remaining(&self) -> f64 {
        self.amount - self.absorbed
    }
}

/// Insulin absorbed by one dose since the previous update
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InsulinEffect {
    pub dose: EntryId,
    pub absorbed: f64,
    pub sensitivity: f64,
}

/// Carbohydrate absorbed from one load since the previous update
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CarbEffect {
    pub load: EntryId,
    pub absorbed: f64,
    pub ratio: f64,
    pub sensitivity: f64,
}

/// What one advance of the pools produced
#[derive(Clone, Debug, Default)]
pub struct KineticsStep {
    pub insulin: Vec<InsulinEffect>,
    pub carbs: Vec<CarbEffect>,
    pub evicted_doses: Vec<ActiveDose>,
    pub evicted_loads: Vec<ActiveCarbLoad>,
}

/// Insulin and carbohydrate pools of one run
#[derive(Clone, Debug, Default)]
pub struct KineticsState {
    doses: Vec<ActiveDose>,
    loads: Vec<ActiveCarbLoad>,
    last_update: Option<Instant>,
    next_id: EntryId,
}

fn seconds_between(from: Instant, to: Instant) -> f64 {
    ((to - from).num_milliseconds() as f64 / 1000.0).max(0.0)
}

impl KineticsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb everything up to `now` and drop exhausted entries
    pub fn advance(&mut self, now: Instant, model: &ModelConfig) -> KineticsStep {
        let window = model.insulin_activity();
        let window_seconds = window.num_seconds() as f64;
        let carbs_rate = model.carbs_rate_per_second();
        let mut step = KineticsStep::default();

        if model.eviction_clock == EvictionClock::LastUpdate {
            if let Some(previous) = self.last_update {
                let (expired, active): (Vec<_>, Vec<_>) = std::mem::take(&mut self.doses)
                    .into_iter()
                    .partition(|dose| previous - dose.injected_at >= window);
                self.doses = active;
                step.evicted_doses.extend(expired);
            }
        }

        for dose in &mut self.doses {
            let elapsed = seconds_between(dose.injected_at, now);
            let cumulative = (dose.amount * elapsed / window_seconds).min(dose.amount);
            let delta = cumulative - dose.absorbed;
            dose.absorbed = cumulative;
            if delta > 0.0 {
                step.insulin.push(InsulinEffect {
                    dose: dose.id,
                    absorbed: delta,
                    sensitivity: dose.params.sensitivity.value,
                });
            }
        }

        // A dose stays at 0 remaining at exactly one window after injection
        if model.eviction_clock == EvictionClock::Injection {
            let (expired, active): (Vec<_>, Vec<_>) = std::mem::take(&mut self.doses)
                .into_iter()
                .partition(|dose| now - dose.injected_at > window);
            self.doses = active;
            step.evicted_doses.extend(expired);
        }

        for load in &mut self.loads {
            let elapsed = seconds_between(load.taken_at, now);
            let cumulative = (elapsed * carbs_rate).min(load.amount);
            let delta = cumulative - load.absorbed;
            load.absorbed = cumulative;
            if delta > 0.0 {
                step.carbs.push(CarbEffect {
                    load: load.id,
                    absorbed: delta,
                    ratio: load.ratio.value,
                    sensitivity: load.sensitivity.value,
                });
            }
        }

        let (absorbed, active): (Vec<_>, Vec<_>) = std::mem::take(&mut self.loads)
            .into_iter()
            .partition(|load| load.absorbed >= load.amount);
        self.loads = active;
        step.evicted_loads = absorbed;

        for dose in &step.evicted_doses {
            tracing::debug!("{} - dose {} ({}u) fully absorbed", now, dose.id, dose.amount);
        }
        for load in &step.evicted_loads {
            tracing::debug!("{} - carbs {} ({}g) fully absorbed", now, load.id, load.amount);
        }

        self.last_update = Some(now);
        step
    }

    /// Add a dose to the insulin pool, returning its id
    pub fn add_dose(&mut self, mut dose: ActiveDose) -> EntryId {
        dose.id = self.allocate_id();
        let id = dose.id;
        self.doses.push(dose);
        id
    }

    /// Add a carb load to the carbohydrate pool, returning its id
    pub fn add_carbs(&mut self, mut load: ActiveCarbLoad) -> EntryId {
        load.id = self.allocate_id();
        let id = load.id;
        self.loads.push(load);
        id
    }

    fn allocate_id(&mut self) -> EntryId {
        self.next_id += 1;
        self.next_id
    }

    /// Insulin on board, `None` while the pool is empty
    pub fn iob(&self) -> Option<f64> {
        if self.doses.is_empty() {
            return None;
        }
        let total = self.doses.iter().map(ActiveDose::remaining).sum();
        Some(settle_pool_total("insulin", total))
    }

    /// Carbs on board, `None` while the pool is empty
    pub fn cob(&self) -> Option<f64> {
        if self.loads.is_empty() {
            return None;
        }
        let total = self.loads.iter().map(ActiveCarbLoad::remaining).sum();
        Some(settle_pool_total("carbs", total))
    }

    pub fn doses(&self) -> &[ActiveDose] {
        &self.doses
    }

    pub fn loads(&self) -> &[ActiveCarbLoad] {
        &self.loads
    }

    /// Both pools are empty
    pub fn is_empty(&self) -> bool {
        self.doses.is_empty() && self.loads.is_empty()
    }

    /// Sensitivity of the most recent dose still in the pool
    pub fn latest_sensitivity(&self) -> Option<f64> {
        self.doses.last().map(|dose| dose.params.sensitivity.value)
    }
}

/// Clamp a pool total to zero
///
/// Slightly negative totals are rounding residue and only warned about;
/// anything at or below -0.1 means the pool bookkeeping is inconsistent.
pub fn settle_pool_total(pool: &str, total: f64) -> f64 {
    if total >= 0.0 {
        total
    } else if total > -0.1 {
        tracing::warn!("{} on board = {:.4}, treating as 0", pool, total);
        0.0
    } else {
        tracing::error!("{} on board = {:.4} is inconsistent, clamping to 0", pool, total);
        0.0
    }
}
