#![forbid(unsafe_code)]

//! Core model and analytics for the glyco metabolic study engine.
//!
//! This crate provides:
//! - Domain types (events, units, schedules) and the timeline store
//! - Kinetics (insulin and carbs on board) and glycemia prediction
//! - Basal study and dosing-accuracy evaluation
//! - The engine fold producing series and verdicts per run window
//! - Day summaries: carbs per meal period, ratio changes, range crossings
//! - Ingestion (JSONL), CSV export and a synthetic demo day

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod timeline;
pub mod resolve;
pub mod kinetics;
pub mod predictor;
pub mod detector;
pub mod evaluator;
pub mod audit;
pub mod output;
pub mod summary;
pub mod engine;
pub mod ingest;
pub mod export;
pub mod demo;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::{Config, EvictionClock, ModelConfig};
pub use timeline::{Timeline, TimelineEntry};
pub use resolve::{resolve_param, ParamSource, Resolved};
pub use detector::{BasalSegment, DetectorState, SuspensionNote};
pub use evaluator::{Classification, EpisodeKind, Verdict};
pub use audit::BolusAudit;
pub use output::{RunOutput, SeriesName, SeriesPoint};
pub use summary::{Crossing, MealRatio, PeriodCarbs, RangeCrossing, RatioChange};
pub use engine::{day_window, run, run_daily, RunParams};
pub use ingest::{load_timeline, IngestReport, JsonlSink, Record, RecordSink};
pub use export::export_run;
