//! JSON Lines ingestion boundary.
//!
//! Vendor exports are converted elsewhere into one JSON record per line:
//!
//! ```text
//! {"time":"2024-03-01T08:00:00","kind":"cgm","value":6.2,"unit":"mmol/L"}
//! {"time":"2024-03-01T00:00:00","schedule":"ratio","ranges":{"06:00":20,"12:00":25}}
//! ```
//!
//! Records are validated here so the engine only ever sees well-formed
//! events. Invalid lines are logged, counted and skipped.

use crate::timeline::Timeline;
use crate::types::{EventKind, Instant, Schedule, ScheduleKind, TypedEvent, Unit};
use crate::{Error, Result};
use chrono::NaiveTime;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// A clinical event as written by an exporter
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub time: Instant,
    pub kind: EventKind,
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A time-of-day schedule published at `time`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduleRecord {
    pub time: Instant,
    pub schedule: ScheduleKind,
    /// Breakpoint ("HH:MM" or "HH:MM:SS") to value
    pub ranges: BTreeMap<String, f64>,
}

/// One line of a timeline file
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Record {
    Event(EventRecord),
    Schedule(ScheduleRecord),
}

impl Record {
    /// Event in the kind's canonical unit
    pub fn event(time: Instant, kind: EventKind, value: f64) -> Self {
        Record::Event(EventRecord {
            time,
            kind,
            value: Some(value),
            unit: Some(kind.canonical_unit().label().to_string()),
        })
    }

    /// Schedule from `(time of day, value)` breakpoints
    pub fn schedule(time: Instant, kind: ScheduleKind, ranges: &[(NaiveTime, f64)]) -> Self {
        Record::Schedule(ScheduleRecord {
            time,
            schedule: kind,
            ranges: ranges
                .iter()
                .map(|(at, value)| (at.format("%H:%M:%S").to_string(), *value))
                .collect(),
        })
    }

    pub fn time(&self) -> Instant {
        match self {
            Record::Event(event) => event.time,
            Record::Schedule(schedule) => schedule.time,
        }
    }

    /// Validate the record and store it in the timeline
    pub fn apply(&self, timeline: &mut Timeline) -> Result<()> {
        match self {
            Record::Event(record) => {
                let event = record.to_event()?;
                timeline.insert_event(record.time, event);
            }
            Record::Schedule(record) => {
                let schedule = record.to_schedule()?;
                timeline.insert_schedule(record.time, schedule);
            }
        }
        Ok(())
    }
}

impl EventRecord {
    /// Normalised event, or why the record cannot be used
    pub fn to_event(&self) -> Result<TypedEvent> {
        let value = self.value.ok_or_else(|| {
            Error::MalformedInput(format!("{} {} has no value", self.time, self.kind))
        })?;
        if !value.is_finite() || value < 0.0 {
            return Err(Error::MalformedInput(format!(
                "{} {} has invalid value {}",
                self.time, self.kind, value
            )));
        }

        let unit = match self.unit.as_deref() {
            None => self.kind.canonical_unit(),
            Some(label) => Unit::parse(label).ok_or_else(|| {
                Error::MalformedInput(format!("{} unknown unit '{}'", self.time, label))
            })?,
        };

        TypedEvent::normalized(self.kind, value, unit).ok_or_else(|| {
            Error::MalformedInput(format!(
                "{} {} cannot be expressed in {}",
                self.time,
                self.kind,
                unit.label()
            ))
        })
    }
}

impl ScheduleRecord {
    pub fn to_schedule(&self) -> Result<Schedule> {
        if self.ranges.is_empty() {
            return Err(Error::MalformedInput(format!(
                "{} empty {:?} schedule",
                self.time, self.schedule
            )));
        }

        let mut breakpoints = BTreeMap::new();
        for (label, value) in &self.ranges {
            let at = parse_time_of_day(label).ok_or_else(|| {
                Error::MalformedInput(format!("{} bad breakpoint '{}'", self.time, label))
            })?;
            if !value.is_finite() || *value < 0.0 {
                return Err(Error::MalformedInput(format!(
                    "{} breakpoint {} has invalid value {}",
                    self.time, label, value
                )));
            }
            breakpoints.insert(at, *value);
        }
        Ok(Schedule::new(self.schedule, breakpoints))
    }
}

fn parse_time_of_day(label: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(label, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(label, "%H:%M"))
        .ok()
}

/// Counts of one ingestion
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: usize,
}

/// Build a timeline from records, rejecting invalid ones
pub fn build_timeline(records: &[Record]) -> (Timeline, IngestReport) {
    let mut timeline = Timeline::new();
    let mut report = IngestReport::default();
    for record in records {
        match record.apply(&mut timeline) {
            Ok(()) => report.accepted += 1,
            Err(e) => {
                tracing::warn!("Rejected record: {}", e);
                report.rejected += 1;
            }
        }
    }
    (timeline, report)
}

/// Read records from a JSONL file, skipping lines that do not parse
pub fn read_records(path: &Path) -> Result<(Vec<Record>, usize)> {
    let file = File::open(path)?;
    // Acquire shared lock for reading
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();
    let mut unparsed = 0;

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Record>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Failed to parse record at line {}: {}", line_num + 1, e);
                unparsed += 1;
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} records from {:?}", records.len(), path);
    Ok((records, unparsed))
}

/// Load a timeline file
pub fn load_timeline(path: &Path) -> Result<(Timeline, IngestReport)> {
    let (records, unparsed) = read_records(path)?;
    let (timeline, mut report) = build_timeline(&records);
    report.rejected += unparsed;

    tracing::info!(
        "Loaded {} records from {:?} ({} rejected)",
        report.accepted,
        path,
        report.rejected
    );
    Ok((timeline, report))
}

/// Destination for timeline records
pub trait RecordSink {
    fn append(&mut self, record: &Record) -> Result<()>;

    fn append_all(&mut self, records: &[Record]) -> Result<()> {
        for record in records {
            self.append(record)?;
        }
        Ok(())
    }
}

/// JSONL record sink with file locking
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write_locked(&self, records: &[Record]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let mut writer = BufWriter::new(&file);
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        drop(writer);

        file.unlock()?;
        tracing::debug!("Appended {} records to {:?}", records.len(), self.path);
        Ok(())
    }
}

impl RecordSink for JsonlSink {
    fn append(&mut self, record: &Record) -> Result<()> {
        self.write_locked(std::slice::from_ref(record))
    }

    fn append_all(&mut self, records: &[Record]) -> Result<()> {
        self.write_locked(records)
    }
}
