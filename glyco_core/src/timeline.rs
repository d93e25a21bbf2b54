//! Instant-keyed store of clinical events and published schedules.
//!
//! Each instant owns one [`TimelineEntry`] with a fixed slot per event kind
//! and per schedule kind; inserting a second value of the same kind at the
//! same instant replaces the first. The store is filled by the ingestion
//! boundary and read-only for the engine.

use crate::types::{EventKind, Instant, Schedule, ScheduleKind, TypedEvent};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeBounds;

/// Events and schedules attached to one instant
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimelineEntry {
    events: [Option<TypedEvent>; EventKind::COUNT],
    schedules: [Option<Schedule>; ScheduleKind::COUNT],
}

impl TimelineEntry {
    /// Event of the given kind, if one was recorded at this instant
    pub fn get(&self, kind: EventKind) -> Option<&TypedEvent> {
        self.events[kind.index()].as_ref()
    }

    /// Numeric value of the event of the given kind
    pub fn value(&self, kind: EventKind) -> Option<f64> {
        self.get(kind).map(|event| event.value)
    }

    pub fn schedule(&self, kind: ScheduleKind) -> Option<&Schedule> {
        self.schedules[kind.index()].as_ref()
    }

    /// Store an event, replacing any previous event of the same kind
    pub fn set(&mut self, event: TypedEvent) -> Option<TypedEvent> {
        self.events[event.kind.index()].replace(event)
    }

    pub fn set_schedule(&mut self, schedule: Schedule) -> Option<Schedule> {
        let index = schedule.kind.index();
        self.schedules[index].replace(schedule)
    }

    /// All events present at this instant, in kind order
    pub fn events(&self) -> impl Iterator<Item = &TypedEvent> {
        self.events.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.events.iter().all(Option::is_none) && self.schedules.iter().all(Option::is_none)
    }
}

/// Chronologically ordered store of timeline entries
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    entries: BTreeMap<Instant, TimelineEntry>,
    published: [BTreeSet<Instant>; ScheduleKind::COUNT],
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event at an instant (last write wins per kind)
    pub fn insert_event(&mut self, at: Instant, event: TypedEvent) {
        if let Some(previous) = self.entries.entry(at).or_default().set(event) {
            tracing::debug!(
                "{} - replacing {} {} with {}",
                at,
                previous.kind,
                previous.value,
                event.value
            );
        }
    }

    /// Publish a schedule at an instant (last write wins per kind)
    pub fn insert_schedule(&mut self, at: Instant, schedule: Schedule) {
        self.published[schedule.kind.index()].insert(at);
        if self.entries.entry(at).or_default().set_schedule(schedule).is_some() {
            tracing::debug!("{} - replacing previously published schedule", at);
        }
    }

    /// Exact-instant lookup, no interpolation
    pub fn get(&self, at: Instant, kind: EventKind) -> Option<&TypedEvent> {
        self.entries.get(&at).and_then(|entry| entry.get(kind))
    }

    pub fn entry(&self, at: Instant) -> Option<&TimelineEntry> {
        self.entries.get(&at)
    }

    /// Value active at the time-of-day of `at`, under the schedule of this
    /// kind most recently published at or before `at`.
    ///
    /// Returns `None` when no such schedule was ever published.
    pub fn resolve_schedule(&self, kind: ScheduleKind, at: Instant) -> Option<f64> {
        let published_at = self.published[kind.index()].range(..=at).next_back()?;
        self.entries
            .get(published_at)
            .and_then(|entry| entry.schedule(kind))
            .and_then(|schedule| schedule.value_at(at.time()))
    }

    /// Entries in chronological order
    pub fn iter(&self) -> impl Iterator<Item = (&Instant, &TimelineEntry)> {
        self.entries.iter()
    }

    pub fn range<R: RangeBounds<Instant>>(
        &self,
        range: R,
    ) -> impl Iterator<Item = (&Instant, &TimelineEntry)> {
        self.entries.range(range)
    }

    pub fn first_instant(&self) -> Option<Instant> {
        self.entries.keys().next().copied()
    }

    pub fn last_instant(&self) -> Option<Instant> {
        self.entries.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
