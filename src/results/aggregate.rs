//! Event stream aggregation
//!
//! Groups events by unit and test path and folds each group into a
//! `TestRecord`. Barrier events carry no unit and never reach a per-unit
//! record.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::records::TestRecord;
use crate::models::{Event, MessageType, PassState, ResultPayload};

#[derive(Clone, Debug, Default)]
struct UnitLog {
    /// Test paths in first-seen order
    order: Vec<String>,
    events: HashMap<String, Vec<Event>>,
}

/// Accumulates events and builds per-(unit, test) records on demand
#[derive(Clone, Debug, Default)]
pub struct ReportAggregator {
    units: BTreeMap<u32, UnitLog>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut aggregator = Self::new();
        for event in events {
            aggregator.record(event);
        }
        aggregator
    }

    /// Append an event; returns the `(unit, test)` key when it ends a test
    pub fn record(&mut self, event: Event) -> Option<(u32, String)> {
        let Some(unit) = event.unit_index else {
            debug!("Skipping unit-less event for {}", event.test_name);
            return None;
        };

        let log = self.units.entry(unit).or_default();
        let test = event.test_name.clone();
        let ended = event.is_end();

        if !log.events.contains_key(&test) {
            log.order.push(test.clone());
        }
        log.events.entry(test.clone()).or_default().push(event);

        ended.then_some((unit, test))
    }

    pub fn units(&self) -> Vec<u32> {
        self.units.keys().copied().collect()
    }

    pub fn tests(&self, unit: u32) -> Vec<&str> {
        self.units
            .get(&unit)
            .map(|log| log.order.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn events(&self, unit: u32, test: &str) -> &[Event] {
        self.units
            .get(&unit)
            .and_then(|log| log.events.get(test))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Build the record of one (unit, test) group
    pub fn build(&self, unit: u32, test: &str) -> Option<TestRecord> {
        build_record(test, self.events(unit, test))
    }

    /// Every record of a unit, in first-seen test order
    pub fn records(&self, unit: u32) -> Vec<TestRecord> {
        self.tests(unit)
            .into_iter()
            .filter_map(|test| self.build(unit, test))
            .collect()
    }
}

fn build_record(test_name: &str, events: &[Event]) -> Option<TestRecord> {
    let first = events.first()?;
    let test_name = test_name.to_string();

    if events.iter().any(|e| e.result_type() != first.result_type()) {
        return Some(TestRecord::Raw {
            test_name,
            events: events.to_vec(),
        });
    }

    let end = events
        .iter()
        .rev()
        .find(|e| e.message_type == MessageType::TestEnd)
        .or_else(|| events.last())?;
    let new = events
        .iter()
        .find(|e| e.message_type == MessageType::NewTest)
        .unwrap_or(first);
    let pass = end.pass;

    let record = match &first.payload {
        ResultPayload::Boolean { .. } => TestRecord::Boolean {
            test_name,
            result: final_value(events, end, |p| match p {
                ResultPayload::Boolean { result, .. } => *result,
                _ => None,
            }),
            pass,
        },
        ResultPayload::Number { .. } => TestRecord::Number {
            test_name,
            result_unit: initial_value(events, new, |p| match p {
                ResultPayload::Number { result_unit, .. } => result_unit.clone(),
                _ => None,
            }),
            expected_range: initial_value(events, new, |p| match p {
                ResultPayload::Number { expected_range, .. } => *expected_range,
                _ => None,
            }),
            result: final_value(events, end, |p| match p {
                ResultPayload::Number { result, .. } => *result,
                _ => None,
            }),
            pass,
        },
        ResultPayload::Vector { .. } => TestRecord::Vector {
            test_name,
            result_unit: initial_value(events, new, |p| match p {
                ResultPayload::Vector { result_unit, .. } => result_unit.clone(),
                _ => None,
            }),
            expected_range: initial_value(events, new, |p| match p {
                ResultPayload::Vector { expected_range, .. } => *expected_range,
                _ => None,
            }),
            pass: vector_verdict(events, pass),
            points: events
                .iter()
                .filter(|e| e.message_type == MessageType::Update)
                .filter_map(|e| match &e.payload {
                    ResultPayload::Vector { result, .. } => *result,
                    _ => None,
                })
                .collect(),
        },
        ResultPayload::Image { .. } => TestRecord::Image {
            test_name,
            pass,
            reference: final_value(events, end, |p| match p {
                ResultPayload::Image { result } => result.clone(),
                _ => None,
            }),
        },
    };

    Some(record)
}

/// Field from the end event, else the latest event that carries it
fn final_value<T>(
    events: &[Event],
    end: &Event,
    field: impl Fn(&ResultPayload) -> Option<T>,
) -> Option<T> {
    field(&end.payload).or_else(|| events.iter().rev().find_map(|e| field(&e.payload)))
}

/// Field from the new-test event, else the earliest event that carries it
fn initial_value<T>(
    events: &[Event],
    new: &Event,
    field: impl Fn(&ResultPayload) -> Option<T>,
) -> Option<T> {
    field(&new.payload).or_else(|| events.iter().find_map(|e| field(&e.payload)))
}

/// A vector run without a final verdict fails if any update failed
fn vector_verdict(events: &[Event], end_pass: PassState) -> PassState {
    if end_pass != PassState::InProgress {
        return end_pass;
    }
    if events.iter().any(|e| e.pass == PassState::Fail) {
        PassState::Fail
    } else {
        end_pass
    }
}
