use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;

use crate::domain::HourSlot;
use crate::error::IngestError;

/// Which hours a run should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSelection {
    /// Explicit window; partial failures are tolerated.
    Range {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    /// One hour given by the caller; its fetch is a precondition of the run.
    SingleHour(NaiveDateTime),
    /// The hour containing "now"; its fetch is a precondition of the run.
    CurrentHour,
}

impl TimeSelection {
    pub fn is_single_hour(&self) -> bool {
        !matches!(self, TimeSelection::Range { .. })
    }

    pub fn resolve(&self, now: NaiveDateTime) -> Result<Vec<HourSlot>, IngestError> {
        match *self {
            TimeSelection::Range { start, end } => resolve_range(start, end),
            TimeSelection::SingleHour(instant) => Ok(vec![resolve_single(instant)]),
            TimeSelection::CurrentHour => Ok(vec![resolve_single(now)]),
        }
    }

    pub fn mode(&self) -> SelectionMode {
        match self {
            TimeSelection::Range { .. } => SelectionMode::Range,
            TimeSelection::SingleHour(_) => SelectionMode::SingleHour,
            TimeSelection::CurrentHour => SelectionMode::CurrentHour,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Range,
    SingleHour,
    CurrentHour,
}

/// Every hour from `start` (truncated) through `end`, rounding a partial trailing hour up.
pub fn resolve_range(
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<HourSlot>, IngestError> {
    if start > end {
        return Err(IngestError::InvalidRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }

    let mut last = HourSlot::truncate(end);
    if end.minute() > 0 || end.second() > 0 {
        last = last.next();
    }

    let mut slots = Vec::new();
    let mut current = HourSlot::truncate(start);
    while current <= last {
        slots.push(current);
        current = current.next();
    }
    Ok(slots)
}

pub fn resolve_single(instant: NaiveDateTime) -> HourSlot {
    HourSlot::truncate(instant)
}
