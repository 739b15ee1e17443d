//! Critical-path passes over the task tree.

pub mod backward_pass;
pub mod forward_pass;

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::calendar::CalendarId;
use crate::error::CalendarError;
use crate::task::{Task, TaskId};

/// Early `(start, finish)` per task.
pub type EarlyTimes = HashMap<TaskId, (NaiveDateTime, NaiveDateTime)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LateTimes {
    pub late_start: NaiveDateTime,
    pub late_finish: NaiveDateTime,
    pub slack: i64,
}

/// Per-task calendar failures collected while a pass keeps going.
pub type PassFailures = Vec<(TaskId, CalendarError)>;

pub(crate) fn task_calendar(task: &Task) -> CalendarId {
    task.calendar.unwrap_or(CalendarId::ROOT)
}
