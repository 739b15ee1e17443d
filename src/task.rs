use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::calendar::CalendarId;
use crate::resource::{self, Assignment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl TaskId {
    /// The synthetic root every project tree hangs from.
    pub const ROOT: TaskId = TaskId(0);
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    AsSoonAsPossible,
    MustStartOn,
    StartNoEarlierThan,
    FinishNoLaterThan,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::AsSoonAsPossible => "asap",
            ConstraintKind::MustStartOn => "must_start_on",
            ConstraintKind::StartNoEarlierThan => "start_no_earlier_than",
            ConstraintKind::FinishNoLaterThan => "finish_no_later_than",
        }
    }

    pub fn needs_time(&self) -> bool {
        !matches!(self, ConstraintKind::AsSoonAsPossible)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub kind: ConstraintKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveDateTime>,
}

impl Default for Constraint {
    fn default() -> Self {
        Self::asap()
    }
}

impl Constraint {
    pub fn asap() -> Self {
        Self {
            kind: ConstraintKind::AsSoonAsPossible,
            time: None,
        }
    }

    pub fn must_start_on(time: NaiveDateTime) -> Self {
        Self {
            kind: ConstraintKind::MustStartOn,
            time: Some(time),
        }
    }

    pub fn start_no_earlier_than(time: NaiveDateTime) -> Self {
        Self {
            kind: ConstraintKind::StartNoEarlierThan,
            time: Some(time),
        }
    }

    pub fn finish_no_later_than(time: NaiveDateTime) -> Self {
        Self {
            kind: ConstraintKind::FinishNoLaterThan,
            time: Some(time),
        }
    }

    /// Earliest start the constraint allows on its own.
    pub fn earliest_start(&self) -> Option<NaiveDateTime> {
        match self.kind {
            ConstraintKind::MustStartOn | ConstraintKind::StartNoEarlierThan => self.time,
            _ => None,
        }
    }

    pub fn latest_finish(&self) -> Option<NaiveDateTime> {
        match self.kind {
            ConstraintKind::FinishNoLaterThan => self.time,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingType {
    /// Work is fixed; the span shrinks as more units are assigned.
    #[default]
    FixedWork,
    /// The span is fixed; work follows from the assigned units.
    FixedDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    #[default]
    Clean,
    Dirty,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Requested work in working seconds.
    pub work: i64,
    /// Requested span for fixed-duration tasks, in working seconds.
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub scheduling: SchedulingType,
    #[serde(default)]
    pub constraint: Constraint,
    #[serde(default)]
    pub percent_complete: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar: Option<CalendarId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignments: Vec<Assignment>,

    pub start: Option<NaiveDateTime>,
    pub finish: Option<NaiveDateTime>,
    pub late_start: Option<NaiveDateTime>,
    pub late_finish: Option<NaiveDateTime>,
    /// Signed working seconds between finish and late finish.
    pub slack: Option<i64>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub state: ScheduleState,
}

impl Task {
    pub fn new(name: impl Into<String>, work: i64) -> Self {
        Self {
            id: TaskId::ROOT,
            name: name.into(),
            note: None,
            work,
            duration: 0,
            scheduling: SchedulingType::FixedWork,
            constraint: Constraint::asap(),
            percent_complete: 0,
            calendar: None,
            assignments: Vec::new(),
            start: None,
            finish: None,
            late_start: None,
            late_finish: None,
            slack: None,
            critical: false,
            state: ScheduleState::Dirty,
        }
    }

    pub fn with_hours(name: impl Into<String>, hours: i64) -> Self {
        Self::new(name, hours * 3600)
    }

    pub fn fixed_duration(name: impl Into<String>, duration: i64) -> Self {
        let mut task = Self::new(name, duration);
        task.duration = duration;
        task.scheduling = SchedulingType::FixedDuration;
        task
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn with_assignments(mut self, assignments: Vec<Assignment>) -> Self {
        self.assignments = assignments;
        self
    }

    pub fn with_calendar(mut self, calendar: CalendarId) -> Self {
        self.calendar = Some(calendar);
        self
    }

    /// Working seconds the task occupies on its calendar.
    pub fn span(&self) -> i64 {
        match self.scheduling {
            SchedulingType::FixedDuration => self.duration,
            SchedulingType::FixedWork => match resource::total_units(&self.assignments) {
                Some(units) if units > 0 => {
                    (i128::from(self.work) * 100 / i128::from(units)) as i64
                }
                _ => self.work,
            },
        }
    }

    /// Work per working second of span: `Σunits / 100`, or 1 without assignments.
    pub fn allocation_factor(&self) -> f64 {
        match resource::total_units(&self.assignments) {
            Some(units) => units as f64 / 100.0,
            None => 1.0,
        }
    }

    /// Effective work derived from the span and allocation.
    pub fn effective_work(&self) -> i64 {
        match self.scheduling {
            SchedulingType::FixedWork => self.work,
            SchedulingType::FixedDuration => {
                (self.duration as f64 * self.allocation_factor()).round() as i64
            }
        }
    }

    pub fn is_milestone(&self) -> bool {
        self.span() == 0
    }

    pub(crate) fn schedule_fingerprint(
        &self,
    ) -> (Option<NaiveDateTime>, Option<NaiveDateTime>, Option<i64>) {
        (self.start, self.finish, self.slack)
    }
}
