//! Error taxonomy for the engine.
//!
//! Structural and validation errors are returned synchronously from the
//! mutating call that caused them and leave the engine unchanged.
//! Calendar errors surface either from a direct calendar query or, during a
//! recalculation pass, per affected task in the pass report.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::calendar::{CalendarId, DayId};
use crate::task::TaskId;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Calendar(#[from] CalendarError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<MoveError> for EngineError {
    fn from(value: MoveError) -> Self {
        EngineError::Structural(StructuralError::Move(value))
    }
}

impl From<DependencyError> for EngineError {
    fn from(value: DependencyError) -> Self {
        EngineError::Structural(StructuralError::Dependency(value))
    }
}

/// Invalid references and edits that would break the tree or graph invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("task {0} does not exist")]
    UnknownTask(TaskId),
    #[error("the root task cannot be edited, moved or removed")]
    RootImmutable,
    #[error("position {position} is out of range for parent {parent} with {len} children")]
    PositionOutOfRange {
        parent: TaskId,
        position: usize,
        len: usize,
    },
    #[error("dependency {pred} -> {succ} references a task missing from the tree")]
    DanglingDependency { pred: TaskId, succ: TaskId },
    #[error(transparent)]
    Move(#[from] MoveError),
    #[error(transparent)]
    Dependency(#[from] DependencyError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("moving task {task} under {new_parent} would create a cycle")]
    WouldCreateCycle { task: TaskId, new_parent: TaskId },
    #[error("task {sibling} is not a child of {parent}")]
    InvalidPosition { sibling: TaskId, parent: TaskId },
    #[error("moving task {task} under {new_parent} conflicts with dependency {pred} -> {succ}")]
    DependencyConflict {
        task: TaskId,
        new_parent: TaskId,
        pred: TaskId,
        succ: TaskId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("dependency {pred} -> {succ} would close a cycle")]
    Cyclic { pred: TaskId, succ: TaskId },
    #[error("dependency {pred} -> {succ} already exists")]
    Duplicate { pred: TaskId, succ: TaskId },
    #[error("task {0} cannot depend on itself")]
    SelfLink(TaskId),
    #[error("tasks {pred} and {succ} are ancestor and descendant")]
    AncestorLink { pred: TaskId, succ: TaskId },
    #[error("dependency {pred} -> {succ} does not exist")]
    NotFound { pred: TaskId, succ: TaskId },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    #[error(
        "calendar {calendar} has no working time within {horizon_days} days of {from}"
    )]
    Unschedulable {
        calendar: CalendarId,
        from: NaiveDateTime,
        horizon_days: u32,
    },
    #[error("calendar {0} does not exist")]
    UnknownCalendar(CalendarId),
    #[error("day type {0} does not exist")]
    UnknownDay(DayId),
    #[error("day type {0} is built in and cannot be released")]
    BuiltInDay(DayId),
    #[error("invalid working interval {start}..{end}: {reason}")]
    InvalidInterval { start: u32, end: u32, reason: String },
    #[error("calendar {0} still has derived calendars")]
    HasChildren(CalendarId),
    #[error("the root calendar cannot be removed")]
    RootCalendar,
    #[error("calendar {calendar} is still assigned to task {task}")]
    InUse { calendar: CalendarId, task: TaskId },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("task {task} has negative work {work}s")]
    NegativeWork { task: TaskId, work: i64 },
    #[error("task {task} has negative duration {duration}s")]
    NegativeDuration { task: TaskId, duration: i64 },
    #[error("task {task} has invalid percent_complete {percent} (must be between 0 and 100)")]
    PercentComplete { task: TaskId, percent: u8 },
    #[error("task {task} constraint {kind} requires a time")]
    MissingConstraintTime { task: TaskId, kind: &'static str },
    #[error("task {task} constraint as-soon-as-possible does not take a time")]
    UnexpectedConstraintTime { task: TaskId },
    #[error("task {task} allocation #{index} requires a non-empty resource_id")]
    EmptyResource { task: TaskId, index: usize },
    #[error("task {task} allocation for '{resource}' has invalid units {units}")]
    AllocationUnits {
        task: TaskId,
        resource: String,
        units: u32,
    },
    #[error("duplicate task id {0}")]
    DuplicateId(TaskId),
}
