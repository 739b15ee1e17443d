pub mod calculations;
pub mod calendar;
pub mod config;
pub mod error;
pub mod graph;
pub mod logging;
pub mod manager;
pub mod metadata;
pub mod persistence;
pub mod resource;
pub mod scheduler;
pub mod table;
pub mod task;
pub mod task_validation;
pub mod tree;
pub mod worker;

#[cfg(feature = "http_api")]
pub mod http_api;

pub use calendar::{CalendarId, CalendarStore, DayId, Interval};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use graph::{Dependency, RelationKind};
pub use manager::{EngineEvent, StructureChange, TaskManager};
pub use metadata::ProjectMetadata;
pub use scheduler::{RecalcReport, ScheduleSummary};
pub use task::{Constraint, ConstraintKind, Task, TaskId};
pub use tree::TaskTree;
