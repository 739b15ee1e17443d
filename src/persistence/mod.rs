//! Project storage.
//!
//! A project is saved as a [`ProjectSnapshot`] either as a native JSON
//! document or in a relational SQLite database. Loaders build the task tree
//! in one go and hand it to the engine through [`TaskManager::set_root`].

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::calendar::CalendarStore;
use crate::config::{ConfigError, EngineConfig};
use crate::error::{CalendarError, EngineError};
use crate::graph::{Dependency, DependencyGraph};
use crate::manager::{TaskManager, dangling_calendar};
use crate::metadata::ProjectMetadata;
use crate::scheduler::RecalcReport;
use crate::tree::{TaskRecord, TaskTree};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid project: {0}")]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("storage backend unavailable: {0}")]
    Unsupported(&'static str),
    #[error("no project stored")]
    NotFound,
    #[error("corrupt stored project: {0}")]
    Corrupt(String),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Everything needed to rebuild a [`TaskManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub metadata: ProjectMetadata,
    #[serde(default)]
    pub config: EngineConfig,
    pub calendars: CalendarStore,
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl ProjectSnapshot {
    pub fn from_manager(manager: &TaskManager) -> Self {
        Self {
            metadata: manager.metadata().clone(),
            config: manager.config().clone(),
            calendars: manager.calendars().clone(),
            tasks: manager.tree().records(),
            dependencies: manager.dependencies(),
        }
    }

    /// Loads the snapshot into `manager`, replacing its project.
    ///
    /// Scheduling is blocked while the parts are swapped in, so exactly one
    /// pass runs at the end.
    pub fn apply(self, manager: &mut TaskManager) -> PersistenceResult<RecalcReport> {
        let tree = TaskTree::from_records(self.tasks)?;
        let mut graph = DependencyGraph::new();
        for dep in self.dependencies {
            graph.insert_unchecked(dep);
        }
        graph.check_against(&tree).map_err(EngineError::from)?;
        if let Some((_, calendar)) = dangling_calendar(&tree, &self.calendars) {
            return Err(EngineError::from(CalendarError::UnknownCalendar(calendar)).into());
        }

        let was_blocked = manager.is_blocked();
        manager.set_block_scheduling(true);
        manager.set_config(self.config);
        manager.set_metadata(self.metadata);
        manager.replace_calendars(self.calendars);
        let loaded = manager.set_root(tree, graph);
        let report = if was_blocked {
            RecalcReport::default()
        } else {
            manager.set_block_scheduling(false)
        };
        loaded?;
        info!(tasks = manager.tree().len(), "project loaded");
        Ok(report)
    }

    pub fn into_manager(self) -> PersistenceResult<TaskManager> {
        let mut manager = TaskManager::new();
        self.apply(&mut manager)?;
        Ok(manager)
    }
}

pub trait ProjectStore {
    fn save_project(&self, manager: &TaskManager) -> PersistenceResult<()>;
    fn load_project(&self) -> PersistenceResult<Option<ProjectSnapshot>>;
}

/// Where a project lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// JSON document.
    Native(PathBuf),
    /// SQLite database.
    Relational(PathBuf),
}

impl StorageBackend {
    /// Picks a backend from a short name (`json` or `sqlite`).
    pub fn from_kind(kind: &str, path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref().to_path_buf();
        match kind.trim().to_ascii_lowercase().as_str() {
            "json" | "native" => Some(StorageBackend::Native(path)),
            "sqlite" | "relational" => Some(StorageBackend::Relational(path)),
            _ => None,
        }
    }

    fn store(&self) -> PersistenceResult<Box<dyn ProjectStore>> {
        match self {
            StorageBackend::Native(path) => Ok(Box::new(file::JsonProjectStore::new(path))),
            #[cfg(feature = "sqlite")]
            StorageBackend::Relational(path) => Ok(Box::new(sqlite::SqliteProjectStore::new(path)?)),
            #[cfg(not(feature = "sqlite"))]
            StorageBackend::Relational(_) => Err(PersistenceError::Unsupported(
                "built without the sqlite feature",
            )),
        }
    }

    pub fn save(&self, manager: &TaskManager) -> PersistenceResult<()> {
        self.store()?.save_project(manager)?;
        info!(backend = ?self, "project saved");
        Ok(())
    }

    pub fn load_into(&self, manager: &mut TaskManager) -> PersistenceResult<RecalcReport> {
        let snapshot = self.store()?.load_project()?.ok_or(PersistenceError::NotFound)?;
        snapshot.apply(manager)
    }

    pub fn load(&self) -> PersistenceResult<TaskManager> {
        let snapshot = self.store()?.load_project()?.ok_or(PersistenceError::NotFound)?;
        snapshot.into_manager()
    }
}

pub mod file;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file::{JsonProjectStore, export_task_list_csv};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteProjectStore;
