use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, Transaction, params};

use super::{PersistenceError, PersistenceResult, ProjectSnapshot, ProjectStore};
use crate::calendar::CalendarStore;
use crate::config::EngineConfig;
use crate::graph::{Dependency, RelationKind};
use crate::manager::TaskManager;
use crate::metadata::ProjectMetadata;
use crate::task::{Task, TaskId};
use crate::tree::TaskRecord;

pub struct SqliteProjectStore {
    connection: Mutex<Connection>,
}

impl SqliteProjectStore {
    pub fn new<P: AsRef<Path>>(path: P) -> PersistenceResult<Self> {
        let connection = Connection::open(path)?;
        Self::initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn in_memory() -> PersistenceResult<Self> {
        let connection = Connection::open_in_memory()?;
        Self::initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn initialize_schema(connection: &Connection) -> PersistenceResult<()> {
        let ddl = r#"
            CREATE TABLE IF NOT EXISTS project (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                metadata_json TEXT NOT NULL,
                config_json TEXT NOT NULL,
                calendars_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                parent_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                task_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS dependencies (
                predecessor INTEGER NOT NULL,
                successor INTEGER NOT NULL,
                relation TEXT NOT NULL,
                lag INTEGER NOT NULL,
                PRIMARY KEY (predecessor, successor)
            );
        "#;
        connection.execute_batch(ddl)?;
        Ok(())
    }

    fn lock(&self) -> PersistenceResult<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| PersistenceError::Unsupported("sqlite connection poisoned"))
    }

    fn save_project_row(tx: &Transaction, snapshot: &ProjectSnapshot) -> PersistenceResult<()> {
        tx.execute("DELETE FROM project", [])?;
        tx.execute(
            "INSERT INTO project (id, metadata_json, config_json, calendars_json) VALUES (1, ?1, ?2, ?3)",
            params![
                serde_json::to_string(&snapshot.metadata)?,
                serde_json::to_string(&snapshot.config)?,
                serde_json::to_string(&snapshot.calendars)?,
            ],
        )?;
        Ok(())
    }

    fn save_tasks(tx: &Transaction, records: &[TaskRecord]) -> PersistenceResult<()> {
        tx.execute("DELETE FROM tasks", [])?;
        let mut stmt =
            tx.prepare("INSERT INTO tasks (id, parent_id, position, task_json) VALUES (?1, ?2, ?3, ?4)")?;
        for record in records {
            stmt.execute(params![
                record.task.id.0,
                record.parent.0,
                record.position as i64,
                serde_json::to_string(&record.task)?,
            ])?;
        }
        Ok(())
    }

    fn save_dependencies(tx: &Transaction, deps: &[Dependency]) -> PersistenceResult<()> {
        tx.execute("DELETE FROM dependencies", [])?;
        let mut stmt = tx.prepare(
            "INSERT INTO dependencies (predecessor, successor, relation, lag) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for dep in deps {
            stmt.execute(params![
                dep.predecessor.0,
                dep.successor.0,
                dep.relation.as_str(),
                dep.lag,
            ])?;
        }
        Ok(())
    }
}

impl ProjectStore for SqliteProjectStore {
    fn save_project(&self, manager: &TaskManager) -> PersistenceResult<()> {
        let snapshot = ProjectSnapshot::from_manager(manager);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::save_project_row(&tx, &snapshot)?;
        Self::save_tasks(&tx, &snapshot.tasks)?;
        Self::save_dependencies(&tx, &snapshot.dependencies)?;
        tx.commit()?;
        Ok(())
    }

    fn load_project(&self) -> PersistenceResult<Option<ProjectSnapshot>> {
        let conn = self.lock()?;

        let mut stmt =
            conn.prepare("SELECT metadata_json, config_json, calendars_json FROM project WHERE id = 1")?;
        let row: Option<(String, String, String)> = stmt
            .query_row([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .optional()?;
        let Some((metadata_json, config_json, calendars_json)) = row else {
            return Ok(None);
        };
        let metadata: ProjectMetadata = serde_json::from_str(&metadata_json)?;
        let config: EngineConfig = serde_json::from_str(&config_json)?;
        let calendars: CalendarStore = serde_json::from_str(&calendars_json)?;

        let mut stmt =
            conn.prepare("SELECT parent_id, position, task_json FROM tasks ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut tasks = Vec::new();
        for row in rows {
            let (parent, position, json) = row?;
            let task: Task = serde_json::from_str(&json)?;
            let position = usize::try_from(position).map_err(|_| {
                PersistenceError::Corrupt(format!("task {} has position {position}", task.id))
            })?;
            tasks.push(TaskRecord {
                task,
                parent: TaskId(parent),
                position,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT predecessor, successor, relation, lag FROM dependencies ORDER BY predecessor, successor",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut dependencies = Vec::new();
        for row in rows {
            let (pred, succ, relation, lag) = row?;
            let relation: RelationKind = relation.parse().map_err(|_| {
                PersistenceError::Corrupt(format!(
                    "dependency {pred} -> {succ} has relation '{relation}'"
                ))
            })?;
            dependencies.push(Dependency::new(TaskId(pred), TaskId(succ), relation, lag));
        }

        Ok(Some(ProjectSnapshot {
            metadata,
            config,
            calendars,
            tasks,
            dependencies,
        }))
    }
}
