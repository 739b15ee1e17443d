use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{PersistenceResult, ProjectSnapshot, ProjectStore};
use crate::manager::TaskManager;
use crate::task::{Task, TaskId};

pub struct JsonProjectStore {
    path: PathBuf,
}

impl JsonProjectStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ProjectStore for JsonProjectStore {
    fn save_project(&self, manager: &TaskManager) -> PersistenceResult<()> {
        let snapshot = ProjectSnapshot::from_manager(manager);
        let file = File::create(&self.path)?;
        serde_json::to_writer_pretty(file, &snapshot)?;
        Ok(())
    }

    fn load_project(&self) -> PersistenceResult<Option<ProjectSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = File::open(&self.path)?;
        let snapshot: ProjectSnapshot = serde_json::from_reader(file)?;
        Ok(Some(snapshot))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TaskCsvRecord {
    pub id: u32,
    pub parent_id: u32,
    pub name: String,
    pub work_hours: f64,
    pub percent_complete: u8,
    pub constraint: String,
    pub predecessors: String,
    pub start: String,
    pub finish: String,
    pub late_start: String,
    pub late_finish: String,
    pub slack_hours: String,
    pub is_critical: bool,
    pub resources: String,
    pub notes: String,
}

impl TaskCsvRecord {
    fn from_task(task: &Task, manager: &TaskManager) -> Self {
        let predecessors = manager
            .graph()
            .predecessors(task.id)
            .into_iter()
            .map(|dep| {
                if dep.lag == 0 {
                    format!("{}{}", dep.predecessor, dep.relation.as_str().to_uppercase())
                } else {
                    format!(
                        "{}{}{:+}h",
                        dep.predecessor,
                        dep.relation.as_str().to_uppercase(),
                        dep.lag as f64 / 3600.0
                    )
                }
            })
            .collect::<Vec<_>>()
            .join(";");
        let resources = task
            .assignments
            .iter()
            .map(|a| format!("{}:{}", a.resource_id, a.units))
            .collect::<Vec<_>>()
            .join(";");

        Self {
            id: task.id.0,
            parent_id: manager.tree().parent(task.id).unwrap_or(TaskId::ROOT).0,
            name: task.name.clone(),
            work_hours: task.effective_work() as f64 / 3600.0,
            percent_complete: task.percent_complete,
            constraint: task.constraint.kind.as_str().to_string(),
            predecessors,
            start: format_time(task.start),
            finish: format_time(task.finish),
            late_start: format_time(task.late_start),
            late_finish: format_time(task.late_finish),
            slack_hours: task
                .slack
                .map(|s| format!("{:.2}", s as f64 / 3600.0))
                .unwrap_or_default(),
            is_critical: task.critical,
            resources,
            notes: task.note.clone().unwrap_or_default(),
        }
    }
}

fn format_time(time: Option<NaiveDateTime>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Writes the flat task list in tree order.
pub fn export_task_list_csv<P: AsRef<Path>>(manager: &TaskManager, path: P) -> PersistenceResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for task in manager.get_all_tasks() {
        writer.serialize(TaskCsvRecord::from_task(task, manager))?;
    }
    writer.flush()?;
    Ok(())
}
