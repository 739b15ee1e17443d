//! The engine's public entry point.
//!
//! A [`TaskManager`] owns the task tree, the dependency graph, the calendars
//! and the scheduler. Every edit goes through it: the edit is validated in
//! full, applied, the affected tasks are marked dirty and, unless scheduling
//! is blocked, a recalculation runs before the call returns.

use std::fmt::Write as _;
use std::ops::ControlFlow;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calendar::{CalendarId, CalendarStore};
use crate::config::{ConfigError, EngineConfig};
use crate::error::{CalendarError, EngineResult, MoveError, StructuralError};
use crate::graph::{Dependency, DependencyGraph, RelationKind};
use crate::metadata::ProjectMetadata;
use crate::resource::Assignment;
use crate::scheduler::{self, RecalcReport, ScheduleSummary, Scheduler, TaskWork};
use crate::task::{Constraint, SchedulingType, Task, TaskId};
use crate::task_validation;
use crate::tree::TaskTree;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructureChange {
    Inserted { task: TaskId, parent: TaskId },
    Removed { tasks: Vec<TaskId> },
    Moved {
        task: TaskId,
        old_parent: TaskId,
        new_parent: TaskId,
    },
    RootReplaced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Computed start, finish or slack changed in a pass.
    TaskChanged(TaskId),
    StructureChanged(StructureChange),
}

pub type Subscriber = Box<dyn FnMut(&EngineEvent) + Send>;

pub struct TaskManager {
    config: EngineConfig,
    metadata: ProjectMetadata,
    tree: TaskTree,
    graph: DependencyGraph,
    calendars: CalendarStore,
    scheduler: Scheduler,
    subscribers: Vec<Subscriber>,
    last_report: RecalcReport,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        let config = EngineConfig::default();
        Self {
            calendars: CalendarStore::new(config.max_scan_days),
            config,
            metadata: ProjectMetadata::default(),
            tree: TaskTree::new(),
            graph: DependencyGraph::new(),
            scheduler: Scheduler::new(),
            subscribers: Vec::new(),
            last_report: RecalcReport::default(),
        }
    }

    pub fn with_config(config: EngineConfig, metadata: ProjectMetadata) -> Result<Self, ConfigError> {
        let calendars = config.calendar_store()?;
        Ok(Self {
            config,
            metadata,
            calendars,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metadata(&self) -> &ProjectMetadata {
        &self.metadata
    }

    pub fn project_start(&self) -> NaiveDateTime {
        self.metadata.project_start
    }

    pub fn tree(&self) -> &TaskTree {
        &self.tree
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn calendars(&self) -> &CalendarStore {
        &self.calendars
    }

    pub fn is_blocked(&self) -> bool {
        self.scheduler.is_blocked()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.scheduler.has_dirty()
    }

    /// Report of the most recent pass that did any work.
    pub fn last_report(&self) -> &RecalcReport {
        &self.last_report
    }

    pub fn subscribe<F>(&mut self, subscriber: F)
    where
        F: FnMut(&EngineEvent) + Send + 'static,
    {
        self.subscribers.push(Box::new(subscriber));
    }

    fn emit(&mut self, event: EngineEvent) {
        for subscriber in &mut self.subscribers {
            subscriber(&event);
        }
    }

    // ---- queries -------------------------------------------------------

    pub fn task(&self, id: TaskId) -> EngineResult<&Task> {
        Ok(self.tree.task(id)?)
    }

    /// Every task except the root, in tree order.
    pub fn get_all_tasks(&self) -> Vec<&Task> {
        self.tree.iter().collect()
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        self.graph.edges().collect()
    }

    pub fn traverse<F>(&self, start: TaskId, visit: F) -> EngineResult<ControlFlow<()>>
    where
        F: FnMut(&Task, usize) -> ControlFlow<()>,
    {
        self.tree.task(start)?;
        Ok(self.tree.traverse(start, visit))
    }

    pub fn calculate_task_work(
        &self,
        id: TaskId,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> EngineResult<i64> {
        Ok(scheduler::calculate_task_work(
            &self.tree,
            &self.calendars,
            id,
            window_start,
            window_end,
        )?)
    }

    pub fn calculate_summary_duration(
        &self,
        id: TaskId,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> EngineResult<i64> {
        Ok(scheduler::calculate_summary_duration(
            &self.tree,
            &self.calendars,
            id,
            window_start,
            window_end,
        )?)
    }

    pub fn work_report(
        &self,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> EngineResult<Vec<TaskWork>> {
        Ok(scheduler::work_report(
            &self.tree,
            &self.calendars,
            window_start,
            window_end,
        )?)
    }

    pub fn critical_path(&self) -> Vec<TaskId> {
        scheduler::critical_path(&self.tree)
    }

    pub fn summary(&self) -> ScheduleSummary {
        scheduler::summarize(&self.tree, self.metadata.project_start)
    }

    /// Indented outline of the tree with computed dates.
    pub fn dump_task_tree(&self) -> String {
        let mut out = String::new();
        let _ = self.tree.traverse(TaskId::ROOT, |task, depth| {
            if task.id == TaskId::ROOT {
                let _ = writeln!(out, "{}", self.metadata.name);
                return ControlFlow::Continue(());
            }
            let _ = writeln!(
                out,
                "{:indent$}[{}] {} {} -> {}{}",
                "",
                task.id,
                task.name,
                fmt_time(task.start),
                fmt_time(task.finish),
                if task.critical { " *" } else { "" },
                indent = depth * 2,
            );
            ControlFlow::Continue(())
        });
        out
    }

    /// One line per task: id, parent, name, work, start, finish, slack, critical.
    pub fn dump_task_list(&self) -> String {
        let mut out = String::from("id\tparent\tname\twork_h\tstart\tfinish\tslack_h\tcritical\n");
        for task in self.tree.iter() {
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{:.2}\t{}\t{}\t{}\t{}",
                task.id,
                self.tree.parent(task.id).unwrap_or(TaskId::ROOT),
                task.name,
                task.effective_work() as f64 / 3600.0,
                fmt_time(task.start),
                fmt_time(task.finish),
                task.slack
                    .map(|s| format!("{:.2}", s as f64 / 3600.0))
                    .unwrap_or_else(|| "-".to_string()),
                task.critical,
            );
        }
        out
    }

    // ---- structure -----------------------------------------------------

    pub fn insert_task(
        &mut self,
        parent: TaskId,
        position: Option<usize>,
        task: Task,
    ) -> EngineResult<TaskId> {
        let id = self.tree.insert(parent, position, task)?;
        debug!(task = %id, parent = %parent, "task inserted");
        self.scheduler.mark_dirty(&mut self.tree, id);
        self.scheduler.mark_dirty(&mut self.tree, parent);
        self.emit(EngineEvent::StructureChanged(StructureChange::Inserted {
            task: id,
            parent,
        }));
        self.auto_recalc();
        Ok(id)
    }

    /// Removes a task, its subtree and every edge touching them.
    pub fn remove_task(&mut self, id: TaskId) -> EngineResult<Vec<TaskId>> {
        let parent = self.tree.parent(id);
        let removed = self.tree.remove(id)?;
        let edges = self.graph.remove_task_edges(&removed);
        self.scheduler.forget(&removed);
        if let Some(parent) = parent {
            self.scheduler.mark_dirty(&mut self.tree, parent);
        }
        for edge in edges {
            self.scheduler
                .mark_subtree_dirty(&mut self.tree, edge.successor);
        }
        debug!(task = %id, removed = removed.len(), "subtree removed");
        self.emit(EngineEvent::StructureChanged(StructureChange::Removed {
            tasks: removed.clone(),
        }));
        self.auto_recalc();
        Ok(removed)
    }

    pub fn move_task(
        &mut self,
        id: TaskId,
        new_parent: TaskId,
        sibling: Option<TaskId>,
        before: bool,
    ) -> EngineResult<()> {
        let old_parent = self.tree.parent(id).ok_or(if id == TaskId::ROOT {
            StructuralError::RootImmutable
        } else {
            StructuralError::UnknownTask(id)
        })?;

        let mut candidate = self.tree.clone();
        candidate.move_task(id, new_parent, sibling, before)?;
        if let Some(dep) = self.graph.first_conflict(&candidate) {
            return Err(MoveError::DependencyConflict {
                task: id,
                new_parent,
                pred: dep.predecessor,
                succ: dep.successor,
            }
            .into());
        }
        self.tree = candidate;

        self.scheduler.mark_dirty(&mut self.tree, old_parent);
        self.scheduler.mark_dirty(&mut self.tree, new_parent);
        self.scheduler.mark_subtree_dirty(&mut self.tree, id);
        self.emit(EngineEvent::StructureChanged(StructureChange::Moved {
            task: id,
            old_parent,
            new_parent,
        }));
        self.auto_recalc();
        Ok(())
    }

    /// Replaces the whole tree and graph, e.g. after loading a project.
    pub fn set_root(&mut self, mut tree: TaskTree, graph: DependencyGraph) -> EngineResult<()> {
        task_validation::validate_task_collection(tree.iter())?;
        graph.check_against(&tree)?;
        if let Some((_, calendar)) = dangling_calendar(&tree, &self.calendars) {
            return Err(CalendarError::UnknownCalendar(calendar).into());
        }
        tree.rebuild();
        self.tree = tree;
        self.graph = graph;
        self.scheduler.clear();
        self.scheduler.mark_all_dirty(&mut self.tree);
        info!(tasks = self.tree.len(), dependencies = self.graph.len(), "task tree replaced");
        self.emit(EngineEvent::StructureChanged(StructureChange::RootReplaced));
        self.auto_recalc();
        Ok(())
    }

    pub fn set_metadata(&mut self, metadata: ProjectMetadata) {
        let moved = metadata.project_start != self.metadata.project_start;
        self.metadata = metadata;
        if moved {
            self.scheduler.mark_all_dirty(&mut self.tree);
            self.auto_recalc();
        }
    }

    pub fn set_project_start(&mut self, start: NaiveDateTime) {
        let metadata = ProjectMetadata {
            project_start: start,
            ..self.metadata.clone()
        };
        self.set_metadata(metadata);
    }

    // ---- dependencies --------------------------------------------------

    pub fn add_dependency(
        &mut self,
        pred: TaskId,
        succ: TaskId,
        relation: RelationKind,
        lag: i64,
    ) -> EngineResult<()> {
        self.graph
            .add_dependency(&self.tree, Dependency::new(pred, succ, relation, lag))?;
        self.scheduler.mark_subtree_dirty(&mut self.tree, succ);
        self.auto_recalc();
        Ok(())
    }

    pub fn remove_dependency(&mut self, pred: TaskId, succ: TaskId) -> EngineResult<Dependency> {
        let removed = self.graph.remove_dependency(pred, succ)?;
        self.scheduler.mark_subtree_dirty(&mut self.tree, succ);
        self.auto_recalc();
        Ok(removed)
    }

    // ---- attributes ----------------------------------------------------

    fn edit_task<F>(&mut self, id: TaskId, reschedule_subtree: bool, edit: F) -> EngineResult<()>
    where
        F: FnOnce(&mut Task),
    {
        if id == TaskId::ROOT {
            return Err(StructuralError::RootImmutable.into());
        }
        let mut updated = self.tree.task(id)?.clone();
        edit(&mut updated);
        task_validation::validate_task(&updated)?;
        if let Some(slot) = self.tree.get_mut(id) {
            *slot = updated;
        }
        if reschedule_subtree {
            self.scheduler.mark_subtree_dirty(&mut self.tree, id);
        } else {
            self.scheduler.mark_dirty(&mut self.tree, id);
        }
        self.auto_recalc();
        Ok(())
    }

    pub fn set_task_name(&mut self, id: TaskId, name: impl Into<String>) -> EngineResult<()> {
        if id == TaskId::ROOT {
            return Err(StructuralError::RootImmutable.into());
        }
        let name = name.into();
        let task = self
            .tree
            .get_mut(id)
            .ok_or(StructuralError::UnknownTask(id))?;
        task.name = name;
        Ok(())
    }

    pub fn set_task_work(&mut self, id: TaskId, work: i64) -> EngineResult<()> {
        self.edit_task(id, false, |task| {
            task.work = work;
            task.scheduling = SchedulingType::FixedWork;
        })
    }

    pub fn set_task_duration(&mut self, id: TaskId, duration: i64) -> EngineResult<()> {
        self.edit_task(id, false, |task| {
            task.duration = duration;
            task.scheduling = SchedulingType::FixedDuration;
        })
    }

    pub fn set_task_constraint(&mut self, id: TaskId, constraint: Constraint) -> EngineResult<()> {
        self.edit_task(id, true, |task| task.constraint = constraint)
    }

    pub fn set_percent_complete(&mut self, id: TaskId, percent: u8) -> EngineResult<()> {
        self.edit_task(id, false, |task| task.percent_complete = percent)
    }

    pub fn set_assignments(&mut self, id: TaskId, assignments: Vec<Assignment>) -> EngineResult<()> {
        self.edit_task(id, false, |task| task.assignments = assignments)
    }

    pub fn set_task_calendar(&mut self, id: TaskId, calendar: Option<CalendarId>) -> EngineResult<()> {
        if let Some(calendar) = calendar {
            if !self.calendars.contains(calendar) {
                return Err(CalendarError::UnknownCalendar(calendar).into());
            }
        }
        self.edit_task(id, false, |task| task.calendar = calendar)
    }

    // ---- calendars -----------------------------------------------------

    /// Applies a batch of calendar edits atomically.
    ///
    /// Nothing changes when `edit` fails or removes a calendar a task is
    /// still assigned to. Any successful change marks the whole schedule
    /// dirty.
    pub fn edit_calendars<F, R>(&mut self, edit: F) -> EngineResult<R>
    where
        F: FnOnce(&mut CalendarStore) -> Result<R, CalendarError>,
    {
        let mut candidate = self.calendars.clone();
        let result = edit(&mut candidate)?;
        if let Some((task, calendar)) = dangling_calendar(&self.tree, &candidate) {
            return Err(CalendarError::InUse { calendar, task }.into());
        }
        if candidate.version() != self.calendars.version() {
            self.calendars = candidate;
            self.scheduler.mark_all_dirty(&mut self.tree);
            self.auto_recalc();
        }
        Ok(result)
    }

    /// Swaps in a loaded calendar store.
    pub fn replace_calendars(&mut self, calendars: CalendarStore) {
        self.calendars = calendars;
        self.scheduler.mark_all_dirty(&mut self.tree);
        self.auto_recalc();
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.calendars.set_max_scan_days(config.max_scan_days);
        self.config = config;
        self.scheduler.mark_all_dirty(&mut self.tree);
        self.auto_recalc();
    }

    // ---- scheduling ----------------------------------------------------

    /// Blocks or unblocks automatic recalculation.
    ///
    /// Unblocking runs one forced pass and returns its report; blocking
    /// returns an empty report.
    pub fn set_block_scheduling(&mut self, block: bool) -> RecalcReport {
        let was_blocked = self.scheduler.set_blocked(block);
        if was_blocked != block {
            debug!(blocked = block, "block scheduling toggled");
        }
        if block {
            RecalcReport::default()
        } else {
            self.recalc(true)
        }
    }

    pub fn recalc(&mut self, force: bool) -> RecalcReport {
        let report = self.scheduler.recalc(
            &mut self.tree,
            &self.graph,
            &self.calendars,
            self.metadata.project_start,
            force,
        );
        for id in &report.changed {
            self.emit(EngineEvent::TaskChanged(*id));
        }
        if !report.is_empty() {
            self.last_report = report.clone();
        }
        report
    }

    fn auto_recalc(&mut self) {
        if !self.scheduler.is_blocked() {
            self.recalc(false);
        }
    }
}

/// First task whose calendar is missing from `calendars`.
pub(crate) fn dangling_calendar(
    tree: &TaskTree,
    calendars: &CalendarStore,
) -> Option<(TaskId, CalendarId)> {
    tree.iter().find_map(|task| {
        task.calendar
            .filter(|calendar| !calendars.contains(*calendar))
            .map(|calendar| (task.id, calendar))
    })
}

fn fmt_time(time: Option<NaiveDateTime>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn events_follow_structure_edits_and_passes() {
        let mut manager = TaskManager::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        manager.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let a = manager
            .insert_task(TaskId::ROOT, None, Task::with_hours("a", 8))
            .unwrap();
        let seen = events.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                EngineEvent::StructureChanged(StructureChange::Inserted {
                    task: a,
                    parent: TaskId::ROOT
                }),
                EngineEvent::TaskChanged(a),
            ]
        );
    }

    #[test]
    fn failed_edit_leaves_task_untouched() {
        let mut manager = TaskManager::new();
        let a = manager
            .insert_task(TaskId::ROOT, None, Task::with_hours("a", 8))
            .unwrap();
        let before = manager.task(a).unwrap().clone();
        assert!(manager.set_task_work(a, -5).is_err());
        assert!(manager.set_percent_complete(a, 101).is_err());
        assert_eq!(manager.task(a).unwrap(), &before);
        assert!(matches!(
            manager.set_task_work(TaskId::ROOT, 1),
            Err(crate::error::EngineError::Structural(StructuralError::RootImmutable))
        ));
    }

    #[test]
    fn dumps_show_tree_and_list() {
        let mut manager = TaskManager::new();
        let phase = manager
            .insert_task(TaskId::ROOT, None, Task::new("Phase", 0))
            .unwrap();
        manager
            .insert_task(phase, None, Task::with_hours("Build", 8))
            .unwrap();
        let tree = manager.dump_task_tree();
        assert!(tree.contains("[1] Phase"));
        assert!(tree.contains("  [2] Build"));
        let list = manager.dump_task_list();
        assert_eq!(list.lines().count(), 3);
        assert!(list.lines().nth(2).unwrap().starts_with("2\t1\tBuild\t8.00"));
    }
}
