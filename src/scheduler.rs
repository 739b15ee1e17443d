use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::calculations::backward_pass::BackwardPass;
use crate::calculations::forward_pass::ForwardPass;
use crate::calculations::{EarlyTimes, task_calendar};
use crate::calendar::CalendarStore;
use crate::error::{CalendarError, StructuralError};
use crate::graph::{DependencyGraph, OrderingGraph};
use crate::task::{ScheduleState, TaskId};
use crate::tree::TaskTree;

/// Outcome of one recalculation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecalcReport {
    /// Tasks the forward pass visited, in scheduling order.
    pub recomputed: Vec<TaskId>,
    /// Tasks whose start, finish or slack changed, in tree order.
    pub changed: Vec<TaskId>,
    pub failures: Vec<(TaskId, CalendarError)>,
    pub project_finish: Option<NaiveDateTime>,
}

impl RecalcReport {
    pub fn is_empty(&self) -> bool {
        self.recomputed.is_empty() && self.changed.is_empty() && self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub task_count: usize,
    pub critical_count: usize,
    pub critical_path: Vec<TaskId>,
    pub project_start: NaiveDateTime,
    pub project_finish: Option<NaiveDateTime>,
}

impl ScheduleSummary {
    pub fn to_cli_summary(&self) -> String {
        let mut parts = Vec::new();
        parts.push(format!("tasks={}", self.task_count));
        parts.push(format!("critical={}", self.critical_count));
        parts.push(format!("start={}", self.project_start.format("%Y-%m-%d %H:%M")));
        if let Some(finish) = self.project_finish {
            parts.push(format!("finish={}", finish.format("%Y-%m-%d %H:%M")));
        }
        if !self.critical_path.is_empty() {
            let chain = self
                .critical_path
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("->");
            parts.push(format!("crit_path={}", chain));
        }
        parts.join(", ")
    }
}

/// Work booked inside a reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskWork {
    pub id: TaskId,
    pub name: String,
    pub work: i64,
}

/// Dirty tracking and pass orchestration.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    dirty: BTreeSet<TaskId>,
    blocked: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Returns the previous value.
    pub fn set_blocked(&mut self, blocked: bool) -> bool {
        std::mem::replace(&mut self.blocked, blocked)
    }

    pub fn dirty(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.dirty.iter().copied()
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn mark_dirty(&mut self, tree: &mut TaskTree, id: TaskId) {
        if id == TaskId::ROOT {
            return;
        }
        if let Some(task) = tree.get_mut(id) {
            task.state = ScheduleState::Dirty;
            self.dirty.insert(id);
        }
    }

    pub fn mark_subtree_dirty(&mut self, tree: &mut TaskTree, id: TaskId) {
        self.mark_dirty(tree, id);
        for descendant in tree.descendants(id) {
            self.mark_dirty(tree, descendant);
        }
    }

    pub fn mark_all_dirty(&mut self, tree: &mut TaskTree) {
        let ids: Vec<TaskId> = tree.order().to_vec();
        for id in ids {
            self.mark_dirty(tree, id);
        }
    }

    /// Drops ids that no longer exist.
    pub fn forget(&mut self, ids: &[TaskId]) {
        for id in ids {
            self.dirty.remove(id);
        }
    }

    pub fn clear(&mut self) {
        self.dirty.clear();
    }

    /// Recomputes the dirty tasks and everything downstream of them.
    ///
    /// While blocked, and unless `force` is set, dirtiness is kept and an
    /// empty report is returned.
    pub fn recalc(
        &mut self,
        tree: &mut TaskTree,
        graph: &DependencyGraph,
        calendars: &CalendarStore,
        project_start: NaiveDateTime,
        force: bool,
    ) -> RecalcReport {
        if self.blocked && !force {
            debug!(dirty = self.dirty.len(), "recalc deferred while blocked");
            return RecalcReport::default();
        }
        if self.dirty.is_empty() {
            return RecalcReport::default();
        }

        let ordering = OrderingGraph::build(tree, graph.edges());
        let affected = ordering.downstream(self.dirty.iter().copied());
        let (Some(order), Some(full)) = (ordering.topological_order(&affected), ordering.full_order())
        else {
            error!("ordering graph is cyclic; recalc skipped");
            return RecalcReport::default();
        };
        debug!(
            dirty = self.dirty.len(),
            affected = order.len(),
            "recalc pass"
        );

        let forward = ForwardPass::new(tree, graph, calendars, project_start).execute(&order);
        let mut early: EarlyTimes = tree
            .iter()
            .filter_map(|task| Some((task.id, (task.start?, task.finish?))))
            .collect();
        early.extend(forward.times.iter().map(|(id, times)| (*id, *times)));
        let backward = BackwardPass::new(tree, graph, calendars).execute(&full, &early);

        let mut changed = Vec::new();
        for &id in &full {
            let Some(task) = tree.get_mut(id) else {
                continue;
            };
            let before = task.schedule_fingerprint();
            if let Some(&(start, finish)) = forward.times.get(&id) {
                task.start = Some(start);
                task.finish = Some(finish);
                task.state = ScheduleState::Scheduled;
            } else {
                task.state = ScheduleState::Clean;
            }
            if let Some(late) = backward.late.get(&id) {
                task.late_start = Some(late.late_start);
                task.late_finish = Some(late.late_finish);
                task.slack = Some(late.slack);
                task.critical = late.slack <= 0;
            }
            if before != task.schedule_fingerprint() {
                changed.push(id);
            }
        }

        self.dirty.clear();
        let unscheduled: HashSet<TaskId> = forward.failures.iter().map(|(id, _)| *id).collect();
        let mut failures = forward.failures;
        failures.extend(
            backward
                .failures
                .into_iter()
                .filter(|(id, _)| !unscheduled.contains(id)),
        );
        RecalcReport {
            recomputed: order,
            changed,
            failures,
            project_finish: backward.project_finish,
        }
    }
}

/// Working seconds of `id` inside `[window_start, window_end)`, scaled by its
/// allocation. Summary tasks sum their leaves.
pub fn calculate_task_work(
    tree: &TaskTree,
    calendars: &CalendarStore,
    id: TaskId,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
) -> Result<i64, WorkError> {
    tree.task(id)?;
    let mut total = 0i64;
    for leaf in leaves(tree, id) {
        let Some(task) = tree.get(leaf) else {
            continue;
        };
        let (Some(start), Some(finish)) = (task.start, task.finish) else {
            continue;
        };
        let seconds = calendars.duration_between(
            start.max(window_start),
            finish.min(window_end),
            task_calendar(task),
        )?;
        total += (seconds as f64 * task.allocation_factor()).round() as i64;
    }
    Ok(total)
}

/// Working seconds covered by the union of the leaf intervals under `id`,
/// clipped to the window.
pub fn calculate_summary_duration(
    tree: &TaskTree,
    calendars: &CalendarStore,
    id: TaskId,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
) -> Result<i64, WorkError> {
    let calendar = task_calendar(tree.task(id)?);
    let mut spans: Vec<(NaiveDateTime, NaiveDateTime)> = leaves(tree, id)
        .into_iter()
        .filter_map(|leaf| {
            let task = tree.get(leaf)?;
            let start = task.start?.max(window_start);
            let finish = task.finish?.min(window_end);
            (finish > start).then_some((start, finish))
        })
        .collect();
    spans.sort();

    let mut merged: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::with_capacity(spans.len());
    for (start, finish) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(finish),
            _ => merged.push((start, finish)),
        }
    }

    let mut total = 0;
    for (start, finish) in merged {
        total += calendars.duration_between(start, finish, calendar)?;
    }
    Ok(total)
}

/// Per-task window work for every task, computed in parallel.
pub fn work_report(
    tree: &TaskTree,
    calendars: &CalendarStore,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
) -> Result<Vec<TaskWork>, WorkError> {
    tree.order()
        .par_iter()
        .filter(|id| **id != TaskId::ROOT)
        .map(|&id| {
            let work = calculate_task_work(tree, calendars, id, window_start, window_end)?;
            let name = tree.task(id)?.name.clone();
            Ok(TaskWork { id, name, work })
        })
        .collect()
}

/// Critical leaf tasks ordered by start.
pub fn critical_path(tree: &TaskTree) -> Vec<TaskId> {
    let mut critical: Vec<(Option<NaiveDateTime>, usize, TaskId)> = tree
        .iter()
        .filter(|task| task.id != TaskId::ROOT && task.critical && !tree.has_children(task.id))
        .map(|task| (task.start, tree.rank(task.id).unwrap_or(usize::MAX), task.id))
        .collect();
    critical.sort();
    critical.into_iter().map(|(_, _, id)| id).collect()
}

pub fn summarize(tree: &TaskTree, project_start: NaiveDateTime) -> ScheduleSummary {
    let tasks: Vec<_> = tree.iter().filter(|task| task.id != TaskId::ROOT).collect();
    ScheduleSummary {
        task_count: tasks.len(),
        critical_count: tasks.iter().filter(|task| task.critical).count(),
        critical_path: critical_path(tree),
        project_start,
        project_finish: tasks.iter().filter_map(|task| task.finish).max(),
    }
}

fn leaves(tree: &TaskTree, id: TaskId) -> Vec<TaskId> {
    if !tree.has_children(id) {
        return vec![id];
    }
    tree.descendants(id)
        .into_iter()
        .filter(|d| !tree.has_children(*d))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

impl From<WorkError> for crate::error::EngineError {
    fn from(value: WorkError) -> Self {
        match value {
            WorkError::Structural(err) => err.into(),
            WorkError::Calendar(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Dependency;
    use crate::resource::Assignment;
    use crate::task::Task;
    use chrono::NaiveDate;

    fn dt(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn setup() -> (TaskTree, DependencyGraph, CalendarStore, Scheduler, [TaskId; 3]) {
        let mut tree = TaskTree::new();
        let a = tree.insert(TaskId::ROOT, None, Task::with_hours("a", 8)).unwrap();
        let b = tree.insert(TaskId::ROOT, None, Task::with_hours("b", 8)).unwrap();
        let c = tree.insert(TaskId::ROOT, None, Task::with_hours("c", 4)).unwrap();
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&tree, Dependency::finish_to_start(a, b)).unwrap();
        let mut scheduler = Scheduler::new();
        scheduler.mark_all_dirty(&mut tree);
        (tree, graph, CalendarStore::all_working(30), scheduler, [a, b, c])
    }

    #[test]
    fn second_recalc_is_a_no_op() {
        let (mut tree, graph, calendars, mut scheduler, [a, b, c]) = setup();
        let first = scheduler.recalc(&mut tree, &graph, &calendars, dt(1, 9), false);
        assert_eq!(first.changed, vec![a, b, c]);
        assert_eq!(tree.get(b).unwrap().state, ScheduleState::Scheduled);

        scheduler.mark_dirty(&mut tree, c);
        let second = scheduler.recalc(&mut tree, &graph, &calendars, dt(1, 9), false);
        assert_eq!(second.recomputed, vec![c]);
        assert!(second.changed.is_empty());
        assert_eq!(tree.get(b).unwrap().state, ScheduleState::Clean);
    }

    #[test]
    fn blocked_recalc_keeps_dirty_set() {
        let (mut tree, graph, calendars, mut scheduler, _) = setup();
        scheduler.set_blocked(true);
        let report = scheduler.recalc(&mut tree, &graph, &calendars, dt(1, 9), false);
        assert!(report.is_empty());
        assert!(scheduler.has_dirty());

        let forced = scheduler.recalc(&mut tree, &graph, &calendars, dt(1, 9), true);
        assert_eq!(forced.recomputed.len(), 3);
        assert!(!scheduler.has_dirty());
    }

    #[test]
    fn work_and_summary_duration_in_window() {
        let (mut tree, graph, calendars, mut scheduler, [a, _, _]) = setup();
        let phase = tree.insert(TaskId::ROOT, None, Task::new("phase", 0)).unwrap();
        let x = tree
            .insert(
                phase,
                None,
                Task::with_hours("x", 8).with_assignments(vec![Assignment::new("ann", 50)]),
            )
            .unwrap();
        let y = tree.insert(phase, None, Task::with_hours("y", 4)).unwrap();
        scheduler.mark_all_dirty(&mut tree);
        scheduler.recalc(&mut tree, &graph, &calendars, dt(1, 9), false);

        // x spans two days at half allocation, y overlaps its first morning.
        assert_eq!(tree.get(x).unwrap().finish, Some(dt(2, 17)));
        assert_eq!(
            calculate_task_work(&tree, &calendars, x, dt(1, 0), dt(2, 0)).unwrap(),
            4 * 3600
        );
        assert_eq!(
            calculate_task_work(&tree, &calendars, y, dt(1, 0), dt(9, 0)).unwrap(),
            4 * 3600
        );
        assert_eq!(
            calculate_summary_duration(&tree, &calendars, phase, dt(1, 0), dt(9, 0)).unwrap(),
            16 * 3600
        );
        assert_eq!(
            calculate_task_work(&tree, &calendars, phase, dt(1, 0), dt(9, 0)).unwrap(),
            12 * 3600
        );

        let report = work_report(&tree, &calendars, dt(1, 0), dt(2, 0)).unwrap();
        assert_eq!(report[0].id, a);
        assert_eq!(report[0].work, 8 * 3600);
    }

    #[test]
    fn summary_lists_critical_chain() {
        let (mut tree, graph, calendars, mut scheduler, [a, b, _]) = setup();
        scheduler.recalc(&mut tree, &graph, &calendars, dt(1, 9), false);
        let summary = summarize(&tree, dt(1, 9));
        assert_eq!(summary.critical_path, vec![a, b]);
        assert_eq!(summary.project_finish, Some(dt(2, 17)));
        assert!(summary.to_cli_summary().contains(&format!("crit_path={a}->{b}")));
    }
}
