use std::iter;

use chrono::NaiveDateTime;
use tracing::warn;

use super::{EarlyTimes, PassFailures, task_calendar};
use crate::calendar::{CalendarId, CalendarStore};
use crate::error::CalendarError;
use crate::graph::DependencyGraph;
use crate::task::{ConstraintKind, Task, TaskId};
use crate::tree::TaskTree;

#[derive(Debug, Default)]
pub struct ForwardResult {
    pub times: EarlyTimes,
    pub failures: PassFailures,
}

pub struct ForwardPass<'a> {
    tree: &'a TaskTree,
    graph: &'a DependencyGraph,
    calendars: &'a CalendarStore,
    project_start: NaiveDateTime,
}

impl<'a> ForwardPass<'a> {
    pub fn new(
        tree: &'a TaskTree,
        graph: &'a DependencyGraph,
        calendars: &'a CalendarStore,
        project_start: NaiveDateTime,
    ) -> Self {
        Self {
            tree,
            graph,
            calendars,
            project_start,
        }
    }

    /// Schedules `order` front to back.
    ///
    /// Tasks outside `order` contribute their stored schedule, so `order`
    /// only needs to hold the affected tasks.
    pub fn execute(&self, order: &[TaskId]) -> ForwardResult {
        let mut result = ForwardResult::default();
        for &id in order {
            let Some(task) = self.tree.get(id) else {
                continue;
            };
            match self.schedule_task(task, &result.times) {
                Ok(times) => {
                    result.times.insert(id, times);
                }
                Err(err) => {
                    warn!(task = %id, error = %err, "task left unscheduled");
                    result.failures.push((id, err));
                }
            }
        }
        result
    }

    fn early(&self, id: TaskId, times: &EarlyTimes) -> Option<(NaiveDateTime, NaiveDateTime)> {
        if let Some(found) = times.get(&id) {
            return Some(*found);
        }
        let task = self.tree.get(id)?;
        Some((task.start?, task.finish?))
    }

    fn schedule_task(
        &self,
        task: &Task,
        times: &EarlyTimes,
    ) -> Result<(NaiveDateTime, NaiveDateTime), CalendarError> {
        let calendar = task_calendar(task);

        if self.tree.has_children(task.id) {
            let envelope = self
                .tree
                .children(task.id)
                .iter()
                .filter_map(|child| self.early(*child, times))
                .reduce(|(s0, f0), (s1, f1)| (s0.min(s1), f0.max(f1)));
            if let Some(envelope) = envelope {
                return Ok(envelope);
            }
            let bound = self.start_bound(task, calendar, times)?;
            return Ok((bound, bound));
        }

        let span = task.span();
        let start = match (task.constraint.kind, task.constraint.time) {
            (ConstraintKind::MustStartOn, Some(time)) => time,
            _ => {
                let bound = self.start_bound(task, calendar, times)?;
                if span == 0 {
                    bound
                } else {
                    self.calendars.next_working_time(bound, calendar)?
                }
            }
        };
        let finish = self.calendars.add_duration(start, span, calendar)?;
        Ok((start, finish))
    }

    /// Latest of the project start, start constraints and dependency bounds
    /// of `task` and every ancestor.
    ///
    /// Finish-side bounds are converted to start bounds with `task`'s own span.
    fn start_bound(
        &self,
        task: &Task,
        calendar: CalendarId,
        times: &EarlyTimes,
    ) -> Result<NaiveDateTime, CalendarError> {
        let mut bound = self.project_start;
        for holder in iter::once(task.id).chain(self.tree.ancestors(task.id)) {
            let Some(node) = self.tree.get(holder) else {
                continue;
            };
            if let Some(earliest) = node.constraint.earliest_start() {
                bound = bound.max(earliest);
            }
            for dep in self.graph.predecessors(holder) {
                let Some((pred_start, pred_finish)) = self.early(dep.predecessor, times) else {
                    continue;
                };
                let anchor = if dep.relation.from_predecessor_start() {
                    pred_start
                } else {
                    pred_finish
                };
                let mut candidate = self.calendars.add_duration(anchor, dep.lag, calendar)?;
                // On an ancestor a finish-side relation bounds every leaf's
                // finish, so the rolled-up finish honours it too.
                if dep.relation.constrains_successor_finish() {
                    candidate = self
                        .calendars
                        .subtract_duration(candidate, task.span(), calendar)?;
                }
                bound = bound.max(candidate);
            }
        }
        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Dependency, RelationKind};
    use chrono::NaiveDate;

    fn dt(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn start_to_start_with_lag() {
        let mut tree = TaskTree::new();
        let a = tree.insert(TaskId::ROOT, None, Task::with_hours("a", 8)).unwrap();
        let b = tree.insert(TaskId::ROOT, None, Task::with_hours("b", 4)).unwrap();
        let mut graph = DependencyGraph::new();
        graph
            .add_dependency(&tree, Dependency::new(a, b, RelationKind::StartToStart, 2 * 3600))
            .unwrap();
        let calendars = CalendarStore::all_working(30);

        let result = ForwardPass::new(&tree, &graph, &calendars, dt(1, 9)).execute(&[a, b]);
        assert!(result.failures.is_empty());
        assert_eq!(result.times[&b], (dt(1, 11), dt(1, 15)));
    }

    #[test]
    fn finish_to_finish_backs_off_by_span() {
        let mut tree = TaskTree::new();
        let a = tree.insert(TaskId::ROOT, None, Task::with_hours("a", 16)).unwrap();
        let b = tree.insert(TaskId::ROOT, None, Task::with_hours("b", 4)).unwrap();
        let mut graph = DependencyGraph::new();
        graph
            .add_dependency(&tree, Dependency::new(a, b, RelationKind::FinishToFinish, 0))
            .unwrap();
        let calendars = CalendarStore::all_working(30);

        let result = ForwardPass::new(&tree, &graph, &calendars, dt(1, 9)).execute(&[a, b]);
        assert_eq!(result.times[&a].1, dt(2, 17));
        assert_eq!(result.times[&b], (dt(2, 13), dt(2, 17)));
    }

    #[test]
    fn must_start_on_ignores_predecessors() {
        let mut tree = TaskTree::new();
        let a = tree.insert(TaskId::ROOT, None, Task::with_hours("a", 16)).unwrap();
        let pinned = Task::with_hours("b", 1)
            .with_constraint(crate::task::Constraint::must_start_on(dt(1, 10)));
        let b = tree.insert(TaskId::ROOT, None, pinned).unwrap();
        let mut graph = DependencyGraph::new();
        graph
            .add_dependency(&tree, Dependency::finish_to_start(a, b))
            .unwrap();
        let calendars = CalendarStore::all_working(30);

        let result = ForwardPass::new(&tree, &graph, &calendars, dt(1, 9)).execute(&[a, b]);
        assert_eq!(result.times[&b], (dt(1, 10), dt(1, 11)));
    }

    #[test]
    fn children_inherit_summary_predecessors() {
        let mut tree = TaskTree::new();
        let a = tree.insert(TaskId::ROOT, None, Task::with_hours("a", 8)).unwrap();
        let s = tree.insert(TaskId::ROOT, None, Task::new("phase", 0)).unwrap();
        let s1 = tree.insert(s, None, Task::with_hours("s1", 8)).unwrap();
        let mut graph = DependencyGraph::new();
        graph
            .add_dependency(&tree, Dependency::finish_to_start(a, s))
            .unwrap();
        let calendars = CalendarStore::all_working(30);

        let result = ForwardPass::new(&tree, &graph, &calendars, dt(1, 9)).execute(&[a, s1, s]);
        assert_eq!(result.times[&s1], (dt(2, 9), dt(2, 17)));
        assert_eq!(result.times[&s], (dt(2, 9), dt(2, 17)));
    }
}
