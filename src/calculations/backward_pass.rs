use std::collections::HashMap;
use std::iter;

use chrono::NaiveDateTime;
use tracing::warn;

use super::{EarlyTimes, LateTimes, PassFailures, task_calendar};
use crate::calendar::{CalendarId, CalendarStore};
use crate::error::CalendarError;
use crate::graph::{Dependency, DependencyGraph};
use crate::task::{Task, TaskId};
use crate::tree::TaskTree;

#[derive(Debug, Default)]
pub struct BackwardResult {
    pub project_finish: Option<NaiveDateTime>,
    pub late: HashMap<TaskId, LateTimes>,
    pub failures: PassFailures,
}

pub struct BackwardPass<'a> {
    tree: &'a TaskTree,
    graph: &'a DependencyGraph,
    calendars: &'a CalendarStore,
}

impl<'a> BackwardPass<'a> {
    pub fn new(tree: &'a TaskTree, graph: &'a DependencyGraph, calendars: &'a CalendarStore) -> Self {
        Self {
            tree,
            graph,
            calendars,
        }
    }

    /// Walks `order` (a full topological order) back to front.
    pub fn execute(&self, order: &[TaskId], early: &EarlyTimes) -> BackwardResult {
        let mut result = BackwardResult {
            project_finish: early.values().map(|(_, finish)| *finish).max(),
            ..BackwardResult::default()
        };
        let Some(project_finish) = result.project_finish else {
            return result;
        };

        for &id in order.iter().rev() {
            let (Some(task), Some(&(start, finish))) = (self.tree.get(id), early.get(&id)) else {
                continue;
            };
            match self.late_times(task, start, finish, project_finish, &result.late) {
                Ok(late) => {
                    result.late.insert(id, late);
                }
                Err(err) => {
                    warn!(task = %id, error = %err, "late dates unavailable");
                    result.failures.push((id, err));
                }
            }
        }

        // Children precede their parent in `order`.
        for &id in order {
            if !self.tree.has_children(id) {
                continue;
            }
            let earliest_child = self
                .tree
                .children(id)
                .iter()
                .filter_map(|child| result.late.get(child).map(|late| late.late_start))
                .min();
            if let (Some(late_start), Some(late)) = (earliest_child, result.late.get_mut(&id)) {
                late.late_start = late_start;
            }
        }

        result
    }

    fn late_times(
        &self,
        task: &Task,
        start: NaiveDateTime,
        finish: NaiveDateTime,
        project_finish: NaiveDateTime,
        late: &HashMap<TaskId, LateTimes>,
    ) -> Result<LateTimes, CalendarError> {
        let calendar = task_calendar(task);
        let span = if self.tree.has_children(task.id) {
            self.calendars.duration_between(start, finish, calendar)?
        } else {
            task.span()
        };

        let mut late_finish = project_finish;
        if let Some(deadline) = task.constraint.latest_finish() {
            late_finish = late_finish.min(deadline);
        }
        if let Some(parent) = self.tree.parent(task.id).filter(|p| *p != TaskId::ROOT) {
            if let Some(parent_late) = late.get(&parent) {
                late_finish = late_finish.min(parent_late.late_finish);
            }
        }
        for dep in self.graph.successors(task.id) {
            if let Some(bound) = self.successor_bound(dep, span, calendar, late)? {
                late_finish = late_finish.min(bound);
            }
        }

        let late_start = self.calendars.subtract_duration(late_finish, span, calendar)?;
        let slack = if finish <= late_finish {
            self.calendars.duration_between(finish, late_finish, calendar)?
        } else {
            -self.calendars.duration_between(late_finish, finish, calendar)?
        };
        Ok(LateTimes {
            late_start,
            late_finish,
            slack,
        })
    }

    /// Latest finish `dep` allows its predecessor, or `None` when the
    /// successor side has no late dates yet.
    fn successor_bound(
        &self,
        dep: &Dependency,
        span: i64,
        calendar: CalendarId,
        late: &HashMap<TaskId, LateTimes>,
    ) -> Result<Option<NaiveDateTime>, CalendarError> {
        let finish_side = dep.relation.constrains_successor_finish();
        let targets: Vec<TaskId> = if finish_side {
            vec![dep.successor]
        } else {
            iter::once(dep.successor)
                .chain(self.tree.descendants(dep.successor))
                .collect()
        };

        let mut bound: Option<NaiveDateTime> = None;
        for target in targets {
            let Some(target_late) = late.get(&target) else {
                continue;
            };
            let target_calendar = self.tree.get(target).map_or(calendar, task_calendar);
            let driving = if finish_side {
                target_late.late_finish
            } else {
                target_late.late_start
            };
            let anchor = self
                .calendars
                .subtract_duration(driving, dep.lag, target_calendar)?;
            let candidate = if dep.relation.from_predecessor_start() {
                self.calendars.add_duration(anchor, span, calendar)?
            } else {
                anchor
            };
            bound = Some(bound.map_or(candidate, |b| b.min(candidate)));
        }
        Ok(bound)
    }
}
