use std::collections::HashSet;

use crate::error::ValidationError;
use crate::task::Task;

pub fn validate_task(task: &Task) -> Result<(), ValidationError> {
    if task.work < 0 {
        return Err(ValidationError::NegativeWork {
            task: task.id,
            work: task.work,
        });
    }

    if task.duration < 0 {
        return Err(ValidationError::NegativeDuration {
            task: task.id,
            duration: task.duration,
        });
    }

    if task.percent_complete > 100 {
        return Err(ValidationError::PercentComplete {
            task: task.id,
            percent: task.percent_complete,
        });
    }

    let constraint = task.constraint;
    match (constraint.kind.needs_time(), constraint.time) {
        (true, None) => {
            return Err(ValidationError::MissingConstraintTime {
                task: task.id,
                kind: constraint.kind.as_str(),
            });
        }
        (false, Some(_)) => {
            return Err(ValidationError::UnexpectedConstraintTime { task: task.id });
        }
        _ => {}
    }

    for (idx, assignment) in task.assignments.iter().enumerate() {
        if assignment.resource_id.trim().is_empty() {
            return Err(ValidationError::EmptyResource {
                task: task.id,
                index: idx,
            });
        }
        if assignment.units == 0 {
            return Err(ValidationError::AllocationUnits {
                task: task.id,
                resource: assignment.resource_id.clone(),
                units: assignment.units,
            });
        }
    }

    Ok(())
}

pub fn validate_task_collection<'a, I>(tasks: I) -> Result<(), ValidationError>
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut seen_ids = HashSet::new();
    for task in tasks {
        if !seen_ids.insert(task.id) {
            return Err(ValidationError::DuplicateId(task.id));
        }
        validate_task(task)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Assignment;
    use crate::task::{Constraint, ConstraintKind, TaskId};

    #[test]
    fn rejects_negative_work() {
        let task = Task::new("Bad", -1);
        assert!(matches!(
            validate_task(&task),
            Err(ValidationError::NegativeWork { work: -1, .. })
        ));
    }

    #[test]
    fn rejects_constraint_without_time() {
        let mut task = Task::new("Pinned", 3600);
        task.constraint = Constraint {
            kind: ConstraintKind::MustStartOn,
            time: None,
        };
        assert!(matches!(
            validate_task(&task),
            Err(ValidationError::MissingConstraintTime { .. })
        ));
    }

    #[test]
    fn rejects_zero_units_and_duplicates() {
        let task = Task::new("Staffed", 3600).with_assignments(vec![Assignment::new("bob", 0)]);
        assert!(matches!(
            validate_task(&task),
            Err(ValidationError::AllocationUnits { units: 0, .. })
        ));

        let mut a = Task::new("A", 0);
        a.id = TaskId(3);
        let b = a.clone();
        assert_eq!(
            validate_task_collection([&a, &b]),
            Err(ValidationError::DuplicateId(TaskId(3)))
        );
    }

    #[test]
    fn rejects_percent_over_hundred() {
        let mut task = Task::new("Done?", 0);
        task.percent_complete = 120;
        assert!(validate_task(&task).is_err());
    }
}
