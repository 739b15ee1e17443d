//! Tabular snapshot of the task list for views and reports.

use chrono::NaiveDateTime;
use polars::prelude::*;

use crate::manager::TaskManager;
use crate::task::TaskId;

fn millis(time: Option<NaiveDateTime>) -> Option<i64> {
    time.map(|t| t.and_utc().timestamp_millis())
}

fn datetime_column(name: &'static str, values: Vec<Option<i64>>) -> PolarsResult<Column> {
    let series = Series::new(PlSmallStr::from_static(name), values)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
    Ok(series.into())
}

/// One row per task in tree order.
///
/// Work and slack are shown in days of `hours_per_day` working hours.
pub fn task_table(manager: &TaskManager) -> PolarsResult<DataFrame> {
    let tree = manager.tree();
    let seconds_per_day = manager.config().seconds_per_day() as f64;
    let tasks = manager.get_all_tasks();

    let mut ids = Vec::with_capacity(tasks.len());
    let mut parents = Vec::with_capacity(tasks.len());
    let mut names = Vec::with_capacity(tasks.len());
    let mut depths = Vec::with_capacity(tasks.len());
    let mut work_days = Vec::with_capacity(tasks.len());
    let mut starts = Vec::with_capacity(tasks.len());
    let mut finishes = Vec::with_capacity(tasks.len());
    let mut late_finishes = Vec::with_capacity(tasks.len());
    let mut slack_days = Vec::with_capacity(tasks.len());
    let mut critical = Vec::with_capacity(tasks.len());

    for task in tasks {
        ids.push(task.id.0);
        parents.push(tree.parent(task.id).unwrap_or(TaskId::ROOT).0);
        names.push(task.name.clone());
        depths.push(tree.depth(task.id) as u32);
        work_days.push(task.effective_work() as f64 / seconds_per_day);
        starts.push(millis(task.start));
        finishes.push(millis(task.finish));
        late_finishes.push(millis(task.late_finish));
        slack_days.push(task.slack.map(|s| s as f64 / seconds_per_day));
        critical.push(task.critical);
    }

    DataFrame::new(vec![
        Series::new(PlSmallStr::from_static("id"), ids).into(),
        Series::new(PlSmallStr::from_static("parent"), parents).into(),
        Series::new(PlSmallStr::from_static("name"), names).into(),
        Series::new(PlSmallStr::from_static("depth"), depths).into(),
        Series::new(PlSmallStr::from_static("work_days"), work_days).into(),
        datetime_column("start", starts)?,
        datetime_column("finish", finishes)?,
        datetime_column("late_finish", late_finishes)?,
        Series::new(PlSmallStr::from_static("slack_days"), slack_days).into(),
        Series::new(PlSmallStr::from_static("critical"), critical).into(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    #[test]
    fn table_has_one_row_per_task() {
        let mut manager = TaskManager::new();
        let phase = manager
            .insert_task(TaskId::ROOT, None, Task::new("Phase", 0))
            .unwrap();
        manager
            .insert_task(phase, None, Task::with_hours("Build", 16))
            .unwrap();

        let df = task_table(&manager).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 10);
        let work = df.column("work_days").unwrap().f64().unwrap();
        assert_eq!(work.get(1), Some(2.0));
        let depth = df.column("depth").unwrap().u32().unwrap();
        assert_eq!(depth.get(1), Some(2));
        assert!(matches!(
            df.column("start").unwrap().dtype(),
            DataType::Datetime(TimeUnit::Milliseconds, None)
        ));
    }
}
