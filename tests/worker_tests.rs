use task_engine::worker::{WorkerError, spawn};
use task_engine::{RelationKind, Task, TaskId, TaskManager};

#[test]
fn blocking_calls_run_in_order() {
    let (handle, thread) = spawn(TaskManager::new()).unwrap();

    let a = handle
        .call_blocking(|m| m.insert_task(TaskId::ROOT, None, Task::with_hours("a", 8)))
        .unwrap()
        .unwrap();
    let b = handle
        .call_blocking(|m| m.insert_task(TaskId::ROOT, None, Task::with_hours("b", 8)))
        .unwrap()
        .unwrap();
    handle
        .call_blocking(move |m| m.add_dependency(a, b, RelationKind::FinishToStart, 0))
        .unwrap()
        .unwrap();
    let path = handle.call_blocking(|m| m.critical_path()).unwrap();
    assert_eq!(path, vec![a, b]);

    drop(handle);
    let manager = thread.join().unwrap();
    assert_eq!(manager.get_all_tasks().len(), 2);
}

#[tokio::test]
async fn async_callers_share_one_engine() {
    let (handle, _thread) = spawn(TaskManager::new()).unwrap();

    let mut joins = Vec::new();
    for i in 0..8 {
        let handle = handle.clone();
        joins.push(tokio::spawn(async move {
            handle
                .call(move |m| m.insert_task(TaskId::ROOT, None, Task::with_hours(format!("t{i}"), 1)))
                .await
        }));
    }
    let mut ids = Vec::new();
    for join in joins {
        ids.push(join.await.unwrap().unwrap().unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    let count = handle.call(|m| m.get_all_tasks().len()).await.unwrap();
    assert_eq!(count, 8);
}

#[test]
fn panicking_command_stops_the_worker() {
    let (handle, thread) = spawn(TaskManager::new()).unwrap();
    let result: Result<(), WorkerError> = handle.call_blocking(|_| panic!("boom"));
    assert!(matches!(result, Err(WorkerError::Stopped)));
    assert!(thread.join().is_err());
    assert!(matches!(
        handle.call_blocking(|m| m.get_all_tasks().len()),
        Err(WorkerError::Stopped)
    ));
}
