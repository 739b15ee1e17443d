use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{EngineError, StructuralError};
use crate::graph::{Dependency, RelationKind};
use crate::manager::{EngineEvent, TaskManager};
use crate::resource::Assignment;
use crate::scheduler::{RecalcReport, ScheduleSummary};
use crate::task::{Constraint, Task, TaskId};
use crate::worker::{self, EngineHandle, WorkerError};

#[derive(Clone)]
pub struct AppState {
    engine: EngineHandle,
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl AppState {
    /// Starts the engine worker; notifications are buffered for `GET /events`.
    pub fn new(mut manager: TaskManager) -> Result<Self, WorkerError> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        manager.subscribe(move |event| sink.lock().push(event.clone()));
        let (engine, _thread) = worker::spawn(manager)?;
        Ok(Self { engine, events })
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    Conflict(String),
    Invalid(String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(value: EngineError) -> Self {
        let message = value.to_string();
        match value {
            EngineError::Structural(StructuralError::UnknownTask(_)) => ApiError::NotFound(message),
            EngineError::Structural(_) => ApiError::Conflict(message),
            EngineError::Validation(_) | EngineError::Calendar(_) => ApiError::Invalid(message),
        }
    }
}

impl From<WorkerError> for ApiError {
    fn from(value: WorkerError) -> Self {
        ApiError::Internal(value.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, "conflict", message),
            ApiError::Invalid(message) => (StatusCode::BAD_REQUEST, "invalid_request", message),
            ApiError::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
            }
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct CreateTaskPayload {
    #[serde(default)]
    parent: Option<TaskId>,
    #[serde(default)]
    position: Option<usize>,
    name: String,
    #[serde(default)]
    work_hours: f64,
    #[serde(default)]
    duration_hours: Option<f64>,
    #[serde(default)]
    constraint: Option<Constraint>,
    #[serde(default)]
    assignments: Vec<Assignment>,
}

impl CreateTaskPayload {
    fn into_task(self) -> Task {
        let mut task = match self.duration_hours {
            Some(hours) => Task::fixed_duration(self.name, hours_to_seconds(hours)),
            None => Task::new(self.name, hours_to_seconds(self.work_hours)),
        };
        if let Some(constraint) = self.constraint {
            task.constraint = constraint;
        }
        task.with_assignments(self.assignments)
    }
}

#[derive(Debug, Deserialize)]
struct MovePayload {
    parent: TaskId,
    #[serde(default)]
    sibling: Option<TaskId>,
    #[serde(default)]
    before: bool,
}

#[derive(Debug, Deserialize)]
struct DependencyPayload {
    predecessor: TaskId,
    successor: TaskId,
    #[serde(default)]
    relation: RelationKind,
    #[serde(default)]
    lag_hours: f64,
}

#[derive(Debug, Deserialize)]
struct UnlinkPayload {
    predecessor: TaskId,
    successor: TaskId,
}

#[derive(Debug, Deserialize)]
struct BlockPayload {
    block: bool,
}

#[derive(Debug, Serialize)]
struct FailureView {
    task: TaskId,
    message: String,
}

#[derive(Debug, Serialize)]
struct RecalcView {
    recomputed: Vec<TaskId>,
    changed: Vec<TaskId>,
    failures: Vec<FailureView>,
    project_finish: Option<NaiveDateTime>,
}

impl From<RecalcReport> for RecalcView {
    fn from(report: RecalcReport) -> Self {
        Self {
            recomputed: report.recomputed,
            changed: report.changed,
            failures: report
                .failures
                .into_iter()
                .map(|(task, err)| FailureView {
                    task,
                    message: err.to_string(),
                })
                .collect(),
            project_finish: report.project_finish,
        }
    }
}

fn hours_to_seconds(hours: f64) -> i64 {
    (hours * 3600.0).round() as i64
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:id", get(get_task).delete(delete_task))
        .route("/tasks/:id/move", post(move_task))
        .route(
            "/dependencies",
            post(add_dependency).delete(remove_dependency),
        )
        .route("/recalc", post(recalc))
        .route("/block", post(block_scheduling))
        .route("/dump", get(dump))
        .route("/events", get(drain_events))
        .route("/summary", get(summary))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, manager: TaskManager) -> std::io::Result<()> {
    let state = AppState::new(manager).map_err(std::io::Error::other)?;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_tasks(State(state): State<AppState>) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = state
        .engine
        .call(|manager| manager.get_all_tasks().into_iter().cloned().collect())
        .await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Task>, ApiError> {
    let task = state
        .engine
        .call(move |manager| manager.task(TaskId(id)).cloned())
        .await??;
    Ok(Json(task))
}

async fn create_task(
    State(state): State<AppState>,
    Json(payload): Json<CreateTaskPayload>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let parent = payload.parent.unwrap_or(TaskId::ROOT);
    let position = payload.position;
    let task = payload.into_task();
    let created = state
        .engine
        .call(move |manager| {
            let id = manager.insert_task(parent, position, task)?;
            manager.task(id).cloned()
        })
        .await??;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state
        .engine
        .call(move |manager| manager.remove_task(TaskId(id)))
        .await??;
    Ok(Json(json!({ "removed": removed })))
}

async fn move_task(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(payload): Json<MovePayload>,
) -> Result<Json<Task>, ApiError> {
    let moved = state
        .engine
        .call(move |manager| {
            let id = TaskId(id);
            manager.move_task(id, payload.parent, payload.sibling, payload.before)?;
            manager.task(id).cloned()
        })
        .await??;
    Ok(Json(moved))
}

async fn add_dependency(
    State(state): State<AppState>,
    Json(payload): Json<DependencyPayload>,
) -> Result<(StatusCode, Json<Dependency>), ApiError> {
    let dependency = Dependency::new(
        payload.predecessor,
        payload.successor,
        payload.relation,
        hours_to_seconds(payload.lag_hours),
    );
    state
        .engine
        .call(move |manager| {
            manager.add_dependency(
                dependency.predecessor,
                dependency.successor,
                dependency.relation,
                dependency.lag,
            )
        })
        .await??;
    Ok((StatusCode::CREATED, Json(dependency)))
}

async fn remove_dependency(
    State(state): State<AppState>,
    Json(payload): Json<UnlinkPayload>,
) -> Result<Json<Dependency>, ApiError> {
    let removed = state
        .engine
        .call(move |manager| manager.remove_dependency(payload.predecessor, payload.successor))
        .await??;
    Ok(Json(removed))
}

async fn recalc(State(state): State<AppState>) -> Result<Json<RecalcView>, ApiError> {
    let report = state.engine.call(|manager| manager.recalc(true)).await?;
    Ok(Json(report.into()))
}

async fn block_scheduling(
    State(state): State<AppState>,
    Json(payload): Json<BlockPayload>,
) -> Result<Json<RecalcView>, ApiError> {
    let report = state
        .engine
        .call(move |manager| manager.set_block_scheduling(payload.block))
        .await?;
    Ok(Json(report.into()))
}

async fn dump(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let (tree, list) = state
        .engine
        .call(|manager| (manager.dump_task_tree(), manager.dump_task_list()))
        .await?;
    Ok(Json(json!({ "tree": tree, "list": list })))
}

async fn drain_events(State(state): State<AppState>) -> Json<Vec<EngineEvent>> {
    let drained = std::mem::take(&mut *state.events.lock());
    Json(drained)
}

async fn summary(State(state): State<AppState>) -> Result<Json<ScheduleSummary>, ApiError> {
    let summary = state.engine.call(|manager| manager.summary()).await?;
    Ok(Json(summary))
}
