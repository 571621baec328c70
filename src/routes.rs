use crate::{
    console::Console,
    constants::{LOG_LINES, LONG_POLL_MS},
    controller::{
        graph::GraphView,
        table::{Column, TableView, ViewMode},
        ConsoleError,
    },
    notice::Notice,
    scheduler::wire::{JobCommand, JobSummary, LogEnd, LogStream, RemoteTarget, SchedulerJob},
};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;

pub struct AppContext {
    pub console: Arc<Console>,
}

type Reply<T> = Result<Json<T>, ConsoleError>;

impl IntoResponse for ConsoleError {
    fn into_response(self) -> Response {
        let status = match self {
            ConsoleError::Validation(_) => StatusCode::BAD_REQUEST,
            ConsoleError::Busy(_) => StatusCode::CONFLICT,
            ConsoleError::NotReady | ConsoleError::LostContact => StatusCode::SERVICE_UNAVAILABLE,
            ConsoleError::Network(_)
            | ConsoleError::PartialMutation { .. }
            | ConsoleError::InvalidSnapshot(_) => StatusCode::BAD_GATEWAY,
        };
        let body = json!({
            "error": self.describe(),
            "kind": self.notice_kind(),
        });
        (status, Json(body)).into_response()
    }
}

pub fn router(console: Arc<Console>) -> Router {
    Router::new()
        .route("/healthcheck", get(|| async { "1" }))
        .route("/api/v1/job", get(handle_job))
        .route("/api/v1/jobs", get(handle_jobs))
        .route("/api/v1/job/command/:command", post(handle_command))
        .route("/api/v1/job/schedule", post(handle_schedule))
        .route("/api/v1/job/rename", post(handle_rename_job))
        .route("/api/v1/reload", post(handle_reload))
        .route("/api/v1/polling/pause", post(handle_pause_polling))
        .route("/api/v1/polling/resume", post(handle_resume_polling))
        .route("/api/v1/notices", get(handle_notices))
        .route("/api/v1/notices/next", get(handle_next_notice))
        .route("/api/v1/graph", get(handle_graph))
        .route("/api/v1/graph/changes", get(handle_graph_changes))
        .route("/api/v1/graph/gesture", post(handle_gesture))
        .route("/api/v1/graph/link", post(handle_add_link))
        .route("/api/v1/graph/link/delete", post(handle_delete_link))
        .route("/api/v1/graph/node/delete", post(handle_delete_node))
        .route("/api/v1/table", get(handle_table))
        .route("/api/v1/table/mode", post(handle_table_mode))
        .route("/api/v1/table/edit", post(handle_table_edit))
        .route("/api/v1/table/input", post(handle_table_input))
        .route("/api/v1/table/commit", post(handle_table_commit))
        .route("/api/v1/table/cancel", post(handle_table_cancel))
        .route("/api/v1/tasks", post(handle_add_task))
        .route("/api/v1/tasks/:name/log", get(handle_task_log))
        .with_state(Arc::new(AppContext { console }))
}

#[derive(Serialize)]
struct JobStatus {
    job_name: String,
    ready: bool,
    lost_contact: bool,
    blocked: bool,
    polling_paused: bool,
    graph_seeded: bool,
    generation: u64,
    job: Option<SchedulerJob>,
}

async fn handle_job(State(ctx): State<Arc<AppContext>>) -> Json<JobStatus> {
    let model = ctx.console.model();
    Json(JobStatus {
        job_name: model.job_name(),
        ready: model.is_ready(),
        lost_contact: model.is_lost_contact(),
        blocked: ctx.console.notices().is_blocked(),
        polling_paused: ctx.console.is_polling_paused(),
        graph_seeded: ctx.console.graph().is_seeded(),
        generation: model.generation(),
        job: model.snapshot().map(|j| (*j).clone()),
    })
}

async fn handle_jobs(State(ctx): State<Arc<AppContext>>) -> Reply<Vec<JobSummary>> {
    Ok(Json(ctx.console.list_jobs().await?))
}

async fn handle_command(
    State(ctx): State<Arc<AppContext>>,
    Path(command): Path<JobCommand>,
) -> Reply<JobStatus> {
    ctx.console.run_command(command).await?;
    Ok(handle_job(State(ctx)).await)
}

#[derive(Deserialize)]
struct SchedulePayload {
    #[serde(default)]
    cron: String,
}

async fn handle_schedule(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<SchedulePayload>,
) -> Reply<JobStatus> {
    ctx.console.schedule(&payload.cron).await?;
    Ok(handle_job(State(ctx)).await)
}

#[derive(Deserialize)]
struct RenamePayload {
    name: String,
}

async fn handle_rename_job(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<RenamePayload>,
) -> Reply<JobStatus> {
    ctx.console.rename_job(&payload.name).await?;
    Ok(handle_job(State(ctx)).await)
}

async fn handle_reload(State(ctx): State<Arc<AppContext>>) -> Reply<JobStatus> {
    ctx.console.reload().await?;
    Ok(handle_job(State(ctx)).await)
}

async fn handle_pause_polling(State(ctx): State<Arc<AppContext>>) -> StatusCode {
    ctx.console.pause_polling();
    StatusCode::NO_CONTENT
}

async fn handle_resume_polling(State(ctx): State<Arc<AppContext>>) -> StatusCode {
    ctx.console.resume_polling();
    StatusCode::NO_CONTENT
}

async fn handle_notices(State(ctx): State<Arc<AppContext>>) -> Json<Vec<Notice>> {
    Json(ctx.console.notices().active())
}

/// Waits for the next notice, or answers null after the long-poll window.
async fn handle_next_notice(State(ctx): State<Arc<AppContext>>) -> Json<Option<Notice>> {
    let mut notices = ctx.console.notices().subscribe();
    let next = timeout(Duration::from_millis(LONG_POLL_MS), async {
        loop {
            match notices.recv().await {
                Ok(notice) => return Some(notice),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await;
    Json(next.ok().flatten())
}

async fn handle_graph(State(ctx): State<Arc<AppContext>>) -> Json<GraphView> {
    Json(ctx.console.graph().view())
}

#[derive(Deserialize)]
struct ChangesQuery {
    #[serde(default)]
    after: u64,
}

/// Answers once the graph revision moves past `after`, or with the current
/// view when the long-poll window runs out.
async fn handle_graph_changes(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ChangesQuery>,
) -> Json<GraphView> {
    let graph = ctx.console.graph();
    if graph.revision() <= query.after {
        let mut revisions = graph.subscribe();
        let _ = timeout(Duration::from_millis(LONG_POLL_MS), async {
            loop {
                let current = *revisions.borrow_and_update();
                if current > query.after || revisions.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
    }
    Json(graph.view())
}

/// Pointer input from the graph canvas.
#[derive(Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Gesture {
    PressNode { id: String },
    PressLink { source: String, target: String },
    PressBackground,
    PointerMove { x: f64, y: f64 },
    ReleaseOnNode { id: String },
    Release,
    DeleteSelected,
    DragNode { id: String, x: f64, y: f64 },
    EndDrag { id: String },
}

async fn handle_gesture(
    State(ctx): State<Arc<AppContext>>,
    Json(gesture): Json<Gesture>,
) -> Reply<GraphView> {
    let graph = ctx.console.graph();
    match gesture {
        Gesture::PressNode { id } => graph.press_node(&id),
        Gesture::PressLink { source, target } => graph.press_link(&source, &target),
        Gesture::PressBackground => graph.press_background(),
        Gesture::PointerMove { x, y } => graph.pointer_move(x, y),
        Gesture::ReleaseOnNode { id } => {
            let candidate = graph.release_on_node(&id);
            ctx.console.commit_gesture(candidate).await?;
        }
        Gesture::Release => graph.release(),
        Gesture::DeleteSelected => ctx.console.delete_selected().await?,
        Gesture::DragNode { id, x, y } => graph.drag_node(&id, x, y),
        Gesture::EndDrag { id } => graph.end_drag(&id),
    }
    Ok(Json(ctx.console.graph().view()))
}

#[derive(Deserialize)]
struct LinkPayload {
    from: String,
    to: String,
}

async fn handle_add_link(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<LinkPayload>,
) -> Reply<GraphView> {
    ctx.console.add_dependency(&payload.from, &payload.to).await?;
    Ok(Json(ctx.console.graph().view()))
}

async fn handle_delete_link(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<LinkPayload>,
) -> Reply<GraphView> {
    ctx.console
        .delete_dependency(&payload.from, &payload.to)
        .await?;
    Ok(Json(ctx.console.graph().view()))
}

#[derive(Deserialize)]
struct NodePayload {
    name: String,
}

async fn handle_delete_node(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<NodePayload>,
) -> Reply<GraphView> {
    ctx.console.delete_task(&payload.name).await?;
    Ok(Json(ctx.console.graph().view()))
}

async fn handle_table(State(ctx): State<Arc<AppContext>>) -> Json<TableView> {
    Json(ctx.console.table().view())
}

#[derive(Deserialize)]
struct ModePayload {
    mode: ViewMode,
}

async fn handle_table_mode(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<ModePayload>,
) -> Json<TableView> {
    ctx.console.table().set_mode(payload.mode);
    Json(ctx.console.table().view())
}

#[derive(Deserialize)]
struct EditPayload {
    task: String,
    column: Column,
}

async fn handle_table_edit(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<EditPayload>,
) -> Reply<TableView> {
    ctx.console
        .table()
        .begin_edit(&payload.task, payload.column)?;
    Ok(Json(ctx.console.table().view()))
}

#[derive(Deserialize)]
struct InputPayload {
    input: String,
}

async fn handle_table_input(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<InputPayload>,
) -> Reply<TableView> {
    ctx.console.table().set_input(&payload.input)?;
    Ok(Json(ctx.console.table().view()))
}

async fn handle_table_commit(State(ctx): State<Arc<AppContext>>) -> Reply<TableView> {
    ctx.console.commit_edit().await?;
    Ok(Json(ctx.console.table().view()))
}

async fn handle_table_cancel(State(ctx): State<Arc<AppContext>>) -> Json<TableView> {
    ctx.console.table().cancel_edit();
    Json(ctx.console.table().view())
}

#[derive(Deserialize)]
struct AddTaskPayload {
    name: String,
    command: String,
    #[serde(default)]
    target: Option<RemoteTarget>,
}

async fn handle_add_task(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<AddTaskPayload>,
) -> Reply<GraphView> {
    ctx.console
        .add_task(&payload.name, &payload.command, payload.target)
        .await?;
    Ok(Json(ctx.console.graph().view()))
}

#[derive(Deserialize)]
struct LogQuery {
    #[serde(default = "default_log_end")]
    end: LogEnd,
    #[serde(default = "default_log_stream")]
    stream: LogStream,
    #[serde(default = "default_log_lines")]
    num_lines: u32,
}

fn default_log_end() -> LogEnd {
    LogEnd::Tail
}

fn default_log_stream() -> LogStream {
    LogStream::Stdout
}

fn default_log_lines() -> u32 {
    LOG_LINES
}

async fn handle_task_log(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
    Query(query): Query<LogQuery>,
) -> Reply<Vec<String>> {
    let lines = ctx
        .console
        .task_log(&name, query.end, query.stream, query.num_lines)
        .await?;
    Ok(Json(lines))
}
