use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use maestro_core::MaestroError;
use maestro_events::{EventKind, ProgressEvent, TaskEvent};
use maestro_orchestrator::{Orchestrator, TaskSpec};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The orchestrator this surface fronts.
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the router: task creation, status, live updates, health.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { orchestrator };
    Router::new()
        .route("/tasks", post(create_task_handler))
        .route("/tasks/{id}", get(task_status_handler))
        .route("/tasks/{id}/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

fn error_response(err: MaestroError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match err {
        MaestroError::NotFound(_) => StatusCode::NOT_FOUND,
        MaestroError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({"error": err.to_string()})))
}

async fn create_task_handler(
    State(state): State<AppState>,
    Json(spec): Json<TaskSpec>,
) -> impl IntoResponse {
    match state.orchestrator.create_task(spec).await {
        Ok(receipt) => {
            // Execution starts in the background immediately; clients
            // follow along via the status and ws endpoints.
            let _handle = state.orchestrator.spawn_task(receipt.task_id);
            (StatusCode::ACCEPTED, Json(serde_json::json!(receipt))).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

async fn task_status_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.orchestrator.get_status(id).await {
        Ok(record) => Json(serde_json::json!({
            "task_id": record.task_id,
            "status": record.status,
            "progress": record.progress,
            "current_step": record.current_step,
            "result": record.result,
            "error": record.error,
            "created_at": record.created_at,
            "updated_at": record.updated_at,
            "completed_at": record.completed_at,
        }))
        .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.health().await {
        Ok(snapshot) => Json(serde_json::json!(snapshot)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn ws_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Reject unknown tasks before upgrading.
    match state.orchestrator.get_status(id).await {
        Ok(_) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, id))
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Name a task event for the wire envelope.
fn envelope_event(kind: TaskEvent) -> &'static str {
    match kind {
        TaskEvent::Created => "created",
        TaskEvent::Started => "started",
        TaskEvent::Progress => "progress",
        TaskEvent::Completed => "completed",
        TaskEvent::Failed => "failed",
        TaskEvent::Cancelled => "cancelled",
    }
}

fn envelope(event: &str, data: serde_json::Value) -> String {
    serde_json::json!({"event": event, "data": data}).to_string()
}

async fn handle_socket(mut socket: WebSocket, state: AppState, task_id: Uuid) {
    info!(task_id = %task_id, "Live-update subscriber connected");

    // Subscribe before the initial snapshot so no transition between
    // the two is lost; duplicates are harmless, gaps are not.
    let stream = state.orchestrator.subscribe(task_id);

    let initial = match state.orchestrator.get_status(task_id).await {
        Ok(record) => record,
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Task vanished before first snapshot");
            state.orchestrator.unsubscribe(stream.id());
            return;
        }
    };
    let terminal_already = initial.status.is_terminal();
    let snapshot = envelope(
        "snapshot",
        serde_json::json!({
            "status": initial.status,
            "progress": initial.progress,
            "current_step": initial.current_step,
            "error": initial.error,
        }),
    );
    if socket.send(WsMessage::Text(snapshot.into())).await.is_err() {
        state.orchestrator.unsubscribe(stream.id());
        return;
    }

    if !terminal_already {
        while let Some(event) = stream.recv().await {
            let Some(task_kind) = task_event_kind(&event) else {
                continue;
            };
            let text = envelope(envelope_event(task_kind), event.data.clone());
            if socket.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
            if matches!(
                task_kind,
                TaskEvent::Completed | TaskEvent::Failed | TaskEvent::Cancelled
            ) {
                break;
            }
        }
    }

    state.orchestrator.unsubscribe(stream.id());
    let _ = socket.send(WsMessage::Close(None)).await;
    info!(task_id = %task_id, "Live-update subscriber disconnected");
}

fn task_event_kind(event: &ProgressEvent) -> Option<TaskEvent> {
    match event.kind {
        EventKind::Task(kind) => Some(kind),
        _ => None,
    }
}
