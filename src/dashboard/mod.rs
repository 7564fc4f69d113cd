use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::TriggerConfig;
use crate::hub::HubHandle;
use crate::queue::{Job, JobStatus, JobTarget, UpdateQueue};
use crate::store::{StatusRecord, StatusStore};

pub mod webhook;

const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct DashboardState {
    pub queue: UpdateQueue,
    pub hub: HubHandle,
    pub statuses: Arc<dyn StatusStore>,
    pub triggers: Arc<TriggerConfig>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    queue_size: usize,
    observers: usize,
}

#[derive(Deserialize)]
struct UpdatesQuery {
    limit: Option<usize>,
    page: Option<usize>,
}

#[derive(Deserialize)]
struct RunPipelineRequest {
    owner_id: i64,
    #[serde(default)]
    requested_by: Option<String>,
}

#[derive(Deserialize, Default)]
struct RunHostRequest {
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    requested_by: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct TriggerResponse {
    success: bool,
    job_id: Option<i64>,
    error: Option<String>,
}

impl TriggerResponse {
    pub(crate) fn accepted(job_id: i64) -> (StatusCode, Json<Self>) {
        (
            StatusCode::ACCEPTED,
            Json(Self {
                success: true,
                job_id: Some(job_id),
                error: None,
            }),
        )
    }

    pub(crate) fn rejected(code: StatusCode, error: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            code,
            Json(Self {
                success: false,
                job_id: None,
                error: Some(error.into()),
            }),
        )
    }
}

/// Build the HTTP routes.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/pipeline/run/:id", post(run_pipeline_handler))
        .route("/server/run/:id", post(run_host_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/sse", get(sse_handler))
        .route("/api/updates", get(list_updates_handler))
        .route("/api/updates/:id", get(get_update_handler))
        .route("/github-webhook", post(webhook::github_webhook_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the dashboard until `shutdown` fires.
pub async fn run_dashboard(
    addr: SocketAddr,
    state: DashboardState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting dashboard server");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("Dashboard server stopped");
    Ok(())
}

async fn require_api_key(
    State(state): State<DashboardState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get("secretkey")
        .and_then(|v| v.to_str().ok());

    match (state.triggers.api_key.as_deref(), provided) {
        (Some(expected), Some(provided)) if expected == provided => next.run(request).await,
        _ => TriggerResponse::rejected(StatusCode::UNAUTHORIZED, "unauthorized").into_response(),
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn health_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        queue_size: state.queue.size(),
        observers: state.hub.observer_count().await,
    })
}

async fn sse_handler(
    State(state): State<DashboardState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let observer = state.hub.subscribe();
    tracing::debug!(observer = %observer.id(), "SSE client connected");

    let connected = tokio_stream::once(Ok::<_, Infallible>(Event::default().data("connected")));
    let updates = observer.map(|message| Ok(Event::default().event("update").data(message)));

    Sse::new(connected.chain(updates)).keep_alive(KeepAlive::default())
}

async fn list_updates_handler(
    State(state): State<DashboardState>,
    Query(query): Query<UpdatesQuery>,
) -> Result<Json<Vec<StatusRecord>>, (StatusCode, String)> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let page = query.page.unwrap_or(1).max(1);

    state
        .statuses
        .list_statuses(limit, (page - 1) * limit)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to list updates");
            (StatusCode::INTERNAL_SERVER_ERROR, "error getting updates".to_string())
        })
}

async fn get_update_handler(
    State(state): State<DashboardState>,
    Path(id): Path<i64>,
) -> Result<Json<StatusRecord>, (StatusCode, String)> {
    state
        .statuses
        .get_status(id)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
}

async fn run_pipeline_handler(
    State(state): State<DashboardState>,
    Path(pipeline_id): Path<i64>,
    Json(payload): Json<RunPipelineRequest>,
) -> impl IntoResponse {
    let requested_by = payload.requested_by.as_deref().unwrap_or("api");
    let target = JobTarget::Pipeline {
        pipeline_id,
        owner_id: payload.owner_id,
    };

    submit_job(
        &state,
        requested_by,
        &format!("pipeline-{}", pipeline_id),
        target,
    )
    .await
}

async fn run_host_handler(
    State(state): State<DashboardState>,
    Path(host_id): Path<i64>,
    payload: Option<Json<RunHostRequest>>,
) -> impl IntoResponse {
    let Json(payload) = payload.unwrap_or_default();
    let requested_by = payload.requested_by.as_deref().unwrap_or("api");
    let branch = payload
        .variant
        .clone()
        .unwrap_or_else(|| format!("host-{}", host_id));
    let target = JobTarget::Host {
        host_id,
        variant: payload.variant,
    };

    submit_job(&state, requested_by, &branch, target).await
}

/// Create a pending status record and enqueue the job that will update it.
pub(crate) async fn submit_job(
    state: &DashboardState,
    pusher: &str,
    branch: &str,
    target: JobTarget,
) -> (StatusCode, Json<TriggerResponse>) {
    let id = match state
        .statuses
        .create_status(pusher, branch, JobStatus::Pending, "in queue")
        .await
    {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create status record");
            return TriggerResponse::rejected(
                StatusCode::INTERNAL_SERVER_ERROR,
                "error creating update",
            );
        }
    };

    let job = Job::new(id, target);
    let description = job.target.to_string();
    if let Err(e) = state.queue.enqueue(job).await {
        tracing::error!(job_id = id, error = %e, "Failed to enqueue job");
        if let Err(e) = state
            .statuses
            .update_status(id, JobStatus::Error, &e.to_string())
            .await
        {
            tracing::error!(job_id = id, error = %e, "Failed to update job status");
        }
        return TriggerResponse::rejected(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
    }

    state
        .hub
        .broadcast(format!("Update {} queued for {}", id, description));
    TriggerResponse::accepted(id)
}
