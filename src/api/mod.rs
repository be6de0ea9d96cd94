//! HTTP surface of the cluster manager
//!
//! Routes:
//! - `POST /clusters`, `GET /clusters`, `GET|DELETE /clusters/{id}`
//! - `POST /clusters/{id}/resize`
//! - `GET /clusters/{id}/tasks?pageSize=&pageLink=&state=`
//! - `GET /tasks?pageLink=`, `GET /tasks/{id}`

mod error;

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, Level};

pub use error::{ApiError, ErrorBody};

use crate::cluster::ClusterManager;
use crate::error::NexaError;
use crate::types::{Cluster, ClusterCreateSpec, ClusterResizeSpec, ResourceList, Task, TaskState};

/// Path prefix of page links handed to clients
pub const PAGE_LINK_PREFIX: &str = "/tasks?pageLink=";

type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ClusterManager>,
    /// Absolute prefix of task self links, e.g. `http://host:9000`
    pub base_url: Arc<str>,
}

impl AppState {
    pub fn new(manager: Arc<ClusterManager>, base_url: &str) -> Self {
        Self {
            manager,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        }
    }

    fn self_link(&self, task_id: &str) -> String {
        format!("{}/tasks/{}", self.base_url, task_id)
    }

    fn with_link(&self, mut task: Task) -> Task {
        task.self_link = Some(self.self_link(&task.id));
        task
    }

    fn task_page(&self, page: ResourceList<Task>) -> ResourceList<Task> {
        let page = page.map_links(|token| format!("{}{}", PAGE_LINK_PREFIX, token));
        ResourceList {
            items: page.items.into_iter().map(|t| self.with_link(t)).collect(),
            ..page
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterResponse {
    pub cluster: Cluster,
    pub task: Task,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    pub page_size: Option<usize>,
    pub page_link: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page_link: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/clusters", post(create_cluster).get(list_clusters))
        .route("/clusters/{id}", get(get_cluster).delete(delete_cluster))
        .route("/clusters/{id}/resize", post(resize_cluster))
        .route("/clusters/{id}/tasks", get(list_cluster_tasks))
        .route("/tasks", get(get_task_page))
        .route("/tasks/{id}", get(get_task))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

async fn create_cluster(
    State(state): State<AppState>,
    payload: Result<Json<ClusterCreateSpec>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreateClusterResponse>)> {
    let Json(spec) = payload.map_err(bad_body)?;
    let (cluster, task) = state.manager.create_cluster(spec)?;
    let task = state.with_link(task);
    Ok((StatusCode::ACCEPTED, Json(CreateClusterResponse { cluster, task })))
}

async fn list_clusters(State(state): State<AppState>) -> Json<ResourceList<Cluster>> {
    Json(ResourceList::new(state.manager.list_clusters(), None, None))
}

async fn get_cluster(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Cluster>> {
    Ok(Json(state.manager.get_cluster(&id)?))
}

async fn resize_cluster(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ClusterResizeSpec>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let Json(spec) = payload.map_err(bad_body)?;
    let task = state.manager.resize_cluster(&id, spec)?;
    Ok((StatusCode::ACCEPTED, Json(state.with_link(task))))
}

async fn delete_cluster(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state.manager.delete_cluster(&id)?;
    Ok((StatusCode::ACCEPTED, Json(state.with_link(task))))
}

async fn list_cluster_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<TaskQuery>, QueryRejection>,
) -> ApiResult<Json<ResourceList<Task>>> {
    let Query(query) = query.map_err(bad_query)?;
    let tracker = state.manager.tracker();

    let page = match query.page_link {
        Some(link) => tracker.get_page_for(&id, &link)?,
        None => {
            let filter = query.state.as_deref().map(str::parse::<TaskState>).transpose()?;
            tracker.list(&id, filter, query.page_size)?
        }
    };
    Ok(Json(state.task_page(page)))
}

async fn get_task_page(
    State(state): State<AppState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<ResourceList<Task>>> {
    let Query(query) = query.map_err(bad_query)?;
    let link = query
        .page_link
        .ok_or_else(|| NexaError::validation("pageLink is required"))?;
    let page = state.manager.tracker().get_page(&link)?;
    Ok(Json(state.task_page(page)))
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Task>> {
    let task = state.manager.tracker().get_task(&id)?;
    Ok(Json(state.with_link(task)))
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    debug!("Rejected request body: {}", rejection);
    ApiError(NexaError::validation(rejection.body_text()))
}

fn bad_query(rejection: QueryRejection) -> ApiError {
    debug!("Rejected query string: {}", rejection);
    ApiError(NexaError::validation(rejection.body_text()))
}
