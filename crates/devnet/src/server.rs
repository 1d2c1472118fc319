//! HTTP front end for [`LocalMirror`]
//!
//! Serves the mirror REST API `HttpMirrorClient` talks to, scoped per tree
//! by the `contractname` header.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tracing::info;

use mantle_core::error::MirrorError;
use mantle_core::mirror::http::CONTRACT_NAME_HEADER;
use mantle_core::MerkleMirror;

use crate::mirror::LocalMirror;

enum ApiError {
    MissingTree,
    Mirror(MirrorError),
}

impl From<MirrorError> for ApiError {
    fn from(err: MirrorError) -> Self {
        ApiError::Mirror(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::MissingTree => {
                (StatusCode::BAD_REQUEST, format!("missing {} header", CONTRACT_NAME_HEADER)).into_response()
            }
            ApiError::Mirror(err) => {
                let status = match &err {
                    MirrorError::NotFound { .. } | MirrorError::UnknownTree(_) => StatusCode::NOT_FOUND,
                    MirrorError::NotStarted(_) | MirrorError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string()).into_response()
            }
        }
    }
}

fn tree_name(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(CONTRACT_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or(ApiError::MissingTree)
}

/// Mirror REST routes
pub fn router(mirror: Arc<LocalMirror>) -> Router {
    Router::new()
        .route("/start", post(start))
        .route("/metadata/latestLeaf", get(latest_leaf))
        .route("/leaf/index/:index", get(leaf_by_index))
        .route("/siblingPath/:index", get(sibling_path))
        .with_state(mirror)
}

/// Serve the mirror on an already-bound listener
pub async fn serve(listener: TcpListener, mirror: Arc<LocalMirror>) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "Mirror listening");
    axum::serve(listener, router(mirror)).await
}

async fn start(State(mirror): State<Arc<LocalMirror>>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let tree = tree_name(&headers)?;
    mirror.start_event_filter(&tree).await?;
    Ok(StatusCode::OK)
}

async fn latest_leaf(State(mirror): State<Arc<LocalMirror>>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let tree = tree_name(&headers)?;
    Ok(Json(mirror.latest_leaf(&tree).await?))
}

async fn leaf_by_index(
    State(mirror): State<Arc<LocalMirror>>,
    Path(index): Path<u64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let tree = tree_name(&headers)?;
    Ok(Json(mirror.leaf_by_index(&tree, index).await?))
}

async fn sibling_path(
    State(mirror): State<Arc<LocalMirror>>,
    Path(index): Path<u64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let tree = tree_name(&headers)?;
    Ok(Json(mirror.sibling_path(&tree, index).await?))
}
