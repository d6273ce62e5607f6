use super::AppState;
use crate::publish::{PostReport, PostTarget};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;

#[derive(Deserialize)]
pub struct PostParams {
    target: Option<String>,
}

/// GET /api/post/:token?target=misskey|twitter
///
/// Errors use the same body shape as success, with `success: false`.
pub async fn post_now_playing(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(params): Query<PostParams>,
    headers: HeaderMap,
) -> Response {
    let target = PostTarget::parse(params.target.as_deref());

    match state.poster.post(&token, &headers, target).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            if e.status().is_server_error() {
                error!(error = ?e, "Post-on-demand failed");
            }
            (
                e.status(),
                Json(PostReport {
                    success: false,
                    message: e.to_string(),
                    results: BTreeMap::new(),
                }),
            )
                .into_response()
        }
    }
}
