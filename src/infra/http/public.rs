use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{
        StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, CACHE_CONTROL,
            CONTENT_TYPE,
        },
    },
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
    routing::{options, post},
};
use serde::Deserialize;

use crate::{
    application::{
        error::HttpError,
        render::{RenderDispatchError, RenderService},
        submission::{SubmissionError, SubmissionService},
    },
    cache::{ArtifactKey, CacheCoordinator},
    domain::format::RenderFormat,
};

use super::middleware::{allow_any_origin, log_responses};

/// Artifacts are content-addressed, so once rendered they can be cached
/// by clients and intermediaries forever.
const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

const INDEX_HTML: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/index.html"));

#[derive(Clone)]
pub struct HttpState {
    pub submissions: Arc<SubmissionService>,
    pub render: Arc<RenderService>,
    pub cache: Arc<CacheCoordinator>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/submissions", post(submit))
        .route("/submissions", options(submissions_preflight))
        .route("/render/{format}/{token}", get(render_artifact))
        .route("/_health", get(health))
        .fallback(fallback)
        .with_state(state)
        .layer(middleware::from_fn(allow_any_origin))
        .layer(middleware::from_fn(log_responses))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn fallback() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    code: String,
}

async fn submit(
    State(state): State<HttpState>,
    Json(request): Json<SubmitRequest>,
) -> Response {
    const SOURCE: &str = "infra::http::submit";

    match state.submissions.submit(&request.code) {
        Ok(submission) => Json(submission).into_response(),
        Err(err @ SubmissionError::EmptySource) => HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Diagram source must not be empty",
            err.to_string(),
        )
        .into_response(),
    }
}

async fn submissions_preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (ACCESS_CONTROL_ALLOW_HEADERS, "content-type"),
        ],
        (),
    )
        .into_response()
}

async fn render_artifact(
    State(state): State<HttpState>,
    Path((format_segment, token)): Path<(String, String)>,
) -> Response {
    const SOURCE: &str = "infra::http::render_artifact";

    let Some(format) = RenderFormat::from_path_segment(&format_segment) else {
        return HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Not found",
            format!("unsupported render format `{format_segment}`"),
        )
        .into_response();
    };

    let key = ArtifactKey::new(format, token);
    let render = state.render.clone();
    let render_token = key.token.clone();
    let result = state
        .cache
        .fetch_or_render(&key, || async move {
            render.render_token(&render_token, format).await
        })
        .await;

    match result {
        Ok(bytes) => (
            [
                (CONTENT_TYPE, format.content_type()),
                (CACHE_CONTROL, IMMUTABLE_CACHE_CONTROL),
            ],
            bytes,
        )
            .into_response(),
        Err(RenderDispatchError::Token(err)) => HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            format!("Invalid diagram token: {err}"),
            err.to_string(),
        )
        .into_response(),
        Err(RenderDispatchError::Render(err)) => HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Diagram render failed: {err}"),
            &err,
        )
        .into_response(),
    }
}
