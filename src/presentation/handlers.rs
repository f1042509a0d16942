// HTTP request handlers
use crate::application::widget_service::WidgetSummary;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct RetargetRequest {
    pub path: String,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// List all mounted widgets with their connection status
pub async fn list_widgets(State(state): State<Arc<AppState>>) -> Json<Vec<WidgetSummary>> {
    Json(state.widget_service.list().await)
}

/// Latest frame of one widget
pub async fn get_widget(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.widget_service.frame(&id).await {
        Some(frame) => Json(frame).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Stream frames of one widget as server-sent events
pub async fn stream_widget(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(mut rx) = state.widget_service.watch(&id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    tracing::debug!(widget = %id, "frame stream opened");

    let stream = async_stream::stream! {
        loop {
            let frame = rx.borrow_and_update().clone();
            yield Event::default().json_data(&frame);

            if rx.changed().await.is_err() {
                tracing::debug!(widget = %id, "widget stopped, ending frame stream");
                break;
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Point a widget at a different source path
pub async fn retarget_widget(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<RetargetRequest>,
) -> StatusCode {
    if request.path.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    if state.widget_service.retarget(&id, request.path).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
