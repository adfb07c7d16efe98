use serde::Deserialize;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::Filter;

use super::{websocket, AppState};
use crate::error::SessionError;

const DEFAULT_RECENT_LIMIT: usize = 20;
const MAX_RECENT_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

/// All HTTP and WebSocket routes under `/classroom`
pub fn routes(state: AppState) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    classroom_websocket_route(state.clone())
        .or(health_check(state.clone()))
        .or(config_endpoint(state.clone()))
        .or(attendance_endpoint(state.clone()))
        .or(recent_stats_endpoint(state))
}

pub fn classroom_websocket_route(
    state: AppState,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("classroom")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_state(state))
        .map(|ws: warp::ws::Ws, state: AppState| {
            ws.on_upgrade(move |websocket| websocket::handle_classroom_websocket(websocket, state))
        })
}

pub fn health_check(
    state: AppState,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("classroom" / "health")
        .and(warp::get())
        .and(with_state(state))
        .then(|state: AppState| async move {
            let stats = state.registry.stats().await;
            let pending = state.registry.tracker().pending_count().await;
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Live Classroom",
                "version": env!("CARGO_PKG_VERSION"),
                "rooms": stats,
                "pending_finalize": pending,
            }))
        })
}

pub fn config_endpoint(
    state: AppState,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("classroom" / "config")
        .and(warp::get())
        .map(move || {
            warp::reply::json(&serde_json::json!({
                "scheduler": state.config.scheduler,
                "session": state.config.session,
            }))
        })
}

pub fn attendance_endpoint(
    state: AppState,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("classroom" / "attendance" / String)
        .and(warp::get())
        .and(with_state(state))
        .then(|class_id: String, state: AppState| async move {
            match state.registry.attendance_summary(&class_id).await {
                Ok(summary) => warp::reply::with_status(warp::reply::json(&summary), StatusCode::OK),
                Err(e) => error_reply(&e),
            }
        })
}

pub fn recent_stats_endpoint(
    state: AppState,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("classroom" / "stats" / "recent")
        .and(warp::get())
        .and(warp::query::<RecentQuery>())
        .and(with_state(state))
        .then(|query: RecentQuery, state: AppState| async move {
            let limit = query
                .limit
                .unwrap_or(DEFAULT_RECENT_LIMIT)
                .min(MAX_RECENT_LIMIT);
            match state.registry.recent_class_stats(limit).await {
                Ok(stats) => warp::reply::with_status(warp::reply::json(&stats), StatusCode::OK),
                Err(e) => error_reply(&e),
            }
        })
}

fn error_reply(error: &SessionError) -> WithStatus<Json> {
    let status = match error {
        SessionError::ClassNotFound(_) | SessionError::RoomNotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %error, "Reporting request failed");
    }
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({
            "code": error.rejection_code(),
            "message": error.to_string(),
        })),
        status,
    )
}

fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}
