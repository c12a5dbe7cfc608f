use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use domain::{HistoryEntry, OnlineUser};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct OnlineUsersResponse {
    room: String,
    online_users: Vec<OnlineUser>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    room: String,
    messages: Vec<HistoryEntry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/chat/{room_name}", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room_name}/online", get(online_users))
        .route("/rooms/{room_name}/messages", get(recent_messages))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 身份来自上游认证层写入的请求头；匿名连接在升级后由会话拒绝并关闭
async fn websocket_upgrade(
    State(state): State<AppState>,
    Path(room_name): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let principal = state.principal(&headers);
    ws.on_upgrade(move |socket| async move {
        WebSocketConnection::new(socket, &state, room_name, principal)
            .run()
            .await;
    })
}

async fn online_users(
    State(state): State<AppState>,
    Path(room_name): Path<String>,
) -> Result<Json<OnlineUsersResponse>, ApiError> {
    let online_users = state.chat_service.online_users(&room_name).await?;
    Ok(Json(OnlineUsersResponse {
        room: room_name,
        online_users,
    }))
}

async fn recent_messages(
    State(state): State<AppState>,
    Path(room_name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let messages = state
        .chat_service
        .recent_messages(&room_name, query.limit)
        .await?;
    Ok(Json(HistoryResponse {
        room: room_name,
        messages,
    }))
}
