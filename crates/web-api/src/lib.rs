//! Web API 层。
//!
//! 提供 Axum 路由：房间 WebSocket 升级，以及在线用户和最近消息的只读 HTTP 接口。
//! 会话语义全部委托给应用层的 `ChatService`。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
