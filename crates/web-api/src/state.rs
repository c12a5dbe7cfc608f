use std::sync::Arc;

use application::ChatService;
use axum::http::HeaderMap;
use domain::Principal;

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    /// 上游认证层写入的用户名请求头
    auth_header: Arc<str>,
}

impl AppState {
    pub fn new(chat_service: Arc<ChatService>, auth_header: impl AsRef<str>) -> Self {
        Self {
            chat_service,
            auth_header: Arc::from(auth_header.as_ref().trim().to_ascii_lowercase()),
        }
    }

    pub fn from_config(chat_service: Arc<ChatService>, config: &config::ChatConfig) -> Self {
        Self::new(chat_service, &config.auth_header)
    }

    pub fn auth_header(&self) -> &str {
        &self.auth_header
    }

    /// 请求头缺失、不是合法 UTF-8 或用户名非法时视为匿名
    pub fn principal(&self, headers: &HeaderMap) -> Principal {
        let raw = headers
            .get(self.auth_header())
            .and_then(|value| value.to_str().ok());
        Principal::from_username(raw)
    }
}
