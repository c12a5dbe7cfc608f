use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::{ChatService, ChatSettings, InMemoryCollaborators, SystemClock};
use domain::{AvatarUrl, RoomName, UserProfile, Username};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub const AUTH_HEADER: &str = "x-authenticated-user";

pub type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub memory: InMemoryCollaborators,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// 在随机端口启动服务，内存后端预置 `general` 房间和 alice、bob 两个用户
    pub async fn start() -> Self {
        let memory = InMemoryCollaborators::new(Arc::new(SystemClock), AvatarUrl::default_avatar());
        memory.rooms.insert(RoomName::parse("general").unwrap()).await;
        memory
            .identities
            .insert(UserProfile::new(
                Username::parse("alice").unwrap(),
                AvatarUrl::new("/media/avatars/alice.png"),
                "likes rust",
            ))
            .await;
        memory
            .identities
            .insert(UserProfile::new(
                Username::parse("bob").unwrap(),
                AvatarUrl::default_avatar(),
                "",
            ))
            .await;

        let settings = ChatSettings {
            history_limit: 50,
            delivered_delay: Duration::from_millis(50),
            seen_delay: Duration::from_millis(100),
        };
        let service = Arc::new(ChatService::new(memory.dependencies(settings)));
        let app = router(AppState::new(service, AUTH_HEADER));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            memory,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 以指定用户身份连接房间；`None` 表示不带认证头
    pub async fn connect(&self, room: &str, username: Option<&str>) -> Client {
        let mut request = format!("ws://{}/ws/chat/{}", self.addr, room)
            .into_client_request()
            .expect("request");
        if let Some(username) = username {
            request
                .headers_mut()
                .insert(AUTH_HEADER, HeaderValue::from_str(username).expect("header"));
        }
        let (stream, _) = connect_async(request).await.expect("websocket handshake");
        stream
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 读取下一条 JSON 事件，超时返回 `None`
pub async fn next_event(client: &mut Client, wait: Duration) -> Option<Value> {
    loop {
        let frame = timeout(wait, client.next()).await.ok()??;
        match frame.expect("websocket frame") {
            Message::Text(text) => {
                return Some(serde_json::from_str(text.as_str()).expect("json event"));
            }
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// 跳过其他事件，直到收到指定类型的事件
pub async fn expect_event(client: &mut Client, event_type: &str) -> Value {
    loop {
        let event = next_event(client, Duration::from_secs(2))
            .await
            .unwrap_or_else(|| panic!("timed out waiting for {event_type}"));
        if event["type"] == event_type {
            return event;
        }
    }
}

pub fn usernames(event: &Value) -> Vec<String> {
    event["online_users"]
        .as_array()
        .expect("online_users array")
        .iter()
        .map(|user| user["username"].as_str().unwrap_or_default().to_string())
        .collect()
}
