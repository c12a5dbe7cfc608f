use application::{ApplicationError, ChatSession, ConnectionHandle};
use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket};
use domain::{Principal, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}

/// 单个 WebSocket 连接
///
/// 持有一个聊天会话以及该连接的出站事件队列。出站事件只由写任务写入 socket，
/// 接收循环只负责把客户端帧交给会话。
pub struct WebSocketConnection {
    socket: WebSocket,
    session: ChatSession,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: &AppState, room_name: String, principal: Principal) -> Self {
        let (handle, events) = ConnectionHandle::new();
        let session = state
            .chat_service
            .open_session(room_name, principal, handle);
        Self {
            socket,
            session,
            events,
        }
    }

    /// 激活会话并运行连接主循环，直到任意一端断开
    pub async fn run(self) {
        let Self {
            mut socket,
            mut session,
            events,
        } = self;

        if let Err(err) = session.activate().await {
            tracing::info!(
                connection_id = %session.handle().id(),
                error = %err,
                "拒绝 WebSocket 连接"
            );
            let frame = CloseFrame {
                code: close_code::POLICY,
                reason: rejection_reason(&err).into(),
            };
            if socket.send(WsMessage::Close(Some(frame))).await.is_err() {
                tracing::debug!("关闭帧发送失败");
            }
            return;
        }

        let (sender, mut incoming) = socket.split();
        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(32);
        let mut send_task = tokio::spawn(write_loop(sender, events, cmd_rx));

        loop {
            tokio::select! {
                _ = &mut send_task => {
                    tracing::debug!("WebSocket 写任务结束");
                    break;
                }
                message = incoming.next() => {
                    let Some(Ok(message)) = message else { break };
                    if handle_incoming(&mut session, message, &cmd_tx).await.is_err() {
                        break;
                    }
                }
            }
        }

        session.close().await;
        send_task.abort();
    }
}

/// 写任务：统一处理所有对 WebSocket sender 的写操作
async fn write_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, WsMessage>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    mut cmd_rx: mpsc::Receiver<WsCommand>,
) {
    loop {
        tokio::select! {
            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    WsCommand::SendPong(data) => {
                        if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                            tracing::warn!("Failed to send pong message");
                            break;
                        }
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::warn!(error = %err, event = event.event_type(), "failed to serialize websocket payload");
                        continue;
                    }
                };
                if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                    tracing::debug!("WebSocket 已断开，停止写出");
                    break;
                }
            }
        }
    }
}

/// 处理一条客户端帧，返回 `Err` 表示连接应当结束
async fn handle_incoming(
    session: &mut ChatSession,
    message: WsMessage,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> Result<(), ()> {
    match message {
        WsMessage::Close(_) => {
            tracing::debug!(connection_id = %session.handle().id(), "收到关闭消息");
            return Err(());
        }
        WsMessage::Ping(data) => {
            if cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_err() {
                return Err(());
            }
        }
        WsMessage::Pong(_) => {}
        WsMessage::Text(text) => match session.handle_frame(text.as_str()).await {
            Ok(_) => {}
            Err(err) if err.is_fatal() => {
                tracing::error!(
                    connection_id = %session.handle().id(),
                    error = %err,
                    "会话异常终止"
                );
                return Err(());
            }
            Err(err) => {
                tracing::warn!(
                    connection_id = %session.handle().id(),
                    error = %err,
                    "消息未发送"
                );
            }
        },
        WsMessage::Binary(_) => {
            tracing::debug!(connection_id = %session.handle().id(), "忽略二进制帧");
        }
    }
    Ok(())
}

fn rejection_reason(err: &ApplicationError) -> &'static str {
    match err {
        ApplicationError::RejectedConnection => "authentication required",
        ApplicationError::UnknownRoom(_) => "room not found",
        _ => "session unavailable",
    }
}
