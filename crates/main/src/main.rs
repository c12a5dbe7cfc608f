//! 主应用程序入口
//!
//! 加载配置，按存储后端组装聊天服务，启动 Axum Web 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{
    ChatService, ChatServiceDependencies, ChatSettings, Clock, InMemoryCollaborators, SystemClock,
};
use config::{AppConfig, StorageBackend};
use domain::{AvatarUrl, RoomName};
use infrastructure::{Infrastructure, InfrastructureConfig};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let settings = ChatSettings::from(&config.chat);

    let deps = build_dependencies(&config, clock, settings).await?;
    let chat_service = Arc::new(ChatService::new(deps));
    let app = router(AppState::from_config(chat_service, &config.chat));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {addr}"))?;

    tracing::info!(%addr, backend = ?config.storage.backend, "聊天室服务器启动");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已停止");
    Ok(())
}

async fn build_dependencies(
    config: &AppConfig,
    clock: Arc<dyn Clock>,
    settings: ChatSettings,
) -> anyhow::Result<ChatServiceDependencies> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let memory =
                InMemoryCollaborators::new(clock, AvatarUrl::new(config.chat.default_avatar.clone()));
            for name in &config.storage.seed_rooms {
                let room = RoomName::parse(name.as_str())
                    .with_context(|| format!("非法的预置房间名: {name:?}"))?;
                memory.rooms.insert(room).await;
            }
            tracing::info!(rooms = config.storage.seed_rooms.len(), "使用内存存储");
            Ok(memory.dependencies(settings))
        }
        StorageBackend::Postgres => {
            let infra_config = InfrastructureConfig::from_app_config(config)
                .context("postgres 后端需要 database.url")?;
            let infrastructure = Infrastructure::connect(infra_config).await?;
            Ok(infrastructure.dependencies(clock, settings))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        return;
    }
    tracing::info!("收到退出信号，正在关闭");
}
