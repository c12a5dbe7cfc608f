use std::sync::Arc;

use application::{ChatServiceDependencies, ChatSettings, Clock};
use domain::AvatarUrl;
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Clone)]
pub struct InfrastructureConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub default_avatar: AvatarUrl,
}

impl InfrastructureConfig {
    /// 从全局配置中提取数据库参数，未配置数据库地址时返回 `None`
    pub fn from_app_config(config: &config::AppConfig) -> Option<Self> {
        let database_url = config.database.url.clone()?;
        Some(Self {
            database_url,
            max_connections: config.database.max_connections,
            default_avatar: AvatarUrl::new(config.chat.default_avatar.clone()),
        })
    }
}

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Clone)]
pub struct Infrastructure {
    pub storage: Arc<PgStorage>,
}

impl Infrastructure {
    /// 建立连接池并执行迁移
    pub async fn connect(config: InfrastructureConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database_url, config.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!(max_connections = config.max_connections, "数据库迁移完成");

        let storage = Arc::new(PgStorage::new(pool, config.default_avatar));
        Ok(Self { storage })
    }

    pub fn dependencies(
        &self,
        clock: Arc<dyn Clock>,
        settings: ChatSettings,
    ) -> ChatServiceDependencies {
        ChatServiceDependencies {
            message_store: self.storage.message_store.clone(),
            identity_directory: self.storage.identity_directory.clone(),
            room_directory: self.storage.room_directory.clone(),
            clock,
            settings,
        }
    }
}
