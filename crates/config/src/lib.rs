//! 统一配置中心
//!
//! 配置按以下顺序叠加，后者覆盖前者：
//! - `AppConfig::default()` 内置默认值
//! - TOML 配置文件（`CHATROOM_CONFIG` 指定，默认 `chatroom.toml`，不存在时跳过）
//! - `CHATROOM_` 前缀的环境变量，嵌套字段用 `__` 分隔，例如 `CHATROOM_SERVER__PORT`

use std::env;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "CHATROOM_";
/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "CHATROOM_CONFIG";
/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "chatroom.toml";

/// 全局应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// 存储后端选择
    pub storage: StorageConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 聊天核心参数
    pub chat: ChatConfig,
}

/// 服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// 进程内存储，重启即丢失，用于开发和测试
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// 内存后端启动时预先创建的房间
    pub seed_rooms: Vec<String>,
}

/// 数据库配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// 加入房间时推送的历史消息条数
    pub history_limit: usize,
    pub delivered_delay_ms: u64,
    /// 从 delivered 到 seen 的额外延迟
    pub seen_delay_ms: u64,
    /// 上游认证层写入用户名的请求头
    pub auth_header: String,
    pub default_avatar: String,
}

impl ChatConfig {
    pub fn delivered_delay(&self) -> Duration {
        Duration::from_millis(self.delivered_delay_ms)
    }

    pub fn seen_delay(&self) -> Duration {
        Duration::from_millis(self.seen_delay_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                seed_rooms: vec!["general".to_string()],
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
            },
            chat: ChatConfig {
                history_limit: 50,
                delivered_delay_ms: 1000,
                seen_delay_ms: 2000,
                auth_header: "x-authenticated-user".to_string(),
                default_avatar: "/media/avatars/default.png".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 组装配置来源，不做校验
    pub fn figment() -> Figment {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
    }

    /// 加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerPort(
                "port must be greater than 0".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidDatabaseConfig(
                "Max connections must be greater than 0".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Postgres {
            match self.database.url.as_deref() {
                Some(url) if !url.trim().is_empty() => {}
                _ => {
                    return Err(ConfigError::InvalidDatabaseUrl(
                        "postgres backend requires database.url".to_string(),
                    ))
                }
            }
        }

        if self.chat.history_limit == 0 {
            return Err(ConfigError::InvalidChatConfig(
                "history_limit must be greater than 0".to_string(),
            ));
        }

        if self.chat.auth_header.trim().is_empty() {
            return Err(ConfigError::InvalidChatConfig(
                "auth_header cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid server port: {0}")]
    InvalidServerPort(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid chat configuration: {0}")]
    InvalidChatConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chat.history_limit, 50);
        assert_eq!(config.chat.delivered_delay(), Duration::from_secs(1));
        assert_eq!(config.chat.seen_delay(), Duration::from_secs(2));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_PATH,
                r#"
                    [server]
                    port = 9000

                    [chat]
                    history_limit = 20
                "#,
            )?;
            jail.set_env("CHATROOM_SERVER__HOST", "0.0.0.0");
            jail.set_env("CHATROOM_CHAT__SEEN_DELAY_MS", "500");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 9000);
            assert_eq!(config.server.host, "0.0.0.0");
            assert_eq!(config.chat.history_limit, 20);
            assert_eq!(config.chat.seen_delay_ms, 500);
            assert_eq!(config.chat.delivered_delay_ms, 1000);
            Ok(())
        });
    }

    #[test]
    fn test_config_path_override() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[storage]\nseed_rooms = [\"lobby\", \"rust\"]\n")?;
            jail.set_env(CONFIG_PATH_ENV, "custom.toml");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.storage.seed_rooms, vec!["lobby", "rust"]);
            Ok(())
        });
    }

    #[test]
    fn test_postgres_backend_requires_url() {
        Jail::expect_with(|jail| {
            jail.set_env("CHATROOM_STORAGE__BACKEND", "postgres");
            let result = AppConfig::load();
            assert!(matches!(result, Err(ConfigError::InvalidDatabaseUrl(_))));

            jail.set_env("CHATROOM_DATABASE__URL", "postgres://chat@db:5432/chatroom");
            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.storage.backend, StorageBackend::Postgres);
            Ok(())
        });
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidServerPort(_))
        ));

        let mut config = AppConfig::default();
        config.chat.history_limit = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.chat.auth_header = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_is_a_load_error() {
        Jail::expect_with(|jail| {
            jail.set_env("CHATROOM_STORAGE__BACKEND", "sqlite");
            assert!(matches!(AppConfig::load(), Err(ConfigError::Load(_))));
            Ok(())
        });
    }
}
