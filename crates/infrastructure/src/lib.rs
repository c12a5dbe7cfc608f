//! 基础设施层实现。
//!
//! 基于 PostgreSQL 的消息存储、用户资料目录和房间目录，实现应用层定义的协作方接口。

pub mod builder;
pub mod migrations;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError};
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgIdentityDirectory, PgMessageStore, PgRoomDirectory, PgStorage,
};
