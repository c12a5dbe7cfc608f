//! 应用层实现。
//!
//! 房间实时协调核心：连接注册表、房间广播、在线状态、投递状态调度，
//! 以及把它们串起来的单连接会话状态机。外部协作方（消息存储、身份、房间目录）
//! 以 trait 形式定义，内存实现在 `memory` 模块中。

pub mod broadcaster;
pub mod clock;
pub mod delivery;
pub mod error;
pub mod memory;
pub mod presence;
pub mod registry;
pub mod repository;
pub mod room_lock;
pub mod services;
pub mod session;

pub use broadcaster::{BroadcastError, RoomBroadcaster};
pub use clock::{Clock, SystemClock};
pub use delivery::DeliveryStatusScheduler;
pub use error::ApplicationError;
pub use memory::{
    InMemoryCollaborators, InMemoryIdentityDirectory, InMemoryMessageStore, InMemoryRoomDirectory,
};
pub use presence::PresenceService;
pub use registry::{ConnectionHandle, ConnectionRegistry, RegisteredConnection};
pub use repository::{IdentityDirectory, MessageStore, RoomDirectory};
pub use services::{ChatService, ChatServiceDependencies, ChatSettings};
pub use session::{ChatSession, SessionState};
