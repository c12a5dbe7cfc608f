use crate::value_objects::RoomName;

/// 房间记录。
///
/// 核心只按名称查找房间，描述和归属等属性由房间管理模块维护。
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Room {
    pub name: RoomName,
}

impl Room {
    pub fn new(name: RoomName) -> Self {
        Self { name }
    }
}
