use std::collections::HashMap;
use std::sync::Arc;

use domain::RoomName;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 按房间划分的互斥锁，不同房间互不阻塞
#[derive(Default)]
pub struct RoomLocks {
    locks: Mutex<HashMap<RoomName, Arc<Mutex<()>>>>,
}

impl RoomLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, room: &RoomName) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(room.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
