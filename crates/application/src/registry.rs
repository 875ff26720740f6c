//! 连接注册表：用户身份 → 在线连接句柄。
//!
//! 每个身份的槽位相互独立，`DashMap` 的单键原子替换/删除即可保证读者看不到半更新的条目。

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domain::UserId;
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::events::ServerEvent;

/// 单条物理连接的标识，仅在该连接生命周期内有效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 同一身份多条连接时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPolicy {
    /// 每个身份只保留最后一次连接
    #[default]
    Single,
    /// 每个身份可同时拥有多条连接，事件扇出到全部连接
    Multi,
}

/// 在线连接句柄：向该连接的出站队列投递事件
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub sender: mpsc::Sender<Arc<ServerEvent>>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    slots: DashMap<UserId, Vec<ConnectionHandle>>,
    policy: SessionPolicy,
}

impl ConnectionRegistry {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            slots: DashMap::new(),
            policy,
        }
    }

    /// 注册连接，返回被挤掉的旧连接（仅 `Single` 策略下可能非空）
    pub fn register(&self, handle: ConnectionHandle) -> Vec<ConnectionHandle> {
        let mut slot = self.slots.entry(handle.user_id).or_default();
        match self.policy {
            SessionPolicy::Single => std::mem::replace(slot.value_mut(), vec![handle]),
            SessionPolicy::Multi => {
                slot.push(handle);
                Vec::new()
            }
        }
    }

    /// 注销指定连接。只移除 id 匹配的句柄，已被新连接替换的旧连接注销时不会误删新连接。
    pub fn unregister(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        match self.slots.entry(user_id) {
            Entry::Occupied(mut entry) => {
                let handles = entry.get_mut();
                let before = handles.len();
                handles.retain(|handle| handle.id != connection_id);
                let removed = handles.len() != before;
                if handles.is_empty() {
                    entry.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// 解析一组身份对应的在线句柄；重复身份只解析一次，无在线连接的身份被静默忽略
    pub fn resolve(&self, user_ids: &[UserId]) -> Vec<ConnectionHandle> {
        let mut seen = HashSet::with_capacity(user_ids.len());
        user_ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| self.slots.get(id).map(|slot| slot.value().clone()))
            .flatten()
            .collect()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.slots.contains_key(&user_id)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.slots.iter().map(|entry| *entry.key()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.slots.iter().map(|entry| entry.value().len()).sum()
    }
}
