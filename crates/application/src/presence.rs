//! 连接生命周期管理。
//!
//! 每条物理连接经历 `Connecting → Authenticating → Authenticated → Disconnected`。
//! 认证失败时连接直接终止，不触碰注册表；认证成功时恰好注册一次，
//! 断开时（无论主动关闭还是异常中断）恰好注销一次。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auth::{AuthError, AuthenticatedUser, CredentialVerifier};
use crate::events::ServerEvent;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Authenticated,
    Disconnected,
}

#[derive(Clone)]
pub struct ConnectionLifecycle {
    verifier: Arc<dyn CredentialVerifier>,
    registry: Arc<ConnectionRegistry>,
    outbound_capacity: usize,
}

impl ConnectionLifecycle {
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        registry: Arc<ConnectionRegistry>,
        outbound_capacity: usize,
    ) -> Self {
        Self {
            verifier,
            registry,
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 新的物理连接建立
    pub fn begin(&self) -> PendingConnection {
        PendingConnection {
            id: ConnectionId::generate(),
            state: ConnectionState::Connecting,
            lifecycle: self.clone(),
        }
    }

    pub async fn connect(&self, credential: Option<&str>) -> Result<LiveConnection, AuthError> {
        self.begin().authenticate(credential).await
    }
}

/// 尚未通过认证的连接
pub struct PendingConnection {
    id: ConnectionId,
    state: ConnectionState,
    lifecycle: ConnectionLifecycle,
}

impl PendingConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub async fn authenticate(
        mut self,
        credential: Option<&str>,
    ) -> Result<LiveConnection, AuthError> {
        self.state = ConnectionState::Authenticating;

        let user = match credential {
            Some(credential) if !credential.is_empty() => {
                self.lifecycle.verifier.verify(credential).await
            }
            _ => Err(AuthError::Missing),
        };

        let user = match user {
            Ok(user) => user,
            Err(err) => {
                tracing::info!(connection_id = %self.id, error = %err, "连接认证失败");
                return Err(err);
            }
        };

        let (sender, receiver) = mpsc::channel(self.lifecycle.outbound_capacity);
        let registry = Arc::clone(&self.lifecycle.registry);
        let displaced = registry.register(ConnectionHandle {
            id: self.id,
            user_id: user.id,
            sender,
        });
        for old in &displaced {
            tracing::info!(
                user_id = %user.id,
                connection_id = %old.id,
                "同一用户的新连接替换了旧连接"
            );
        }
        tracing::info!(user_id = %user.id, connection_id = %self.id, "连接已认证");

        Ok(LiveConnection {
            id: self.id,
            user,
            state: ConnectionState::Authenticated,
            registry,
            receiver: Some(receiver),
        })
    }
}

/// 已认证的在线连接。`disconnect` 幂等，`Drop` 时自动断开。
pub struct LiveConnection {
    id: ConnectionId,
    user: AuthenticatedUser,
    state: ConnectionState,
    registry: Arc<ConnectionRegistry>,
    receiver: Option<mpsc::Receiver<Arc<ServerEvent>>>,
}

impl LiveConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user(&self) -> &AuthenticatedUser {
        &self.user
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 取出出站队列的接收端，交给写任务使用；只能取一次
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<Arc<ServerEvent>>> {
        self.receiver.take()
    }

    /// 进入终态并注销。返回本次调用是否执行了状态迁移。
    pub fn disconnect(&mut self) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Disconnected;
        let removed = self.registry.unregister(self.user.id, self.id);
        tracing::info!(
            user_id = %self.user.id,
            connection_id = %self.id,
            removed,
            "连接已断开"
        );
        true
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
