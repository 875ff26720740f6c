use std::collections::HashSet;
use std::sync::Arc;

use domain::UserId;
use tokio::sync::mpsc::error::TrySendError;

use crate::events::ServerEvent;
use crate::registry::{ConnectionId, ConnectionRegistry};

/// 一次扇出的投递结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// 成功放入出站队列的连接数
    pub delivered: usize,
    /// 出站队列已满而丢弃的连接数
    pub dropped: usize,
    /// 没有在线连接（或连接已关闭）的目标身份数
    pub offline: usize,
}

/// 事件路由：解析目标身份的在线连接并投递，尽力而为，不排队不重试。
///
/// 投递使用 `try_send`，从不等待慢连接；队列满时丢弃本次事件（drop-newest）。
#[derive(Debug, Clone)]
pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
}

impl EventRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn dispatch(&self, targets: &[UserId], event: ServerEvent) -> DispatchReport {
        self.fan_out(targets, event, None)
    }

    /// 与 `dispatch` 相同，但跳过触发事件的那条连接
    pub fn dispatch_except(
        &self,
        targets: &[UserId],
        event: ServerEvent,
        origin: ConnectionId,
    ) -> DispatchReport {
        self.fan_out(targets, event, Some(origin))
    }

    fn fan_out(
        &self,
        targets: &[UserId],
        event: ServerEvent,
        skip: Option<ConnectionId>,
    ) -> DispatchReport {
        let kind = event.kind();
        let event = Arc::new(event);
        let handles = self.registry.resolve(targets);

        let requested: HashSet<UserId> = targets.iter().copied().collect();
        let mut reached: HashSet<UserId> = HashSet::with_capacity(handles.len());
        let mut report = DispatchReport::default();

        for handle in handles {
            if Some(handle.id) == skip {
                reached.insert(handle.user_id);
                continue;
            }
            match handle.sender.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    report.delivered += 1;
                    reached.insert(handle.user_id);
                }
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    reached.insert(handle.user_id);
                    tracing::warn!(
                        user_id = %handle.user_id,
                        connection_id = %handle.id,
                        event = kind,
                        "出站队列已满，丢弃事件"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(
                        user_id = %handle.user_id,
                        connection_id = %handle.id,
                        event = kind,
                        "连接已关闭，视为离线"
                    );
                }
            }
        }

        report.offline = requested.len() - reached.len();
        tracing::debug!(
            event = kind,
            targets = requested.len(),
            delivered = report.delivered,
            dropped = report.dropped,
            offline = report.offline,
            "事件扇出完成"
        );
        report
    }
}
