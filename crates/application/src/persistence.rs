//! 消息持久化队列。
//!
//! 实时推送完成后，规范记录被放入有界队列，由单独的 worker 写入消息存储。
//! 写入失败只记录日志，不回滚、不重试，也不通知发送者。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use domain::Message;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::repository::MessageRepository;

#[derive(Clone)]
pub struct PersistenceQueue {
    sender: mpsc::Sender<Message>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl PersistenceQueue {
    /// 创建队列并启动 worker。所有 `PersistenceQueue` 克隆被释放后 worker 退出。
    pub fn spawn(store: Arc<dyn MessageRepository>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        let worker = tokio::spawn(run_worker(
            store,
            receiver,
            Arc::clone(&pending),
            Arc::clone(&idle),
        ));

        (
            Self {
                sender,
                pending,
                idle,
            },
            worker,
        )
    }

    /// 放入队列，不等待。队列已满或已关闭时丢弃记录并返回 `false`。
    pub fn enqueue(&self, message: Message) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(err) => {
                self.finish_one();
                let (reason, message) = match err {
                    TrySendError::Full(message) => ("queue full", message),
                    TrySendError::Closed(message) => ("queue closed", message),
                };
                tracing::error!(
                    message_id = %message.id,
                    chat_id = %message.chat_id,
                    reason,
                    "消息未能进入持久化队列，已丢弃"
                );
                false
            }
        }
    }

    /// 尚未写入存储的记录数
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// 等待队列中已有的记录全部处理完毕
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

async fn run_worker(
    store: Arc<dyn MessageRepository>,
    mut receiver: mpsc::Receiver<Message>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
) {
    while let Some(message) = receiver.recv().await {
        let message_id = message.id;
        let chat_id = message.chat_id;
        match store.save(message).await {
            Ok(()) => tracing::debug!(message_id = %message_id, chat_id = %chat_id, "消息已持久化"),
            Err(err) => tracing::error!(
                message_id = %message_id,
                chat_id = %chat_id,
                error = %err,
                "消息持久化失败"
            ),
        }
        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            idle.notify_waiters();
        }
    }
    tracing::info!("持久化队列已关闭");
}
