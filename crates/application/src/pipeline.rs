//! 消息接收管道。
//!
//! 顺序约定：构造实时投影 → 扇出 `NEW_MESSAGE` → 扇出 `NEW_MESSAGE_ALERT` → 放入持久化队列。
//! 实时推送不依赖持久化结果；附件消息要求所有文件先上传成功，
//! 任意上传失败则整条消息作废，不扇出也不持久化。

use std::sync::Arc;

use domain::{Attachment, ChatId, DomainError, Message, MessageId};
use futures_util::future::join_all;

use crate::auth::AuthenticatedUser;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::events::{LiveMessage, ServerEvent};
use crate::membership::MembershipResolver;
use crate::persistence::PersistenceQueue;
use crate::registry::ConnectionId;
use crate::router::{DispatchReport, EventRouter};
use crate::storage::{ObjectStore, UploadError, UploadFile, MAX_ATTACHMENTS};

pub struct MessagePipelineDependencies {
    pub membership: MembershipResolver,
    pub router: EventRouter,
    pub persistence: PersistenceQueue,
    pub object_store: Arc<dyn ObjectStore>,
    pub clock: Arc<dyn Clock>,
}

/// 一次发送的结果
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub record: Message,
    pub live: LiveMessage,
    pub report: DispatchReport,
    /// 记录是否进入了持久化队列
    pub queued: bool,
}

pub struct MessagePipeline {
    deps: MessagePipelineDependencies,
}

impl MessagePipeline {
    pub fn new(deps: MessagePipelineDependencies) -> Self {
        Self { deps }
    }

    pub fn persistence(&self) -> &PersistenceQueue {
        &self.deps.persistence
    }

    pub async fn send_text(
        &self,
        sender: &AuthenticatedUser,
        chat_id: ChatId,
        content: &str,
    ) -> Result<SentMessage, ApplicationError> {
        let members = self.deps.membership.members_for(chat_id, sender.id).await?;
        let record = Message::text(
            MessageId::generate(),
            chat_id,
            sender.id,
            content,
            self.deps.clock.now(),
        )?;
        Ok(self.publish(sender, &members, record))
    }

    pub async fn send_attachments(
        &self,
        sender: &AuthenticatedUser,
        chat_id: ChatId,
        files: Vec<UploadFile>,
    ) -> Result<SentMessage, ApplicationError> {
        if files.is_empty() {
            return Err(DomainError::validation("files", "no files were uploaded").into());
        }
        if files.len() > MAX_ATTACHMENTS {
            return Err(DomainError::validation(
                "files",
                format!("files can't be more than {MAX_ATTACHMENTS}"),
            )
            .into());
        }

        // 上传之前先确认会话存在且发送者是成员，避免产生孤立文件
        self.deps.membership.members_for(chat_id, sender.id).await?;

        let attachments = self.upload_all(files).await?;
        let public_ids: Vec<String> = attachments.iter().map(|a| a.public_id.clone()).collect();

        let prepared = async {
            let record = Message::with_attachments(
                MessageId::generate(),
                chat_id,
                sender.id,
                attachments,
                self.deps.clock.now(),
            )?;
            // 上传期间成员可能变化，扇出使用上传完成后的成员集合
            let members = self.deps.membership.members(chat_id).await?;
            Ok::<_, ApplicationError>((record, members))
        }
        .await;

        match prepared {
            Ok((record, members)) => Ok(self.publish(sender, &members, record)),
            Err(err) => {
                // 上传完成后会话可能已被删除，文件不会再被引用
                self.discard_uploads(&public_ids).await;
                tracing::warn!(chat_id = %chat_id, error = %err, "附件已上传但消息未发送");
                Err(err)
            }
        }
    }

    /// 输入状态：扇出给会话成员，但不回送给触发事件的连接，不持久化
    pub async fn typing(
        &self,
        sender: &AuthenticatedUser,
        origin: ConnectionId,
        chat_id: ChatId,
        started: bool,
    ) -> Result<DispatchReport, ApplicationError> {
        let members = self.deps.membership.members_for(chat_id, sender.id).await?;
        let event = if started {
            ServerEvent::StartTyping { chat_id }
        } else {
            ServerEvent::StopTyping { chat_id }
        };
        Ok(self.deps.router.dispatch_except(&members, event, origin))
    }

    /// 扇出与入队之间没有挂起点
    fn publish(
        &self,
        sender: &AuthenticatedUser,
        members: &[domain::UserId],
        record: Message,
    ) -> SentMessage {
        let chat_id = record.chat_id;
        let live = LiveMessage::project(&record, sender);

        let report = self.deps.router.dispatch(
            members,
            ServerEvent::NewMessage {
                chat_id,
                message: live.clone(),
            },
        );
        self.deps
            .router
            .dispatch(members, ServerEvent::NewMessageAlert { chat_id });

        let queued = self.deps.persistence.enqueue(record.clone());
        tracing::info!(
            chat_id = %chat_id,
            sender_id = %sender.id,
            message_id = %record.id,
            delivered = report.delivered,
            queued,
            "消息已发送"
        );

        SentMessage {
            record,
            live,
            report,
            queued,
        }
    }

    async fn upload_all(&self, files: Vec<UploadFile>) -> Result<Vec<Attachment>, UploadError> {
        let results = join_all(
            files
                .into_iter()
                .map(|file| self.deps.object_store.upload(file)),
        )
        .await;

        let mut uploaded = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(attachment) => uploaded.push(attachment),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        let Some(err) = failure else {
            return Ok(uploaded);
        };

        // 已上传成功的文件不会被任何消息引用
        let public_ids: Vec<String> = uploaded.into_iter().map(|a| a.public_id).collect();
        self.discard_uploads(&public_ids).await;
        tracing::warn!(error = %err, "附件上传失败，消息未发送");
        Err(err)
    }

    /// 尽力删除未被消息引用的文件
    async fn discard_uploads(&self, public_ids: &[String]) {
        if public_ids.is_empty() {
            return;
        }
        if let Err(cleanup) = self.deps.object_store.delete(public_ids).await {
            tracing::warn!(error = %cleanup, "清理已上传附件失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::memory::{MemoryChatRepository, MemoryMessageRepository, MemoryObjectStore};
    use crate::registry::{ConnectionHandle, ConnectionRegistry};
    use crate::repository::{ChatRepository, MessageRepository};
    use async_trait::async_trait;
    use chrono::Utc;
    use domain::{Chat, UserId};
    use tokio::sync::mpsc;

    struct Fixture {
        pipeline: MessagePipeline,
        registry: Arc<ConnectionRegistry>,
        messages: Arc<MemoryMessageRepository>,
        objects: Arc<MemoryObjectStore>,
        chat: Chat,
    }

    async fn fixture() -> Fixture {
        let chats = Arc::new(MemoryChatRepository::default());
        let messages = Arc::new(MemoryMessageRepository::default());
        let objects = Arc::new(MemoryObjectStore::default());
        let registry = Arc::new(ConnectionRegistry::default());

        let creator = UserId::generate();
        let chat = Chat::new_group(
            ChatId::generate(),
            "team",
            creator,
            &[UserId::generate(), UserId::generate()],
            Utc::now(),
        )
        .unwrap();
        chats.create(chat.clone()).await.unwrap();

        let (persistence, _worker) = PersistenceQueue::spawn(messages.clone(), 16);
        let pipeline = MessagePipeline::new(MessagePipelineDependencies {
            membership: MembershipResolver::new(chats),
            router: EventRouter::new(registry.clone()),
            persistence,
            object_store: objects.clone(),
            clock: Arc::new(SystemClock),
        });

        Fixture {
            pipeline,
            registry,
            messages,
            objects,
            chat,
        }
    }

    fn online(
        registry: &ConnectionRegistry,
        user_id: UserId,
    ) -> mpsc::Receiver<Arc<ServerEvent>> {
        let (sender, receiver) = mpsc::channel(8);
        registry.register(ConnectionHandle {
            id: ConnectionId::generate(),
            user_id,
            sender,
        });
        receiver
    }

    fn sender(fixture: &Fixture) -> AuthenticatedUser {
        AuthenticatedUser {
            id: fixture.chat.creator.unwrap(),
            name: "creator".into(),
        }
    }

    #[tokio::test]
    async fn live_events_precede_persistence_and_ids_differ() {
        let f = fixture().await;
        let mut rx = online(&f.registry, f.chat.members[0]);

        let sent = f
            .pipeline
            .send_text(&sender(&f), f.chat.id, "hello")
            .await
            .unwrap();
        assert!(sent.queued);
        assert_ne!(sent.live.correlation_id, uuid::Uuid::from(sent.record.id));

        let first = rx.recv().await.unwrap();
        assert!(matches!(*first, ServerEvent::NewMessage { .. }));
        let second = rx.recv().await.unwrap();
        assert_eq!(*second, ServerEvent::NewMessageAlert { chat_id: f.chat.id });

        f.pipeline.persistence().wait_idle().await;
        let stored = f.messages.list_page(f.chat.id, 0, 10).await.unwrap();
        assert_eq!(stored, vec![sent.record]);
    }

    #[tokio::test]
    async fn non_member_cannot_send() {
        let f = fixture().await;
        let outsider = AuthenticatedUser {
            id: UserId::generate(),
            name: "outsider".into(),
        };
        let err = f
            .pipeline
            .send_text(&outsider, f.chat.id, "hello")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_chat_is_not_found() {
        let f = fixture().await;
        let err = f
            .pipeline
            .send_text(&sender(&f), ChatId::generate(), "hello")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn partial_upload_failure_sends_nothing_and_cleans_up() {
        let f = fixture().await;
        let mut rx = online(&f.registry, f.chat.members[0]);
        f.objects.fail_on("broken.png");

        let files = vec![
            UploadFile::new("ok.png", "image/png", vec![1, 2, 3]),
            UploadFile::new("broken.png", "image/png", vec![4, 5, 6]),
        ];
        let err = f
            .pipeline
            .send_attachments(&sender(&f), f.chat.id, files)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Upload(_)));

        assert!(rx.try_recv().is_err());
        assert_eq!(f.pipeline.persistence().pending(), 0);
        assert_eq!(f.messages.count_for_chat(f.chat.id).await.unwrap(), 0);
        assert_eq!(f.objects.stored_count(), 0);
    }

    /// 上传完成的同时删除会话的对象存储
    struct DissolvingStore {
        inner: Arc<MemoryObjectStore>,
        chats: Arc<MemoryChatRepository>,
        chat: Chat,
    }

    #[async_trait]
    impl ObjectStore for DissolvingStore {
        async fn upload(&self, file: UploadFile) -> Result<Attachment, UploadError> {
            let attachment = self.inner.upload(file).await?;
            let _ = self.chats.delete(&self.chat).await;
            Ok(attachment)
        }

        async fn delete(&self, public_ids: &[String]) -> Result<(), UploadError> {
            self.inner.delete(public_ids).await
        }
    }

    #[tokio::test]
    async fn chat_deleted_during_upload_discards_files() {
        let chats = Arc::new(MemoryChatRepository::default());
        let messages = Arc::new(MemoryMessageRepository::default());
        let objects = Arc::new(MemoryObjectStore::default());
        let creator = UserId::generate();
        let chat = Chat::new_group(
            ChatId::generate(),
            "team",
            creator,
            &[UserId::generate(), UserId::generate()],
            Utc::now(),
        )
        .unwrap();
        chats.create(chat.clone()).await.unwrap();

        let (persistence, _worker) = PersistenceQueue::spawn(messages.clone(), 16);
        let pipeline = MessagePipeline::new(MessagePipelineDependencies {
            membership: MembershipResolver::new(chats.clone()),
            router: EventRouter::new(Arc::new(ConnectionRegistry::default())),
            persistence,
            object_store: Arc::new(DissolvingStore {
                inner: objects.clone(),
                chats,
                chat: chat.clone(),
            }),
            clock: Arc::new(SystemClock),
        });

        let files = vec![
            UploadFile::new("a.png", "image/png", vec![1]),
            UploadFile::new("b.png", "image/png", vec![2]),
        ];
        let author = AuthenticatedUser {
            id: creator,
            name: "creator".into(),
        };
        let err = pipeline
            .send_attachments(&author, chat.id, files)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::NotFound { .. })
        ));
        assert_eq!(objects.stored_count(), 0);
        assert_eq!(pipeline.persistence().pending(), 0);
        pipeline.persistence().wait_idle().await;
        assert_eq!(messages.count_for_chat(chat.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn too_many_attachments_is_validation_error() {
        let f = fixture().await;
        let files = (0..=MAX_ATTACHMENTS)
            .map(|i| UploadFile::new(format!("{i}.png"), "image/png", vec![0]))
            .collect();
        let err = f
            .pipeline
            .send_attachments(&sender(&f), f.chat.id, files)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::Validation { .. })
        ));
        assert_eq!(f.objects.stored_count(), 0);
    }

    #[tokio::test]
    async fn typing_is_not_echoed_to_origin() {
        let f = fixture().await;
        let typist = sender(&f);
        let (origin_tx, mut origin_rx) = mpsc::channel(4);
        let origin = ConnectionId::generate();
        f.registry.register(ConnectionHandle {
            id: origin,
            user_id: typist.id,
            sender: origin_tx,
        });
        let mut peer_rx = online(&f.registry, f.chat.members[0]);

        f.pipeline
            .typing(&typist, origin, f.chat.id, true)
            .await
            .unwrap();

        assert!(origin_rx.try_recv().is_err());
        assert_eq!(
            *peer_rx.try_recv().unwrap(),
            ServerEvent::StartTyping { chat_id: f.chat.id }
        );
        assert_eq!(f.pipeline.persistence().pending(), 0);
    }
}
