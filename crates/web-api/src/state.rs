use std::sync::Arc;

use application::{
    memory::{
        MemoryChatRepository, MemoryFriendRequestRepository, MemoryMessageRepository,
        MemoryObjectStore, MemoryRevokedTokens, MemoryUserRepository,
    },
    AdminService, AdminServiceDependencies, ChatRepository, ChatService, ChatServiceDependencies,
    Clock, ConnectionLifecycle, ConnectionRegistry, EventRouter, FriendRequestRepository,
    MembershipResolver, MessagePipeline, MessagePipelineDependencies, MessageRepository,
    ObjectStore, PasswordHasher, PersistenceQueue, RevokedTokenStore, SessionPolicy, SystemClock,
    UserRepository, UserService, UserServiceDependencies,
};
use config::{AppConfig, SessionPolicyConfig};
use tokio::task::JoinHandle;

use crate::{auth::TokenAuthenticator, JwtService};

/// 外部协作者：存储、对象存储和密码哈希
#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserRepository>,
    pub chats: Arc<dyn ChatRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub requests: Arc<dyn FriendRequestRepository>,
    pub revoked_tokens: Arc<dyn RevokedTokenStore>,
    pub object_store: Arc<dyn ObjectStore>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// 内存存储 + 内存对象存储
    pub fn in_memory(password_hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            users: Arc::new(MemoryUserRepository::default()),
            chats: Arc::new(MemoryChatRepository::default()),
            messages: Arc::new(MemoryMessageRepository::default()),
            requests: Arc::new(MemoryFriendRequestRepository::default()),
            revoked_tokens: Arc::new(MemoryRevokedTokens::default()),
            object_store: Arc::new(MemoryObjectStore::default()),
            password_hasher,
            clock: Arc::new(SystemClock),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub chat_service: Arc<ChatService>,
    pub admin_service: Arc<AdminService>,
    pub pipeline: Arc<MessagePipeline>,
    pub lifecycle: Arc<ConnectionLifecycle>,
    pub registry: Arc<ConnectionRegistry>,
    pub authenticator: Arc<TokenAuthenticator>,
    pub jwt_service: Arc<JwtService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// 组装实时核心与用例服务，并启动持久化写入任务。
    ///
    /// 必须在 tokio 运行时内调用；返回的 `JoinHandle` 在所有发送端释放后结束。
    pub fn assemble(collaborators: Collaborators, config: AppConfig) -> (Self, JoinHandle<()>) {
        let policy = match config.chat.session_policy {
            SessionPolicyConfig::Single => SessionPolicy::Single,
            SessionPolicyConfig::Multi => SessionPolicy::Multi,
        };
        let registry = Arc::new(ConnectionRegistry::new(policy));
        let router = EventRouter::new(Arc::clone(&registry));
        let membership = MembershipResolver::new(Arc::clone(&collaborators.chats));

        let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
        let authenticator = Arc::new(TokenAuthenticator::new(
            Arc::clone(&jwt_service),
            Arc::clone(&collaborators.users),
            Arc::clone(&collaborators.revoked_tokens),
        ));
        let lifecycle = Arc::new(ConnectionLifecycle::new(
            authenticator.clone(),
            Arc::clone(&registry),
            config.chat.outbound_queue_capacity,
        ));

        let (persistence, worker) = PersistenceQueue::spawn(
            Arc::clone(&collaborators.messages),
            config.chat.persistence_queue_capacity,
        );

        let pipeline = Arc::new(MessagePipeline::new(MessagePipelineDependencies {
            membership: membership.clone(),
            router: router.clone(),
            persistence,
            object_store: Arc::clone(&collaborators.object_store),
            clock: Arc::clone(&collaborators.clock),
        }));

        let user_service = Arc::new(UserService::new(UserServiceDependencies {
            user_repository: Arc::clone(&collaborators.users),
            chat_repository: Arc::clone(&collaborators.chats),
            request_repository: Arc::clone(&collaborators.requests),
            revoked_tokens: Arc::clone(&collaborators.revoked_tokens),
            password_hasher: Arc::clone(&collaborators.password_hasher),
            object_store: Arc::clone(&collaborators.object_store),
            router: router.clone(),
            clock: Arc::clone(&collaborators.clock),
        }));

        let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
            chat_repository: Arc::clone(&collaborators.chats),
            user_repository: Arc::clone(&collaborators.users),
            message_repository: Arc::clone(&collaborators.messages),
            object_store: Arc::clone(&collaborators.object_store),
            membership,
            router,
            clock: Arc::clone(&collaborators.clock),
            message_page_size: config.chat.message_page_size,
        }));

        let admin_service = Arc::new(AdminService::new(AdminServiceDependencies {
            user_repository: Arc::clone(&collaborators.users),
            chat_repository: Arc::clone(&collaborators.chats),
            message_repository: Arc::clone(&collaborators.messages),
            clock: Arc::clone(&collaborators.clock),
            secret_key: config.admin.secret_key.clone(),
        }));

        let state = Self {
            user_service,
            chat_service,
            admin_service,
            pipeline,
            lifecycle,
            registry,
            authenticator,
            jwt_service,
            config: Arc::new(config),
        };
        (state, worker)
    }
}
