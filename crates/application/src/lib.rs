//! 应用层实现。
//!
//! 实时核心（连接注册表、成员解析、事件路由、连接生命周期、消息接收管道）
//! 以及围绕领域模型的用例服务。外部协作者（存储、对象存储、密码哈希、身份校验）
//! 以 trait 形式注入，`memory` 模块提供内存实现。

pub mod auth;
pub mod clock;
pub mod dto;
pub mod error;
pub mod events;
pub mod membership;
pub mod memory;
pub mod password;
pub mod persistence;
pub mod pipeline;
pub mod presence;
pub mod registry;
pub mod repository;
pub mod router;
pub mod services;
pub mod storage;

pub use auth::{AuthError, AuthenticatedUser, CredentialVerifier};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ApplicationError, ApplicationResult};
pub use events::{ClientEvent, LiveMessage, LiveSender, ServerEvent};
pub use membership::MembershipResolver;
pub use password::{PasswordHasher, PasswordHasherError};
pub use persistence::PersistenceQueue;
pub use pipeline::{MessagePipeline, MessagePipelineDependencies, SentMessage};
pub use presence::{ConnectionLifecycle, ConnectionState, LiveConnection, PendingConnection};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, SessionPolicy};
pub use repository::{
    ChatRepository, FriendRequestRepository, MessageRepository, RevokedTokenStore, UserRepository,
};
pub use router::{DispatchReport, EventRouter};
pub use services::{
    AdminService, AdminServiceDependencies, ChatService, ChatServiceDependencies,
    CreateGroupRequest, FriendRequestResolution, LeaveGroupOutcome, LoginRequest,
    RegisterUserRequest, UserService, UserServiceDependencies,
};
pub use storage::{ObjectStore, UploadError, UploadFile, MAX_ATTACHMENTS};
