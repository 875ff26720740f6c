mod admin_service;
mod chat_service;
mod user_service;

pub use admin_service::{AdminService, AdminServiceDependencies};
pub use chat_service::{
    ChatService, ChatServiceDependencies, CreateGroupRequest, LeaveGroupOutcome,
};
pub use user_service::{
    FriendRequestResolution, LoginRequest, RegisterUserRequest, UserService,
    UserServiceDependencies,
};
