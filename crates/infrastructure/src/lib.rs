//! 基础设施层实现。
//!
//! 提供 Postgres 仓储、bcrypt 密码哈希和 Cloudinary 对象存储适配器，实现应用层定义的接口。

pub mod builder;
pub mod migrations;
pub mod object_store;
pub mod password;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use object_store::CloudinaryObjectStore;
pub use password::BcryptPasswordHasher;
pub use repository::{
    create_pg_pool, PgChatRepository, PgFriendRequestRepository, PgMessageRepository,
    PgRevokedTokenStore, PgStorage, PgUserRepository,
};
