use std::sync::Arc;

use application::{
    ChatRepository, FriendRequestRepository, MessageRepository, RevokedTokenStore,
    UserRepository,
};
use config::DatabaseConfig;
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    password::BcryptPasswordHasher,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database url is not configured")]
    MissingDatabaseUrl,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Postgres 存储与 bcrypt 哈希的组装结果
#[derive(Clone)]
pub struct Infrastructure {
    pub storage: Arc<PgStorage>,
    pub password_hasher: Arc<BcryptPasswordHasher>,
}

impl Infrastructure {
    /// 建立连接池并执行迁移
    pub async fn connect(
        config: &DatabaseConfig,
        bcrypt_cost: u32,
    ) -> Result<Self, InfrastructureError> {
        let url = config
            .url
            .as_deref()
            .ok_or(InfrastructureError::MissingDatabaseUrl)?;
        let pool = create_pg_pool(url, config.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!(max_connections = config.max_connections, "数据库迁移完成");

        Ok(Self {
            storage: Arc::new(PgStorage::new(pool)),
            password_hasher: Arc::new(BcryptPasswordHasher::new(bcrypt_cost)),
        })
    }

    pub fn user_repository(&self) -> Arc<dyn UserRepository> {
        self.storage.user_repository.clone()
    }

    pub fn chat_repository(&self) -> Arc<dyn ChatRepository> {
        self.storage.chat_repository.clone()
    }

    pub fn message_repository(&self) -> Arc<dyn MessageRepository> {
        self.storage.message_repository.clone()
    }

    pub fn request_repository(&self) -> Arc<dyn FriendRequestRepository> {
        self.storage.request_repository.clone()
    }

    pub fn revoked_tokens(&self) -> Arc<dyn RevokedTokenStore> {
        self.storage.revoked_tokens.clone()
    }
}
