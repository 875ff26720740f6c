//! 统一配置中心
//!
//! 加载顺序：内置默认值 → `CHAT_CONFIG_FILE` 指定的 TOML 文件（可选）→ `CHAT_*` 环境变量，
//! 嵌套字段用 `__` 分隔，例如 `CHAT_JWT__SECRET`、`CHAT_CHAT__SESSION_POLICY=multi`。

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 未配置时使用内存对象存储
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    pub chat: ChatConfig,
    pub admin: AdminConfig,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

/// 数据库配置；`url` 为空时使用内存存储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Cloudinary 凭证
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionPolicyConfig {
    /// 同一用户只保留最后一条连接
    #[default]
    Single,
    /// 同一用户的所有连接都接收推送
    Multi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub message_page_size: u64,
    pub outbound_queue_capacity: usize,
    #[serde(default)]
    pub session_policy: SessionPolicyConfig,
    pub persistence_queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub secret_key: String,
}

impl Default for AppConfig {
    /// 开发环境默认值；JWT 密钥与管理员密钥在生产环境必须覆盖
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 3000,
                cors_origins: vec!["http://localhost:5173".into()],
            },
            jwt: JwtConfig {
                secret: "local-development-jwt-secret-change-me".into(),
                expiration_hours: 24,
            },
            database: DatabaseConfig::default(),
            storage: None,
            chat: ChatConfig {
                message_page_size: 15,
                outbound_queue_capacity: 64,
                session_policy: SessionPolicyConfig::Single,
                persistence_queue_capacity: 1024,
            },
            admin: AdminConfig {
                secret_key: "local-admin-secret".into(),
            },
            bcrypt_cost: 10,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("CHAT_CONFIG_FILE") {
            figment = figment.merge(Toml::file(path));
        }
        Self::extract(figment.merge(Env::prefixed("CHAT_").split("__")))
    }

    /// 从 TOML 文本解析（缺失字段取默认值）
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::string(source)),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment
            .extract()
            .map_err(|err| ConfigError::Load(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        Validate::validate(self).map_err(|err| ConfigError::InvalidServerConfig(err.to_string()))?;

        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }
        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "token expiration must be positive".to_string(),
            ));
        }

        if let Some(url) = &self.database.url {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidDatabaseUrl(
                    "Database URL cannot be empty".to_string(),
                ));
            }
            if self.database.max_connections == 0 {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "Max connections must be greater than 0".to_string(),
                ));
            }
        }

        let chat = &self.chat;
        if chat.message_page_size == 0
            || chat.outbound_queue_capacity == 0
            || chat.persistence_queue_capacity == 0
        {
            return Err(ConfigError::InvalidChatConfig(
                "page size and queue capacities must be greater than 0".to_string(),
            ));
        }

        if self.admin.secret_key.trim().is_empty() {
            return Err(ConfigError::InvalidAdminConfig(
                "admin secret key cannot be empty".to_string(),
            ));
        }

        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::InvalidServerConfig(
                "bcrypt cost must be between 4 and 31".to_string(),
            ));
        }

        Ok(())
    }

    /// 用于日志输出的脱敏描述
    pub fn sanitize(&self) -> String {
        format!(
            "server={}:{} database={} storage={} session_policy={:?} page_size={} outbound_capacity={}",
            self.server.host,
            self.server.port,
            if self.database.url.is_some() { "postgres" } else { "memory" },
            self.storage
                .as_ref()
                .map_or("memory", |storage| storage.cloud_name.as_str()),
            self.chat.session_policy,
            self.chat.message_page_size,
            self.chat.outbound_queue_capacity,
        )
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid chat configuration: {0}")]
    InvalidChatConfig(String),
    #[error("Invalid admin configuration: {0}")]
    InvalidAdminConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chat.message_page_size, 15);
        assert_eq!(config.chat.session_policy, SessionPolicyConfig::Single);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        let mut config = AppConfig::default();
        config.jwt.secret = "short".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidJwtSecret(_)));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = AppConfig::default();
        config.chat.outbound_queue_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChatConfig(_))
        ));
    }

    #[test]
    fn bcrypt_cost_range() {
        let mut config = AppConfig::default();
        config.bcrypt_cost = 3;
        assert!(config.validate().is_err());
        config.bcrypt_cost = 12;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [chat]
            session_policy = "multi"
            message_page_size = 30

            [storage]
            cloud_name = "demo"
            api_key = "key"
            api_secret = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.chat.session_policy, SessionPolicyConfig::Multi);
        assert_eq!(config.chat.message_page_size, 30);
        assert_eq!(config.chat.outbound_queue_capacity, 64);
        assert_eq!(config.storage.unwrap().cloud_name, "demo");
    }

    #[test]
    fn env_overrides_file_and_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("chat.toml", "[server]\nport = 4000\nhost = \"0.0.0.0\"\n")?;
            jail.set_env("CHAT_CONFIG_FILE", "chat.toml");
            jail.set_env("CHAT_SERVER__PORT", "5000");
            jail.set_env("CHAT_DATABASE__URL", "postgres://chat@db/chat");
            jail.set_env("CHAT_ADMIN__SECRET_KEY", "super-secret");

            let config = AppConfig::load().map_err(|err| err.to_string())?;
            assert_eq!(config.server.port, 5000);
            assert_eq!(config.server.host, "0.0.0.0");
            assert_eq!(config.database.url.as_deref(), Some("postgres://chat@db/chat"));
            assert_eq!(config.admin.secret_key, "super-secret");
            Ok(())
        });
    }
}
