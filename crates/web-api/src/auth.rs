//! JWT 认证和授权模块
//!
//! 提供 JWT token 生成、验证，令牌提取（Cookie / Bearer / 查询参数）以及请求提取器

use std::sync::Arc;

use application::{AuthError, AuthenticatedUser, CredentialVerifier, RevokedTokenStore, UserRepository};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue},
};
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// 用户令牌所在的 Cookie
pub const USER_COOKIE: &str = "token";
/// 管理员令牌所在的 Cookie
pub const ADMIN_COOKIE: &str = "admintoken";

const ADMIN_SUBJECT: &str = "admin";

/// 用户 JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub exp: i64, // 过期时间 (Unix timestamp)
    /// 令牌唯一标识，保证同一秒内签发的令牌也不相同
    pub jti: Uuid,
}

/// 管理员 JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub exp: i64,
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 令牌有效期（秒），同时用作 Cookie 的 Max-Age
    pub fn max_age_secs(&self) -> i64 {
        self.config.expiration_hours * 3600
    }

    fn expiry(&self) -> i64 {
        (chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours)).timestamp()
    }

    /// 生成用户 JWT token
    pub fn generate_token(&self, user_id: UserId) -> Result<String, ApiError> {
        let claims = Claims {
            user_id: user_id.into(),
            exp: self.expiry(),
            jti: Uuid::new_v4(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {}", err)))
    }

    /// 验证并解析用户 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(classify)
    }

    pub fn generate_admin_token(&self) -> Result<String, ApiError> {
        let claims = AdminClaims {
            sub: ADMIN_SUBJECT.to_string(),
            exp: self.expiry(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {}", err)))
    }

    pub fn verify_admin_token(&self, token: &str) -> Result<AdminClaims, AuthError> {
        let claims = decode::<AdminClaims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(classify)?;
        if claims.sub != ADMIN_SUBJECT {
            return Err(AuthError::Invalid);
        }
        Ok(claims)
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Invalid,
    }
}

/// 基于 JWT 的身份校验：签名与有效期、注销列表、用户存在性
pub struct TokenAuthenticator {
    jwt: Arc<JwtService>,
    users: Arc<dyn UserRepository>,
    revoked: Arc<dyn RevokedTokenStore>,
}

impl TokenAuthenticator {
    pub fn new(
        jwt: Arc<JwtService>,
        users: Arc<dyn UserRepository>,
        revoked: Arc<dyn RevokedTokenStore>,
    ) -> Self {
        Self { jwt, users, revoked }
    }
}

#[async_trait]
impl CredentialVerifier for TokenAuthenticator {
    async fn verify(&self, credential: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = self.jwt.verify_token(credential)?;

        let revoked = self.revoked.is_revoked(credential).await.map_err(|err| {
            tracing::error!(error = %err, "查询注销列表失败");
            AuthError::Invalid
        })?;
        if revoked {
            return Err(AuthError::Revoked);
        }

        let user = self
            .users
            .find_by_id(UserId::from(claims.user_id))
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "查询用户失败");
                AuthError::Invalid
            })?
            .ok_or(AuthError::UnknownUser)?;

        Ok(AuthenticatedUser {
            id: user.id,
            name: user.name,
        })
    }
}

/// 读取指定名称的 Cookie
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// 按 Cookie、Authorization 头、查询参数的顺序提取用户令牌
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    cookie_value(headers, USER_COOKIE)
        .or_else(|| bearer_token(headers))
        .or_else(|| {
            query_token
                .filter(|token| !token.is_empty())
                .map(str::to_string)
        })
}

/// 构造 Set-Cookie 头；`max_age` 为 0 时清除 Cookie
pub fn set_cookie(name: &str, value: &str, max_age: i64) -> Result<HeaderMap, ApiError> {
    let cookie = format!("{name}={value}; Max-Age={max_age}; Path=/; HttpOnly; SameSite=None; Secure");
    let value = HeaderValue::from_str(&cookie)
        .map_err(|err| ApiError::internal_server_error(format!("invalid cookie: {err}")))?;
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, value);
    Ok(headers)
}

/// 已登录的用户
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: AuthenticatedUser,
    pub token: String,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers, None).ok_or(AuthError::Missing)?;
        let user = state.authenticator.verify(&token).await?;
        Ok(Self { user, token })
    }
}

/// 已通过密钥校验的管理员
#[derive(Debug, Clone)]
pub struct AdminSession;

impl FromRequestParts<AppState> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = cookie_value(&parts.headers, ADMIN_COOKIE)
            .or_else(|| bearer_token(&parts.headers))
            .ok_or(AuthError::Missing)?;
        state.jwt_service.verify_admin_token(&token)?;
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt() -> JwtService {
        JwtService::new(JwtConfig {
            secret: "unit-test-secret-with-enough-length!!".into(),
            expiration_hours: 1,
        })
    }

    #[test]
    fn user_token_round_trip() {
        let service = jwt();
        let user_id = UserId::generate();
        let token = service.generate_token(user_id).unwrap();
        let claims = service.verify_token(&token).unwrap();
        assert_eq!(UserId::from(claims.user_id), user_id);
    }

    #[test]
    fn tokens_are_unique_per_issue() {
        let service = jwt();
        let user_id = UserId::generate();
        assert_ne!(
            service.generate_token(user_id).unwrap(),
            service.generate_token(user_id).unwrap()
        );
    }

    #[test]
    fn expired_token_is_classified() {
        let service = JwtService::new(JwtConfig {
            secret: "unit-test-secret-with-enough-length!!".into(),
            expiration_hours: -2,
        });
        let token = service.generate_token(UserId::generate()).unwrap();
        assert_eq!(service.verify_token(&token).unwrap_err(), AuthError::Expired);
    }

    #[test]
    fn user_token_is_not_an_admin_token() {
        let service = jwt();
        let token = service.generate_token(UserId::generate()).unwrap();
        assert!(service.verify_admin_token(&token).is_err());

        let admin = service.generate_admin_token().unwrap();
        assert!(service.verify_admin_token(&admin).is_ok());
        assert!(service.verify_token(&admin).is_err());
    }

    #[test]
    fn token_extraction_order() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers, Some("q")), Some("q".to_string()));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer b"));
        assert_eq!(extract_token(&headers, Some("q")), Some("b".to_string()));

        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; token=c; admintoken=a"),
        );
        assert_eq!(extract_token(&headers, Some("q")), Some("c".to_string()));
        assert_eq!(cookie_value(&headers, ADMIN_COOKIE), Some("a".to_string()));
    }
}
