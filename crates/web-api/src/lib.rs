//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给应用层的实时核心与用例服务。

mod admin_routes;
mod auth;
mod chat_routes;
mod error;
mod routes;
mod state;
mod user_routes;
mod ws_connection;

pub use auth::{JwtService, TokenAuthenticator};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, Collaborators};
