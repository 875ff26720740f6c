use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::{set_cookie, AdminSession, ADMIN_COOKIE},
    error::ApiError,
    state::AppState,
};

/// 管理后台路由
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_data))
        .route("/verify", post(verify))
        .route("/logout", get(logout))
        .route("/stats", get(dashboard))
        .route("/users", get(all_users))
        .route("/chats", get(all_chats))
        .route("/messages", get(all_messages))
}

#[derive(Debug, Deserialize)]
struct VerifyPayload {
    #[serde(rename = "secretKey")]
    secret_key: String,
}

async fn verify(
    State(state): State<AppState>,
    Json(payload): Json<VerifyPayload>,
) -> Result<(HeaderMap, Json<Value>), ApiError> {
    state.admin_service.verify(&payload.secret_key)?;
    let token = state.jwt_service.generate_admin_token()?;
    let headers = set_cookie(ADMIN_COOKIE, &token, state.jwt_service.max_age_secs())?;
    tracing::info!("管理员登录");

    Ok((
        headers,
        Json(json!({
            "success": true,
            "message": "Authenticated Successfully, Welcome BOSS",
            "token": token,
        })),
    ))
}

async fn logout(_admin: AdminSession) -> Result<(HeaderMap, Json<Value>), ApiError> {
    let headers = set_cookie(ADMIN_COOKIE, "", 0)?;
    Ok((
        headers,
        Json(json!({ "success": true, "message": "Logged Out Successfully" })),
    ))
}

async fn admin_data(_admin: AdminSession) -> Json<Value> {
    Json(json!({ "admin": true }))
}

async fn dashboard(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> Result<Json<Value>, ApiError> {
    let stats = state.admin_service.dashboard().await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}

async fn all_users(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> Result<Json<Value>, ApiError> {
    let users = state.admin_service.users().await?;
    Ok(Json(json!({ "success": true, "users": users })))
}

async fn all_chats(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> Result<Json<Value>, ApiError> {
    let chats = state.admin_service.chats().await?;
    Ok(Json(json!({ "success": true, "chats": chats })))
}

async fn all_messages(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> Result<Json<Value>, ApiError> {
    let messages = state.admin_service.messages().await?;
    Ok(Json(json!({ "success": true, "messages": messages })))
}
