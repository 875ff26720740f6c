use axum::{
    extract::{Multipart, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use application::{FriendRequestResolution, LoginRequest, RegisterUserRequest, UploadFile};
use domain::{ChatId, RequestId, User, UserId};

use crate::{
    auth::{set_cookie, CurrentUser, USER_COOKIE},
    error::ApiError,
    state::AppState,
};

/// 用户、好友与通知路由
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/new", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", get(logout))
        .route("/search", get(search))
        .route("/sendrequest", put(send_request))
        .route("/acceptrequest", put(accept_request))
        .route("/notifications", get(notifications))
        .route("/friends", get(friends))
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct SendRequestPayload {
    #[serde(rename = "userId")]
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
struct AcceptRequestPayload {
    #[serde(rename = "requestId")]
    request_id: RequestId,
    accept: bool,
}

#[derive(Debug, Deserialize)]
struct FriendsQuery {
    #[serde(rename = "chatId")]
    chat_id: Option<ChatId>,
}

/// 签发令牌并写入 Cookie
fn session_response(
    state: &AppState,
    user: &User,
) -> Result<(HeaderMap, String), ApiError> {
    let token = state.jwt_service.generate_token(user.id)?;
    let headers = set_cookie(USER_COOKIE, &token, state.jwt_service.max_age_secs())?;
    Ok((headers, token))
}

async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, HeaderMap, Json<Value>), ApiError> {
    let mut name = String::new();
    let mut username = String::new();
    let mut password = String::new();
    let mut bio = String::new();
    let mut avatar = None;

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "avatar" => {
                let file_name = field.file_name().unwrap_or("avatar").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await?;
                avatar = Some(UploadFile::new(file_name, content_type, bytes.to_vec()));
            }
            "name" => name = field.text().await?,
            "username" => username = field.text().await?,
            "password" => password = field.text().await?,
            "bio" => bio = field.text().await?,
            _ => {}
        }
    }

    let avatar = avatar.ok_or_else(|| ApiError::bad_request("Please upload avatar"))?;
    let user = state
        .user_service
        .register(RegisterUserRequest {
            name,
            username,
            password,
            bio,
            avatar,
        })
        .await?;

    let (headers, token) = session_response(&state, &user)?;
    Ok((
        StatusCode::CREATED,
        headers,
        Json(json!({ "success": true, "message": "User created", "user": user, "token": token })),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<(HeaderMap, Json<Value>), ApiError> {
    let user = state
        .user_service
        .login(LoginRequest {
            username: payload.username,
            password: payload.password,
        })
        .await?;

    let (headers, token) = session_response(&state, &user)?;
    Ok((
        headers,
        Json(json!({
            "success": true,
            "message": format!("Welcome Back, {}", user.name),
            "user": user,
            "token": token,
        })),
    ))
}

async fn me(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let user = state.user_service.profile(current.user.id).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

async fn logout(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<(HeaderMap, Json<Value>), ApiError> {
    state.user_service.logout(&current.token).await?;
    let headers = set_cookie(USER_COOKIE, "", 0)?;
    Ok((
        headers,
        Json(json!({ "success": true, "message": "Logged out successfully" })),
    ))
}

async fn search(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, ApiError> {
    let users = state
        .user_service
        .search(current.user.id, &query.name)
        .await?;
    Ok(Json(json!({ "success": true, "users": users })))
}

async fn send_request(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<SendRequestPayload>,
) -> Result<Json<Value>, ApiError> {
    state
        .user_service
        .send_friend_request(current.user.id, payload.user_id)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Friend Request Sent" })))
}

async fn accept_request(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<AcceptRequestPayload>,
) -> Result<Json<Value>, ApiError> {
    let resolution = state
        .user_service
        .respond_friend_request(current.user.id, payload.request_id, payload.accept)
        .await?;

    let body = match resolution {
        FriendRequestResolution::Accepted { chat } => json!({
            "success": true,
            "message": "Friend Request Accepted",
            "chatId": chat.id,
        }),
        FriendRequestResolution::Rejected { sender } => json!({
            "success": true,
            "message": "Friend Request Rejected",
            "senderId": sender,
        }),
    };
    Ok(Json(body))
}

async fn notifications(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let requests = state.user_service.notifications(current.user.id).await?;
    Ok(Json(json!({ "success": true, "allRequests": requests })))
}

async fn friends(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<FriendsQuery>,
) -> Result<Json<Value>, ApiError> {
    let friends = state
        .user_service
        .friends(current.user.id, query.chat_id)
        .await?;
    Ok(Json(json!({ "success": true, "friends": friends })))
}
