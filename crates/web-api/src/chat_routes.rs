use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use application::{CreateGroupRequest, LeaveGroupOutcome, UploadFile};
use domain::{ChatId, UserId};

use crate::{auth::CurrentUser, error::ApiError, state::AppState};

/// 会话与消息路由
pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/new", post(create_group))
        .route("/my", get(my_chats))
        .route("/my/groups", get(my_groups))
        .route("/addmembers", put(add_members))
        .route("/removemember", put(remove_member))
        .route("/leave/{chat_id}", delete(leave_group))
        .route("/message", post(send_attachments))
        .route("/message/{chat_id}", get(messages))
        .route(
            "/{chat_id}",
            get(chat_details).put(rename_group).delete(delete_chat),
        )
}

#[derive(Debug, Deserialize)]
struct CreateGroupPayload {
    name: String,
    #[serde(default)]
    members: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
struct AddMembersPayload {
    #[serde(rename = "chatId")]
    chat_id: ChatId,
    #[serde(default)]
    members: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
struct RemoveMemberPayload {
    #[serde(rename = "chatId")]
    chat_id: ChatId,
    #[serde(rename = "userId")]
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
struct RenamePayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DetailsQuery {
    #[serde(default)]
    populate: bool,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u64>,
}

async fn create_group(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<CreateGroupPayload>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let chat = state
        .chat_service
        .create_group(
            current.user.id,
            CreateGroupRequest {
                name: payload.name,
                members: payload.members,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "Group Created", "chat": chat })),
    ))
}

async fn my_chats(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let chats = state.chat_service.my_chats(current.user.id).await?;
    Ok(Json(json!({ "success": true, "chats": chats })))
}

async fn my_groups(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let groups = state.chat_service.my_groups(current.user.id).await?;
    Ok(Json(json!({ "success": true, "groups": groups })))
}

async fn add_members(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<AddMembersPayload>,
) -> Result<Json<Value>, ApiError> {
    state
        .chat_service
        .add_members(current.user.id, payload.chat_id, payload.members)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Members added successfully" })))
}

async fn remove_member(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<RemoveMemberPayload>,
) -> Result<Json<Value>, ApiError> {
    state
        .chat_service
        .remove_member(current.user.id, payload.chat_id, payload.user_id)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Member removed successfully" })))
}

async fn leave_group(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .chat_service
        .leave_group(current.user.id, chat_id)
        .await?;

    let body = match outcome {
        LeaveGroupOutcome::Left { .. } => {
            json!({ "success": true, "message": "Left Group Successfully" })
        }
        LeaveGroupOutcome::Deleted { chat_id } => json!({
            "success": true,
            "message": "Group deleted",
            "deletedChatId": chat_id,
        }),
    };
    Ok(Json(body))
}

/// multipart 字段：`chatId` 与一个或多个 `files`
async fn send_attachments(
    State(state): State<AppState>,
    current: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut chat_id = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "chatId" => {
                let raw = field.text().await?;
                let id = raw
                    .trim()
                    .parse::<uuid::Uuid>()
                    .map_err(|_| ApiError::bad_request("chatId must be a valid id"))?;
                chat_id = Some(ChatId::from(id));
            }
            "files" => {
                let file_name = field.file_name().unwrap_or("file").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await?;
                files.push(UploadFile::new(file_name, content_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let chat_id = chat_id.ok_or_else(|| ApiError::bad_request("Please provide chatId"))?;
    let sent = state
        .pipeline
        .send_attachments(&current.user, chat_id, files)
        .await?;

    Ok(Json(json!({ "success": true, "message": sent.record })))
}

async fn messages(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = state
        .chat_service
        .messages(current.user.id, chat_id, query.page.unwrap_or(1))
        .await?;
    Ok(Json(json!({
        "success": true,
        "messages": page.messages,
        "totalPages": page.total_pages,
    })))
}

async fn chat_details(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<DetailsQuery>,
) -> Result<Json<Value>, ApiError> {
    let chat = state
        .chat_service
        .chat_details(current.user.id, chat_id, query.populate)
        .await?;
    Ok(Json(json!({ "success": true, "chat": chat })))
}

async fn rename_group(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(chat_id): Path<ChatId>,
    Json(payload): Json<RenamePayload>,
) -> Result<Json<Value>, ApiError> {
    state
        .chat_service
        .rename_group(current.user.id, chat_id, &payload.name)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Group renamed successfully" })))
}

async fn delete_chat(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<Value>, ApiError> {
    state
        .chat_service
        .delete_chat(current.user.id, chat_id)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Chat deleted successfully" })))
}
