use std::collections::HashSet;
use std::sync::Arc;

use domain::{
    Chat, ChatId, DomainError, FriendRequest, RepositoryError, RequestId, User, UserId,
    UserSummary,
};

use crate::{
    auth::AuthError,
    clock::Clock,
    dto::NotificationView,
    error::{ApplicationError, ApplicationResult},
    events::ServerEvent,
    password::{validate_password, PasswordHasher},
    repository::{ChatRepository, FriendRequestRepository, RevokedTokenStore, UserRepository},
    router::EventRouter,
    storage::{ObjectStore, UploadFile},
};

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub name: String,
    pub username: String,
    pub password: String,
    pub bio: String,
    pub avatar: UploadFile,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// 好友请求处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FriendRequestResolution {
    Accepted { chat: Chat },
    Rejected { sender: UserId },
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub chat_repository: Arc<dyn ChatRepository>,
    pub request_repository: Arc<dyn FriendRequestRepository>,
    pub revoked_tokens: Arc<dyn RevokedTokenStore>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub object_store: Arc<dyn ObjectStore>,
    pub router: EventRouter,
    pub clock: Arc<dyn Clock>,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    /// 注册：先做廉价校验，再上传头像；头像上传失败则注册失败
    pub async fn register(&self, request: RegisterUserRequest) -> ApplicationResult<User> {
        for (field, value) in [
            ("name", &request.name),
            ("username", &request.username),
            ("bio", &request.bio),
        ] {
            if value.trim().is_empty() {
                return Err(DomainError::validation(field, "is required").into());
            }
        }
        validate_password(&request.password)?;

        let username = request.username.trim().to_owned();
        if self
            .deps
            .user_repository
            .find_by_username(&username)
            .await?
            .is_some()
        {
            return Err(DomainError::conflict("username already taken").into());
        }

        let password = self.deps.password_hasher.hash(&request.password).await?;
        let avatar = self.deps.object_store.upload(request.avatar).await?;

        let created: ApplicationResult<User> = match User::register(
            UserId::generate(),
            request.name,
            username,
            request.bio,
            password,
            avatar.clone(),
            self.deps.clock.now(),
        ) {
            Ok(user) => self.deps.user_repository.create(user).await.map_err(Into::into),
            Err(err) => Err(ApplicationError::from(err)),
        };

        match created {
            Ok(user) => {
                tracing::info!(user_id = %user.id, username = %user.username, "用户注册成功");
                Ok(user)
            }
            Err(err) => {
                // 用户未落库，头像不会再被引用
                if let Err(cleanup) = self
                    .deps
                    .object_store
                    .delete(std::slice::from_ref(&avatar.public_id))
                    .await
                {
                    tracing::warn!(error = %cleanup, "清理头像失败");
                }
                Err(err)
            }
        }
    }

    pub async fn login(&self, request: LoginRequest) -> ApplicationResult<User> {
        let user = self
            .deps
            .user_repository
            .find_by_username(request.username.trim())
            .await?
            .ok_or(AuthError::BadLogin)?;

        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, &user.password)
            .await?;
        if !password_ok {
            return Err(AuthError::BadLogin.into());
        }

        tracing::info!(user_id = %user.id, "用户登录");
        Ok(user)
    }

    pub async fn profile(&self, user_id: UserId) -> ApplicationResult<User> {
        self.find_user(user_id).await
    }

    /// 注销令牌；之后用该令牌校验会得到 `Revoked`
    pub async fn logout(&self, token: &str) -> ApplicationResult<()> {
        self.deps.revoked_tokens.revoke(token).await?;
        Ok(())
    }

    /// 按名称或用户名搜索，排除自己和已经是好友（已有私聊）的用户
    pub async fn search(
        &self,
        actor: UserId,
        query: &str,
    ) -> ApplicationResult<Vec<UserSummary>> {
        let mut exclude = self.friend_ids(actor).await?;
        exclude.push(actor);

        let users = self
            .deps
            .user_repository
            .search(query.trim(), &exclude)
            .await?;
        Ok(users.iter().map(User::summary).collect())
    }

    pub async fn send_friend_request(
        &self,
        actor: UserId,
        target: UserId,
    ) -> ApplicationResult<FriendRequest> {
        if actor == target {
            return Err(DomainError::validation(
                "userId",
                "cannot send a friend request to yourself",
            )
            .into());
        }
        self.find_user(target).await?;

        if self
            .deps
            .request_repository
            .find_between(actor, target)
            .await?
            .is_some()
        {
            return Err(DomainError::conflict("friend request already exists").into());
        }

        let request =
            FriendRequest::new(RequestId::generate(), actor, target, self.deps.clock.now())?;
        let request = self.deps.request_repository.create(request).await?;

        self.deps.router.dispatch(&[target], ServerEvent::NewRequest);
        tracing::info!(sender = %actor, receiver = %target, request_id = %request.id, "好友请求已发送");
        Ok(request)
    }

    /// 只有接收者可以处理请求。接受时创建私聊并通知双方刷新会话列表。
    pub async fn respond_friend_request(
        &self,
        actor: UserId,
        request_id: RequestId,
        accept: bool,
    ) -> ApplicationResult<FriendRequestResolution> {
        let request = self
            .deps
            .request_repository
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| DomainError::not_found("friend request"))?;

        if request.receiver != actor {
            return Err(DomainError::permission_denied("respond to this request").into());
        }

        if !accept {
            self.claim_request(request.id).await?;
            tracing::info!(request_id = %request.id, "好友请求已拒绝");
            return Ok(FriendRequestResolution::Rejected {
                sender: request.sender,
            });
        }

        let sender = self.find_user(request.sender).await?;
        let receiver = self.find_user(request.receiver).await?;
        let chat = Chat::new_direct(
            ChatId::generate(),
            format!("{}-{}", sender.name, receiver.name),
            sender.id,
            receiver.id,
            self.deps.clock.now(),
        )?;
        // 先删除请求再建会话，同一请求被并发接受时只有一方建出私聊
        self.claim_request(request.id).await?;
        let chat = self.deps.chat_repository.create(chat).await?;

        self.deps
            .router
            .dispatch(&chat.members, ServerEvent::RefetchChats);
        tracing::info!(request_id = %request.id, chat_id = %chat.id, "好友请求已接受");
        Ok(FriendRequestResolution::Accepted { chat })
    }

    pub async fn notifications(
        &self,
        actor: UserId,
    ) -> ApplicationResult<Vec<NotificationView>> {
        let requests = self
            .deps
            .request_repository
            .list_for_receiver(actor)
            .await?;
        let sender_ids: Vec<UserId> = requests.iter().map(|request| request.sender).collect();
        let senders = self.deps.user_repository.find_many(&sender_ids).await?;

        Ok(requests
            .into_iter()
            .filter_map(|request| {
                senders
                    .iter()
                    .find(|user| user.id == request.sender)
                    .map(|sender| NotificationView {
                        id: request.id,
                        sender: sender.summary(),
                    })
            })
            .collect())
    }

    /// 好友即私聊的另一方；指定 `chat_id` 时只返回尚未加入该会话的好友
    pub async fn friends(
        &self,
        actor: UserId,
        chat_id: Option<ChatId>,
    ) -> ApplicationResult<Vec<UserSummary>> {
        let friend_ids = self.friend_ids(actor).await?;
        let mut friends = self.deps.user_repository.find_many(&friend_ids).await?;

        if let Some(chat_id) = chat_id {
            let chat = self
                .deps
                .chat_repository
                .find_by_id(chat_id)
                .await?
                .ok_or_else(|| DomainError::not_found("chat"))?;
            friends.retain(|friend| !chat.is_member(friend.id));
        }

        Ok(friends.iter().map(User::summary).collect())
    }

    async fn friend_ids(&self, actor: UserId) -> ApplicationResult<Vec<UserId>> {
        let chats = self.deps.chat_repository.list_for_member(actor).await?;
        let mut seen = HashSet::new();
        Ok(chats
            .iter()
            .filter(|chat| !chat.is_group)
            .filter_map(|chat| chat.other_member(actor))
            .filter(|id| seen.insert(*id))
            .collect())
    }

    async fn claim_request(&self, request_id: RequestId) -> ApplicationResult<()> {
        match self.deps.request_repository.delete(request_id).await {
            Err(RepositoryError::NotFound) => {
                Err(DomainError::not_found("friend request").into())
            }
            other => Ok(other?),
        }
    }

    async fn find_user(&self, user_id: UserId) -> ApplicationResult<User> {
        self.deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("user").into())
    }
}
