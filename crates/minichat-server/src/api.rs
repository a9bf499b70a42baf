use std::net::SocketAddr;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts},
    routing::{delete, get, post, put},
    Json, Router,
};
use minichat_shared::bots;
use minichat_shared::constants::{CHANNEL_INVITE_SCHEME, MIN_PASSWORD_LEN};
use minichat_shared::password::{hash_password, verify_password};
use minichat_shared::protocol::{ChannelMessageView, MessageView};
use minichat_shared::types::{
    now_millis, ChannelEndpoint, ChannelMessage, ChatMessage, ChannelRole, ConversationId, MessageId,
    SessionToken, UserId, UserProfile,
};
use minichat_shared::MinichatError;
use minichat_store::channels::{AdminAction, ChannelUpdate, NewChannel, SettingsPatch};
use minichat_store::groups::{GroupUpdate, NewGroup};
use minichat_store::users::NewUser;
use minichat_store::users::normalize_handle;
use minichat_store::{
    Channel, ChannelSettings, ChatSummary, Group, HandleCheck, PrivateChat, SearchResults, StateGraph, User,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::router::SaveMode;
use crate::state::AppState;
use crate::ws::ws_handler;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_handler))
        // auth
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/check", post(check_username))
        .route("/api/me", get(me))
        .route("/api/search", get(search))
        // private chats
        .route("/api/chats", get(list_chats).post(open_chat))
        .route("/api/chats/{id}", delete(delete_chat))
        .route("/api/chats/{id}/clear", delete(clear_chat))
        .route("/api/chats/{id}/messages", get(chat_messages))
        .route("/api/favorites", post(save_favorite))
        // groups
        .route("/api/groups", get(list_groups).post(create_group))
        .route(
            "/api/groups/{id}",
            get(get_group).put(update_group).delete(delete_group),
        )
        .route("/api/groups/{id}/join", post(join_group))
        .route("/api/groups/{id}/leave", post(leave_group))
        .route("/api/groups/{id}/members", post(add_group_member))
        .route("/api/groups/{id}/kick", post(kick_group_member))
        .route("/api/groups/{id}/admin", post(set_group_admin))
        .route("/api/groups/{id}/messages", get(chat_messages))
        // channels
        .route("/api/channels", get(list_channels).post(create_channel))
        .route("/api/channels/{id}", get(get_channel))
        .route("/api/channels/by-username/{username}", get(channel_by_username))
        .route("/api/channels/check-username", post(check_channel_username))
        .route("/api/channels/{id}/invite", get(channel_invite))
        .route("/api/channels/{id}/settings", put(update_channel))
        .route("/api/channels/{id}/admins", post(set_channel_admin))
        .route("/api/channels/{id}/kick", post(kick_channel_member))
        .route("/api/channels/{id}/join", post(join_channel))
        .route("/api/channels/{id}/leave", post(leave_channel))
        .route("/api/channels/{id}/post", post(publish_post))
        .route("/api/channels/{id}/posts", get(channel_posts))
        .route("/api/channels/{id}/chat", get(channel_chat))
        .route("/api/channels/{id}/posts/{post}/like", post(toggle_like))
        .route(
            "/api/channels/{id}/posts/{post}/paid-reaction",
            post(paid_reaction),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Extractors and helpers
// ---------------------------------------------------------------------------

/// The user behind the `Authorization: Bearer <token>` header.
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(MinichatError::unauthorized)?;
        Ok(AuthUser(state.authenticate(token.trim()).await?))
    }
}

/// `Some(None)` for an explicit `null`, `None` for a missing field.
fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

fn success() -> Json<Value> {
    Json(json!({ "success": true }))
}

async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn message_views(state: &StateGraph, messages: &[ChatMessage]) -> Vec<MessageView> {
    messages
        .iter()
        .map(|m| MessageView {
            message: m.clone(),
            from_user: state.profile(&m.from),
        })
        .collect()
}

fn channel_views<'a>(
    state: &StateGraph,
    messages: impl Iterator<Item = &'a ChannelMessage>,
) -> Vec<ChannelMessageView> {
    messages
        .map(|m| ChannelMessageView {
            message: m.clone(),
            author: state.profile(&m.from),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    started_at: String,
    uptime_secs: i64,
    online: usize,
    active_calls: usize,
    flushes: u64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    let now = chrono::Utc::now();
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds(),
        online: state.registry.online_count().await,
        active_calls: state.calls.active_calls().await,
        flushes: state.store.flush_count(),
    })
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    name: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    user: UserProfile,
    token: SessionToken,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<AuthResponse>> {
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let password = req.password;
    let password_hash = blocking(move || hash_password(&password)).await??;

    let (user, token) = state
        .store
        .write(|s| {
            let now = now_millis();
            let user = s.create_user(
                NewUser {
                    username: req.username,
                    name: req.name,
                    password_hash,
                },
                now,
            )?;
            let token = s.create_session(&user.id, now);
            Ok::<_, MinichatError>((user, token))
        })
        .await?;
    state.persist(SaveMode::Sync).await;

    info!(user = %user.id, username = %user.username, "user registered");
    Ok(Json(AuthResponse {
        user: user.profile(),
        token,
    }))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let user = state
        .store
        .read(|s| s.user_by_username(req.username.trim()).cloned())
        .await
        .ok_or_else(|| MinichatError::not_found("User"))?;
    if user.banned {
        return Err(MinichatError::forbidden("Account is banned").into());
    }

    let (password, stored) = (req.password, user.password_hash.clone());
    if !blocking(move || verify_password(&password, &stored)).await? {
        return Err(MinichatError::Auth("Wrong password".into()).into());
    }

    let token = state
        .store
        .write(|s| s.create_session(&user.id, now_millis()))
        .await;
    state.persist(SaveMode::Sync).await;

    info!(user = %user.id, "user logged in");
    Ok(Json(AuthResponse {
        user: user.profile(),
        token,
    }))
}

async fn me(AuthUser(user): AuthUser) -> Json<UserProfile> {
    Json(user.profile())
}

#[derive(Deserialize)]
struct CheckUsernameRequest {
    #[serde(default)]
    username: String,
}

#[derive(Serialize)]
struct CheckUsernameResponse {
    exists: bool,
    error: Option<String>,
}

/// Pre-registration check against users and bots.
async fn check_username(
    State(state): State<AppState>,
    Json(req): Json<CheckUsernameRequest>,
) -> Json<CheckUsernameResponse> {
    let username = normalize_handle(&req.username);
    let exists = !username.is_empty() && state.store.read(|s| s.username_taken(&username)).await;
    Json(CheckUsernameResponse {
        exists,
        error: exists.then(|| "Username is taken".to_string()),
    })
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Query(query): Query<SearchQuery>,
) -> Json<SearchResults> {
    Json(state.store.read(|s| s.search(&query.q)).await)
}

// ---------------------------------------------------------------------------
// Private chats
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenChatRequest {
    /// User id, username or bot id.
    user_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenChatResponse {
    #[serde(flatten)]
    chat: PrivateChat,
    other: UserProfile,
    created: bool,
}

async fn list_chats(State(state): State<AppState>, AuthUser(user): AuthUser) -> Json<Vec<ChatSummary>> {
    Json(state.store.read(|s| s.chat_list(&user.id)).await)
}

async fn open_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<OpenChatRequest>,
) -> ApiResult<Json<OpenChatResponse>> {
    let (chat, other, created) = state
        .store
        .write(|s| {
            let other = match bots::find(&req.user_id) {
                Some(bot) => bot.profile(),
                None => s
                    .find_user(&req.user_id)
                    .map(User::profile)
                    .ok_or_else(|| MinichatError::not_found("User"))?,
            };
            if other.id == user.id {
                return Err(MinichatError::invalid("Cannot open a chat with yourself"));
            }
            let (chat, created) = s.open_private_chat(&user.id, &other.id, now_millis());
            Ok::<_, MinichatError>((chat, other, created))
        })
        .await?;
    if created {
        state.persist(SaveMode::Sync).await;
    }
    Ok(Json(OpenChatResponse { chat, other, created }))
}

async fn delete_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Value>> {
    state.router.delete_chat(&id, &user.id).await?;
    Ok(success())
}

async fn clear_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Value>> {
    state.store.write(|s| s.clear_messages(&id, &user.id)).await?;
    state.persist(SaveMode::Debounced).await;
    Ok(success())
}

/// Messages of a private chat or group, in insertion order.
async fn chat_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Vec<MessageView>>> {
    let views = state
        .store
        .read(|s| s.messages_for(&id, &user.id).map(|m| message_views(s, m)))
        .await?;
    Ok(Json(views))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteRequest {
    chat_id: ConversationId,
    message_id: MessageId,
}

async fn save_favorite(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<FavoriteRequest>,
) -> ApiResult<Json<Value>> {
    let (saved, chat_created) = state
        .store
        .write(|s| s.save_to_favorites(&user.id, &req.chat_id, &req.message_id, now_millis()))
        .await?
        .ok_or_else(|| MinichatError::not_found("Message"))?;
    // A new conversation is durable before it is acknowledged.
    let mode = if chat_created { SaveMode::Sync } else { SaveMode::Debounced };
    state.persist(mode).await;
    Ok(Json(json!({ "success": true, "message": saved })))
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    /// Initial members besides the creator.
    #[serde(default)]
    members: Vec<UserId>,
}

#[derive(Deserialize)]
struct UpdateGroupRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    avatar: Option<Option<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberRequest {
    user_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupAdminRequest {
    user_id: UserId,
    admin: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupView {
    #[serde(flatten)]
    group: Group,
    member_profiles: Vec<UserProfile>,
}

fn group_view(state: &StateGraph, group: Group) -> GroupView {
    GroupView {
        member_profiles: state.member_profiles(&group.members),
        group,
    }
}

async fn list_groups(State(state): State<AppState>, AuthUser(user): AuthUser) -> Json<Vec<Group>> {
    Json(
        state
            .store
            .read(|s| s.groups_for(&user.id).into_iter().cloned().collect())
            .await,
    )
}

async fn create_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<Json<GroupView>> {
    let (view, invited) = state
        .store
        .write(|s| {
            let group = s.create_group(
                &user.id,
                NewGroup {
                    name: req.name,
                    description: req.description,
                    avatar: req.avatar,
                },
                now_millis(),
            )?;
            let mut invited = Vec::new();
            for member in req.members.iter().filter(|m| **m != user.id) {
                if let Ok(true) = s.add_group_member(&group.id, &user.id, member) {
                    invited.push(member.clone());
                }
            }
            let group = s.group(&group.id).cloned().unwrap_or(group);
            Ok::<_, MinichatError>((group_view(s, group), invited))
        })
        .await?;
    state.persist(SaveMode::Sync).await;

    for member in &invited {
        state
            .router
            .group_invite(member, &view.group.id, view.group.name.clone())
            .await;
    }
    info!(group = %view.group.id, owner = %user.id, "group created");
    Ok(Json(view))
}

async fn get_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<GroupView>> {
    let view = state
        .store
        .read(|s| {
            s.group(&id)
                .filter(|g| g.is_member(&user.id))
                .cloned()
                .map(|g| group_view(s, g))
        })
        .await
        .ok_or_else(|| MinichatError::not_found("Group"))?;
    Ok(Json(view))
}

async fn update_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
    Json(req): Json<UpdateGroupRequest>,
) -> ApiResult<Json<Group>> {
    let update = GroupUpdate {
        name: req.name,
        description: req.description,
        avatar: req.avatar,
    };
    let group = state.store.write(|s| s.update_group(&id, &user.id, update)).await?;
    state.persist(SaveMode::Debounced).await;
    Ok(Json(group))
}

async fn delete_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Value>> {
    let (_, ended_call) = state.store.write(|s| s.delete_group(&id, &user.id)).await?;
    state.persist(SaveMode::Debounced).await;
    if let Some(roster) = ended_call {
        state.calls.announce(&roster).await;
    }
    info!(group = %id, "group deleted");
    Ok(success())
}

async fn join_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Group>> {
    let group = state
        .store
        .write(|s| {
            s.join_group(&id, &user.id)?;
            s.group(&id).cloned().ok_or_else(|| MinichatError::not_found("Group"))
        })
        .await?;
    state.persist(SaveMode::Debounced).await;
    Ok(Json(group))
}

async fn leave_group(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Value>> {
    let roster = state.store.write(|s| s.leave_group(&id, &user.id)).await?;
    state.persist(SaveMode::Debounced).await;
    if let Some(roster) = roster {
        state.calls.announce(&roster).await;
    }
    Ok(success())
}

async fn add_group_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
    Json(req): Json<MemberRequest>,
) -> ApiResult<Json<Value>> {
    let (added, group_name) = state
        .store
        .write(|s| {
            let added = s.add_group_member(&id, &user.id, &req.user_id)?;
            let name = s.group(&id).map(|g| g.name.clone()).unwrap_or_default();
            Ok::<_, MinichatError>((added, name))
        })
        .await?;
    if added {
        state.persist(SaveMode::Debounced).await;
        state.router.group_invite(&req.user_id, &id, group_name).await;
    }
    Ok(Json(json!({ "success": true, "added": added })))
}

async fn kick_group_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
    Json(req): Json<MemberRequest>,
) -> ApiResult<Json<Value>> {
    let roster = state
        .store
        .write(|s| s.kick_group_member(&id, &user.id, &req.user_id))
        .await?;
    state.persist(SaveMode::Debounced).await;
    if let Some(roster) = roster {
        state.calls.announce(&roster).await;
    }
    Ok(success())
}

async fn set_group_admin(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
    Json(req): Json<GroupAdminRequest>,
) -> ApiResult<Json<Value>> {
    state
        .store
        .write(|s| s.set_group_admin(&id, &user.id, &req.user_id, req.admin))
        .await?;
    state.persist(SaveMode::Debounced).await;
    Ok(success())
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateChannelRequest {
    name: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct UpdateChannelRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    username: Option<Option<String>>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    avatar: Option<Option<String>>,
    #[serde(default)]
    settings: Option<SettingsPatch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelAdminRequest {
    user_id: UserId,
    action: AdminAction,
}

#[derive(Deserialize)]
struct PostRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Deserialize)]
struct PaidReactionRequest {
    #[serde(default)]
    emoji: Option<String>,
}

/// Channel metadata without its message sequences.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelView {
    id: ConversationId,
    name: String,
    username: Option<String>,
    description: String,
    avatar: Option<String>,
    owner_id: UserId,
    member_count: usize,
    admins: Vec<UserId>,
    role: Option<ChannelRole>,
    settings: ChannelSettings,
    invite_link: Option<String>,
    created_at: i64,
}

fn channel_role(channel: &Channel, user: &UserId) -> Option<ChannelRole> {
    if channel.owner_id == *user {
        Some(ChannelRole::Owner)
    } else if channel.admins.contains(user) {
        Some(ChannelRole::Admin)
    } else if channel.is_member(user) {
        Some(ChannelRole::Member)
    } else {
        None
    }
}

impl ChannelView {
    fn new(channel: &Channel, viewer: &UserId) -> Self {
        Self {
            role: channel_role(channel, viewer),
            ..Self::public(channel)
        }
    }

    /// View for a visitor without a session.
    fn public(channel: &Channel) -> Self {
        Self {
            id: channel.id.clone(),
            name: channel.name.clone(),
            username: channel.username.clone(),
            description: channel.description.clone(),
            avatar: channel.avatar.clone(),
            owner_id: channel.owner_id.clone(),
            member_count: channel.members.len(),
            admins: channel.admins.clone(),
            role: None,
            settings: channel.settings.clone(),
            invite_link: channel
                .username
                .as_ref()
                .map(|u| format!("{CHANNEL_INVITE_SCHEME}{u}")),
            created_at: channel.created_at,
        }
    }
}

/// Look a channel up by id, falling back to its public handle.
fn find_channel<'a>(state: &'a StateGraph, id_or_handle: &str) -> Option<&'a Channel> {
    state
        .channel(&ConversationId::from(id_or_handle))
        .or_else(|| state.channel_by_username(id_or_handle))
}

async fn list_channels(State(state): State<AppState>, AuthUser(user): AuthUser) -> Json<Vec<ChannelView>> {
    Json(
        state
            .store
            .read(|s| {
                s.channels_for(&user.id)
                    .into_iter()
                    .map(|c| ChannelView::new(c, &user.id))
                    .collect()
            })
            .await,
    )
}

async fn create_channel(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateChannelRequest>,
) -> ApiResult<Json<ChannelView>> {
    let channel = state
        .store
        .write(|s| {
            s.create_channel(
                &user.id,
                NewChannel {
                    name: req.name,
                    username: req.username,
                    description: req.description,
                    avatar: req.avatar,
                },
                now_millis(),
            )
        })
        .await?;
    state.persist(SaveMode::Sync).await;
    info!(channel = %channel.id, owner = %user.id, "channel created");
    Ok(Json(ChannelView::new(&channel, &user.id)))
}

async fn get_channel(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ChannelView>> {
    let view = state
        .store
        .read(|s| find_channel(s, &id).map(|c| ChannelView::new(c, &user.id)))
        .await
        .ok_or_else(|| MinichatError::not_found("Channel"))?;
    Ok(Json(view))
}

#[derive(Serialize)]
struct ChannelMember {
    #[serde(flatten)]
    profile: UserProfile,
    role: Option<ChannelRole>,
}

/// Public channel page reached through its handle.
#[derive(Serialize)]
struct ChannelPage {
    #[serde(flatten)]
    channel: ChannelView,
    members: Vec<ChannelMember>,
}

async fn channel_by_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<ChannelPage>> {
    let page = state
        .store
        .read(|s| {
            s.channel_by_username(&username).map(|c| ChannelPage {
                channel: ChannelView::public(c),
                members: c
                    .members
                    .iter()
                    .filter_map(|id| s.user(id))
                    .map(|u| ChannelMember {
                        profile: u.profile(),
                        role: channel_role(c, &u.id),
                    })
                    .collect(),
            })
        })
        .await
        .ok_or_else(|| MinichatError::not_found("Channel"))?;
    Ok(Json(page))
}

async fn check_channel_username(
    State(state): State<AppState>,
    Json(req): Json<CheckUsernameRequest>,
) -> Json<HandleCheck> {
    Json(state.store.read(|s| s.check_channel_handle(&req.username)).await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InviteResponse {
    invite: String,
    channel_id: ConversationId,
}

async fn channel_invite(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<InviteResponse>> {
    if state.store.read(|s| s.channel(&id).is_none()).await {
        return Err(MinichatError::not_found("Channel").into());
    }
    Ok(Json(InviteResponse {
        invite: format!("{CHANNEL_INVITE_SCHEME}{id}"),
        channel_id: id,
    }))
}

async fn update_channel(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
    Json(req): Json<UpdateChannelRequest>,
) -> ApiResult<Json<ChannelView>> {
    let update = ChannelUpdate {
        name: req.name,
        username: req.username,
        description: req.description,
        avatar: req.avatar,
        settings: req.settings,
    };
    let channel = state.store.write(|s| s.update_channel(&id, &user.id, update)).await?;
    state.persist(SaveMode::Sync).await;
    Ok(Json(ChannelView::new(&channel, &user.id)))
}

async fn set_channel_admin(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
    Json(req): Json<ChannelAdminRequest>,
) -> ApiResult<Json<Value>> {
    let admins = state
        .store
        .write(|s| s.set_channel_admin(&id, &user.id, &req.user_id, req.action))
        .await?;
    state.persist(SaveMode::Sync).await;
    Ok(Json(json!({ "success": true, "admins": admins })))
}

async fn kick_channel_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
    Json(req): Json<MemberRequest>,
) -> ApiResult<Json<Value>> {
    state
        .store
        .write(|s| s.kick_channel_member(&id, &user.id, &req.user_id))
        .await?;
    state.persist(SaveMode::Sync).await;
    Ok(success())
}

async fn join_channel(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<ChannelView>> {
    let channel = state.store.write(|s| s.join_channel(&id, &user.id)).await?;
    state.persist(SaveMode::Sync).await;
    Ok(Json(ChannelView::new(&channel, &user.id)))
}

async fn leave_channel(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Value>> {
    state.store.write(|s| s.leave_channel(&id, &user.id)).await?;
    state.persist(SaveMode::Sync).await;
    Ok(success())
}

async fn publish_post(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
    Json(req): Json<PostRequest>,
) -> ApiResult<Json<ChannelMessage>> {
    let post = state
        .router
        .channel_message(&user.id, &id, ChannelEndpoint::Post, req.text, req.image, SaveMode::Sync)
        .await?;
    Ok(Json(post))
}

/// Posts, newest first.
async fn channel_posts(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Vec<ChannelMessageView>>> {
    let posts = state
        .store
        .read(|s| s.channel(&id).map(|c| channel_views(s, c.posts.iter().rev())))
        .await
        .ok_or_else(|| MinichatError::not_found("Channel"))?;
    Ok(Json(posts))
}

/// Discussion chat in order. Members only.
async fn channel_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Vec<ChannelMessageView>>> {
    let chat = state
        .store
        .read(|s| {
            s.channel(&id)
                .filter(|c| c.is_member(&user.id))
                .map(|c| channel_views(s, c.chat.iter()))
        })
        .await
        .ok_or_else(|| MinichatError::not_found("Channel"))?;
    Ok(Json(chat))
}

async fn toggle_like(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((id, post)): Path<(ConversationId, MessageId)>,
) -> ApiResult<Json<Value>> {
    let (likes, liked) = state
        .store
        .write(|s| s.toggle_like(&id, &post, &user.id))
        .await?;
    state.persist(SaveMode::Debounced).await;
    Ok(Json(json!({ "likes": likes, "liked": liked })))
}

async fn paid_reaction(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((id, post)): Path<(ConversationId, MessageId)>,
    Json(req): Json<PaidReactionRequest>,
) -> ApiResult<Json<Value>> {
    let receipt = state
        .store
        .write(|s| s.add_paid_reaction(&id, &post, &user.id, req.emoji, now_millis()))
        .await?;
    state.persist(SaveMode::Sync).await;
    Ok(Json(json!({
        "success": true,
        "balance": receipt.balance,
        "totalReactions": receipt.total_reactions,
    })))
}
