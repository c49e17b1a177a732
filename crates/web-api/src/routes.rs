use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use application::{
    AddMemberRequest, ConversationSummary, CreateConversationRequest, EngagementOutcome,
    IdentityResolver, MarkReadOutcome, RemoveMemberRequest, SendMessageRequest,
    UpdateConversationRequest,
};
use domain::{
    pagination::DEFAULT_PAGE_SIZE, Conversation, Message, Notification, NotificationId, Page,
    PageRequest, UserId,
};

use crate::{
    auth::{CurrentUser, OriginConnection},
    error::ApiError,
    state::AppState,
    websocket::websocket_upgrade,
};

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

impl From<PageQuery> for PageRequest {
    fn from(query: PageQuery) -> Self {
        PageRequest::new(
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
    }
}

#[derive(Debug, Deserialize)]
struct CreateConversationPayload {
    name: Option<String>,
    #[serde(default)]
    is_group: bool,
    description: Option<String>,
    #[serde(default)]
    user_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateConversationPayload {
    name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddMemberPayload {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    conversation_id: String,
    #[serde(default)]
    content: String,
    /// 图片上传服务返回的相对路径
    #[serde(alias = "image_url")]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PresenceQuery {
    /// 逗号分隔
    user_ids: String,
}

#[derive(Debug, Serialize)]
struct CountBody {
    count: u64,
}

#[derive(Debug, Serialize)]
struct UpdatedBody {
    updated: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route(
            "/conversations/{conversation_id}",
            patch(update_conversation).delete(delete_conversation),
        )
        .route("/conversations/{conversation_id}/messages", get(get_messages))
        .route("/conversations/{conversation_id}/members", post(add_member))
        .route(
            "/conversations/{conversation_id}/members/{user_id}",
            delete(remove_member),
        )
        .route("/conversations/{conversation_id}/read", post(mark_conversation_read))
        .route("/messages", post(send_message))
        .route("/notifications", get(list_notifications))
        .route("/notifications/read-all", post(mark_all_notifications_read))
        .route("/notifications/received", post(mark_all_notifications_received))
        .route("/notifications/unread-count", get(notification_unread_count))
        .route(
            "/notifications/unreceived-count",
            get(notification_unreceived_count),
        )
        .route("/notifications/{notification_id}/read", post(mark_notification_read))
        .route("/presence", get(presence_status))
        .route("/presence/online", post(presence_online))
        .route("/presence/offline", post(presence_offline))
        .route("/posts/{post_id}/like", post(toggle_post_like))
        .route(
            "/posts/{post_id}/comment-notifications",
            post(notify_comment),
        )
        .route("/pets/{pet_id}/like", post(toggle_pet_like))
        .route("/users/{user_id}/follow", post(follow_user).delete(unfollow_user))
        .route("/ws", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn create_conversation(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Json(payload): Json<CreateConversationPayload>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let mut user_ids = Vec::with_capacity(payload.user_ids.len());
    for raw in &payload.user_ids {
        user_ids.push(state.identity.locate_user(raw).await?);
    }

    let result = state
        .conversation_service
        .create_conversation(CreateConversationRequest {
            creator_id: caller,
            is_group: payload.is_group,
            user_ids,
            name: payload.name,
            description: payload.description,
        })
        .await?;

    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(result.conversation)))
}

async fn list_conversations(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<ConversationSummary>>, ApiError> {
    let page = state
        .conversation_service
        .list_conversations(&caller, query.into())
        .await?;
    Ok(Json(page))
}

async fn update_conversation(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(conversation_id): Path<String>,
    Json(payload): Json<UpdateConversationPayload>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation_id = state.identity.locate_conversation(&conversation_id).await?;
    let conversation = state
        .conversation_service
        .update_conversation(UpdateConversationRequest {
            conversation_id,
            operator_id: caller,
            name: payload.name,
            description: payload.description,
        })
        .await?;
    Ok(Json(conversation))
}

async fn delete_conversation(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(conversation_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let conversation_id = state.identity.locate_conversation(&conversation_id).await?;
    state
        .conversation_service
        .delete_conversation(&conversation_id, &caller)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_messages(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(conversation_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Message>>, ApiError> {
    let conversation_id = state.identity.locate_conversation(&conversation_id).await?;
    let page = state
        .conversation_service
        .get_messages(&conversation_id, &caller, query.into())
        .await?;
    Ok(Json(page))
}

async fn add_member(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(conversation_id): Path<String>,
    Json(payload): Json<AddMemberPayload>,
) -> Result<StatusCode, ApiError> {
    let conversation_id = state.identity.locate_conversation(&conversation_id).await?;
    let user_id = state.identity.locate_user(&payload.user_id).await?;
    state
        .conversation_service
        .add_member(AddMemberRequest {
            conversation_id,
            operator_id: caller,
            user_id,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_member(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path((conversation_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let conversation_id = state.identity.locate_conversation(&conversation_id).await?;
    // 已不存在的用户照常走幂等移除
    let target_user_id = state.identity.locate_user_or_canonical(&user_id).await?;
    state
        .conversation_service
        .remove_member(RemoveMemberRequest {
            conversation_id,
            operator_id: caller,
            target_user_id,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_conversation_read(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(conversation_id): Path<String>,
) -> Result<Json<MarkReadOutcome>, ApiError> {
    let conversation_id = state.identity.locate_conversation(&conversation_id).await?;
    let outcome = state
        .conversation_service
        .mark_read(&conversation_id, &caller)
        .await?;
    Ok(Json(outcome))
}

async fn send_message(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    OriginConnection(origin): OriginConnection,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let conversation_id = state
        .identity
        .locate_conversation(&payload.conversation_id)
        .await?;
    let message = state
        .conversation_service
        .send_message(SendMessageRequest {
            conversation_id,
            sender_id: caller,
            content: payload.content,
            image_url: payload.image,
            origin,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn list_notifications(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Notification>>, ApiError> {
    let page = state
        .notification_service
        .list(&caller, query.into())
        .await?;
    Ok(Json(page))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(notification_id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    let notification_id = NotificationId::from(IdentityResolver::resolve(&notification_id)?);
    let notification = state
        .notification_service
        .mark_read(&caller, &notification_id)
        .await?;
    Ok(Json(notification))
}

async fn mark_all_notifications_read(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
) -> Result<Json<UpdatedBody>, ApiError> {
    let updated = state.notification_service.mark_all_read(&caller).await?;
    Ok(Json(UpdatedBody { updated }))
}

async fn mark_all_notifications_received(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
) -> Result<Json<UpdatedBody>, ApiError> {
    let updated = state
        .notification_service
        .mark_all_received(&caller)
        .await?;
    Ok(Json(UpdatedBody { updated }))
}

async fn notification_unread_count(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
) -> Result<Json<CountBody>, ApiError> {
    let count = state.notification_service.unread_count(&caller).await?;
    Ok(Json(CountBody { count }))
}

async fn notification_unreceived_count(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
) -> Result<Json<CountBody>, ApiError> {
    let count = state.notification_service.unreceived_count(&caller).await?;
    Ok(Json(CountBody { count }))
}

async fn presence_online(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
) -> Result<StatusCode, ApiError> {
    state.presence.mark_online(&caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn presence_offline(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
) -> Result<StatusCode, ApiError> {
    state.presence.mark_offline(&caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn presence_status(
    State(state): State<AppState>,
    CurrentUser(_caller): CurrentUser,
    Query(query): Query<PresenceQuery>,
) -> Result<Json<BTreeMap<String, bool>>, ApiError> {
    // 结果以调用方传入的原始ID为键，旧方案ID也能对上
    let mut resolved = Vec::new();
    for raw in query.user_ids.split(',').map(str::trim).filter(|raw| !raw.is_empty()) {
        let user_id = state.identity.locate_user_or_canonical(raw).await?;
        resolved.push((raw.to_owned(), user_id));
    }
    let user_ids: Vec<UserId> = resolved.iter().map(|(_, id)| id.clone()).collect();
    let online = state.presence.batch_status(&user_ids).await?;
    let status = resolved
        .into_iter()
        .map(|(raw, id)| {
            let is_online = online.get(&id).copied().unwrap_or(false);
            (raw, is_online)
        })
        .collect();
    Ok(Json(status))
}

async fn toggle_post_like(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(post_id): Path<String>,
) -> Result<Json<EngagementOutcome>, ApiError> {
    let post_id = state.identity.locate_post(&post_id).await?;
    let outcome = state
        .engagement_service
        .toggle_post_like(&caller, &post_id)
        .await?;
    Ok(Json(outcome))
}

async fn notify_comment(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(post_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let post_id = state.identity.locate_post(&post_id).await?;
    let notification = state
        .engagement_service
        .record_comment(&caller, &post_id)
        .await?;
    Ok(Json(json!({ "notification": notification })))
}

async fn toggle_pet_like(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(pet_id): Path<String>,
) -> Result<Json<EngagementOutcome>, ApiError> {
    let pet_id = state.identity.locate_pet(&pet_id).await?;
    let outcome = state
        .engagement_service
        .toggle_pet_like(&caller, &pet_id)
        .await?;
    Ok(Json(outcome))
}

async fn follow_user(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(user_id): Path<String>,
) -> Result<Json<EngagementOutcome>, ApiError> {
    let followee = state.identity.locate_user(&user_id).await?;
    let outcome = state.engagement_service.follow(&caller, &followee).await?;
    Ok(Json(outcome))
}

async fn unfollow_user(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(user_id): Path<String>,
) -> Result<Json<EngagementOutcome>, ApiError> {
    let followee = state.identity.locate_user_or_canonical(&user_id).await?;
    let outcome = state.engagement_service.unfollow(&caller, &followee).await?;
    Ok(Json(outcome))
}
