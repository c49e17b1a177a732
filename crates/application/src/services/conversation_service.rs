use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use domain::{
    Conversation, ConversationId, DomainError, Message, Page, PageRequest, UserId, UserProfile,
};
use serde::Serialize;

use crate::{
    broadcaster::{
        ConnectionId, EventPublisher, Publication, RealtimeEvent, SubscriptionControl, Topic,
    },
    error::ApplicationError,
    membership::MembershipStore,
    message_log::MessageLog,
    presence::PresenceTracker,
    repository::UserDirectory,
    retry::retry_read_once,
};

#[derive(Debug, Clone)]
pub struct CreateConversationRequest {
    pub creator_id: UserId,
    pub is_group: bool,
    pub user_ids: Vec<UserId>,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub image_url: Option<String>,
    /// 发起请求的实时连接，不会收到自己消息的回显
    pub origin: Option<ConnectionId>,
}

#[derive(Debug, Clone)]
pub struct AddMemberRequest {
    pub conversation_id: ConversationId,
    pub operator_id: UserId, // 操作者，必须是创建者
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct RemoveMemberRequest {
    pub conversation_id: ConversationId,
    pub operator_id: UserId,    // 操作者：创建者或本人
    pub target_user_id: UserId, // 被移除的用户
}

#[derive(Debug, Clone)]
pub struct UpdateConversationRequest {
    pub conversation_id: ConversationId,
    pub operator_id: UserId,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationCreated {
    pub conversation: Conversation,
    /// 私聊已存在时为 `false`
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberStatus {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub last_message: Option<Message>,
    pub members: Vec<MemberStatus>,
    pub unread_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarkReadOutcome {
    pub marked: u64,
    pub unread_count: u64,
}

pub struct ConversationServiceDependencies {
    pub membership: MembershipStore,
    pub messages: MessageLog,
    pub presence: PresenceTracker,
    pub users: Arc<dyn UserDirectory>,
    pub publisher: Arc<dyn EventPublisher>,
    /// 成员被移除或会话删除时收回实时订阅
    pub subscriptions: Arc<dyn SubscriptionControl>,
}

pub struct ConversationService {
    deps: ConversationServiceDependencies,
}

impl ConversationService {
    pub fn new(deps: ConversationServiceDependencies) -> Self {
        Self { deps }
    }

    /// 会话不存在返回 `NotFound`，非成员返回 `Forbidden`
    pub async fn ensure_member(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<(), ApplicationError> {
        self.deps.membership.find(conversation_id).await?;
        if !self.deps.membership.is_member(conversation_id, user_id).await? {
            return Err(DomainError::forbidden("access conversation").into());
        }
        Ok(())
    }

    pub async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<ConversationCreated, ApplicationError> {
        if request.is_group {
            let conversation = self
                .deps
                .membership
                .create_group(
                    &request.creator_id,
                    request.user_ids,
                    request.name,
                    request.description,
                )
                .await?;
            return Ok(ConversationCreated {
                conversation,
                created: true,
            });
        }

        let others: BTreeSet<UserId> = request
            .user_ids
            .into_iter()
            .filter(|id| *id != request.creator_id)
            .collect();
        let mut others = others.into_iter();
        let other = match (others.next(), others.next()) {
            (Some(other), None) => other,
            // 只填了自己
            (None, _) => request.creator_id.clone(),
            (Some(_), Some(_)) => {
                return Err(DomainError::invalid_argument(
                    "user_ids",
                    "a direct conversation needs exactly one other user",
                )
                .into())
            }
        };

        let (conversation, created) = self
            .deps
            .membership
            .create_direct(&request.creator_id, &other)
            .await?;
        Ok(ConversationCreated {
            conversation,
            created,
        })
    }

    /// 成员资料、在线状态与消息摘要对整页会话各只查询一次
    pub async fn list_conversations(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<ConversationSummary>, ApplicationError> {
        let conversations = self.deps.membership.list_for_user(user_id, page).await?;

        let member_ids: Vec<UserId> = conversations
            .items
            .iter()
            .flat_map(|conversation| conversation.member_ids.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let profiles: BTreeMap<UserId, UserProfile> = retry_read_once(|| async {
            self.deps
                .users
                .find_profiles(&member_ids)
                .await
                .map_err(ApplicationError::from)
        })
        .await?
        .into_iter()
        .map(|profile| (profile.id.clone(), profile))
        .collect();
        let online = self.deps.presence.batch_status(&member_ids).await?;
        let conversation_ids: Vec<ConversationId> = conversations
            .items
            .iter()
            .map(|conversation| conversation.id.clone())
            .collect();
        let mut digests = self
            .deps
            .messages
            .digests(&conversation_ids, user_id)
            .await?;

        let mut summaries = Vec::with_capacity(conversations.items.len());
        for conversation in &conversations.items {
            let digest = digests.remove(&conversation.id).unwrap_or_default();
            let members = conversation
                .member_ids
                .iter()
                .map(|member_id| {
                    let profile = profiles.get(member_id);
                    MemberStatus {
                        user_id: member_id.clone(),
                        display_name: profile.map(|p| p.display_name.clone()),
                        avatar: profile.and_then(|p| p.avatar.clone()),
                        online: online.get(member_id).copied().unwrap_or(false),
                    }
                })
                .collect();
            summaries.push(ConversationSummary {
                conversation: conversation.clone(),
                last_message: digest.last_message,
                members,
                unread_count: digest.unread_count,
            });
        }

        Ok(Page {
            items: summaries,
            page: conversations.page,
            page_size: conversations.page_size,
            total: conversations.total,
            has_more: conversations.has_more,
        })
    }

    pub async fn get_messages(
        &self,
        conversation_id: &ConversationId,
        caller_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Message>, ApplicationError> {
        self.ensure_member(conversation_id, caller_id).await?;
        self.deps.messages.list(conversation_id, page).await
    }

    /// 写入后把消息推到会话主题，并把最新未读数推到其他成员的用户主题
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let appended = self
            .deps
            .messages
            .append(
                &request.conversation_id,
                &request.sender_id,
                request.content,
                request.image_url,
            )
            .await?;

        self.deps.publisher.publish(Publication {
            topic: Topic::Conversation(request.conversation_id.clone()),
            event: RealtimeEvent::MessageCreated {
                message: appended.message.clone(),
            },
            origin: request.origin,
        });
        for (member_id, unread_count) in appended.unread_counts {
            self.deps.publisher.publish(Publication {
                topic: Topic::User(member_id),
                event: RealtimeEvent::UnreadCountChanged {
                    conversation_id: request.conversation_id.clone(),
                    unread_count,
                },
                origin: request.origin,
            });
        }

        Ok(appended.message)
    }

    pub async fn add_member(&self, request: AddMemberRequest) -> Result<(), ApplicationError> {
        let conversation = self.deps.membership.find(&request.conversation_id).await?;
        if !conversation.is_creator(&request.operator_id) {
            return Err(DomainError::forbidden("add member").into());
        }
        self.deps
            .membership
            .add_member(&request.conversation_id, &request.user_id)
            .await
    }

    /// 创建者可移除任何人，其他成员只能移除自己；重复移除不报错
    pub async fn remove_member(
        &self,
        request: RemoveMemberRequest,
    ) -> Result<bool, ApplicationError> {
        let conversation = self.deps.membership.find(&request.conversation_id).await?;
        if request.operator_id != request.target_user_id
            && !conversation.is_creator(&request.operator_id)
        {
            return Err(DomainError::forbidden("remove member").into());
        }
        let removed = self
            .deps
            .membership
            .remove_member(&request.conversation_id, &request.target_user_id)
            .await?;
        // 之前离开但订阅残留的连接也一并收回
        self.deps
            .subscriptions
            .revoke(
                &Topic::Conversation(request.conversation_id.clone()),
                &request.target_user_id,
            )
            .await;
        Ok(removed)
    }

    pub async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        reader_id: &UserId,
    ) -> Result<MarkReadOutcome, ApplicationError> {
        self.ensure_member(conversation_id, reader_id).await?;
        let marked = self
            .deps
            .messages
            .mark_all_read_except_sender(conversation_id, reader_id)
            .await?;
        let unread_count = self
            .deps
            .messages
            .unread_count_for(conversation_id, reader_id)
            .await?;

        if marked > 0 {
            // 同一用户的其他终端同步未读数
            self.deps.publisher.publish(Publication {
                topic: Topic::User(reader_id.clone()),
                event: RealtimeEvent::UnreadCountChanged {
                    conversation_id: conversation_id.clone(),
                    unread_count,
                },
                origin: None,
            });
        }
        Ok(MarkReadOutcome {
            marked,
            unread_count,
        })
    }

    pub async fn update_conversation(
        &self,
        request: UpdateConversationRequest,
    ) -> Result<Conversation, ApplicationError> {
        self.deps
            .membership
            .update_details(
                &request.conversation_id,
                &request.operator_id,
                request.name,
                request.description,
            )
            .await
    }

    pub async fn delete_conversation(
        &self,
        conversation_id: &ConversationId,
        operator_id: &UserId,
    ) -> Result<(), ApplicationError> {
        let conversation = self.deps.membership.find(conversation_id).await?;
        if !conversation.is_creator(operator_id) {
            return Err(DomainError::forbidden("delete conversation").into());
        }
        self.deps.membership.delete(conversation_id).await?;
        self.deps
            .subscriptions
            .close(&Topic::Conversation(conversation_id.clone()))
            .await;
        Ok(())
    }
}
