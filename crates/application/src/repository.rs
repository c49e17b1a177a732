use std::collections::BTreeMap;

use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, Engagement, EngagementKind, CanonicalId, Message, MessageCursor,
    NewMessage, Notification, NotificationId, Page, PageRequest, PetId, PostId, RepositoryError,
    UserId, UserProfile,
};

/// 消息追加结果
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Appended(AppendedMessage),
    ConversationMissing,
    /// 发送者在追加时刻不是成员
    NotMember,
}

/// 已写入的消息，以及同一事务内计算出的其他成员未读数
#[derive(Debug, Clone, PartialEq)]
pub struct AppendedMessage {
    pub message: Message,
    pub unread_counts: BTreeMap<UserId, u64>,
}

/// 会话列表上每个会话的最后一条消息与调用方未读数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationDigest {
    pub last_message: Option<Message>,
    pub unread_count: u64,
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// 依据私聊规范键插入；键已被占用时返回已存在的会话和 `false`
    async fn create_direct(
        &self,
        conversation: Conversation,
    ) -> Result<(Conversation, bool), RepositoryError>;
    async fn create_group(&self, conversation: Conversation) -> Result<Conversation, RepositoryError>;
    async fn find_by_id(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError>;
    async fn find_direct(&self, key: &str) -> Result<Option<Conversation>, RepositoryError>;
    async fn update_details(&self, conversation: &Conversation) -> Result<Conversation, RepositoryError>;
    /// 已是成员时返回 `Conflict`，会话不存在时返回 `NotFound`
    async fn add_member(&self, id: &ConversationId, user_id: &UserId) -> Result<(), RepositoryError>;
    async fn remove_member(&self, id: &ConversationId, user_id: &UserId) -> Result<bool, RepositoryError>;
    async fn is_member(&self, id: &ConversationId, user_id: &UserId) -> Result<bool, RepositoryError>;
    /// 级联删除消息与成员关系
    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError>;
    /// 按最近活动倒序
    async fn list_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Conversation>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 在会话范围内原子地校验成员身份、分配全序位置并写入
    async fn append(&self, draft: NewMessage) -> Result<AppendOutcome, RepositoryError>;
    /// 升序分页
    async fn list(
        &self,
        conversation_id: &ConversationId,
        page: PageRequest,
    ) -> Result<Page<Message>, RepositoryError>;
    /// 游标之后的消息（升序），用于重连补齐
    async fn list_after(
        &self,
        conversation_id: &ConversationId,
        after: Option<MessageCursor>,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;
    async fn last_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Message>, RepositoryError>;
    async fn mark_all_read_except(
        &self,
        conversation_id: &ConversationId,
        reader_id: &UserId,
    ) -> Result<u64, RepositoryError>;
    async fn unread_count(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<u64, RepositoryError>;
    /// 一次取回整页会话的摘要；没有消息的会话不出现在结果里
    async fn digests(
        &self,
        conversation_ids: &[ConversationId],
        user_id: &UserId,
    ) -> Result<BTreeMap<ConversationId, ConversationDigest>, RepositoryError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: Notification) -> Result<Notification, RepositoryError>;
    async fn find_by_id(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError>;
    /// 按创建时间倒序
    async fn list_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Notification>, RepositoryError>;
    async fn mark_read(&self, id: &NotificationId) -> Result<bool, RepositoryError>;
    async fn mark_all_read(&self, user_id: &UserId) -> Result<u64, RepositoryError>;
    async fn mark_all_received(&self, user_id: &UserId) -> Result<u64, RepositoryError>;
    async fn unread_count(&self, user_id: &UserId) -> Result<u64, RepositoryError>;
    async fn unreceived_count(&self, user_id: &UserId) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait EngagementRepository: Send + Sync {
    /// 依赖 `(kind, user_id, target_id)` 唯一约束；只有真正插入时返回 `true`
    async fn insert_if_absent(&self, engagement: Engagement) -> Result<bool, RepositoryError>;
    async fn remove(
        &self,
        kind: EngagementKind,
        user_id: &UserId,
        target_id: &CanonicalId,
    ) -> Result<bool, RepositoryError>;
    async fn exists(
        &self,
        kind: EngagementKind,
        user_id: &UserId,
        target_id: &CanonicalId,
    ) -> Result<bool, RepositoryError>;
}

/// 用户资料只读查询（外部协作者）
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_profile(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError>;
    async fn find_profiles(&self, ids: &[UserId]) -> Result<Vec<UserProfile>, RepositoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSummary {
    pub id: PostId,
    pub owner_id: UserId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PetSummary {
    pub id: PetId,
    pub owner_id: UserId,
    pub name: String,
}

/// 帖子与宠物档案只读查询（外部协作者）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentDirectory: Send + Sync {
    async fn find_post(&self, id: &PostId) -> Result<Option<PostSummary>, RepositoryError>;
    async fn find_pet(&self, id: &PetId) -> Result<Option<PetSummary>, RepositoryError>;
}
