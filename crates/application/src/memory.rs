//! 进程内存储实现
//!
//! 所有仓储共享同一把锁，因此私聊唯一性检查、追加消息并计算未读数等复合操作天然原子。
//! 用于测试以及 `storage.backend = memory` 的本地运行。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use domain::{
    CanonicalId, Conversation, ConversationId, Engagement, EngagementKind, Message, MessageCursor,
    NewMessage, Notification, NotificationId, Page, PageRequest, PetId, PostId, RepositoryError,
    Timestamp, UserId, UserProfile,
};
use tokio::sync::Mutex;

use crate::{
    identity::{EntityKind, EntityLookup},
    repository::{
        AppendOutcome, AppendedMessage, ContentDirectory, ConversationDigest, ConversationRepository,
        EngagementRepository, MessageRepository, NotificationRepository, PetSummary, PostSummary,
        UserDirectory,
    },
};

#[derive(Default)]
struct State {
    conversations: HashMap<ConversationId, Conversation>,
    direct_keys: HashMap<String, ConversationId>,
    /// 每个会话的消息按 `(created_at, sequence)` 升序保存
    messages: HashMap<ConversationId, Vec<Message>>,
    next_sequence: i64,
    notifications: Vec<Notification>,
    engagements: HashSet<(EngagementKind, UserId, CanonicalId)>,
    users: HashMap<UserId, UserProfile>,
    posts: HashMap<PostId, PostSummary>,
    pets: HashMap<PetId, PetSummary>,
    groups: HashSet<CanonicalId>,
    aliases: HashMap<(EntityKind, CanonicalId), CanonicalId>,
}

impl State {
    fn last_activity(&self, conversation: &Conversation) -> Timestamp {
        self.messages
            .get(&conversation.id)
            .and_then(|messages| messages.last())
            .map_or(conversation.updated_at, |message| {
                message.created_at.max(conversation.updated_at)
            })
    }

    fn unread_for(&self, conversation_id: &ConversationId, user_id: &UserId) -> u64 {
        self.messages
            .get(conversation_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|message| &message.sender_id != user_id && !message.is_read)
                    .count() as u64
            })
            .unwrap_or(0)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接下来的 `count` 次读操作返回瞬时错误
    pub fn inject_transient_failures(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<(), RepositoryError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match injected {
            Ok(_) => Err(RepositoryError::transient("injected failure")),
            Err(_) => Ok(()),
        }
    }

    pub async fn seed_user(&self, profile: UserProfile) {
        self.state
            .lock()
            .await
            .users
            .insert(profile.id.clone(), profile);
    }

    pub async fn seed_post(&self, id: PostId, owner_id: UserId, content: impl Into<String>) {
        let post = PostSummary {
            id: id.clone(),
            owner_id,
            content: content.into(),
        };
        self.state.lock().await.posts.insert(id, post);
    }

    pub async fn seed_pet(&self, id: PetId, owner_id: UserId, name: impl Into<String>) {
        let pet = PetSummary {
            id: id.clone(),
            owner_id,
            name: name.into(),
        };
        self.state.lock().await.pets.insert(id, pet);
    }

    pub async fn seed_group(&self, id: CanonicalId) {
        self.state.lock().await.groups.insert(id);
    }

    /// 登记旧方案ID到主键ID的映射
    pub async fn register_alias(&self, kind: EntityKind, alias: CanonicalId, primary: CanonicalId) {
        self.state
            .lock()
            .await
            .aliases
            .insert((kind, alias), primary);
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn create_direct(
        &self,
        conversation: Conversation,
    ) -> Result<(Conversation, bool), RepositoryError> {
        let key = conversation
            .direct_key()
            .ok_or_else(|| RepositoryError::storage("not a direct conversation"))?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .direct_keys
            .get(&key)
            .and_then(|id| state.conversations.get(id))
        {
            return Ok((existing.clone(), false));
        }
        state.direct_keys.insert(key, conversation.id.clone());
        state
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok((conversation, true))
    }

    async fn create_group(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.conversations.contains_key(&conversation.id) {
            return Err(RepositoryError::Conflict);
        }
        state
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn find_by_id(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        self.maybe_fail()?;
        Ok(self.state.lock().await.conversations.get(id).cloned())
    }

    async fn find_direct(&self, key: &str) -> Result<Option<Conversation>, RepositoryError> {
        self.maybe_fail()?;
        let state = self.state.lock().await;
        Ok(state
            .direct_keys
            .get(key)
            .and_then(|id| state.conversations.get(id))
            .cloned())
    }

    async fn update_details(&self, conversation: &Conversation) -> Result<Conversation, RepositoryError> {
        let mut state = self.state.lock().await;
        let stored = state
            .conversations
            .get_mut(&conversation.id)
            .ok_or(RepositoryError::NotFound)?;
        stored.name = conversation.name.clone();
        stored.description = conversation.description.clone();
        stored.updated_at = conversation.updated_at;
        Ok(stored.clone())
    }

    async fn add_member(&self, id: &ConversationId, user_id: &UserId) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let conversation = state
            .conversations
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        if !conversation.member_ids.insert(user_id.clone()) {
            return Err(RepositoryError::Conflict);
        }
        Ok(())
    }

    async fn remove_member(&self, id: &ConversationId, user_id: &UserId) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        Ok(state
            .conversations
            .get_mut(id)
            .is_some_and(|conversation| conversation.member_ids.remove(user_id)))
    }

    async fn is_member(&self, id: &ConversationId, user_id: &UserId) -> Result<bool, RepositoryError> {
        self.maybe_fail()?;
        Ok(self
            .state
            .lock()
            .await
            .conversations
            .get(id)
            .is_some_and(|conversation| conversation.is_member(user_id)))
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        let Some(conversation) = state.conversations.remove(id) else {
            return Ok(false);
        };
        if let Some(key) = conversation.direct_key() {
            state.direct_keys.remove(&key);
        }
        state.messages.remove(id);
        Ok(true)
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Conversation>, RepositoryError> {
        self.maybe_fail()?;
        let state = self.state.lock().await;
        let mut conversations: Vec<(Timestamp, &Conversation)> = state
            .conversations
            .values()
            .filter(|conversation| conversation.is_member(user_id))
            .map(|conversation| (state.last_activity(conversation), conversation))
            .collect();
        conversations.sort_by(|(a_at, a), (b_at, b)| b_at.cmp(a_at).then_with(|| a.id.cmp(&b.id)));

        let total = conversations.len() as u64;
        let items = conversations
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .map(|(_, conversation)| conversation.clone())
            .collect();
        Ok(Page::new(items, page, total))
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn append(&self, draft: NewMessage) -> Result<AppendOutcome, RepositoryError> {
        let mut state = self.state.lock().await;
        let Some(conversation) = state.conversations.get(&draft.conversation_id) else {
            return Ok(AppendOutcome::ConversationMissing);
        };
        if !conversation.is_member(&draft.sender_id) {
            return Ok(AppendOutcome::NotMember);
        }
        let receiver_id = conversation.other_member(&draft.sender_id).cloned();
        let others: Vec<UserId> = conversation
            .member_ids
            .iter()
            .filter(|member| **member != draft.sender_id)
            .cloned()
            .collect();

        // 时钟回拨时沿用会话内最新时间，保证全序单调
        let created_at = state
            .messages
            .get(&draft.conversation_id)
            .and_then(|messages| messages.last())
            .map_or(draft.created_at, |last| last.created_at.max(draft.created_at));
        state.next_sequence += 1;
        let sequence = state.next_sequence;

        let conversation_id = draft.conversation_id.clone();
        let message = draft.into_message(receiver_id, created_at, sequence);
        state
            .messages
            .entry(conversation_id.clone())
            .or_default()
            .push(message.clone());

        let unread_counts: BTreeMap<UserId, u64> = others
            .into_iter()
            .map(|member| {
                let count = state.unread_for(&conversation_id, &member);
                (member, count)
            })
            .collect();
        Ok(AppendOutcome::Appended(AppendedMessage {
            message,
            unread_counts,
        }))
    }

    async fn list(
        &self,
        conversation_id: &ConversationId,
        page: PageRequest,
    ) -> Result<Page<Message>, RepositoryError> {
        self.maybe_fail()?;
        let state = self.state.lock().await;
        let messages = state
            .messages
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let items = messages
            .iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, page, messages.len() as u64))
    }

    async fn list_after(
        &self,
        conversation_id: &ConversationId,
        after: Option<MessageCursor>,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        self.maybe_fail()?;
        let state = self.state.lock().await;
        Ok(state
            .messages
            .get(conversation_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|message| after.map_or(true, |cursor| message.cursor() > cursor))
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn last_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Message>, RepositoryError> {
        self.maybe_fail()?;
        let state = self.state.lock().await;
        Ok(state
            .messages
            .get(conversation_id)
            .and_then(|messages| messages.last())
            .cloned())
    }

    async fn mark_all_read_except(
        &self,
        conversation_id: &ConversationId,
        reader_id: &UserId,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.lock().await;
        let Some(messages) = state.messages.get_mut(conversation_id) else {
            return Ok(0);
        };
        Ok(messages
            .iter_mut()
            .filter(|message| &message.sender_id != reader_id)
            .map(|message| message.mark_read())
            .filter(|changed| *changed)
            .count() as u64)
    }

    async fn unread_count(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<u64, RepositoryError> {
        self.maybe_fail()?;
        Ok(self.state.lock().await.unread_for(conversation_id, user_id))
    }

    async fn digests(
        &self,
        conversation_ids: &[ConversationId],
        user_id: &UserId,
    ) -> Result<BTreeMap<ConversationId, ConversationDigest>, RepositoryError> {
        self.maybe_fail()?;
        let state = self.state.lock().await;
        Ok(conversation_ids
            .iter()
            .filter_map(|id| {
                let last_message = state.messages.get(id)?.last().cloned();
                let digest = ConversationDigest {
                    last_message,
                    unread_count: state.unread_for(id, user_id),
                };
                Some((id.clone(), digest))
            })
            .collect())
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn create(&self, notification: Notification) -> Result<Notification, RepositoryError> {
        let mut state = self.state.lock().await;
        if state
            .notifications
            .iter()
            .any(|existing| existing.id == notification.id)
        {
            return Err(RepositoryError::Conflict);
        }
        state.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn find_by_id(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError> {
        self.maybe_fail()?;
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .find(|notification| &notification.id == id)
            .cloned())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Notification>, RepositoryError> {
        self.maybe_fail()?;
        let state = self.state.lock().await;
        // 插入顺序即创建顺序，倒序遍历得到最新在前
        let mine: Vec<&Notification> = state
            .notifications
            .iter()
            .rev()
            .filter(|notification| &notification.user_id == user_id)
            .collect();
        let total = mine.len() as u64;
        let items = mine
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, page, total))
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        Ok(state
            .notifications
            .iter_mut()
            .find(|notification| &notification.id == id)
            .is_some_and(Notification::mark_read))
    }

    async fn mark_all_read(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let mut state = self.state.lock().await;
        Ok(state
            .notifications
            .iter_mut()
            .filter(|notification| &notification.user_id == user_id)
            .map(|notification| notification.mark_read())
            .filter(|changed| *changed)
            .count() as u64)
    }

    async fn mark_all_received(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let mut state = self.state.lock().await;
        Ok(state
            .notifications
            .iter_mut()
            .filter(|notification| &notification.user_id == user_id)
            .map(|notification| notification.mark_received())
            .filter(|changed| *changed)
            .count() as u64)
    }

    async fn unread_count(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        self.maybe_fail()?;
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .filter(|notification| &notification.user_id == user_id && !notification.is_read)
            .count() as u64)
    }

    async fn unreceived_count(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        self.maybe_fail()?;
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .filter(|notification| &notification.user_id == user_id && !notification.is_received)
            .count() as u64)
    }
}

#[async_trait]
impl EngagementRepository for MemoryStore {
    async fn insert_if_absent(&self, engagement: Engagement) -> Result<bool, RepositoryError> {
        Ok(self.state.lock().await.engagements.insert((
            engagement.kind,
            engagement.user_id,
            engagement.target_id,
        )))
    }

    async fn remove(
        &self,
        kind: EngagementKind,
        user_id: &UserId,
        target_id: &CanonicalId,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .state
            .lock()
            .await
            .engagements
            .remove(&(kind, user_id.clone(), target_id.clone())))
    }

    async fn exists(
        &self,
        kind: EngagementKind,
        user_id: &UserId,
        target_id: &CanonicalId,
    ) -> Result<bool, RepositoryError> {
        self.maybe_fail()?;
        Ok(self
            .state
            .lock()
            .await
            .engagements
            .contains(&(kind, user_id.clone(), target_id.clone())))
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_profile(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
        self.maybe_fail()?;
        Ok(self.state.lock().await.users.get(id).cloned())
    }

    async fn find_profiles(&self, ids: &[UserId]) -> Result<Vec<UserProfile>, RepositoryError> {
        self.maybe_fail()?;
        let state = self.state.lock().await;
        Ok(ids.iter().filter_map(|id| state.users.get(id).cloned()).collect())
    }
}

#[async_trait]
impl ContentDirectory for MemoryStore {
    async fn find_post(&self, id: &PostId) -> Result<Option<PostSummary>, RepositoryError> {
        self.maybe_fail()?;
        Ok(self.state.lock().await.posts.get(id).cloned())
    }

    async fn find_pet(&self, id: &PetId) -> Result<Option<PetSummary>, RepositoryError> {
        self.maybe_fail()?;
        Ok(self.state.lock().await.pets.get(id).cloned())
    }
}

#[async_trait]
impl EntityLookup for MemoryStore {
    async fn find_by_primary(
        &self,
        kind: EntityKind,
        id: &CanonicalId,
    ) -> Result<Option<CanonicalId>, RepositoryError> {
        self.maybe_fail()?;
        let state = self.state.lock().await;
        let found = match kind {
            EntityKind::User => state.users.contains_key(&UserId::new(id.clone())),
            EntityKind::Conversation => state
                .conversations
                .contains_key(&ConversationId::new(id.clone())),
            EntityKind::Pet => state.pets.contains_key(&PetId::new(id.clone())),
            EntityKind::Post => state.posts.contains_key(&PostId::new(id.clone())),
            EntityKind::Group => state.groups.contains(id),
        };
        Ok(found.then(|| id.clone()))
    }

    async fn find_by_alternate(
        &self,
        kind: EntityKind,
        id: &CanonicalId,
    ) -> Result<Option<CanonicalId>, RepositoryError> {
        self.maybe_fail()?;
        Ok(self
            .state
            .lock()
            .await
            .aliases
            .get(&(kind, id.clone()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn uid(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn append_keeps_order_when_clock_goes_backwards() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let conversation =
            Conversation::direct(ConversationId::generate(), uid("1"), uid("2"), now).unwrap();
        let (conversation, _) = store.create_direct(conversation).await.unwrap();

        let first = NewMessage::new(conversation.id.clone(), uid("1"), "a", None, now).unwrap();
        let skewed =
            NewMessage::new(conversation.id.clone(), uid("2"), "b", None, now - Duration::seconds(5))
                .unwrap();
        store.append(first).await.unwrap();
        store.append(skewed).await.unwrap();

        let page = MessageRepository::list(&store, &conversation.id, PageRequest::default())
            .await
            .unwrap();
        let contents: Vec<&str> = page.items.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["a", "b"]);
        assert!(page.items[0].cursor() < page.items[1].cursor());
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let store = MemoryStore::new();
        store.inject_transient_failures(1);
        let err = store.find_profile(&uid("1")).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.find_profile(&uid("1")).await.unwrap().is_none());
    }
}
