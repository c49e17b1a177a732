use std::sync::Arc;

use domain::{
    direct_key, Conversation, ConversationId, DomainError, Page, PageRequest, RepositoryError,
    UserId,
};

use crate::{
    clock::Clock, error::ApplicationError, repository::ConversationRepository,
    retry::retry_read_once,
};

/// 会话及成员集合的所有者
///
/// 私聊唯一性依赖存储层对规范键的唯一约束，竞争失败的一方复用胜者的记录。
#[derive(Clone)]
pub struct MembershipStore {
    conversations: Arc<dyn ConversationRepository>,
    clock: Arc<dyn Clock>,
}

impl MembershipStore {
    pub fn new(conversations: Arc<dyn ConversationRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            conversations,
            clock,
        }
    }

    /// 获取或创建私聊，返回会话以及本次是否新建
    pub async fn create_direct(
        &self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<(Conversation, bool), ApplicationError> {
        let conversation = Conversation::direct(
            ConversationId::generate(),
            user_a.clone(),
            user_b.clone(),
            self.clock.now(),
        )?;
        let key = direct_key(user_a, user_b);

        let existing = retry_read_once(|| async {
            self.conversations
                .find_direct(&key)
                .await
                .map_err(ApplicationError::from)
        })
        .await?;
        if let Some(existing) = existing {
            return Ok((existing, false));
        }

        let (conversation, created) = self.conversations.create_direct(conversation).await?;
        if created {
            tracing::info!(
                conversation_id = %conversation.id,
                direct_key = %key,
                "direct conversation created"
            );
        } else {
            tracing::info!(
                conversation_id = %conversation.id,
                direct_key = %key,
                "lost direct conversation race, reusing existing row"
            );
        }
        Ok((conversation, created))
    }

    pub async fn create_group(
        &self,
        creator_id: &UserId,
        member_ids: Vec<UserId>,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Conversation, ApplicationError> {
        let conversation = Conversation::group(
            ConversationId::generate(),
            creator_id.clone(),
            member_ids,
            name,
            description,
            self.clock.now(),
        )?;
        let conversation = self.conversations.create_group(conversation).await?;
        tracing::info!(
            conversation_id = %conversation.id,
            creator_id = %creator_id,
            members = conversation.member_ids.len(),
            "group conversation created"
        );
        Ok(conversation)
    }

    pub async fn find(&self, id: &ConversationId) -> Result<Conversation, ApplicationError> {
        retry_read_once(|| async {
            self.conversations
                .find_by_id(id)
                .await
                .map_err(ApplicationError::from)
        })
        .await?
            .ok_or_else(|| ApplicationError::not_found("conversation", id))
    }

    pub async fn members(&self, id: &ConversationId) -> Result<Vec<UserId>, ApplicationError> {
        let conversation = self.find(id).await?;
        Ok(conversation.member_ids.into_iter().collect())
    }

    pub async fn add_member(
        &self,
        id: &ConversationId,
        user_id: &UserId,
    ) -> Result<(), ApplicationError> {
        let mut conversation = self.find(id).await?;
        conversation.add_member(user_id.clone(), self.clock.now())?;

        match self.conversations.add_member(id, user_id).await {
            Ok(()) => {
                tracing::info!(conversation_id = %id, user_id = %user_id, "member added");
                Ok(())
            }
            Err(RepositoryError::Conflict) => Err(DomainError::AlreadyMember.into()),
            Err(RepositoryError::NotFound) => Err(ApplicationError::not_found("conversation", id)),
            Err(err) => Err(err.into()),
        }
    }

    /// 幂等：移除非成员是成功的空操作，返回 `false`。调用者负责授权。
    pub async fn remove_member(
        &self,
        id: &ConversationId,
        user_id: &UserId,
    ) -> Result<bool, ApplicationError> {
        let mut conversation = self.find(id).await?;
        if !conversation.remove_member(user_id, self.clock.now())? {
            return Ok(false);
        }

        let removed = self.conversations.remove_member(id, user_id).await?;
        if removed {
            tracing::info!(conversation_id = %id, user_id = %user_id, "member removed");
        }
        Ok(removed)
    }

    /// 直接读存储，成员变更后立即可见
    pub async fn is_member(
        &self,
        id: &ConversationId,
        user_id: &UserId,
    ) -> Result<bool, ApplicationError> {
        retry_read_once(|| async {
            self.conversations
                .is_member(id, user_id)
                .await
                .map_err(ApplicationError::from)
        })
        .await
    }

    pub async fn delete(&self, id: &ConversationId) -> Result<(), ApplicationError> {
        if !self.conversations.delete(id).await? {
            return Err(ApplicationError::not_found("conversation", id));
        }
        tracing::info!(conversation_id = %id, "conversation deleted");
        Ok(())
    }

    /// 仅创建者可修改名称与描述
    pub async fn update_details(
        &self,
        id: &ConversationId,
        caller_id: &UserId,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Conversation, ApplicationError> {
        let mut conversation = self.find(id).await?;
        if !conversation.is_creator(caller_id) {
            return Err(ApplicationError::forbidden("update conversation"));
        }
        conversation.update_details(name, description, self.clock.now())?;
        Ok(self.conversations.update_details(&conversation).await?)
    }

    pub async fn list_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Conversation>, ApplicationError> {
        retry_read_once(|| async {
            self.conversations
                .list_for_user(user_id, page)
                .await
                .map_err(ApplicationError::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::SystemClock, memory::MemoryStore};

    fn uid(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    fn store() -> MembershipStore {
        MembershipStore::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn create_direct_reuses_existing_pair() {
        let membership = store();
        let (first, created) = membership.create_direct(&uid("1"), &uid("2")).await.unwrap();
        assert!(created);
        let (second, created) = membership.create_direct(&uid("2"), &uid("1")).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn create_direct_with_self_is_invalid() {
        let err = store().create_direct(&uid("1"), &uid("01")).await.unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn add_member_twice_is_already_member() {
        let membership = store();
        let group = membership
            .create_group(&uid("1"), vec![uid("2")], Some("park".into()), None)
            .await
            .unwrap();
        membership.add_member(&group.id, &uid("3")).await.unwrap();
        assert!(membership.is_member(&group.id, &uid("3")).await.unwrap());

        let err = membership.add_member(&group.id, &uid("3")).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::AlreadyMember)));
    }

    #[tokio::test]
    async fn add_member_to_missing_conversation_is_not_found() {
        let err = store()
            .add_member(&ConversationId::generate(), &uid("3"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn remove_member_is_idempotent() {
        let membership = store();
        let group = membership
            .create_group(&uid("1"), vec![uid("2")], None, None)
            .await
            .unwrap();
        assert!(membership.remove_member(&group.id, &uid("2")).await.unwrap());
        assert!(!membership.is_member(&group.id, &uid("2")).await.unwrap());
        assert!(!membership.remove_member(&group.id, &uid("2")).await.unwrap());
    }

    #[tokio::test]
    async fn update_details_is_creator_only() {
        let membership = store();
        let group = membership
            .create_group(&uid("1"), vec![uid("2")], None, None)
            .await
            .unwrap();
        let err = membership
            .update_details(&group.id, &uid("2"), Some("x".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::Forbidden { .. })));

        let updated = membership
            .update_details(&group.id, &uid("1"), Some("walkers".into()), None)
            .await
            .unwrap();
        assert_eq!(updated.name.as_deref(), Some("walkers"));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let membership = store();
        let (conversation, _) = membership.create_direct(&uid("1"), &uid("2")).await.unwrap();
        membership.delete(&conversation.id).await.unwrap();
        let err = membership.delete(&conversation.id).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::NotFound { .. })));
    }
}
