use std::collections::BTreeMap;
use std::sync::Arc;

use domain::{ConversationId, Message, MessageCursor, NewMessage, Page, PageRequest, UserId};

use crate::{
    clock::Clock,
    error::ApplicationError,
    repository::{AppendOutcome, AppendedMessage, ConversationDigest, MessageRepository},
    retry::retry_read_once,
};

/// 每个会话的只追加有序消息日志
#[derive(Clone)]
pub struct MessageLog {
    messages: Arc<dyn MessageRepository>,
    clock: Arc<dyn Clock>,
}

impl MessageLog {
    pub fn new(messages: Arc<dyn MessageRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { messages, clock }
    }

    /// 追加消息。写入不重试：没有去重令牌时重放可能产生重复消息。
    pub async fn append(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: impl Into<String>,
        image_url: Option<String>,
    ) -> Result<AppendedMessage, ApplicationError> {
        let draft = NewMessage::new(
            conversation_id.clone(),
            sender_id.clone(),
            content,
            image_url,
            self.clock.now(),
        )?;

        match self.messages.append(draft).await? {
            AppendOutcome::Appended(appended) => {
                tracing::info!(
                    conversation_id = %conversation_id,
                    message_id = %appended.message.id,
                    sender_id = %sender_id,
                    sequence = appended.message.sequence,
                    "message appended"
                );
                Ok(appended)
            }
            AppendOutcome::ConversationMissing => {
                Err(ApplicationError::not_found("conversation", conversation_id))
            }
            AppendOutcome::NotMember => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    sender_id = %sender_id,
                    "rejected message from non-member"
                );
                Err(ApplicationError::forbidden("send message"))
            }
        }
    }

    /// 按 `(created_at, sequence)` 升序分页
    pub async fn list(
        &self,
        conversation_id: &ConversationId,
        page: PageRequest,
    ) -> Result<Page<Message>, ApplicationError> {
        retry_read_once(|| async {
            self.messages
                .list(conversation_id, page)
                .await
                .map_err(ApplicationError::from)
        })
        .await
    }

    pub async fn list_after(
        &self,
        conversation_id: &ConversationId,
        after: Option<MessageCursor>,
        limit: u32,
    ) -> Result<Vec<Message>, ApplicationError> {
        retry_read_once(|| async {
            self.messages
                .list_after(conversation_id, after, limit)
                .await
                .map_err(ApplicationError::from)
        })
        .await
    }

    pub async fn last_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Message>, ApplicationError> {
        retry_read_once(|| async {
            self.messages
                .last_message(conversation_id)
                .await
                .map_err(ApplicationError::from)
        })
        .await
    }

    /// 把会话中不是 `reader_id` 发送的未读消息置为已读，返回变更条数。幂等。
    pub async fn mark_all_read_except_sender(
        &self,
        conversation_id: &ConversationId,
        reader_id: &UserId,
    ) -> Result<u64, ApplicationError> {
        let changed = self
            .messages
            .mark_all_read_except(conversation_id, reader_id)
            .await?;
        if changed > 0 {
            tracing::debug!(
                conversation_id = %conversation_id,
                reader_id = %reader_id,
                changed,
                "messages marked read"
            );
        }
        Ok(changed)
    }

    /// 会话列表用的批量摘要，缺失的会话视为没有消息
    pub async fn digests(
        &self,
        conversation_ids: &[ConversationId],
        user_id: &UserId,
    ) -> Result<BTreeMap<ConversationId, ConversationDigest>, ApplicationError> {
        if conversation_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        retry_read_once(|| async {
            self.messages
                .digests(conversation_ids, user_id)
                .await
                .map_err(ApplicationError::from)
        })
        .await
    }

    pub async fn unread_count_for(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<u64, ApplicationError> {
        retry_read_once(|| async {
            self.messages
                .unread_count(conversation_id, user_id)
                .await
                .map_err(ApplicationError::from)
        })
        .await
    }
}
