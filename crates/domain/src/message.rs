use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 消息正文的最大字符数。
pub const MAX_CONTENT_CHARS: usize = 5000;

/// 待写入的消息草稿，序号与接收者由消息日志在追加时确定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: Timestamp,
}

impl NewMessage {
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
        image_url: Option<String>,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let content = content.into();
        let image_url = image_url.filter(|url| !url.trim().is_empty());

        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(DomainError::invalid_argument("content", "too long"));
        }
        if content.trim().is_empty() && image_url.is_none() {
            return Err(DomainError::invalid_argument(
                "content",
                "empty message requires an image",
            ));
        }

        Ok(Self {
            id: MessageId::generate(),
            conversation_id,
            sender_id,
            content,
            image_url,
            created_at,
        })
    }

    pub fn into_message(
        self,
        receiver_id: Option<UserId>,
        created_at: Timestamp,
        sequence: i64,
    ) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            receiver_id,
            content: self.content,
            image_url: self.image_url,
            is_read: false,
            created_at,
            sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    pub content: String,
    pub image_url: Option<String>,
    pub is_read: bool,
    pub created_at: Timestamp,
    /// 插入序号，`created_at` 相同时用于稳定排序
    pub sequence: i64,
}

impl Message {
    /// 单向置为已读，返回状态是否发生变化。
    pub fn mark_read(&mut self) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        true
    }

    pub fn cursor(&self) -> MessageCursor {
        MessageCursor {
            created_at: self.created_at,
            sequence: self.sequence,
        }
    }
}

/// 会话内消息的全序位置 `(created_at, sequence)`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCursor {
    pub created_at: Timestamp,
    pub sequence: i64,
}

impl Ord for MessageCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for MessageCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
