use std::fmt;

use async_trait::async_trait;
use domain::{ConversationId, Message, Notification, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 每个实时连接的标识，用于排除发起方的回显
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 订阅主题：一个会话或一个用户
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Topic {
    Conversation(ConversationId),
    User(UserId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Conversation(id) => write!(f, "conversation:{id}"),
            Topic::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// 推送给订阅者的实时事件，携带完整的去规范化记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    MessageCreated {
        message: Message,
    },
    NotificationCreated {
        notification: Notification,
    },
    UnreadCountChanged {
        conversation_id: ConversationId,
        unread_count: u64,
    },
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::MessageCreated { .. } => "message_created",
            RealtimeEvent::NotificationCreated { .. } => "notification_created",
            RealtimeEvent::UnreadCountChanged { .. } => "unread_count_changed",
        }
    }
}

/// 待投递的一条发布
#[derive(Debug, Clone)]
pub struct Publication {
    pub topic: Topic,
    pub event: RealtimeEvent,
    /// 发起动作的连接，不会收到这条事件
    pub origin: Option<ConnectionId>,
}

/// 发布端只负责把事件交给后台投递，永不阻塞、永不失败
pub trait EventPublisher: Send + Sync {
    fn publish(&self, publication: Publication);
}

/// 不做任何投递，用于不需要实时推送的场景
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _publication: Publication) {}
}

/// 成员关系变化后收回已建立的订阅；返回受影响的连接数
#[async_trait]
pub trait SubscriptionControl: Send + Sync {
    /// 撤销某用户全部连接在该主题上的订阅
    async fn revoke(&self, topic: &Topic, user_id: &UserId) -> usize;
    /// 移除主题上的全部订阅
    async fn close(&self, topic: &Topic) -> usize;
}

#[async_trait]
impl SubscriptionControl for NoopPublisher {
    async fn revoke(&self, _topic: &Topic, _user_id: &UserId) -> usize {
        0
    }

    async fn close(&self, _topic: &Topic) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_are_tagged_by_type() {
        let event = RealtimeEvent::UnreadCountChanged {
            conversation_id: ConversationId::parse("12").unwrap(),
            unread_count: 3,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({ "type": "unread_count_changed", "conversation_id": "12", "unread_count": 3 })
        );
        assert_eq!(value["type"], event.name());
    }

    #[test]
    fn topics_render_as_channel_names() {
        let user = Topic::User(UserId::parse("007").unwrap());
        assert_eq!(user.to_string(), "user:7");
        assert_eq!(
            serde_json::to_value(&user).unwrap(),
            json!({ "kind": "user", "id": "7" })
        );
    }

    #[test]
    fn connection_ids_parse_from_header_text() {
        let id = ConnectionId::new();
        assert_eq!(ConnectionId::parse(&format!(" {id} ")), Some(id));
        assert_eq!(ConnectionId::parse("not-a-uuid"), None);
    }
}
