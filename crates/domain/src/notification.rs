//! 通知实体定义

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::user::UserProfile;
use crate::value_objects::{NotificationId, PetId, PostId, Timestamp, UserId};

/// 预览文本保留的单词数。
pub const PREVIEW_WORDS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    LikePost,
    Comment,
    Follow,
    LikePet,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::LikePost => "like_post",
            NotificationType::Comment => "comment",
            NotificationType::Follow => "follow",
            NotificationType::LikePet => "like_pet",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like_post" => Ok(NotificationType::LikePost),
            "comment" => Ok(NotificationType::Comment),
            "follow" => Ok(NotificationType::Follow),
            "like_pet" => Ok(NotificationType::LikePet),
            other => Err(DomainError::invalid_argument(
                "type",
                format!("unknown notification type {other}"),
            )),
        }
    }
}

/// 事件相关的上下文。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationPayload {
    Post { post_id: PostId, content: String },
    Pet { pet_id: PetId, pet_name: String },
    Profile,
}

impl NotificationPayload {
    pub fn reference_id(&self) -> Option<String> {
        match self {
            NotificationPayload::Post { post_id, .. } => Some(post_id.to_string()),
            NotificationPayload::Pet { pet_id, .. } => Some(pet_id.to_string()),
            NotificationPayload::Profile => None,
        }
    }
}

/// 取前 [`PREVIEW_WORDS`] 个单词，单空格连接，超出时追加 `...`。
pub fn preview_text(content: &str) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    let mut preview = words
        .iter()
        .take(PREVIEW_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > PREVIEW_WORDS {
        preview.push_str("...");
    }
    preview
}

/// 预渲染通知文本。
pub fn render_text(
    notification_type: NotificationType,
    actor_name: &str,
    payload: &NotificationPayload,
) -> String {
    match (notification_type, payload) {
        (NotificationType::LikePost, NotificationPayload::Post { content, .. }) => {
            format!("{actor_name} liked your post: {}", preview_text(content))
        }
        (NotificationType::Comment, NotificationPayload::Post { content, .. }) => {
            format!("{actor_name} commented on your post: {}", preview_text(content))
        }
        (NotificationType::LikePet, NotificationPayload::Pet { pet_name, .. }) => {
            format!("{actor_name} liked {pet_name}")
        }
        (NotificationType::LikePost, _) => format!("{actor_name} liked your post"),
        (NotificationType::Comment, _) => format!("{actor_name} commented on your post"),
        (NotificationType::LikePet, _) => format!("{actor_name} liked your pet"),
        (NotificationType::Follow, _) => format!("{actor_name} started following you"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    /// 接收者
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub actor_id: UserId,
    /// 创建时的资料快照，之后资料变更不会回写
    pub actor_name: String,
    pub actor_avatar: Option<String>,
    pub reference_id: Option<String>,
    pub text: String,
    pub is_read: bool,
    pub is_received: bool,
    pub created_at: Timestamp,
}

impl Notification {
    pub fn new(
        recipient_id: UserId,
        notification_type: NotificationType,
        actor: &UserProfile,
        payload: &NotificationPayload,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            user_id: recipient_id,
            notification_type,
            actor_id: actor.id.clone(),
            actor_name: actor.display_name.clone(),
            actor_avatar: actor.avatar.clone(),
            reference_id: payload.reference_id(),
            text: render_text(notification_type, &actor.display_name, payload),
            is_read: false,
            is_received: false,
            created_at,
        }
    }

    pub fn mark_read(&mut self) -> bool {
        let changed = !self.is_read;
        self.is_read = true;
        changed
    }

    pub fn mark_received(&mut self) -> bool {
        let changed = !self.is_received;
        self.is_received = true;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn preview_truncates_after_six_words() {
        assert_eq!(preview_text("a b c d e f g h"), "a b c d e f...");
    }

    #[test]
    fn preview_keeps_short_text() {
        assert_eq!(preview_text("a b c"), "a b c");
        assert_eq!(preview_text("a b c d e f"), "a b c d e f");
    }

    #[test]
    fn preview_collapses_whitespace() {
        assert_eq!(preview_text("  my   dog\n\tlikes  walks "), "my dog likes walks");
        assert_eq!(preview_text("   "), "");
    }

    #[test]
    fn notification_snapshots_actor() {
        let mut actor = UserProfile::new(UserId::parse("2").unwrap(), "Rex's owner", None);
        let payload = NotificationPayload::Post {
            post_id: PostId::parse("9").unwrap(),
            content: "look at my corgi sleeping on the couch all day".into(),
        };
        let notification = Notification::new(
            UserId::parse("1").unwrap(),
            NotificationType::LikePost,
            &actor,
            &payload,
            Utc::now(),
        );
        actor.display_name = "renamed".into();

        assert_eq!(notification.actor_name, "Rex's owner");
        assert_eq!(notification.reference_id.as_deref(), Some("9"));
        assert_eq!(
            notification.text,
            "Rex's owner liked your post: look at my corgi sleeping on..."
        );
    }

    #[test]
    fn flags_are_independent() {
        let actor = UserProfile::new(UserId::parse("2").unwrap(), "a", None);
        let mut notification = Notification::new(
            UserId::parse("1").unwrap(),
            NotificationType::Follow,
            &actor,
            &NotificationPayload::Profile,
            Utc::now(),
        );
        assert!(notification.mark_received());
        assert!(!notification.is_read);
        assert!(notification.mark_read());
        assert!(!notification.mark_read());
    }

    #[test]
    fn type_round_trips_through_str() {
        for ty in [
            NotificationType::LikePost,
            NotificationType::Comment,
            NotificationType::Follow,
            NotificationType::LikePet,
        ] {
            assert_eq!(ty.as_str().parse::<NotificationType>().unwrap(), ty);
        }
    }
}
