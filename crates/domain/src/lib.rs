//! 宠物社交网络实时核心的领域模型
//!
//! 包含规范化ID、会话、消息、通知、互动记录等核心实体及其不变量。

pub mod conversation;
pub mod engagement;
pub mod errors;
pub mod message;
pub mod notification;
pub mod pagination;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use conversation::{direct_key, Conversation};
pub use engagement::{Engagement, EngagementKind};
pub use errors::{DomainError, DomainResult, RepositoryError, RepositoryResult};
pub use message::{Message, MessageCursor, NewMessage, MAX_CONTENT_CHARS};
pub use notification::{
    preview_text, render_text, Notification, NotificationPayload, NotificationType,
};
pub use pagination::{Page, PageRequest};
pub use user::{UserProfile, UserRole};
pub use value_objects::{
    CanonicalId, ConversationId, IdScheme, MessageId, NotificationId, PetId, PostId, Timestamp,
    UserId,
};
