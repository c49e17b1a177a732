use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

/// 用户资料的只读快照，用于通知去规范化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    pub avatar: Option<String>,
    #[serde(default)]
    pub role: UserRole,
}

impl UserProfile {
    pub fn new(id: UserId, display_name: impl Into<String>, avatar: Option<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar,
            role: UserRole::User,
        }
    }
}
