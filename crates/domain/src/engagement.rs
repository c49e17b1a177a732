use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value_objects::{CanonicalId, Timestamp, UserId};

/// 点赞与关注，`(kind, user_id, target_id)` 在存储层唯一。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    PostLike,
    PetLike,
    Follow,
}

impl EngagementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementKind::PostLike => "post_like",
            EngagementKind::PetLike => "pet_like",
            EngagementKind::Follow => "follow",
        }
    }
}

impl fmt::Display for EngagementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub kind: EngagementKind,
    pub user_id: UserId,
    pub target_id: CanonicalId,
    pub created_at: Timestamp,
}
