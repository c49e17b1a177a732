use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, Timestamp, UserId};

const MAX_NAME_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 500;

/// 两个用户的无序对所对应的规范键，形如 `"{小}:{大}"`。
pub fn direct_key(a: &UserId, b: &UserId) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub is_group: bool,
    pub creator_id: UserId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub member_ids: BTreeSet<UserId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Conversation {
    /// 私聊会话：恰好两个不同成员。
    pub fn direct(
        id: ConversationId,
        creator_id: UserId,
        other_id: UserId,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if creator_id == other_id {
            return Err(DomainError::invalid_argument(
                "user_ids",
                "cannot start a direct conversation with yourself",
            ));
        }

        let member_ids = BTreeSet::from([creator_id.clone(), other_id]);
        Ok(Self {
            id,
            is_group: false,
            creator_id,
            name: None,
            description: None,
            member_ids,
            created_at: now,
            updated_at: now,
        })
    }

    /// 群聊会话：创建者总是成员，重复ID自动去重。
    pub fn group(
        id: ConversationId,
        creator_id: UserId,
        member_ids: impl IntoIterator<Item = UserId>,
        name: Option<String>,
        description: Option<String>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let mut members: BTreeSet<UserId> = member_ids.into_iter().collect();
        members.insert(creator_id.clone());

        Ok(Self {
            id,
            is_group: true,
            creator_id,
            name: validate_text("name", name, MAX_NAME_CHARS)?,
            description: validate_text("description", description, MAX_DESCRIPTION_CHARS)?,
            member_ids: members,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn direct_key(&self) -> Option<String> {
        if self.is_group {
            return None;
        }
        let mut members = self.member_ids.iter();
        match (members.next(), members.next()) {
            (Some(a), Some(b)) => Some(direct_key(a, b)),
            _ => None,
        }
    }

    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.member_ids.contains(user_id)
    }

    pub fn is_creator(&self, user_id: &UserId) -> bool {
        &self.creator_id == user_id
    }

    /// 私聊中的另一方；群聊没有意义，返回 `None`。
    pub fn other_member(&self, user_id: &UserId) -> Option<&UserId> {
        if self.is_group {
            return None;
        }
        self.member_ids.iter().find(|member| *member != user_id)
    }

    pub fn add_member(&mut self, user_id: UserId, now: Timestamp) -> Result<(), DomainError> {
        if self.is_member(&user_id) {
            return Err(DomainError::AlreadyMember);
        }
        if !self.is_group {
            return Err(DomainError::invalid_argument(
                "conversation_id",
                "direct conversations have fixed membership",
            ));
        }
        self.member_ids.insert(user_id);
        self.updated_at = now;
        Ok(())
    }

    /// 移除成员；非成员是幂等的空操作，返回 `false`。
    pub fn remove_member(&mut self, user_id: &UserId, now: Timestamp) -> Result<bool, DomainError> {
        if !self.is_member(user_id) {
            return Ok(false);
        }
        if !self.is_group {
            return Err(DomainError::invalid_argument(
                "conversation_id",
                "direct conversations have fixed membership",
            ));
        }
        self.member_ids.remove(user_id);
        self.updated_at = now;
        Ok(true)
    }

    pub fn update_details(
        &mut self,
        name: Option<String>,
        description: Option<String>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if name.is_some() {
            self.name = validate_text("name", name, MAX_NAME_CHARS)?;
        }
        if description.is_some() {
            self.description = validate_text("description", description, MAX_DESCRIPTION_CHARS)?;
        }
        self.updated_at = now;
        Ok(())
    }
}

fn validate_text(
    field: &str,
    value: Option<String>,
    max_chars: usize,
) -> Result<Option<String>, DomainError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > max_chars {
        return Err(DomainError::invalid_argument(field, "too long"));
    }
    Ok(Some(trimmed.to_owned()))
}
