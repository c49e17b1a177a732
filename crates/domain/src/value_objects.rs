use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// 文档库对象ID的长度（十六进制字符）。
pub const OBJECT_ID_LEN: usize = 24;

/// 历史上存在的两种ID方案。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdScheme {
    /// 关系库自增主键，例如 `42`
    Relational,
    /// 文档库对象ID，例如 `65f1c0ffee0000000000beef`
    Document,
}

/// 规范化后的实体标识。
///
/// 所有成员关系、相等性和唯一性判断都只比较 `CanonicalId`，从不比较原始输入。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalId(String);

impl CanonicalId {
    /// 将两种方案之一的原始ID规范化。
    ///
    /// 纯数字按关系主键处理（去掉前导零，必须大于零）；
    /// 24位十六进制按对象ID处理（统一小写）。
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("id", "cannot be empty"));
        }

        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            let digits = trimmed.trim_start_matches('0');
            if digits.is_empty() {
                return Err(DomainError::invalid_argument("id", "must be positive"));
            }
            return Ok(Self(digits.to_owned()));
        }

        if trimmed.len() == OBJECT_ID_LEN && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(Self(trimmed.to_ascii_lowercase()));
        }

        Err(DomainError::invalid_argument(
            "id",
            "neither a relational key nor an object id",
        ))
    }

    /// 生成新的文档方案ID。
    pub fn generate() -> Self {
        let mut hex = Uuid::new_v4().simple().to_string();
        hex.truncate(OBJECT_ID_LEN);
        Self(hex)
    }

    pub fn scheme(&self) -> IdScheme {
        if self.0.bytes().all(|b| b.is_ascii_digit()) {
            IdScheme::Relational
        } else {
            IdScheme::Document
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CanonicalId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CanonicalId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CanonicalId> for String {
    fn from(value: CanonicalId) -> Self {
        value.0
    }
}

macro_rules! canonical_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub CanonicalId);

        impl $name {
            pub fn new(id: CanonicalId) -> Self {
                Self(id)
            }

            pub fn parse(raw: &str) -> Result<Self, DomainError> {
                CanonicalId::parse(raw).map(Self)
            }

            pub fn generate() -> Self {
                Self(CanonicalId::generate())
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<CanonicalId> for $name {
            fn from(value: CanonicalId) -> Self {
                Self(value)
            }
        }

        impl From<$name> for CanonicalId {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

canonical_id!(
    /// 用户唯一标识。
    UserId
);
canonical_id!(
    /// 会话唯一标识。
    ConversationId
);
canonical_id!(
    /// 消息唯一标识。
    MessageId
);
canonical_id!(
    /// 通知唯一标识。
    NotificationId
);
canonical_id!(
    /// 动态（帖子）唯一标识。
    PostId
);
canonical_id!(
    /// 宠物档案唯一标识。
    PetId
);
