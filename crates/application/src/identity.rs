//! 标识解析
//!
//! 后端存储历史上混用了关系主键与文档对象ID两套方案。所有实体边界都经过这里，
//! 输出唯一的规范化ID。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{CanonicalId, ConversationId, DomainError, PetId, PostId, RepositoryError, UserId};

use crate::{error::ApplicationError, retry::retry_read_once};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Conversation,
    Pet,
    Group,
    Post,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Conversation => "conversation",
            EntityKind::Pet => "pet",
            EntityKind::Group => "group",
            EntityKind::Post => "post",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 按主键字段与备用字段查找实体，返回实体的主键规范ID
#[async_trait]
pub trait EntityLookup: Send + Sync {
    async fn find_by_primary(
        &self,
        kind: EntityKind,
        id: &CanonicalId,
    ) -> Result<Option<CanonicalId>, RepositoryError>;

    async fn find_by_alternate(
        &self,
        kind: EntityKind,
        id: &CanonicalId,
    ) -> Result<Option<CanonicalId>, RepositoryError>;
}

#[derive(Clone)]
pub struct IdentityResolver {
    lookup: Arc<dyn EntityLookup>,
}

impl IdentityResolver {
    pub fn new(lookup: Arc<dyn EntityLookup>) -> Self {
        Self { lookup }
    }

    /// 纯语法层面的规范化，不访问存储
    pub fn resolve(raw: &str) -> Result<CanonicalId, DomainError> {
        CanonicalId::parse(raw)
    }

    /// 规范化后先查主键字段，未命中再查备用字段，都未命中才报告不存在
    pub async fn locate(&self, kind: EntityKind, raw: &str) -> Result<CanonicalId, ApplicationError> {
        let id = Self::resolve(raw)?;

        let primary = retry_read_once(|| async {
            self.lookup
                .find_by_primary(kind, &id)
                .await
                .map_err(ApplicationError::from)
        })
        .await?;
        if let Some(found) = primary {
            return Ok(found);
        }

        let alternate = retry_read_once(|| async {
            self.lookup
                .find_by_alternate(kind, &id)
                .await
                .map_err(ApplicationError::from)
        })
        .await?;
        match alternate {
            Some(found) => {
                tracing::debug!(kind = %kind, raw = %raw, canonical = %found, "resolved via alternate id");
                Ok(found)
            }
            None => Err(DomainError::not_found(kind.as_str(), id).into()),
        }
    }

    pub async fn locate_user(&self, raw: &str) -> Result<UserId, ApplicationError> {
        self.locate(EntityKind::User, raw).await.map(UserId::from)
    }

    /// 同 [`locate_user`](Self::locate_user)，但用户不存在时退回语法规范化后的ID。
    /// 供幂等的移除、取消关注以及信任网关的调用方身份使用。
    pub async fn locate_user_or_canonical(&self, raw: &str) -> Result<UserId, ApplicationError> {
        match self.locate_user(raw).await {
            Err(ApplicationError::Domain(DomainError::NotFound { .. })) => {
                Ok(UserId::from(Self::resolve(raw)?))
            }
            other => other,
        }
    }

    pub async fn locate_conversation(&self, raw: &str) -> Result<ConversationId, ApplicationError> {
        self.locate(EntityKind::Conversation, raw)
            .await
            .map(ConversationId::from)
    }

    pub async fn locate_post(&self, raw: &str) -> Result<PostId, ApplicationError> {
        self.locate(EntityKind::Post, raw).await.map(PostId::from)
    }

    pub async fn locate_pet(&self, raw: &str) -> Result<PetId, ApplicationError> {
        self.locate(EntityKind::Pet, raw).await.map(PetId::from)
    }
}
