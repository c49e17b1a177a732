//! 点赞与关注
//!
//! 去重完全依赖存储层 `(kind, user_id, target_id)` 的唯一约束：只有真正插入了记录的那次调用
//! 才会触发通知，并发的重复提交最多产生一条通知。

use std::sync::Arc;

use domain::{
    CanonicalId, DomainError, Engagement, EngagementKind, Notification, NotificationPayload,
    NotificationType, PetId, PostId, UserId,
};
use serde::Serialize;

use crate::{
    clock::Clock,
    error::ApplicationError,
    fanout::NotificationFanout,
    repository::{ContentDirectory, EngagementRepository, PetSummary, PostSummary, UserDirectory},
    retry::retry_read_once,
};

/// 切换或设置互动后的状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementOutcome {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
}

pub struct EngagementServiceDependencies {
    pub engagements: Arc<dyn EngagementRepository>,
    pub content: Arc<dyn ContentDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub fanout: NotificationFanout,
    pub clock: Arc<dyn Clock>,
}

pub struct EngagementService {
    deps: EngagementServiceDependencies,
}

impl EngagementService {
    pub fn new(deps: EngagementServiceDependencies) -> Self {
        Self { deps }
    }

    async fn post(&self, post_id: &PostId) -> Result<PostSummary, ApplicationError> {
        retry_read_once(|| async {
            self.deps
                .content
                .find_post(post_id)
                .await
                .map_err(ApplicationError::from)
        })
        .await?
        .ok_or_else(|| ApplicationError::not_found("post", post_id))
    }

    async fn pet(&self, pet_id: &PetId) -> Result<PetSummary, ApplicationError> {
        retry_read_once(|| async {
            self.deps
                .content
                .find_pet(pet_id)
                .await
                .map_err(ApplicationError::from)
        })
        .await?
        .ok_or_else(|| ApplicationError::not_found("pet", pet_id))
    }

    /// 先尝试插入；插入失败说明已存在，改为删除
    async fn toggle(
        &self,
        kind: EngagementKind,
        user_id: &UserId,
        target_id: CanonicalId,
    ) -> Result<bool, ApplicationError> {
        let engagement = Engagement {
            kind,
            user_id: user_id.clone(),
            target_id: target_id.clone(),
            created_at: self.deps.clock.now(),
        };
        if self.deps.engagements.insert_if_absent(engagement).await? {
            tracing::info!(kind = %kind, user_id = %user_id, target_id = %target_id, "engagement added");
            return Ok(true);
        }

        self.deps
            .engagements
            .remove(kind, user_id, &target_id)
            .await?;
        tracing::info!(kind = %kind, user_id = %user_id, target_id = %target_id, "engagement removed");
        Ok(false)
    }

    pub async fn toggle_post_like(
        &self,
        user_id: &UserId,
        post_id: &PostId,
    ) -> Result<EngagementOutcome, ApplicationError> {
        let post = self.post(post_id).await?;
        if !self
            .toggle(EngagementKind::PostLike, user_id, post_id.0.clone())
            .await?
        {
            return Ok(EngagementOutcome {
                active: false,
                notification: None,
            });
        }

        let notification = self
            .deps
            .fanout
            .notify(
                &post.owner_id,
                NotificationType::LikePost,
                user_id,
                NotificationPayload::Post {
                    post_id: post.id,
                    content: post.content,
                },
            )
            .await?;
        Ok(EngagementOutcome {
            active: true,
            notification,
        })
    }

    pub async fn toggle_pet_like(
        &self,
        user_id: &UserId,
        pet_id: &PetId,
    ) -> Result<EngagementOutcome, ApplicationError> {
        let pet = self.pet(pet_id).await?;
        if !self
            .toggle(EngagementKind::PetLike, user_id, pet_id.0.clone())
            .await?
        {
            return Ok(EngagementOutcome {
                active: false,
                notification: None,
            });
        }

        let notification = self
            .deps
            .fanout
            .notify(
                &pet.owner_id,
                NotificationType::LikePet,
                user_id,
                NotificationPayload::Pet {
                    pet_id: pet.id,
                    pet_name: pet.name,
                },
            )
            .await?;
        Ok(EngagementOutcome {
            active: true,
            notification,
        })
    }

    /// 幂等：已关注时返回 `active = true` 且不再通知
    pub async fn follow(
        &self,
        follower_id: &UserId,
        followee_id: &UserId,
    ) -> Result<EngagementOutcome, ApplicationError> {
        if follower_id == followee_id {
            return Err(DomainError::invalid_argument("user_id", "cannot follow yourself").into());
        }
        let followee = retry_read_once(|| async {
            self.deps
                .users
                .find_profile(followee_id)
                .await
                .map_err(ApplicationError::from)
        })
        .await?;
        if followee.is_none() {
            return Err(ApplicationError::not_found("user", followee_id));
        }

        let engagement = Engagement {
            kind: EngagementKind::Follow,
            user_id: follower_id.clone(),
            target_id: followee_id.0.clone(),
            created_at: self.deps.clock.now(),
        };
        if !self.deps.engagements.insert_if_absent(engagement).await? {
            return Ok(EngagementOutcome {
                active: true,
                notification: None,
            });
        }
        tracing::info!(follower_id = %follower_id, followee_id = %followee_id, "follow added");

        let notification = self
            .deps
            .fanout
            .notify(
                followee_id,
                NotificationType::Follow,
                follower_id,
                NotificationPayload::Profile,
            )
            .await?;
        Ok(EngagementOutcome {
            active: true,
            notification,
        })
    }

    pub async fn unfollow(
        &self,
        follower_id: &UserId,
        followee_id: &UserId,
    ) -> Result<EngagementOutcome, ApplicationError> {
        let removed = self
            .deps
            .engagements
            .remove(EngagementKind::Follow, follower_id, &followee_id.0)
            .await?;
        if removed {
            tracing::info!(follower_id = %follower_id, followee_id = %followee_id, "follow removed");
        }
        Ok(EngagementOutcome {
            active: false,
            notification: None,
        })
    }

    /// 评论本身由帖子服务保存，这里只负责通知帖子作者
    pub async fn record_comment(
        &self,
        commenter_id: &UserId,
        post_id: &PostId,
    ) -> Result<Option<Notification>, ApplicationError> {
        let post = self.post(post_id).await?;
        self.deps
            .fanout
            .notify(
                &post.owner_id,
                NotificationType::Comment,
                commenter_id,
                NotificationPayload::Post {
                    post_id: post.id,
                    content: post.content,
                },
            )
            .await
    }

    pub async fn is_following(
        &self,
        follower_id: &UserId,
        followee_id: &UserId,
    ) -> Result<bool, ApplicationError> {
        retry_read_once(|| async {
            self.deps
                .engagements
                .exists(EngagementKind::Follow, follower_id, &followee_id.0)
                .await
                .map_err(ApplicationError::from)
        })
        .await
    }
}
