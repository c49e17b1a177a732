use std::sync::Arc;

use domain::{DomainError, Notification, NotificationId, Page, PageRequest, UserId};

use crate::{error::ApplicationError, repository::NotificationRepository, retry::retry_read_once};

/// 通知收件箱：列表、已读、已接收以及计数
pub struct NotificationService {
    notifications: Arc<dyn NotificationRepository>,
}

impl NotificationService {
    pub fn new(notifications: Arc<dyn NotificationRepository>) -> Self {
        Self { notifications }
    }

    /// 最新的在前
    pub async fn list(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Notification>, ApplicationError> {
        retry_read_once(|| async {
            self.notifications
                .list_for_user(user_id, page)
                .await
                .map_err(ApplicationError::from)
        })
        .await
    }

    /// 只有接收者本人可以标记
    pub async fn mark_read(
        &self,
        user_id: &UserId,
        notification_id: &NotificationId,
    ) -> Result<Notification, ApplicationError> {
        let mut notification = retry_read_once(|| async {
            self.notifications
                .find_by_id(notification_id)
                .await
                .map_err(ApplicationError::from)
        })
        .await?
        .ok_or_else(|| ApplicationError::not_found("notification", notification_id))?;

        if &notification.user_id != user_id {
            return Err(DomainError::forbidden("read notification").into());
        }
        if notification.mark_read() {
            self.notifications.mark_read(notification_id).await?;
            tracing::debug!(notification_id = %notification_id, user_id = %user_id, "notification read");
        }
        Ok(notification)
    }

    pub async fn mark_all_read(&self, user_id: &UserId) -> Result<u64, ApplicationError> {
        let changed = self.notifications.mark_all_read(user_id).await?;
        tracing::debug!(user_id = %user_id, changed, "notifications marked read");
        Ok(changed)
    }

    pub async fn mark_all_received(&self, user_id: &UserId) -> Result<u64, ApplicationError> {
        let changed = self.notifications.mark_all_received(user_id).await?;
        tracing::debug!(user_id = %user_id, changed, "notifications marked received");
        Ok(changed)
    }

    pub async fn unread_count(&self, user_id: &UserId) -> Result<u64, ApplicationError> {
        retry_read_once(|| async {
            self.notifications
                .unread_count(user_id)
                .await
                .map_err(ApplicationError::from)
        })
        .await
    }

    pub async fn unreceived_count(&self, user_id: &UserId) -> Result<u64, ApplicationError> {
        retry_read_once(|| async {
            self.notifications
                .unreceived_count(user_id)
                .await
                .map_err(ApplicationError::from)
        })
        .await
    }
}
