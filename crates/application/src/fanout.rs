use std::sync::Arc;

use domain::{Notification, NotificationPayload, NotificationType, UserId};

use crate::{
    broadcaster::{EventPublisher, Publication, RealtimeEvent, Topic},
    clock::Clock,
    error::ApplicationError,
    repository::{NotificationRepository, UserDirectory},
    retry::retry_read_once,
};

pub struct NotificationFanoutDependencies {
    pub notifications: Arc<dyn NotificationRepository>,
    pub users: Arc<dyn UserDirectory>,
    pub publisher: Arc<dyn EventPublisher>,
    pub clock: Arc<dyn Clock>,
}

/// 从事件构建去规范化的通知，并投递给唯一的接收者
#[derive(Clone)]
pub struct NotificationFanout {
    notifications: Arc<dyn NotificationRepository>,
    users: Arc<dyn UserDirectory>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl NotificationFanout {
    pub fn new(deps: NotificationFanoutDependencies) -> Self {
        Self {
            notifications: deps.notifications,
            users: deps.users,
            publisher: deps.publisher,
            clock: deps.clock,
        }
    }

    /// 接收者与行为人相同时不创建任何记录，返回 `Ok(None)`
    pub async fn notify(
        &self,
        recipient_id: &UserId,
        notification_type: NotificationType,
        actor_id: &UserId,
        payload: NotificationPayload,
    ) -> Result<Option<Notification>, ApplicationError> {
        if recipient_id == actor_id {
            tracing::debug!(
                user_id = %actor_id,
                notification_type = %notification_type,
                "skipped self notification"
            );
            return Ok(None);
        }

        let actor = retry_read_once(|| async {
            self.users
                .find_profile(actor_id)
                .await
                .map_err(ApplicationError::from)
        })
        .await?
        .ok_or_else(|| ApplicationError::not_found("user", actor_id))?;

        let notification = Notification::new(
            recipient_id.clone(),
            notification_type,
            &actor,
            &payload,
            self.clock.now(),
        );
        let notification = self.notifications.create(notification).await?;

        tracing::info!(
            notification_id = %notification.id,
            recipient_id = %recipient_id,
            actor_id = %actor_id,
            notification_type = %notification_type,
            "notification created"
        );

        self.publisher.publish(Publication {
            topic: Topic::User(recipient_id.clone()),
            event: RealtimeEvent::NotificationCreated {
                notification: notification.clone(),
            },
            origin: None,
        });
        Ok(Some(notification))
    }
}
