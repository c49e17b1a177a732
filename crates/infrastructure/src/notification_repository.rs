use application::repository::NotificationRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Notification, NotificationId, NotificationType, Page, PageRequest, RepositoryError, UserId,
};
use sqlx::{FromRow, PgPool};

use crate::repository::{invalid_data, map_sqlx_err, parse_id, to_count};

#[derive(Debug, FromRow)]
struct NotificationRecord {
    id: String,
    user_id: String,
    #[sqlx(rename = "type")]
    notification_type: String,
    actor_id: String,
    actor_name: String,
    actor_avatar: Option<String>,
    reference_id: Option<String>,
    text: String,
    is_read: bool,
    is_received: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRecord> for Notification {
    type Error = RepositoryError;

    fn try_from(value: NotificationRecord) -> Result<Self, Self::Error> {
        let notification_type = value
            .notification_type
            .parse::<NotificationType>()
            .map_err(|err| invalid_data(err.to_string()))?;
        Ok(Notification {
            id: parse_id(&value.id)?,
            user_id: parse_id(&value.user_id)?,
            notification_type,
            actor_id: parse_id(&value.actor_id)?,
            actor_name: value.actor_name,
            actor_avatar: value.actor_avatar,
            reference_id: value.reference_id,
            text: value.text,
            is_read: value.is_read,
            is_received: value.is_received,
            created_at: value.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn count_where(&self, sql: &'static str, user_id: &UserId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(sql)
            .bind(user_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(to_count(count))
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn create(&self, notification: Notification) -> Result<Notification, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, type, actor_id, actor_name, actor_avatar, reference_id,
                 text, is_read, is_received, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(notification.id.as_str())
        .bind(notification.user_id.as_str())
        .bind(notification.notification_type.as_str())
        .bind(notification.actor_id.as_str())
        .bind(&notification.actor_name)
        .bind(notification.actor_avatar.as_deref())
        .bind(notification.reference_id.as_deref())
        .bind(&notification.text)
        .bind(notification.is_read)
        .bind(notification.is_received)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(notification)
    }

    async fn find_by_id(&self, id: &NotificationId) -> Result<Option<Notification>, RepositoryError> {
        sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT id, user_id, type, actor_id, actor_name, actor_avatar, reference_id,
                   text, is_read, is_received, created_at
            FROM notifications
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .map(Notification::try_from)
        .transpose()
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Notification>, RepositoryError> {
        let total = self
            .count_where("SELECT COUNT(*) FROM notifications WHERE user_id = $1", user_id)
            .await?;
        let records = sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT id, user_id, type, actor_id, actor_name, actor_avatar, reference_id,
                   text, is_read, is_received, created_at
            FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC, seq DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id.as_str())
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let items = records
            .into_iter()
            .map(Notification::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, page, total))
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE notifications SET is_read = TRUE WHERE id = $1 AND NOT is_read")
                .bind(id.as_str())
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND NOT is_read",
        )
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn mark_all_received(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_received = TRUE WHERE user_id = $1 AND NOT is_received",
        )
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn unread_count(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        self.count_where(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT is_read",
            user_id,
        )
        .await
    }

    async fn unreceived_count(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        self.count_where(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT is_received",
            user_id,
        )
        .await
    }
}
