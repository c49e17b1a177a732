use application::repository::EngagementRepository;
use async_trait::async_trait;
use domain::{CanonicalId, Engagement, EngagementKind, RepositoryError, UserId};
use sqlx::PgPool;

use crate::repository::map_sqlx_err;

/// 点赞与关注记录，主键 `(kind, user_id, target_id)` 负责去重
#[derive(Clone)]
pub struct PgEngagementRepository {
    pool: PgPool,
}

impl PgEngagementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EngagementRepository for PgEngagementRepository {
    async fn insert_if_absent(&self, engagement: Engagement) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO engagements (kind, user_id, target_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (kind, user_id, target_id) DO NOTHING
            "#,
        )
        .bind(engagement.kind.as_str())
        .bind(engagement.user_id.as_str())
        .bind(engagement.target_id.as_str())
        .bind(engagement.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove(
        &self,
        kind: EngagementKind,
        user_id: &UserId,
        target_id: &CanonicalId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM engagements WHERE kind = $1 AND user_id = $2 AND target_id = $3",
        )
        .bind(kind.as_str())
        .bind(user_id.as_str())
        .bind(target_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(
        &self,
        kind: EngagementKind,
        user_id: &UserId,
        target_id: &CanonicalId,
    ) -> Result<bool, RepositoryError> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM engagements
                WHERE kind = $1 AND user_id = $2 AND target_id = $3
            )
            "#,
        )
        .bind(kind.as_str())
        .bind(user_id.as_str())
        .bind(target_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}
