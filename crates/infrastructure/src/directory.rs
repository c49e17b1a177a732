//! 用户、帖子、宠物等只读目录，以及双ID方案的实体查找
//!
//! 这些表由社交网络的其他部分维护，这里只读。

use application::{
    identity::{EntityKind, EntityLookup},
    repository::{ContentDirectory, PetSummary, PostSummary, UserDirectory},
};
use async_trait::async_trait;
use domain::{CanonicalId, PetId, PostId, RepositoryError, UserId, UserProfile, UserRole};
use sqlx::{FromRow, PgPool};

use crate::repository::{map_sqlx_err, parse_id};

#[derive(Debug, FromRow)]
struct UserRecord {
    id: String,
    display_name: String,
    avatar: Option<String>,
    role: String,
}

impl TryFrom<UserRecord> for UserProfile {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let role = match value.role.as_str() {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        };
        Ok(UserProfile {
            id: parse_id(&value.id)?,
            display_name: value.display_name,
            avatar: value.avatar,
            role,
        })
    }
}

fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::User => "users",
        EntityKind::Conversation => "conversations",
        EntityKind::Pet => "pets",
        EntityKind::Group => "groups",
        EntityKind::Post => "posts",
    }
}

#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lookup(
        &self,
        kind: EntityKind,
        column: &str,
        id: &CanonicalId,
    ) -> Result<Option<CanonicalId>, RepositoryError> {
        let sql = format!("SELECT id FROM {} WHERE {column} = $1", table_for(kind));
        let found: Option<String> = sqlx::query_scalar(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        found.as_deref().map(parse_id).transpose()
    }
}

#[async_trait]
impl EntityLookup for PgDirectory {
    async fn find_by_primary(
        &self,
        kind: EntityKind,
        id: &CanonicalId,
    ) -> Result<Option<CanonicalId>, RepositoryError> {
        self.lookup(kind, "id", id).await
    }

    async fn find_by_alternate(
        &self,
        kind: EntityKind,
        id: &CanonicalId,
    ) -> Result<Option<CanonicalId>, RepositoryError> {
        self.lookup(kind, "legacy_id", id).await
    }
}

#[async_trait]
impl UserDirectory for PgDirectory {
    async fn find_profile(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, display_name, avatar, role FROM users WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .map(UserProfile::try_from)
        .transpose()
    }

    async fn find_profiles(&self, ids: &[UserId]) -> Result<Vec<UserProfile>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let records = sqlx::query_as::<_, UserRecord>(
            "SELECT id, display_name, avatar, role FROM users WHERE id = ANY($1)",
        )
        .bind(&raw)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(UserProfile::try_from).collect()
    }
}

#[async_trait]
impl ContentDirectory for PgDirectory {
    async fn find_post(&self, id: &PostId) -> Result<Option<PostSummary>, RepositoryError> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, owner_id, content FROM posts WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        row.map(|(id, owner_id, content)| {
            Ok(PostSummary {
                id: parse_id(&id)?,
                owner_id: parse_id(&owner_id)?,
                content,
            })
        })
        .transpose()
    }

    async fn find_pet(&self, id: &PetId) -> Result<Option<PetSummary>, RepositoryError> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, owner_id, name FROM pets WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        row.map(|(id, owner_id, name)| {
            Ok(PetSummary {
                id: parse_id(&id)?,
                owner_id: parse_id(&owner_id)?,
                name,
            })
        })
        .transpose()
    }
}
