use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use application::repository::{
    AppendOutcome, AppendedMessage, ConversationDigest, ConversationRepository, MessageRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Conversation, ConversationId, DomainError, Message, MessageCursor, MessageId, NewMessage,
    Page, PageRequest, RepositoryError, UserId,
};
use sqlx::{postgres::PgPoolOptions, Executor, FromRow, PgPool, Postgres};

use crate::{
    directory::PgDirectory, engagement_repository::PgEngagementRepository,
    notification_repository::PgNotificationRepository,
};

/// 唯一约束冲突映射为 `Conflict`；连接池超时、IO、序列化失败与死锁属于瞬时错误
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            RepositoryError::transient(err.to_string())
        }
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => RepositoryError::Conflict,
            Some("40001") | Some("40P01") | Some("55P03") => {
                RepositoryError::transient(err.to_string())
            }
            _ => RepositoryError::storage(err.to_string()),
        },
        _ => RepositoryError::storage(err.to_string()),
    }
}

pub(crate) fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

pub(crate) fn parse_id<T>(raw: &str) -> Result<T, RepositoryError>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>()
        .map_err(|err| invalid_data(format!("corrupt id {raw:?}: {err}")))
}

pub(crate) fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: String,
    is_group: bool,
    creator_id: String,
    name: Option<String>,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    fn into_conversation(self, member_ids: BTreeSet<UserId>) -> Result<Conversation, RepositoryError> {
        Ok(Conversation {
            id: parse_id(&self.id)?,
            is_group: self.is_group,
            creator_id: parse_id(&self.creator_id)?,
            name: self.name,
            description: self.description,
            member_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    seq: i64,
    id: String,
    conversation_id: String,
    sender_id: String,
    receiver_id: Option<String>,
    content: String,
    image_url: Option<String>,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        Ok(Message {
            id: parse_id::<MessageId>(&value.id)?,
            conversation_id: parse_id(&value.conversation_id)?,
            sender_id: parse_id(&value.sender_id)?,
            receiver_id: value
                .receiver_id
                .as_deref()
                .map(parse_id::<UserId>)
                .transpose()?,
            content: value.content,
            image_url: value.image_url,
            is_read: value.is_read,
            created_at: value.created_at,
            sequence: value.seq,
        })
    }
}

async fn load_members<'e, E>(
    executor: E,
    conversation_ids: &[String],
) -> Result<HashMap<String, BTreeSet<UserId>>, RepositoryError>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT conversation_id, user_id
        FROM conversation_members
        WHERE conversation_id = ANY($1)
        "#,
    )
    .bind(conversation_ids)
    .fetch_all(executor)
    .await
    .map_err(map_sqlx_err)?;

    let mut members: HashMap<String, BTreeSet<UserId>> = HashMap::new();
    for (conversation_id, user_id) in rows {
        members
            .entry(conversation_id)
            .or_default()
            .insert(parse_id(&user_id)?);
    }
    Ok(members)
}

fn attach_members(
    records: Vec<ConversationRecord>,
    mut members: HashMap<String, BTreeSet<UserId>>,
) -> Result<Vec<Conversation>, RepositoryError> {
    records
        .into_iter()
        .map(|record| {
            let member_ids = members.remove(&record.id).unwrap_or_default();
            record.into_conversation(member_ids)
        })
        .collect()
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn hydrate_one(
        &self,
        record: Option<ConversationRecord>,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let Some(record) = record else {
            return Ok(None);
        };
        let members = load_members(&self.pool, std::slice::from_ref(&record.id)).await?;
        Ok(attach_members(vec![record], members)?.pop())
    }
}

fn member_strings(conversation: &Conversation) -> Vec<String> {
    conversation
        .member_ids
        .iter()
        .map(|id| id.to_string())
        .collect()
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn create_direct(
        &self,
        conversation: Conversation,
    ) -> Result<(Conversation, bool), RepositoryError> {
        let key = conversation
            .direct_key()
            .ok_or_else(|| invalid_data("not a direct conversation"))?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        // 并发插入同一个键时，后到者等待先到者提交后什么也不做
        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO conversations
                (id, is_group, creator_id, name, description, direct_key,
                 created_at, updated_at, last_activity_at)
            VALUES ($1, FALSE, $2, NULL, NULL, $3, $4, $5, $4)
            ON CONFLICT (direct_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(conversation.id.as_str())
        .bind(conversation.creator_id.as_str())
        .bind(&key)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        if inserted.is_none() {
            tx.rollback().await.map_err(map_sqlx_err)?;
            let existing = self
                .find_direct(&key)
                .await?
                .ok_or(RepositoryError::Conflict)?;
            return Ok((existing, false));
        }

        sqlx::query(
            r#"
            INSERT INTO conversation_members (conversation_id, user_id)
            SELECT $1, UNNEST($2::text[])
            "#,
        )
        .bind(conversation.id.as_str())
        .bind(member_strings(&conversation))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok((conversation, true))
    }

    async fn create_group(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        sqlx::query(
            r#"
            INSERT INTO conversations
                (id, is_group, creator_id, name, description, direct_key,
                 created_at, updated_at, last_activity_at)
            VALUES ($1, TRUE, $2, $3, $4, NULL, $5, $6, $5)
            "#,
        )
        .bind(conversation.id.as_str())
        .bind(conversation.creator_id.as_str())
        .bind(conversation.name.as_deref())
        .bind(conversation.description.as_deref())
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO conversation_members (conversation_id, user_id)
            SELECT $1, UNNEST($2::text[])
            "#,
        )
        .bind(conversation.id.as_str())
        .bind(member_strings(&conversation))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(conversation)
    }

    async fn find_by_id(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, is_group, creator_id, name, description, created_at, updated_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        self.hydrate_one(record).await
    }

    async fn find_direct(&self, key: &str) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, is_group, creator_id, name, description, created_at, updated_at
            FROM conversations
            WHERE direct_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        self.hydrate_one(record).await
    }

    async fn update_details(&self, conversation: &Conversation) -> Result<Conversation, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            UPDATE conversations
            SET name = $2,
                description = $3,
                updated_at = $4,
                last_activity_at = GREATEST(last_activity_at, $4)
            WHERE id = $1
            RETURNING id, is_group, creator_id, name, description, created_at, updated_at
            "#,
        )
        .bind(conversation.id.as_str())
        .bind(conversation.name.as_deref())
        .bind(conversation.description.as_deref())
        .bind(conversation.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        self.hydrate_one(record).await?.ok_or(RepositoryError::NotFound)
    }

    async fn add_member(&self, id: &ConversationId, user_id: &UserId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let is_group: Option<bool> =
            sqlx::query_scalar("SELECT is_group FROM conversations WHERE id = $1 FOR UPDATE")
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        match is_group {
            None => return Err(RepositoryError::NotFound),
            Some(false) => return Err(invalid_data("direct conversations have fixed membership")),
            Some(true) => {}
        }

        sqlx::query("INSERT INTO conversation_members (conversation_id, user_id) VALUES ($1, $2)")
            .bind(id.as_str())
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn remove_member(&self, id: &ConversationId, user_id: &UserId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            DELETE FROM conversation_members
            WHERE conversation_id = $1
              AND user_id = $2
              AND EXISTS (SELECT 1 FROM conversations WHERE id = $1 AND is_group)
            "#,
        )
        .bind(id.as_str())
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_member(&self, id: &ConversationId, user_id: &UserId) -> Result<bool, RepositoryError> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM conversation_members
                WHERE conversation_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(id.as_str())
        .bind(user_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Conversation>, RepositoryError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversation_members WHERE user_id = $1")
                .bind(user_id.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        let records = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT c.id, c.is_group, c.creator_id, c.name, c.description, c.created_at, c.updated_at
            FROM conversations c
            JOIN conversation_members m ON m.conversation_id = c.id
            WHERE m.user_id = $1
            ORDER BY c.last_activity_at DESC, c.id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id.as_str())
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let ids: Vec<String> = records.iter().map(|record| record.id.clone()).collect();
        let members = load_members(&self.pool, &ids).await?;
        let items = attach_members(records, members)?;
        Ok(Page::new(items, page, to_count(total)))
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    /// 会话行锁串行化同一会话的追加，成员校验、排序位置与未读数在同一事务内完成
    async fn append(&self, draft: NewMessage) -> Result<AppendOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let is_group: Option<bool> =
            sqlx::query_scalar("SELECT is_group FROM conversations WHERE id = $1 FOR UPDATE")
                .bind(draft.conversation_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        let Some(is_group) = is_group else {
            return Ok(AppendOutcome::ConversationMissing);
        };

        let members: Vec<String> = sqlx::query_scalar(
            "SELECT user_id FROM conversation_members WHERE conversation_id = $1",
        )
        .bind(draft.conversation_id.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        if !members.iter().any(|member| member == draft.sender_id.as_str()) {
            return Ok(AppendOutcome::NotMember);
        }
        let receiver_id = if is_group {
            None
        } else {
            members
                .iter()
                .find(|member| *member != draft.sender_id.as_str())
                .map(|member| parse_id::<UserId>(member))
                .transpose()?
        };

        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM messages WHERE conversation_id = $1",
        )
        .bind(draft.conversation_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        let created_at = latest.map_or(draft.created_at, |latest| latest.max(draft.created_at));

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages
                (id, conversation_id, sender_id, receiver_id, content, image_url, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7)
            RETURNING seq
            "#,
        )
        .bind(draft.id.as_str())
        .bind(draft.conversation_id.as_str())
        .bind(draft.sender_id.as_str())
        .bind(receiver_id.as_ref().map(UserId::as_str))
        .bind(&draft.content)
        .bind(draft.image_url.as_deref())
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query("UPDATE conversations SET last_activity_at = $2 WHERE id = $1")
            .bind(draft.conversation_id.as_str())
            .bind(created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let counts: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT m.user_id, COUNT(msg.seq)
            FROM conversation_members m
            LEFT JOIN messages msg
              ON msg.conversation_id = m.conversation_id
             AND msg.sender_id <> m.user_id
             AND NOT msg.is_read
            WHERE m.conversation_id = $1 AND m.user_id <> $2
            GROUP BY m.user_id
            "#,
        )
        .bind(draft.conversation_id.as_str())
        .bind(draft.sender_id.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;

        let unread_counts = counts
            .into_iter()
            .map(|(user_id, count)| Ok((parse_id::<UserId>(&user_id)?, to_count(count))))
            .collect::<Result<BTreeMap<_, _>, RepositoryError>>()?;
        Ok(AppendOutcome::Appended(AppendedMessage {
            message: draft.into_message(receiver_id, created_at, sequence),
            unread_counts,
        }))
    }

    async fn list(
        &self,
        conversation_id: &ConversationId,
        page: PageRequest,
    ) -> Result<Page<Message>, RepositoryError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
            .bind(conversation_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT seq, id, conversation_id, sender_id, receiver_id, content, image_url, is_read, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, seq ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let items = records
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, page, to_count(total)))
    }

    async fn list_after(
        &self,
        conversation_id: &ConversationId,
        after: Option<MessageCursor>,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let (after_at, after_seq) = after.map_or((None, None), |cursor| {
            (Some(cursor.created_at), Some(cursor.sequence))
        });
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT seq, id, conversation_id, sender_id, receiver_id, content, image_url, is_read, created_at
            FROM messages
            WHERE conversation_id = $1
              AND ($2::timestamptz IS NULL OR (created_at, seq) > ($2, $3))
            ORDER BY created_at ASC, seq ASC
            LIMIT $4
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(after_at)
        .bind(after_seq)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn last_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Message>, RepositoryError> {
        sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT seq, id, conversation_id, sender_id, receiver_id, content, image_url, is_read, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .map(Message::try_from)
        .transpose()
    }

    async fn mark_all_read_except(
        &self,
        conversation_id: &ConversationId,
        reader_id: &UserId,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET is_read = TRUE
            WHERE conversation_id = $1 AND sender_id <> $2 AND NOT is_read
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(reader_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn unread_count(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM messages
            WHERE conversation_id = $1 AND sender_id <> $2 AND NOT is_read
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(user_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(to_count(count))
    }

    async fn digests(
        &self,
        conversation_ids: &[ConversationId],
        user_id: &UserId,
    ) -> Result<BTreeMap<ConversationId, ConversationDigest>, RepositoryError> {
        let ids: Vec<String> = conversation_ids
            .iter()
            .map(|id| id.as_str().to_owned())
            .collect();

        let last_messages = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT DISTINCT ON (conversation_id)
                seq, id, conversation_id, sender_id, receiver_id, content, image_url, is_read, created_at
            FROM messages
            WHERE conversation_id = ANY($1)
            ORDER BY conversation_id, created_at DESC, seq DESC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let unread: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT conversation_id, COUNT(*)
            FROM messages
            WHERE conversation_id = ANY($1) AND sender_id <> $2 AND NOT is_read
            GROUP BY conversation_id
            "#,
        )
        .bind(&ids)
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut digests = BTreeMap::new();
        for record in last_messages {
            let message = Message::try_from(record)?;
            digests.insert(
                message.conversation_id.clone(),
                ConversationDigest {
                    last_message: Some(message),
                    unread_count: 0,
                },
            );
        }
        for (conversation_id, count) in unread {
            let conversation_id: ConversationId = parse_id(&conversation_id)?;
            digests.entry(conversation_id).or_default().unread_count = to_count(count);
        }
        Ok(digests)
    }
}

/// 共享同一个连接池的全部仓储
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub conversations: Arc<PgConversationRepository>,
    pub messages: Arc<PgMessageRepository>,
    pub notifications: Arc<PgNotificationRepository>,
    pub engagements: Arc<PgEngagementRepository>,
    pub directory: Arc<PgDirectory>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            conversations: Arc::new(PgConversationRepository::new(pool.clone())),
            messages: Arc::new(PgMessageRepository::new(pool.clone())),
            notifications: Arc::new(PgNotificationRepository::new(pool.clone())),
            engagements: Arc::new(PgEngagementRepository::new(pool.clone())),
            directory: Arc::new(PgDirectory::new(pool.clone())),
            pool,
        }
    }
}
