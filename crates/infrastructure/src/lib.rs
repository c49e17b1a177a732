//! 基础设施层实现。
//!
//! 提供 Postgres 仓储、Redis 在线状态缓存与数据库迁移，实现应用层定义的接口。

pub mod builder;
pub mod directory;
pub mod engagement_repository;
pub mod migrations;
pub mod notification_repository;
pub mod presence_storage;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use directory::PgDirectory;
pub use engagement_repository::PgEngagementRepository;
pub use migrations::MIGRATOR;
pub use notification_repository::PgNotificationRepository;
pub use presence_storage::RedisTtlCache;
pub use repository::{create_pg_pool, PgConversationRepository, PgMessageRepository, PgStorage};
