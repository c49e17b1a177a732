//! 应用层实现。
//!
//! 围绕领域模型的实时核心：标识解析、会话成员、消息日志、通知扇出、
//! 在线状态以及实时分发，并对外部适配器（存储、缓存、资料查询）做抽象。

pub mod broadcaster;
pub mod clock;
pub mod dispatcher;
pub mod engagement;
pub mod error;
pub mod fanout;
pub mod identity;
pub mod membership;
pub mod memory;
pub mod message_log;
pub mod presence;
pub mod repository;
pub mod retry;
pub mod services;

pub use broadcaster::{
    ConnectionId, EventPublisher, NoopPublisher, Publication, RealtimeEvent, SubscriptionControl,
    Topic,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{Connection, DeliveryReport, DispatcherSettings, RealtimeDispatcher};
pub use engagement::{EngagementOutcome, EngagementService, EngagementServiceDependencies};
pub use error::ApplicationError;
pub use fanout::{NotificationFanout, NotificationFanoutDependencies};
pub use identity::{EntityKind, EntityLookup, IdentityResolver};
pub use membership::MembershipStore;
pub use memory::MemoryStore;
pub use message_log::MessageLog;
pub use presence::{MemoryTtlCache, PresenceTracker, TtlCache};
pub use repository::{
    AppendOutcome, AppendedMessage, ContentDirectory, ConversationDigest, ConversationRepository,
    EngagementRepository, MessageRepository, NotificationRepository, PetSummary, PostSummary,
    UserDirectory,
};
pub use services::{
    AddMemberRequest, ConversationCreated, ConversationService, ConversationServiceDependencies,
    ConversationSummary, CreateConversationRequest, MarkReadOutcome, MemberStatus,
    NotificationService, RemoveMemberRequest, SendMessageRequest, UpdateConversationRequest,
};
