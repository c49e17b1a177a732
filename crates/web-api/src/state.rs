use std::sync::Arc;
use std::time::Duration;

use application::{
    Clock, ContentDirectory, ConversationRepository, ConversationService,
    ConversationServiceDependencies, EngagementRepository, EngagementService,
    EngagementServiceDependencies, EntityLookup, IdentityResolver, MembershipStore, MemoryStore,
    MemoryTtlCache, MessageLog, MessageRepository, NotificationFanout,
    NotificationFanoutDependencies, NotificationRepository, NotificationService, PresenceTracker,
    RealtimeDispatcher, TtlCache, UserDirectory,
};

/// 组装服务所需的全部适配器
pub struct StateDependencies {
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub engagements: Arc<dyn EngagementRepository>,
    pub users: Arc<dyn UserDirectory>,
    pub content: Arc<dyn ContentDirectory>,
    pub lookup: Arc<dyn EntityLookup>,
    pub presence_cache: Arc<dyn TtlCache>,
    pub presence_ttl: Duration,
    pub dispatcher: RealtimeDispatcher,
    pub clock: Arc<dyn Clock>,
}

impl StateDependencies {
    /// 所有存储都落在同一个进程内存储上
    pub fn in_memory(
        store: Arc<MemoryStore>,
        clock: Arc<dyn Clock>,
        presence_ttl: Duration,
        dispatcher: RealtimeDispatcher,
    ) -> Self {
        Self {
            conversations: store.clone(),
            messages: store.clone(),
            notifications: store.clone(),
            engagements: store.clone(),
            users: store.clone(),
            content: store.clone(),
            lookup: store,
            presence_cache: Arc::new(MemoryTtlCache::new(clock.clone())),
            presence_ttl,
            dispatcher,
            clock,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub conversation_service: Arc<ConversationService>,
    pub notification_service: Arc<NotificationService>,
    pub engagement_service: Arc<EngagementService>,
    pub presence: PresenceTracker,
    pub identity: IdentityResolver,
    pub dispatcher: RealtimeDispatcher,
}

impl AppState {
    pub fn new(deps: StateDependencies) -> Self {
        let publisher = Arc::new(deps.dispatcher.clone());
        let presence = PresenceTracker::new(deps.presence_cache, deps.presence_ttl);

        let conversation_service = ConversationService::new(ConversationServiceDependencies {
            membership: MembershipStore::new(deps.conversations, deps.clock.clone()),
            messages: MessageLog::new(deps.messages, deps.clock.clone()),
            presence: presence.clone(),
            users: deps.users.clone(),
            publisher: publisher.clone(),
            subscriptions: publisher.clone(),
        });
        let fanout = NotificationFanout::new(NotificationFanoutDependencies {
            notifications: deps.notifications.clone(),
            users: deps.users.clone(),
            publisher,
            clock: deps.clock.clone(),
        });
        let engagement_service = EngagementService::new(EngagementServiceDependencies {
            engagements: deps.engagements,
            content: deps.content,
            users: deps.users,
            fanout,
            clock: deps.clock,
        });

        Self {
            conversation_service: Arc::new(conversation_service),
            notification_service: Arc::new(NotificationService::new(deps.notifications)),
            engagement_service: Arc::new(engagement_service),
            presence,
            identity: IdentityResolver::new(deps.lookup),
            dispatcher: deps.dispatcher,
        }
    }
}
