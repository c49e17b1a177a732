//! 并发数据一致性测试
//!
//! 验证并发的私聊创建、消息追加与重复点赞在共享存储上的一致性

use std::sync::Arc;

use application::{
    ConversationService, ConversationServiceDependencies, CreateConversationRequest,
    EngagementService, EngagementServiceDependencies, MembershipStore, MemoryStore,
    MemoryTtlCache, MessageLog, NoopPublisher, NotificationFanout,
    NotificationFanoutDependencies, NotificationRepository, PresenceTracker, SendMessageRequest,
    SystemClock,
};
use domain::{PageRequest, PostId, UserId, UserProfile};
use futures::future::join_all;

fn uid(raw: &str) -> UserId {
    UserId::parse(raw).unwrap()
}

/// 测试辅助结构：共享同一个内存存储的服务
struct TestServices {
    store: Arc<MemoryStore>,
    conversations: Arc<ConversationService>,
    engagement: Arc<EngagementService>,
}

impl TestServices {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        for (id, name) in [("1", "Ada"), ("2", "Bo"), ("3", "Cy")] {
            store.seed_user(UserProfile::new(uid(id), name, None)).await;
        }
        let clock = Arc::new(SystemClock);
        let publisher = Arc::new(NoopPublisher);

        let conversations = ConversationService::new(ConversationServiceDependencies {
            membership: MembershipStore::new(store.clone(), clock.clone()),
            messages: MessageLog::new(store.clone(), clock.clone()),
            presence: PresenceTracker::new(
                Arc::new(MemoryTtlCache::new(clock.clone())),
                std::time::Duration::from_secs(1800),
            ),
            users: store.clone(),
            publisher: publisher.clone(),
            subscriptions: publisher.clone(),
        });
        let fanout = NotificationFanout::new(NotificationFanoutDependencies {
            notifications: store.clone(),
            users: store.clone(),
            publisher,
            clock: clock.clone(),
        });
        let engagement = EngagementService::new(EngagementServiceDependencies {
            engagements: store.clone(),
            content: store.clone(),
            users: store.clone(),
            fanout,
            clock,
        });

        Self {
            store,
            conversations: Arc::new(conversations),
            engagement: Arc::new(engagement),
        }
    }
}

/// 并发获取或创建同一对用户的私聊只产生一个会话
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_or_create_direct_yields_one_conversation() {
    let services = TestServices::new().await;

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let conversations = services.conversations.clone();
            let (creator, other) = if i % 2 == 0 { ("1", "2") } else { ("2", "1") };
            tokio::spawn(async move {
                conversations
                    .create_conversation(CreateConversationRequest {
                        creator_id: uid(creator),
                        is_group: false,
                        user_ids: vec![uid(other)],
                        name: None,
                        description: None,
                    })
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let first = &results[0].conversation;
    assert!(results.iter().all(|r| r.conversation.id == first.id));
    assert_eq!(results.iter().filter(|r| r.created).count(), 1);
    assert_eq!(first.member_ids.len(), 2);

    let listed = services
        .conversations
        .list_conversations(&uid("1"), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(listed.total, 1);
}

/// 并发追加后按升序读取，总数不变、游标严格递增、每个发送者的顺序保持
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_are_totally_ordered() {
    let services = TestServices::new().await;
    let created = services
        .conversations
        .create_conversation(CreateConversationRequest {
            creator_id: uid("1"),
            is_group: true,
            user_ids: vec![uid("2"), uid("3")],
            name: Some("pack walk".into()),
            description: None,
        })
        .await
        .unwrap();
    let conversation_id = created.conversation.id;

    let tasks: Vec<_> = ["1", "2", "3"]
        .into_iter()
        .map(|sender| {
            let conversations = services.conversations.clone();
            let conversation_id = conversation_id.clone();
            tokio::spawn(async move {
                for n in 0..20 {
                    conversations
                        .send_message(SendMessageRequest {
                            conversation_id: conversation_id.clone(),
                            sender_id: uid(sender),
                            content: format!("{sender}-{n}"),
                            image_url: None,
                            origin: None,
                        })
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for joined in join_all(tasks).await {
        joined.unwrap();
    }

    let page = services
        .conversations
        .get_messages(&conversation_id, &uid("1"), PageRequest::new(1, 100))
        .await
        .unwrap();
    assert_eq!(page.items.len(), 60);
    assert!(page
        .items
        .windows(2)
        .all(|pair| pair[0].cursor() < pair[1].cursor()));

    for sender in ["1", "2", "3"] {
        let mine: Vec<String> = page
            .items
            .iter()
            .filter(|m| m.sender_id == uid(sender))
            .map(|m| m.content.clone())
            .collect();
        let expected: Vec<String> = (0..20).map(|n| format!("{sender}-{n}")).collect();
        assert_eq!(mine, expected);
    }
}

/// 同一个点赞的快速重复提交最多为作者产生一条通知
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_double_submit_like_creates_one_notification() {
    let services = TestServices::new().await;
    let post_id = PostId::parse("77").unwrap();
    services
        .store
        .seed_post(post_id.clone(), uid("1"), "my beagle learned to sit today")
        .await;

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let engagement = services.engagement.clone();
            let post_id = post_id.clone();
            tokio::spawn(async move { engagement.toggle_post_like(&uid("2"), &post_id).await })
        })
        .collect();
    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let notified = outcomes
        .iter()
        .filter(|outcome| outcome.notification.is_some())
        .count();
    assert_eq!(notified, 1);

    let inbox = services
        .store
        .list_for_user(&uid("1"), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(inbox.total, 1);
    assert_eq!(
        inbox.items[0].text,
        "Bo liked your post: my beagle learned to sit today"
    );
}
