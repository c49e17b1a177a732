//! 会话、未读计数、在线状态与实时推送的端到端流程

use std::sync::Arc;
use std::time::Duration;

use application::{
    AddMemberRequest, ApplicationError, ConversationService, ConversationServiceDependencies,
    CreateConversationRequest, DispatcherSettings, IdentityResolver, ManualClock,
    MembershipStore, MemoryStore, MemoryTtlCache, MessageLog, PresenceTracker, RealtimeDispatcher,
    RealtimeEvent, RemoveMemberRequest, SendMessageRequest, Topic,
};
use domain::{ConversationId, DomainError, PageRequest, UserId, UserProfile};

fn uid(raw: &str) -> UserId {
    UserId::parse(raw).unwrap()
}

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    presence: PresenceTracker,
    dispatcher: RealtimeDispatcher,
    service: ConversationService,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    for (id, name) in [("1", "Ada"), ("2", "Bo"), ("3", "Cy")] {
        store.seed_user(UserProfile::new(uid(id), name, None)).await;
    }
    let clock = Arc::new(ManualClock::default());
    let presence = PresenceTracker::new(
        Arc::new(MemoryTtlCache::new(clock.clone())),
        Duration::from_secs(30 * 60),
    );
    let dispatcher = RealtimeDispatcher::new(DispatcherSettings::default());
    let service = ConversationService::new(ConversationServiceDependencies {
        membership: MembershipStore::new(store.clone(), clock.clone()),
        messages: MessageLog::new(store.clone(), clock.clone()),
        presence: presence.clone(),
        users: store.clone(),
        publisher: Arc::new(dispatcher.clone()),
        subscriptions: Arc::new(dispatcher.clone()),
    });
    Harness {
        store,
        clock,
        presence,
        dispatcher,
        service,
    }
}

async fn direct(h: &Harness, a: &str, b: &str) -> ConversationId {
    h.service
        .create_conversation(CreateConversationRequest {
            creator_id: uid(a),
            is_group: false,
            user_ids: vec![uid(b)],
            name: None,
            description: None,
        })
        .await
        .unwrap()
        .conversation
        .id
}

async fn send(h: &Harness, conversation_id: &ConversationId, sender: &str, content: &str) {
    h.service
        .send_message(SendMessageRequest {
            conversation_id: conversation_id.clone(),
            sender_id: uid(sender),
            content: content.into(),
            image_url: None,
            origin: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_alternating_senders_read_back_in_send_order() {
    let h = harness().await;
    let conversation_id = direct(&h, "1", "2").await;

    for n in 0..10 {
        let sender = if n % 2 == 0 { "1" } else { "2" };
        send(&h, &conversation_id, sender, &format!("msg {n}")).await;
    }

    let page = h
        .service
        .get_messages(&conversation_id, &uid("2"), PageRequest::new(1, 50))
        .await
        .unwrap();
    let contents: Vec<&str> = page.items.iter().map(|m| m.content.as_str()).collect();
    let expected: Vec<String> = (0..10).map(|n| format!("msg {n}")).collect();
    assert_eq!(contents, expected);
    assert_eq!(page.total, 10);
}

#[tokio::test]
async fn test_adjacent_pages_do_not_overlap() {
    let h = harness().await;
    let conversation_id = direct(&h, "1", "2").await;
    for n in 0..5 {
        send(&h, &conversation_id, "1", &format!("m{n}")).await;
    }

    let first = h
        .service
        .get_messages(&conversation_id, &uid("1"), PageRequest::new(1, 2))
        .await
        .unwrap();
    send(&h, &conversation_id, "2", "late").await;
    let second = h
        .service
        .get_messages(&conversation_id, &uid("1"), PageRequest::new(2, 2))
        .await
        .unwrap();

    assert!(first.has_more);
    assert_eq!(first.items[1].content, "m1");
    assert_eq!(second.items[0].content, "m2");
    assert_eq!(second.items[1].content, "m3");
}

#[tokio::test]
async fn test_unread_count_ignores_own_messages() {
    let h = harness().await;
    let conversation_id = direct(&h, "1", "2").await;

    send(&h, &conversation_id, "2", "b1").await;
    send(&h, &conversation_id, "1", "a1").await;
    send(&h, &conversation_id, "1", "a2").await;
    send(&h, &conversation_id, "2", "b2").await;
    send(&h, &conversation_id, "1", "a3").await;

    let summaries = h
        .service
        .list_conversations(&uid("1"), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(summaries.items[0].unread_count, 2);
    assert_eq!(
        summaries.items[0].last_message.as_ref().map(|m| m.content.as_str()),
        Some("a3")
    );
}

#[tokio::test]
async fn test_mark_read_twice_returns_zero_second_time() {
    let h = harness().await;
    let conversation_id = direct(&h, "1", "2").await;
    send(&h, &conversation_id, "2", "hello").await;
    send(&h, &conversation_id, "2", "are you there").await;

    let first = h.service.mark_read(&conversation_id, &uid("1")).await.unwrap();
    assert_eq!(first.marked, 2);
    assert_eq!(first.unread_count, 0);
    let second = h.service.mark_read(&conversation_id, &uid("1")).await.unwrap();
    assert_eq!(second.marked, 0);
}

#[tokio::test]
async fn test_non_member_send_is_forbidden() {
    let h = harness().await;
    let conversation_id = direct(&h, "1", "2").await;

    let err = h
        .service
        .send_message(SendMessageRequest {
            conversation_id,
            sender_id: uid("3"),
            content: "let me in".into(),
            image_url: None,
            origin: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::Forbidden { .. })));
}

#[tokio::test]
async fn test_removing_user_who_already_left_succeeds() {
    let h = harness().await;
    let group = h
        .service
        .create_conversation(CreateConversationRequest {
            creator_id: uid("1"),
            is_group: true,
            user_ids: vec![uid("2"), uid("3")],
            name: Some("cat people".into()),
            description: None,
        })
        .await
        .unwrap()
        .conversation;

    let leave = RemoveMemberRequest {
        conversation_id: group.id.clone(),
        operator_id: uid("3"),
        target_user_id: uid("3"),
    };
    assert!(h.service.remove_member(leave.clone()).await.unwrap());
    assert!(!h.service.remove_member(leave).await.unwrap());

    let kicked_by_creator = RemoveMemberRequest {
        conversation_id: group.id.clone(),
        operator_id: uid("1"),
        target_user_id: uid("3"),
    };
    assert!(!h.service.remove_member(kicked_by_creator).await.unwrap());
}

#[tokio::test]
async fn test_membership_mutations_check_roles() {
    let h = harness().await;
    let group = h
        .service
        .create_conversation(CreateConversationRequest {
            creator_id: uid("1"),
            is_group: true,
            user_ids: vec![uid("2")],
            name: None,
            description: None,
        })
        .await
        .unwrap()
        .conversation;

    let err = h
        .service
        .add_member(AddMemberRequest {
            conversation_id: group.id.clone(),
            operator_id: uid("2"),
            user_id: uid("3"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::Forbidden { .. })));

    let err = h
        .service
        .remove_member(RemoveMemberRequest {
            conversation_id: group.id.clone(),
            operator_id: uid("2"),
            target_user_id: uid("1"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::Forbidden { .. })));

    h.service
        .add_member(AddMemberRequest {
            conversation_id: group.id.clone(),
            operator_id: uid("1"),
            user_id: uid("3"),
        })
        .await
        .unwrap();
    send(&h, &group.id, "3", "hi all").await;
}

#[tokio::test]
async fn test_deleting_conversation_cascades_messages() {
    let h = harness().await;
    let conversation_id = direct(&h, "1", "2").await;
    send(&h, &conversation_id, "1", "bye").await;

    let err = h
        .service
        .delete_conversation(&conversation_id, &uid("2"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::Forbidden { .. })));

    h.service
        .delete_conversation(&conversation_id, &uid("1"))
        .await
        .unwrap();
    let err = h
        .service
        .get_messages(&conversation_id, &uid("1"), PageRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::NotFound { .. })));

    let recreated = direct(&h, "2", "1").await;
    assert_ne!(recreated, conversation_id);
}

#[tokio::test]
async fn test_presence_follows_ttl_and_shows_in_summaries() {
    let h = harness().await;
    let conversation_id = direct(&h, "1", "2").await;

    h.presence.mark_online(&uid("2")).await.unwrap();
    assert!(h.presence.is_online(&uid("2")).await.unwrap());

    let summaries = h
        .service
        .list_conversations(&uid("1"), PageRequest::default())
        .await
        .unwrap();
    let summary = &summaries.items[0];
    assert_eq!(summary.conversation.id, conversation_id);
    let bo = summary.members.iter().find(|m| m.user_id == uid("2")).unwrap();
    assert!(bo.online);
    assert_eq!(bo.display_name.as_deref(), Some("Bo"));

    h.clock.advance(Duration::from_secs(31 * 60));
    assert!(!h.presence.is_online(&uid("2")).await.unwrap());

    h.presence.mark_online(&uid("2")).await.unwrap();
    h.presence.mark_offline(&uid("2")).await.unwrap();
    assert!(!h.presence.is_online(&uid("2")).await.unwrap());
}

#[tokio::test]
async fn test_send_publishes_without_echo_and_pushes_unread_count() {
    let h = harness().await;
    let conversation_id = direct(&h, "1", "2").await;

    let mut ada = h.dispatcher.connect().await;
    let mut bo_chat = h.dispatcher.connect().await;
    let mut bo_inbox = h.dispatcher.connect().await;
    h.dispatcher
        .subscribe(ada.id, Topic::Conversation(conversation_id.clone()))
        .await;
    h.dispatcher
        .subscribe(bo_chat.id, Topic::Conversation(conversation_id.clone()))
        .await;
    h.dispatcher.subscribe(bo_inbox.id, Topic::User(uid("2"))).await;

    let message = h
        .service
        .send_message(SendMessageRequest {
            conversation_id: conversation_id.clone(),
            sender_id: uid("1"),
            content: "walk at 5?".into(),
            image_url: None,
            origin: Some(ada.id),
        })
        .await
        .unwrap();
    h.dispatcher.deliver_pending().await;

    assert_eq!(
        *bo_chat.events.recv().await.unwrap(),
        RealtimeEvent::MessageCreated { message }
    );
    assert_eq!(
        *bo_inbox.events.recv().await.unwrap(),
        RealtimeEvent::UnreadCountChanged {
            conversation_id,
            unread_count: 1
        }
    );
    assert!(ada.events.try_recv().is_err());
}

#[tokio::test]
async fn test_transient_read_is_retried_once() {
    let h = harness().await;
    let conversation_id = direct(&h, "1", "2").await;

    h.store.inject_transient_failures(1);
    let page = h
        .service
        .get_messages(&conversation_id, &uid("1"), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.total, 0);

    h.store.inject_transient_failures(2);
    let err = h
        .service
        .get_messages(&conversation_id, &uid("1"), PageRequest::default())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_identity_resolver_canonicalises_raw_ids() {
    let h = harness().await;
    let conversation_id = direct(&h, "1", "2").await;
    let resolver = IdentityResolver::new(h.store.clone());

    let upper = conversation_id.as_str().to_uppercase();
    assert_eq!(
        resolver.locate_conversation(&upper).await.unwrap(),
        conversation_id
    );
    assert_eq!(resolver.locate_user("0002").await.unwrap(), uid("2"));
}

#[tokio::test]
async fn test_removed_member_stops_receiving_conversation_events() {
    let h = harness().await;
    let group = h
        .service
        .create_conversation(CreateConversationRequest {
            creator_id: uid("1"),
            is_group: true,
            user_ids: vec![uid("2"), uid("3")],
            name: Some("pack walk".into()),
            description: None,
        })
        .await
        .unwrap()
        .conversation;
    let topic = Topic::Conversation(group.id.clone());

    let mut bo = h.dispatcher.connect_user(uid("2")).await;
    let mut cy = h.dispatcher.connect_user(uid("3")).await;
    for (connection, user) in [(bo.id, "2"), (cy.id, "3")] {
        h.service.ensure_member(&group.id, &uid(user)).await.unwrap();
        h.dispatcher.subscribe(connection, topic.clone()).await;
    }

    h.service
        .remove_member(RemoveMemberRequest {
            conversation_id: group.id.clone(),
            operator_id: uid("1"),
            target_user_id: uid("2"),
        })
        .await
        .unwrap();
    assert_eq!(h.dispatcher.subscriber_count(&topic).await, 1);

    send(&h, &group.id, "1", "treats hidden under the couch").await;
    h.dispatcher.deliver_pending().await;

    match cy.events.recv().await.as_deref() {
        Some(RealtimeEvent::MessageCreated { message }) => {
            assert_eq!(message.content, "treats hidden under the couch")
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(bo.events.try_recv().is_err());
}

#[tokio::test]
async fn test_deleting_conversation_closes_its_topic() {
    let h = harness().await;
    let conversation_id = direct(&h, "1", "2").await;
    let topic = Topic::Conversation(conversation_id.clone());
    let ada = h.dispatcher.connect_user(uid("1")).await;
    h.dispatcher.subscribe(ada.id, topic.clone()).await;

    h.service
        .delete_conversation(&conversation_id, &uid("1"))
        .await
        .unwrap();

    assert_eq!(h.dispatcher.subscriber_count(&topic).await, 0);
    assert_eq!(h.dispatcher.subscriber_count(&Topic::User(uid("1"))).await, 1);
}
