//! 实时分发器
//!
//! 请求处理方通过 [`EventPublisher::publish`] 把事件放入有界待投递队列后立即返回；
//! 独立的分发循环负责投递与超时控制，订阅者的健康状况不会影响请求延迟。
//!
//! 队列满时丢弃同主题最旧的一条待投递事件；该主题没有待投递事件时丢弃全局最旧的一条。
//! 离线订阅者不缓存任何事件，持久化的消息与通知记录才是事实来源。
//!
//! 每轮投递按订阅者拆分，各订阅者并发推进、互不等待。订阅者第一次超时后进入滞后状态，
//! 之后缓冲区满就直接丢弃而不再等待；连续未送达达到 [`MAX_CONSECUTIVE_MISSES`] 条即被逐出。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use domain::UserId;
use futures::future::join_all;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::broadcaster::{
    ConnectionId, EventPublisher, Publication, RealtimeEvent, SubscriptionControl, Topic,
};

/// 连续未送达多少条后逐出订阅者
pub const MAX_CONSECUTIVE_MISSES: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub queue_capacity: usize,
    pub subscriber_buffer: usize,
    pub delivery_timeout: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from(&config::RealtimeConfig::default())
    }
}

impl From<&config::RealtimeConfig> for DispatcherSettings {
    fn from(config: &config::RealtimeConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            subscriber_buffer: config.subscriber_buffer.max(1),
            delivery_timeout: Duration::from_millis(config.delivery_timeout_ms),
        }
    }
}

/// 新建连接的接收端
pub struct Connection {
    pub id: ConnectionId,
    pub events: mpsc::Receiver<Arc<RealtimeEvent>>,
}

/// 一轮投递的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub timed_out: usize,
    /// 滞后订阅者缓冲区已满，直接丢弃
    pub dropped: usize,
    pub closed: usize,
    pub evicted: usize,
}

impl DeliveryReport {
    fn merge(&mut self, other: DeliveryReport) {
        self.delivered += other.delivered;
        self.timed_out += other.timed_out;
        self.dropped += other.dropped;
        self.closed += other.closed;
        self.evicted += other.evicted;
    }
}

struct Subscriber {
    sender: mpsc::Sender<Arc<RealtimeEvent>>,
    /// 连接所属用户，匿名连接为 `None`
    owner: Option<UserId>,
    topics: HashSet<Topic>,
    misses: Arc<AtomicU32>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Subscriber>,
    topics: HashMap<Topic, HashSet<ConnectionId>>,
}

impl Registry {
    fn remove_connection(&mut self, id: &ConnectionId) -> bool {
        let Some(subscriber) = self.connections.remove(id) else {
            return false;
        };
        for topic in subscriber.topics {
            self.detach(&topic, id);
        }
        true
    }

    fn detach(&mut self, topic: &Topic, id: &ConnectionId) {
        if let Some(members) = self.topics.get_mut(topic) {
            members.remove(id);
            if members.is_empty() {
                self.topics.remove(topic);
            }
        }
    }
}

struct PendingQueue {
    items: VecDeque<Publication>,
    capacity: usize,
}

impl PendingQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 入队，返回因容量被挤掉的那一条
    fn push(&mut self, publication: Publication) -> Option<Publication> {
        let dropped = if self.items.len() >= self.capacity {
            match self
                .items
                .iter()
                .position(|pending| pending.topic == publication.topic)
            {
                Some(index) => self.items.remove(index),
                None => self.items.pop_front(),
            }
        } else {
            None
        };
        self.items.push_back(publication);
        dropped
    }

    fn drain(&mut self) -> Vec<Publication> {
        self.items.drain(..).collect()
    }
}

enum Attempt {
    Delivered,
    TimedOut,
    Dropped,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteEnd {
    Open,
    Closed,
    Evicted,
}

/// 一个订阅者在本轮要收到的事件，保持入队顺序
struct Route {
    id: ConnectionId,
    sender: mpsc::Sender<Arc<RealtimeEvent>>,
    misses: Arc<AtomicU32>,
    events: Vec<(Topic, Arc<RealtimeEvent>)>,
}

impl Route {
    async fn run(self, delivery_timeout: Duration) -> (ConnectionId, DeliveryReport, RouteEnd) {
        let mut report = DeliveryReport::default();
        for (topic, event) in self.events {
            let attempt = if self.misses.load(Ordering::Acquire) > 0 {
                match self.sender.try_send(Arc::clone(&event)) {
                    Ok(()) => Attempt::Delivered,
                    Err(TrySendError::Full(_)) => Attempt::Dropped,
                    Err(TrySendError::Closed(_)) => Attempt::Closed,
                }
            } else {
                match timeout(delivery_timeout, self.sender.send(Arc::clone(&event))).await {
                    Ok(Ok(())) => Attempt::Delivered,
                    Ok(Err(_)) => Attempt::Closed,
                    Err(_) => Attempt::TimedOut,
                }
            };

            match attempt {
                Attempt::Delivered => {
                    report.delivered += 1;
                    self.misses.store(0, Ordering::Release);
                    continue;
                }
                Attempt::Closed => {
                    report.closed += 1;
                    return (self.id, report, RouteEnd::Closed);
                }
                Attempt::TimedOut => {
                    report.timed_out += 1;
                    tracing::warn!(
                        connection_id = %self.id,
                        topic = %topic,
                        event = event.name(),
                        "realtime delivery timed out"
                    );
                }
                Attempt::Dropped => report.dropped += 1,
            }

            let misses = self.misses.fetch_add(1, Ordering::AcqRel) + 1;
            if misses >= MAX_CONSECUTIVE_MISSES {
                report.evicted += 1;
                return (self.id, report, RouteEnd::Evicted);
            }
        }
        (self.id, report, RouteEnd::Open)
    }
}

struct Inner {
    settings: DispatcherSettings,
    registry: RwLock<Registry>,
    queue: Mutex<PendingQueue>,
    wakeup: Notify,
    shutdown: AtomicBool,
}

#[derive(Clone)]
pub struct RealtimeDispatcher {
    inner: Arc<Inner>,
}

impl RealtimeDispatcher {
    pub fn new(settings: DispatcherSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                registry: RwLock::new(Registry::default()),
                queue: Mutex::new(PendingQueue::new(settings.queue_capacity)),
                wakeup: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// 启动后台分发循环
    pub fn spawn(&self) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            tracing::info!("realtime dispatcher started");
            loop {
                let report = dispatcher.deliver_pending().await;
                if report == DeliveryReport::default() && dispatcher.queue_is_empty() {
                    if dispatcher.inner.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    dispatcher.inner.wakeup.notified().await;
                }
            }
            tracing::info!("realtime dispatcher stopped");
        })
    }

    /// 通知分发循环在清空队列后退出
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wakeup.notify_one();
    }

    /// 不属于任何用户的连接
    pub async fn connect(&self) -> Connection {
        self.register(None).await
    }

    /// 注册属于 `user_id` 的连接并订阅其用户主题
    pub async fn connect_user(&self, user_id: UserId) -> Connection {
        let connection = self.register(Some(user_id.clone())).await;
        self.subscribe(connection.id, Topic::User(user_id)).await;
        connection
    }

    async fn register(&self, owner: Option<UserId>) -> Connection {
        let (sender, events) = mpsc::channel(self.inner.settings.subscriber_buffer);
        let id = ConnectionId::new();
        self.inner.registry.write().await.connections.insert(
            id,
            Subscriber {
                sender,
                owner,
                topics: HashSet::new(),
                misses: Arc::new(AtomicU32::new(0)),
            },
        );
        tracing::debug!(connection_id = %id, "realtime connection registered");
        Connection { id, events }
    }

    /// 连接不存在时返回 `false`
    pub async fn subscribe(&self, id: ConnectionId, topic: Topic) -> bool {
        let mut registry = self.inner.registry.write().await;
        let Some(subscriber) = registry.connections.get_mut(&id) else {
            return false;
        };
        subscriber.topics.insert(topic.clone());
        tracing::debug!(connection_id = %id, topic = %topic, "subscribed");
        registry.topics.entry(topic).or_default().insert(id);
        true
    }

    pub async fn unsubscribe(&self, id: ConnectionId, topic: &Topic) {
        let mut registry = self.inner.registry.write().await;
        if let Some(subscriber) = registry.connections.get_mut(&id) {
            subscriber.topics.remove(topic);
        }
        registry.detach(topic, &id);
    }

    /// 撤销 `user_id` 名下所有连接在 `topic` 上的订阅
    pub async fn revoke_user(&self, topic: &Topic, user_id: &UserId) -> usize {
        let mut registry = self.inner.registry.write().await;
        let owned: Vec<ConnectionId> = match registry.topics.get(topic) {
            Some(members) => members
                .iter()
                .filter(|id| {
                    registry
                        .connections
                        .get(id)
                        .is_some_and(|subscriber| subscriber.owner.as_ref() == Some(user_id))
                })
                .copied()
                .collect(),
            None => return 0,
        };
        for id in &owned {
            if let Some(subscriber) = registry.connections.get_mut(id) {
                subscriber.topics.remove(topic);
            }
            registry.detach(topic, id);
        }
        if !owned.is_empty() {
            tracing::debug!(topic = %topic, user_id = %user_id, revoked = owned.len(), "subscriptions revoked");
        }
        owned.len()
    }

    /// 移除主题上的全部订阅，连接本身保留
    pub async fn close_topic(&self, topic: &Topic) -> usize {
        let mut registry = self.inner.registry.write().await;
        let Some(members) = registry.topics.remove(topic) else {
            return 0;
        };
        for id in &members {
            if let Some(subscriber) = registry.connections.get_mut(id) {
                subscriber.topics.remove(topic);
            }
        }
        tracing::debug!(topic = %topic, closed = members.len(), "topic closed");
        members.len()
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        if self.inner.registry.write().await.remove_connection(&id) {
            tracing::debug!(connection_id = %id, "realtime connection closed");
        }
    }

    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .registry
            .read()
            .await
            .topics
            .get(topic)
            .map_or(0, HashSet::len)
    }

    pub fn pending(&self) -> usize {
        self.lock_queue().items.len()
    }

    fn queue_is_empty(&self) -> bool {
        self.pending() == 0
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, PendingQueue> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 投递当前所有待投递事件；每个订阅者按入队顺序接收
    pub async fn deliver_pending(&self) -> DeliveryReport {
        let batch = self.lock_queue().drain();
        if batch.is_empty() {
            return DeliveryReport::default();
        }

        let routes = self.route(batch).await;
        let delivery_timeout = self.inner.settings.delivery_timeout;
        let outcomes = join_all(routes.into_iter().map(|route| route.run(delivery_timeout))).await;

        let mut report = DeliveryReport::default();
        let mut removed = Vec::new();
        for (id, outcome, end) in outcomes {
            report.merge(outcome);
            match end {
                RouteEnd::Open => {}
                RouteEnd::Closed => removed.push(id),
                RouteEnd::Evicted => {
                    tracing::warn!(connection_id = %id, "evicted lagging realtime subscriber");
                    removed.push(id);
                }
            }
        }

        if !removed.is_empty() {
            let mut registry = self.inner.registry.write().await;
            for id in &removed {
                registry.remove_connection(id);
            }
            tracing::debug!(pruned = removed.len(), "pruned realtime subscribers");
        }
        report
    }

    async fn route(&self, batch: Vec<Publication>) -> Vec<Route> {
        let registry = self.inner.registry.read().await;
        let mut routes: HashMap<ConnectionId, Route> = HashMap::new();
        for publication in batch {
            let Some(members) = registry.topics.get(&publication.topic) else {
                continue;
            };
            let event = Arc::new(publication.event);
            for id in members {
                if Some(*id) == publication.origin {
                    continue;
                }
                let Some(subscriber) = registry.connections.get(id) else {
                    continue;
                };
                routes
                    .entry(*id)
                    .or_insert_with(|| Route {
                        id: *id,
                        sender: subscriber.sender.clone(),
                        misses: Arc::clone(&subscriber.misses),
                        events: Vec::new(),
                    })
                    .events
                    .push((publication.topic.clone(), Arc::clone(&event)));
            }
        }
        routes.into_values().collect()
    }
}

impl EventPublisher for RealtimeDispatcher {
    fn publish(&self, publication: Publication) {
        let dropped = self.lock_queue().push(publication);
        if let Some(dropped) = dropped {
            tracing::warn!(
                topic = %dropped.topic,
                event = dropped.event.name(),
                "realtime queue full, dropped oldest pending delivery"
            );
        }
        self.inner.wakeup.notify_one();
    }
}

#[async_trait]
impl SubscriptionControl for RealtimeDispatcher {
    async fn revoke(&self, topic: &Topic, user_id: &UserId) -> usize {
        self.revoke_user(topic, user_id).await
    }

    async fn close(&self, topic: &Topic) -> usize {
        self.close_topic(topic).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{ConversationId, UserId};

    fn settings(queue_capacity: usize, subscriber_buffer: usize) -> DispatcherSettings {
        DispatcherSettings {
            queue_capacity,
            subscriber_buffer,
            delivery_timeout: Duration::from_millis(20),
        }
    }

    fn unread(conversation_id: &ConversationId, unread_count: u64) -> RealtimeEvent {
        RealtimeEvent::UnreadCountChanged {
            conversation_id: conversation_id.clone(),
            unread_count,
        }
    }

    fn publication(topic: Topic, event: RealtimeEvent, origin: Option<ConnectionId>) -> Publication {
        Publication {
            topic,
            event,
            origin,
        }
    }

    #[tokio::test]
    async fn origin_connection_gets_no_echo() {
        let dispatcher = RealtimeDispatcher::new(settings(16, 4));
        let conversation_id = ConversationId::generate();
        let topic = Topic::Conversation(conversation_id.clone());

        let mut sender = dispatcher.connect().await;
        let mut reader = dispatcher.connect().await;
        assert!(dispatcher.subscribe(sender.id, topic.clone()).await);
        assert!(dispatcher.subscribe(reader.id, topic.clone()).await);

        dispatcher.publish(publication(topic, unread(&conversation_id, 1), Some(sender.id)));
        let report = dispatcher.deliver_pending().await;

        assert_eq!(report.delivered, 1);
        assert_eq!(*reader.events.recv().await.unwrap(), unread(&conversation_id, 1));
        assert!(sender.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_for_same_topic() {
        let dispatcher = RealtimeDispatcher::new(settings(2, 8));
        let a = ConversationId::generate();
        let b = ConversationId::generate();
        let topic_a = Topic::Conversation(a.clone());
        let topic_b = Topic::Conversation(b.clone());

        let mut connection = dispatcher.connect().await;
        dispatcher.subscribe(connection.id, topic_a.clone()).await;
        dispatcher.subscribe(connection.id, topic_b.clone()).await;

        dispatcher.publish(publication(topic_a.clone(), unread(&a, 1), None));
        dispatcher.publish(publication(topic_b.clone(), unread(&b, 1), None));
        dispatcher.publish(publication(topic_b, unread(&b, 2), None));
        assert_eq!(dispatcher.pending(), 2);

        dispatcher.deliver_pending().await;
        assert_eq!(*connection.events.recv().await.unwrap(), unread(&a, 1));
        assert_eq!(*connection.events.recv().await.unwrap(), unread(&b, 2));
    }

    #[tokio::test]
    async fn full_queue_without_same_topic_drops_global_oldest() {
        let dispatcher = RealtimeDispatcher::new(settings(1, 8));
        let a = ConversationId::generate();
        let b = ConversationId::generate();

        dispatcher.publish(publication(Topic::Conversation(a.clone()), unread(&a, 1), None));
        dispatcher.publish(publication(Topic::Conversation(b.clone()), unread(&b, 1), None));

        let remaining = dispatcher.lock_queue().drain();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].topic, Topic::Conversation(b));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_subscriber_times_out_without_blocking_others() {
        let dispatcher = RealtimeDispatcher::new(settings(16, 1));
        let user = UserId::parse("7").unwrap();
        let topic = Topic::User(user);
        let conversation_id = ConversationId::generate();

        let stalled = dispatcher.connect().await;
        let mut healthy = dispatcher.connect().await;
        dispatcher.subscribe(stalled.id, topic.clone()).await;
        dispatcher.subscribe(healthy.id, topic.clone()).await;

        dispatcher.publish(publication(topic.clone(), unread(&conversation_id, 1), None));
        dispatcher.publish(publication(topic, unread(&conversation_id, 2), None));

        let drain = tokio::spawn(async move {
            let first = healthy.events.recv().await;
            let second = healthy.events.recv().await;
            (first, second)
        });
        let report = dispatcher.deliver_pending().await;

        assert_eq!(report.timed_out, 1);
        assert_eq!(report.delivered, 3);
        let (first, second) = drain.await.unwrap();
        assert_eq!(*first.unwrap(), unread(&conversation_id, 1));
        assert_eq!(*second.unwrap(), unread(&conversation_id, 2));
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let dispatcher = RealtimeDispatcher::new(settings(16, 4));
        let topic = Topic::User(UserId::parse("3").unwrap());
        let connection = dispatcher.connect().await;
        dispatcher.subscribe(connection.id, topic.clone()).await;
        drop(connection.events);

        dispatcher.publish(publication(
            topic.clone(),
            unread(&ConversationId::generate(), 1),
            None,
        ));
        let report = dispatcher.deliver_pending().await;

        assert_eq!(report.closed, 1);
        assert_eq!(dispatcher.subscriber_count(&topic).await, 0);
    }

    #[tokio::test]
    async fn background_loop_delivers_published_events() {
        let dispatcher = RealtimeDispatcher::new(settings(16, 4));
        let handle = dispatcher.spawn();
        let topic = Topic::User(UserId::parse("5").unwrap());
        let mut connection = dispatcher.connect().await;
        dispatcher.subscribe(connection.id, topic.clone()).await;

        let conversation_id = ConversationId::generate();
        dispatcher.publish(publication(topic, unread(&conversation_id, 4), None));
        let event = tokio::time::timeout(Duration::from_secs(1), connection.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*event, unread(&conversation_id, 4));

        dispatcher.shutdown();
        handle.await.unwrap();
    }

    fn stalling_settings() -> DispatcherSettings {
        DispatcherSettings {
            queue_capacity: 64,
            subscriber_buffer: 1,
            delivery_timeout: Duration::from_millis(250),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_subscriber_does_not_delay_other_topics() {
        let dispatcher = RealtimeDispatcher::new(stalling_settings());
        let stalled_topic = Topic::User(UserId::parse("1").unwrap());
        let healthy_topic = Topic::User(UserId::parse("2").unwrap());
        let conversation_id = ConversationId::generate();

        let stalled = dispatcher.connect().await;
        let mut healthy = dispatcher.connect().await;
        dispatcher.subscribe(stalled.id, stalled_topic.clone()).await;
        dispatcher.subscribe(healthy.id, healthy_topic.clone()).await;

        for n in 1..=10 {
            dispatcher.publish(publication(stalled_topic.clone(), unread(&conversation_id, n), None));
        }
        dispatcher.publish(publication(healthy_topic, unread(&conversation_id, 99), None));

        let started = tokio::time::Instant::now();
        let worker = dispatcher.clone();
        let delivery = tokio::spawn(async move { worker.deliver_pending().await });

        let event = healthy.events.recv().await.unwrap();
        assert_eq!(*event, unread(&conversation_id, 99));
        assert!(started.elapsed() < Duration::from_millis(250));

        let report = delivery.await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.dropped, 8);
        assert_eq!(report.evicted, 0);

        // 已滞后的订阅者不会再让下一轮等待超时
        dispatcher.publish(publication(stalled_topic.clone(), unread(&conversation_id, 11), None));
        let started = tokio::time::Instant::now();
        let report = dispatcher.deliver_pending().await;
        assert_eq!(report.dropped, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(dispatcher.subscriber_count(&stalled_topic).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_missing_too_many_events_is_evicted() {
        let dispatcher = RealtimeDispatcher::new(stalling_settings());
        let topic = Topic::User(UserId::parse("4").unwrap());
        let conversation_id = ConversationId::generate();
        let mut stalled = dispatcher.connect().await;
        dispatcher.subscribe(stalled.id, topic.clone()).await;

        for n in 1..=20 {
            dispatcher.publish(publication(topic.clone(), unread(&conversation_id, n), None));
        }
        let report = dispatcher.deliver_pending().await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.dropped, MAX_CONSECUTIVE_MISSES as usize - 1);
        assert_eq!(report.evicted, 1);
        assert_eq!(dispatcher.subscriber_count(&topic).await, 0);

        // 缓冲里的那一条仍可读出，随后通道关闭
        assert_eq!(*stalled.events.recv().await.unwrap(), unread(&conversation_id, 1));
        assert!(stalled.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn revoking_a_user_only_drops_their_connections() {
        let dispatcher = RealtimeDispatcher::new(settings(16, 4));
        let conversation_id = ConversationId::generate();
        let topic = Topic::Conversation(conversation_id.clone());
        let leaver = UserId::parse("2").unwrap();

        let mut stays = dispatcher.connect_user(UserId::parse("1").unwrap()).await;
        let mut phone = dispatcher.connect_user(leaver.clone()).await;
        let mut laptop = dispatcher.connect_user(leaver.clone()).await;
        for id in [stays.id, phone.id, laptop.id] {
            dispatcher.subscribe(id, topic.clone()).await;
        }

        assert_eq!(dispatcher.revoke_user(&topic, &leaver).await, 2);
        assert_eq!(dispatcher.subscriber_count(&topic).await, 1);
        assert_eq!(dispatcher.subscriber_count(&Topic::User(leaver)).await, 2);

        dispatcher.publish(publication(topic, unread(&conversation_id, 1), None));
        dispatcher.deliver_pending().await;
        assert_eq!(*stays.events.recv().await.unwrap(), unread(&conversation_id, 1));
        assert!(phone.events.try_recv().is_err());
        assert!(laptop.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn closing_a_topic_keeps_connections() {
        let dispatcher = RealtimeDispatcher::new(settings(16, 4));
        let user = UserId::parse("1").unwrap();
        let topic = Topic::Conversation(ConversationId::generate());
        let connection = dispatcher.connect_user(user.clone()).await;
        dispatcher.subscribe(connection.id, topic.clone()).await;

        assert_eq!(dispatcher.close_topic(&topic).await, 1);
        assert_eq!(dispatcher.subscriber_count(&topic).await, 0);
        assert_eq!(dispatcher.subscriber_count(&Topic::User(user)).await, 1);
        assert_eq!(dispatcher.close_topic(&topic).await, 0);
    }
}
