//! 主应用程序入口
//!
//! 加载配置，按配置装配存储与在线状态后端，启动实时分发循环和 Axum Web API 服务。

use std::{sync::Arc, time::Duration};

use application::{
    Clock, DispatcherSettings, MemoryStore, MemoryTtlCache, RealtimeDispatcher, SystemClock,
    TtlCache,
};
use config::{AppConfig, PresenceBackend, StorageBackend};
use infrastructure::Infrastructure;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, StateDependencies};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，默认 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let presence_ttl = Duration::from_secs(config.presence.ttl_seconds);

    let dispatcher = RealtimeDispatcher::new(DispatcherSettings::from(&config.realtime));
    let dispatch_loop = dispatcher.spawn();

    let deps = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage, data is lost on restart");
            let mut deps = StateDependencies::in_memory(
                Arc::new(MemoryStore::new()),
                clock.clone(),
                presence_ttl,
                dispatcher.clone(),
            );
            if config.presence.backend == PresenceBackend::Redis {
                deps.presence_cache = Arc::new(Infrastructure::connect_presence(&config).await?);
            }
            deps
        }
        StorageBackend::Postgres => {
            let infrastructure = Infrastructure::connect(&config).await?;
            let storage = infrastructure.storage;
            let presence_cache: Arc<dyn TtlCache> = match infrastructure.presence_cache {
                Some(cache) => cache,
                None => Arc::new(MemoryTtlCache::new(clock.clone())),
            };
            StateDependencies {
                conversations: storage.conversations.clone(),
                messages: storage.messages.clone(),
                notifications: storage.notifications.clone(),
                engagements: storage.engagements.clone(),
                users: storage.directory.clone(),
                content: storage.directory.clone(),
                lookup: storage.directory.clone(),
                presence_cache,
                presence_ttl,
                dispatcher: dispatcher.clone(),
                clock,
            }
        }
    };

    let app = router(AppState::new(deps)).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %addr,
        storage = ?config.storage.backend,
        presence = ?config.presence.backend,
        "pawtalk realtime core listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.shutdown();
    if let Err(err) = dispatch_loop.await {
        tracing::warn!(error = %err, "dispatch loop ended abnormally");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
