use std::{sync::Arc, time::Duration};

use application::{DispatcherSettings, MemoryStore, RealtimeDispatcher, SystemClock};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use domain::{UserId, UserProfile};
use serde_json::Value;
use tower::ServiceExt;
use web_api::{router, AppState, StateDependencies, USER_ID_HEADER};

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub dispatcher: RealtimeDispatcher,
}

pub fn uid(raw: &str) -> UserId {
    UserId::parse(raw).unwrap()
}

/// 内存存储上的完整路由，预置三个用户；分发循环不启动，测试里手动投递
pub async fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    for (id, name) in [("1", "Ada"), ("2", "Bo"), ("3", "Cy")] {
        store
            .seed_user(UserProfile::new(uid(id), name, None))
            .await;
    }
    let dispatcher = RealtimeDispatcher::new(DispatcherSettings::default());
    let state = AppState::new(StateDependencies::in_memory(
        store.clone(),
        Arc::new(SystemClock),
        Duration::from_secs(30 * 60),
        dispatcher.clone(),
    ));

    TestApp {
        router: router(state),
        store,
        dispatcher,
    }
}

impl TestApp {
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.call_with_headers(method, uri, user, &[], body).await
    }

    pub async fn call_with_headers(
        &self,
        method: Method,
        uri: &str,
        user: Option<&str>,
        headers: &[(&str, String)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user);
        }
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// 创建私聊并返回会话ID
    pub async fn direct(&self, caller: &str, other: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/conversations",
                Some(caller),
                Some(serde_json::json!({ "is_group": false, "user_ids": [other] })),
            )
            .await;
        assert!(status.is_success(), "create direct failed: {status} {body}");
        body["id"].as_str().unwrap().to_owned()
    }

    pub async fn send(&self, caller: &str, conversation_id: &str, content: &str) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/messages",
            Some(caller),
            Some(serde_json::json!({ "conversation_id": conversation_id, "content": content })),
        )
        .await
    }
}
