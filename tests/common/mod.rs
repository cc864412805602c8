#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    Router,
};
use http::{header::CONTENT_TYPE, Method, Request, StatusCode};
use poll_service::{cache::InMemoryCache, create_routes, db, AppState, Config};
use serde_json::Value;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(Config::default()).await
}

pub async fn spawn_app_with(config: Config) -> TestApp {
    let pool = db::create_memory_pool().await.expect("in-memory database");
    let state = AppState::new(config, pool, Arc::new(InMemoryCache::new()));
    TestApp {
        router: create_routes(state.clone()),
        state,
    }
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    pub async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = self.request(method, uri, body, &[]).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Creates a poll through the API and returns its detail body.
    pub async fn create_poll(&self, body: Value) -> Value {
        let (status, poll) = self.json(Method::POST, "/api/polls/", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{poll}");
        poll
    }
}

pub fn option_id(poll: &Value, text: &str) -> i64 {
    poll["options"]
        .as_array()
        .unwrap()
        .iter()
        .find(|o| o["text"] == text)
        .and_then(|o| o["id"].as_i64())
        .unwrap()
}
