//! Shared harness: the full stack over `MemoryStore` and a manual clock,
//! driven through `AuthApi::dispatch` by clients that keep a cookie jar.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use deck_auth::{AuthApi, AuthConfig, AuthService, RoleSet};
use deck_store::{ManualClock, MemoryStore, SharedStore};
use http::{Method, StatusCode};
use serde_json::Value;

pub const SECRET: &str = "integration-secret-0123456789abcdef";
pub const ADMIN_EMAIL: &str = "root@x.com";
pub const ADMIN_PASSWORD: &str = "rootpass1";

pub struct Harness {
    pub api: AuthApi,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(AuthConfig::with_secret(SECRET)).await
    }

    /// Stack with an admin account already registered.
    pub async fn with_config(config: AuthConfig) -> Self {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let store: SharedStore = Arc::new(MemoryStore::with_clock(clock.clone()));
        let service = AuthService::with_clock(config, store, clock.clone()).unwrap();
        let api = AuthApi::new(service);
        api.service()
            .credentials()
            .create_user(ADMIN_EMAIL, ADMIN_PASSWORD, Some(RoleSet::admin()))
            .await
            .unwrap();
        Self { api, clock }
    }

    pub fn client(&self) -> Client {
        Client {
            api: self.api.clone(),
            jar: BTreeMap::new(),
        }
    }

    pub async fn admin(&self) -> Client {
        let mut admin = self.client();
        let (status, _) = admin.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
        assert_eq!(status, StatusCode::OK);
        admin
    }
}

/// A browser-like caller.
pub struct Client {
    api: AuthApi,
    pub jar: BTreeMap<String, String>,
}

impl Client {
    pub async fn send(
        &mut self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = http::Request::builder().method(method).uri(path);
        if !self.jar.is_empty() {
            let cookie = self
                .jar
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(http::header::COOKIE, cookie);
        }
        let request = builder
            .body(body.map(|b| b.to_string()).unwrap_or_default())
            .unwrap();

        let response = self.api.dispatch(request).await;
        for set_cookie in response.headers().get_all(http::header::SET_COOKIE) {
            let set_cookie = set_cookie.to_str().unwrap();
            let (pair, attributes) = set_cookie.split_once(';').unwrap();
            let (name, value) = pair.split_once('=').unwrap();
            if attributes.contains("Max-Age=0") {
                self.jar.remove(name);
            } else {
                self.jar.insert(name.to_string(), value.to_string());
            }
        }

        let status = response.status();
        let body = serde_json::from_str(response.body()).unwrap();
        (status, body)
    }

    pub async fn get(&mut self, path: &str) -> (StatusCode, Value) {
        self.send(Method::GET, path, None).await
    }

    pub async fn post(&mut self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn register(&mut self, email: &str, password: &str) -> (StatusCode, Value) {
        self.post(
            "/auth/register",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    pub async fn login(&mut self, email: &str, password: &str) -> (StatusCode, Value) {
        self.post(
            "/auth/login",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    pub async fn refresh(&mut self) -> (StatusCode, Value) {
        self.send(Method::POST, "/auth/refresh", None).await
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.jar.get(name).map(String::as_str)
    }
}
