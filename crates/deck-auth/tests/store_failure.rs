use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deck_auth::{AuthApi, AuthConfig, AuthError, AuthService, Subject};
use deck_store::{
    Fields, KvStore, MemoryStore, ScanPage, SharedStore, StoreError, StoreResult,
};
use http::{Method, StatusCode};
use serde_json::Value;

/// A store whose backend is never reachable.
#[derive(Debug)]
struct DownStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl KvStore for DownStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        down()
    }
    async fn set(&self, _key: &str, _value: &str) -> StoreResult<()> {
        down()
    }
    async fn set_if_absent(&self, _key: &str, _value: &str) -> StoreResult<bool> {
        down()
    }
    async fn delete(&self, _key: &str) -> StoreResult<bool> {
        down()
    }
    async fn exists(&self, _key: &str) -> StoreResult<bool> {
        down()
    }
    async fn hash_get_all(&self, _key: &str) -> StoreResult<Option<Fields>> {
        down()
    }
    async fn hash_set(&self, _key: &str, _fields: &Fields) -> StoreResult<()> {
        down()
    }
    async fn hash_update(&self, _key: &str, _fields: &Fields) -> StoreResult<bool> {
        down()
    }
    async fn set_add(&self, _key: &str, _member: &str) -> StoreResult<bool> {
        down()
    }
    async fn set_remove(&self, _key: &str, _member: &str) -> StoreResult<bool> {
        down()
    }
    async fn set_members(&self, _key: &str) -> StoreResult<Vec<String>> {
        down()
    }
    async fn scan(
        &self,
        _prefix: &str,
        _cursor: Option<&str>,
        _count: usize,
    ) -> StoreResult<ScanPage> {
        down()
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> StoreResult<bool> {
        down()
    }
    async fn ttl(&self, _key: &str) -> StoreResult<Option<Duration>> {
        down()
    }
}

/// A working store whose deletes always fail.
struct StuckDeletes(MemoryStore);

#[async_trait]
impl KvStore for StuckDeletes {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.0.get(key).await
    }
    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.0.set(key, value).await
    }
    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.0.set_if_absent(key, value).await
    }
    async fn delete(&self, _key: &str) -> StoreResult<bool> {
        down()
    }
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.0.exists(key).await
    }
    async fn hash_get_all(&self, key: &str) -> StoreResult<Option<Fields>> {
        self.0.hash_get_all(key).await
    }
    async fn hash_set(&self, key: &str, fields: &Fields) -> StoreResult<()> {
        self.0.hash_set(key, fields).await
    }
    async fn hash_update(&self, key: &str, fields: &Fields) -> StoreResult<bool> {
        self.0.hash_update(key, fields).await
    }
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.0.set_add(key, member).await
    }
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.0.set_remove(key, member).await
    }
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.0.set_members(key).await
    }
    async fn scan(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        count: usize,
    ) -> StoreResult<ScanPage> {
        self.0.scan(prefix, cursor, count).await
    }
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.0.expire(key, ttl).await
    }
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.0.ttl(key).await
    }
}

fn api() -> AuthApi {
    let store: SharedStore = Arc::new(DownStore);
    let config = AuthConfig::with_secret("store-failure-secret-0123456789abcd");
    AuthApi::new(AuthService::new(config, store).unwrap())
}

async fn send(
    api: &AuthApi,
    method: Method,
    path: &str,
    cookie: Option<String>,
    body: &str,
) -> (StatusCode, Value, usize) {
    let mut builder = http::Request::builder().method(method).uri(path);
    if let Some(cookie) = cookie {
        builder = builder.header(http::header::COOKIE, cookie);
    }
    let response = api.dispatch(builder.body(body.to_string()).unwrap()).await;
    let cookies = response
        .headers()
        .get_all(http::header::SET_COOKIE)
        .iter()
        .count();
    let status = response.status();
    (status, serde_json::from_str(response.body()).unwrap(), cookies)
}

fn tokens(api: &AuthApi) -> (String, String) {
    let codec = api.service().codec();
    let subject = Subject {
        session_id: "sess_abc".to_string(),
        user_id: Some("usr_abc".to_string()),
        email: Some("a@x.com".to_string()),
        roles: deck_auth::RoleSet::admin(),
        authenticated: true,
    };
    (
        codec.issue_access(&subject).unwrap(),
        codec.issue_refresh("usr_abc", "sess_abc").unwrap(),
    )
}

#[tokio::test]
async fn credential_paths_report_unavailable() {
    let api = api();
    let creds = r#"{"email":"a@x.com","password":"secret1"}"#;

    for path in ["/auth/register", "/auth/login", "/auth/start-session"] {
        let (status, body, cookies) = send(&api, Method::POST, path, None, creds).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{}", path);
        assert_eq!(body["detail"], "Service temporarily unavailable");
        assert_eq!(cookies, 0);
    }
}

#[tokio::test]
async fn refresh_is_unavailable_not_unauthorized() {
    let api = api();
    let (_, refresh) = tokens(&api);

    let (status, _, _) = send(
        &api,
        Method::POST,
        "/auth/refresh",
        Some(format!("refresh_token={}", refresh)),
        "",
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    assert!(matches!(
        api.service().refresh(Some(&refresh)).await,
        Err(AuthError::StoreUnavailable(_))
    ));
}

#[tokio::test]
async fn admin_checks_are_unavailable() {
    let api = api();
    let (access, _) = tokens(&api);

    let (status, _, _) = send(
        &api,
        Method::GET,
        "/admin/sessions",
        Some(format!("access_token={}", access)),
        "",
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn whoami_needs_no_store() {
    let api = api();
    let (access, _) = tokens(&api);

    let (status, body, _) = send(
        &api,
        Method::GET,
        "/auth/whoami",
        Some(format!("access_token={}", access)),
        "",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], "usr_abc");
}

#[tokio::test]
async fn logout_reports_failure_but_clears_cookies() {
    let api = api();
    let (status, _, cookies) = send(
        &api,
        Method::POST,
        "/auth/logout",
        Some("session_id=sess_abc".to_string()),
        "",
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(cookies, 3);

    // Nothing to delete means nothing to fail.
    let (status, _, _) = send(&api, Method::POST, "/auth/logout", None, "").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn failed_session_handoff_leaves_no_new_session() {
    let store: SharedStore = Arc::new(StuckDeletes(MemoryStore::new()));
    let config = AuthConfig::with_secret("store-failure-secret-0123456789abcd");
    let service = AuthService::new(config, store).unwrap();

    let user = service.register("a@x.com", "secret1").await.unwrap();
    let carried = service.start_session().await.unwrap();

    let result = service
        .login("a@x.com", "secret1", Some(carried.session.session_id.as_str()))
        .await;
    assert!(matches!(result, Err(AuthError::StoreUnavailable(_))));
    assert!(service
        .sessions()
        .sessions_for_user(&user.id)
        .await
        .unwrap()
        .is_empty());
}
