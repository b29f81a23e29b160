mod common;

use std::time::Duration;

use common::Harness;
use deck_auth::config::UnlockGrant;
use deck_auth::{AuthConfig, PasswordHasher, RoleSet};
use http::{Method, StatusCode};
use serde_json::json;

#[tokio::test]
async fn role_change_reaches_client_on_refresh() {
    let h = Harness::new().await;
    let mut alice = h.client();

    let (status, registered) = alice.register("a@x.com", "secret1").await;
    assert_eq!(status, StatusCode::OK);
    let user_id = registered["user_id"].as_str().unwrap().to_string();

    let (status, _) = alice.login("a@x.com", "secret1").await;
    assert_eq!(status, StatusCode::OK);

    let (_, me) = alice.get("/auth/whoami").await;
    assert_eq!(me["roles"], json!(["user"]));
    assert_eq!(me["authenticated"], true);
    assert_eq!(me["user_id"], user_id.as_str());
    let old_access = alice.cookie("access_token").unwrap().to_string();

    let mut admin = h.admin().await;
    let (status, changed) = admin
        .send(
            Method::PUT,
            &format!("/auth/users/{}/roles", user_id),
            Some(json!({ "roles": ["admin"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(changed["roles"], json!(["admin"]));
    assert_eq!(changed["sessions_affected"], 1);

    let (status, refreshed) = alice.refresh().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["roles"], json!(["admin"]));

    let codec = h.api.service().codec();
    let new_claims = codec
        .verify_access(alice.cookie("access_token"))
        .unwrap();
    assert_eq!(new_claims.roles, RoleSet::admin());

    // The pre-change token keeps its roles until it expires.
    let old_claims = codec.verify_access(Some(&old_access)).unwrap();
    assert_eq!(old_claims.roles, RoleSet::of(["user"]));

    h.clock.advance(Duration::from_secs(900));
    assert!(codec.verify_access(Some(&old_access)).is_none());
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() {
    let h = Harness::new().await;
    let mut alice = h.client();
    alice.register("a@x.com", "secret1").await;

    let (status, wrong_pw) = alice.login("a@x.com", "secret2").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, unknown) = alice.login("nobody@x.com", "secret1").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_pw, unknown);
    assert!(alice.jar.is_empty());
}

#[tokio::test]
async fn register_rejects_bad_input() {
    let h = Harness::new().await;
    let mut client = h.client();

    let (status, _) = client.register("not-an-email", "secret1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = client.register("a@x.com", "short").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = client.register("a@x.com", "secret1").await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = client.register("a@x.com", "secret1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "User with this email already exists");
}

#[tokio::test]
async fn anonymous_session_is_replaced_by_login() {
    let h = Harness::new().await;
    let mut alice = h.client();
    alice.register("a@x.com", "secret1").await;

    let (status, started) = alice.post("/auth/start-session", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["roles"], json!(["guest"]));
    let anonymous_id = alice.cookie("session_id").unwrap().to_string();

    let (_, me) = alice.get("/auth/whoami").await;
    assert_eq!(me["authenticated"], false);
    assert_eq!(me["session_id"], anonymous_id.as_str());

    alice.login("a@x.com", "secret1").await;
    assert_ne!(alice.cookie("session_id").unwrap(), anonymous_id);
    assert!(h
        .api
        .service()
        .sessions()
        .get(&anonymous_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn logout_is_idempotent() {
    let h = Harness::new().await;
    let mut alice = h.client();
    alice.register("a@x.com", "secret1").await;
    alice.login("a@x.com", "secret1").await;
    let session_id = alice.cookie("session_id").unwrap().to_string();

    let (status, body) = alice.post("/auth/logout", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out successfully");
    assert!(alice.jar.is_empty());
    assert!(h
        .api
        .service()
        .sessions()
        .get(&session_id)
        .await
        .unwrap()
        .is_none());

    let (status, _) = alice.post("/auth/logout", json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (_, me) = alice.get("/auth/whoami").await;
    assert_eq!(me["message"], "No active session");
}

#[tokio::test]
async fn refresh_after_logout_is_rejected() {
    let h = Harness::new().await;
    let mut alice = h.client();
    alice.register("a@x.com", "secret1").await;
    alice.login("a@x.com", "secret1").await;
    let refresh_token = alice.cookie("refresh_token").unwrap().to_string();

    alice.post("/auth/logout", json!({})).await;

    // Replay the refresh token the logout just cleared.
    alice
        .jar
        .insert("refresh_token".to_string(), refresh_token);
    let (status, body) = alice.refresh().await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid or expired token");
}

#[tokio::test]
async fn refresh_without_cookie_is_rejected() {
    let h = Harness::new().await;
    let (status, _) = h.client().refresh().await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_expires_with_its_ttl() {
    let h = Harness::new().await;
    let mut alice = h.client();
    alice.register("a@x.com", "secret1").await;
    alice.login("a@x.com", "secret1").await;

    h.clock.advance(Duration::from_secs(7 * 24 * 3600 - 1));
    let (status, _) = alice.refresh().await;
    assert_eq!(status, StatusCode::OK);

    h.clock.advance(Duration::from_secs(1));
    let (status, _) = alice.refresh().await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unlock_upgrades_the_carried_session() {
    let mut config = AuthConfig::with_secret(common::SECRET);
    config.unlock.grants.push(UnlockGrant {
        roles: vec!["editor".to_string()],
        password_hash: PasswordHasher::new().hash("edit-pw").unwrap(),
    });
    let h = Harness::with_config(config).await;
    let mut visitor = h.client();

    visitor.post("/auth/start-session", json!({})).await;
    let session_id = visitor.cookie("session_id").unwrap().to_string();

    let (status, _) = visitor
        .post("/auth/unlock", json!({ "password": "wrong" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = visitor
        .post("/auth/unlock", json!({ "password": "edit-pw" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], session_id.as_str());
    assert_eq!(body["roles"], json!(["editor"]));

    let (_, me) = visitor.get("/auth/whoami").await;
    assert_eq!(me["authenticated"], true);
    assert_eq!(me["roles"], json!(["editor"]));

    // The roles survive a refresh.
    let (status, refreshed) = visitor.refresh().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["roles"], json!(["editor"]));

    // Without a session, unlock starts one.
    let mut stranger = h.client();
    let (status, _) = stranger
        .post("/auth/unlock", json!({ "password": "edit-pw" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(stranger.cookie("session_id").is_some());
}

#[tokio::test]
async fn unlock_is_a_bad_request_when_not_configured() {
    let h = Harness::new().await;
    let (status, _) = h
        .client()
        .post("/auth/unlock", json!({ "password": "anything" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
