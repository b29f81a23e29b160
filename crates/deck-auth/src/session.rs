//! Session records and the session store.

use std::fmt;
use std::time::Duration;

use deck_store::{store_key, Fields, SharedClock, SharedStore};
use serde::{Deserialize, Serialize};

use crate::config::{InvalidationStrategy, SessionConfig};
use crate::record::{self, Record};
use crate::role::RoleSet;
use crate::token::Subject;
use crate::user::User;
use crate::{AuthError, AuthResult};

const SESSION_PREFIX: &str = "session:";

/// Session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session ID from an existing value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random session ID.
    pub fn generate() -> Self {
        Self(generate_secure_id("sess"))
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn key(&self) -> String {
        session_key(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn session_key(session_id: &str) -> String {
    store_key!("session", session_id)
}

fn user_index_key(user_id: &str) -> String {
    store_key!("user_sessions", user_id)
}

/// Generate an unguessable identifier: `prefix` plus 144 random bits.
pub(crate) fn generate_secure_id(prefix: &str) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;

    let bytes: [u8; 18] = rand::thread_rng().gen();
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(bytes))
}

/// A stored session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session ID.
    pub session_id: SessionId,
    /// Bound user, absent for anonymous sessions.
    pub user_id: Option<String>,
    /// Bound user's email.
    pub email: Option<String>,
    /// Current roles.
    pub roles: RoleSet,
    /// Whether the session passed password verification.
    pub authenticated: bool,
    /// Unix timestamp of creation.
    pub created_at: i64,
    /// Unix timestamp of last activity.
    pub last_activity: i64,
    /// Security epoch of the bound user when the roles were last synced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_epoch: Option<u64>,
}

impl SessionRecord {
    /// Token subject for this session.
    pub fn subject(&self) -> Subject {
        Subject {
            session_id: self.session_id.as_str().to_string(),
            user_id: self.user_id.clone(),
            email: self.email.clone(),
            roles: self.roles.clone(),
            authenticated: self.authenticated,
        }
    }

    /// Whether no user is bound.
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    /// Whether the roles were synced under `user`'s current security epoch.
    pub fn in_sync_with(&self, user: &User) -> bool {
        self.user_id.as_deref() == Some(user.id.as_str())
            && self.user_epoch == Some(user.security_epoch)
    }

    fn to_fields(&self) -> Fields {
        let mut fields = record::fields([
            ("session_id", self.session_id.as_str().to_string()),
            ("roles", self.roles.joined()),
            ("authenticated", self.authenticated.to_string()),
            ("created_at", self.created_at.to_string()),
            ("last_activity", self.last_activity.to_string()),
        ]);
        if let Some(user_id) = &self.user_id {
            fields.insert("user_id".to_string(), user_id.clone());
        }
        if let Some(email) = &self.email {
            fields.insert("email".to_string(), email.clone());
        }
        if let Some(epoch) = self.user_epoch {
            fields.insert("user_epoch".to_string(), epoch.to_string());
        }
        fields
    }

    fn from_fields(key: &str, fields: &Fields) -> AuthResult<Self> {
        let record = Record::new(key, fields);
        let created_at = record.parse("created_at")?;
        Ok(Self {
            session_id: SessionId::new(record.str("session_id")?),
            user_id: record.opt_str("user_id").map(str::to_string),
            email: record.opt_str("email").map(str::to_string),
            roles: RoleSet::parse(record.str("roles")?),
            authenticated: record.parse_or("authenticated", false)?,
            created_at,
            last_activity: record.parse_or("last_activity", created_at)?,
            user_epoch: record.opt_parse("user_epoch")?,
        })
    }
}

/// Parameters of a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub roles: RoleSet,
    pub authenticated: bool,
    pub user_epoch: Option<u64>,
}

impl NewSession {
    /// An anonymous guest session.
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            email: None,
            roles: RoleSet::guest(),
            authenticated: false,
            user_epoch: None,
        }
    }

    /// An authenticated session bound to a user.
    pub fn for_user(user_id: &str, email: &str, roles: RoleSet, user_epoch: u64) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            email: Some(email.to_string()),
            roles,
            authenticated: true,
            user_epoch: Some(user_epoch),
        }
    }
}

/// One page of the admin session listing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionPage {
    pub sessions: Vec<SessionRecord>,
    /// Pass back to continue; `None` when the listing is complete.
    pub next_cursor: Option<String>,
}

/// Persists sessions with TTL and a user → sessions reverse index.
///
/// Records are hashes at `session:{id}`; `user_sessions:{user_id}` is a
/// set of the session ids bound to a user.
#[derive(Clone)]
pub struct SessionStore {
    store: SharedStore,
    clock: SharedClock,
    ttl: Duration,
    page_size: usize,
    invalidation: InvalidationStrategy,
}

impl SessionStore {
    /// Create a session store over `store`.
    pub fn new(store: SharedStore, clock: SharedClock, config: &SessionConfig) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::from_secs(config.ttl_secs),
            page_size: config.page_size.max(1),
            invalidation: config.invalidation,
        }
    }

    /// Session lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create a session with a fresh identifier.
    pub async fn create(&self, new: NewSession) -> AuthResult<SessionRecord> {
        let now = self.clock.now();
        let session = SessionRecord {
            session_id: SessionId::generate(),
            user_id: new.user_id,
            email: new.email,
            roles: new.roles,
            authenticated: new.authenticated,
            created_at: now,
            last_activity: now,
            user_epoch: new.user_epoch,
        };

        let key = session.session_id.key();
        self.store.hash_set(&key, &session.to_fields()).await?;
        self.store.expire(&key, self.ttl).await?;

        if let Some(user_id) = &session.user_id {
            let index = user_index_key(user_id);
            self.store
                .set_add(&index, session.session_id.as_str())
                .await?;
            self.store.expire(&index, self.ttl).await?;
        }

        tracing::debug!(
            session_id = %session.session_id,
            authenticated = session.authenticated,
            "session created"
        );
        Ok(session)
    }

    /// Fetch a session.
    pub async fn get(&self, session_id: &str) -> AuthResult<Option<SessionRecord>> {
        let key = session_key(session_id);
        match self.store.hash_get_all(&key).await? {
            Some(fields) => SessionRecord::from_fields(&key, &fields).map(Some),
            None => Ok(None),
        }
    }

    /// Update last activity. Best effort: failures are logged and dropped,
    /// and a deleted session is never recreated.
    pub async fn touch(&self, session_id: &str) {
        let now = self.clock.now().to_string();
        let patch = record::fields([("last_activity", now)]);
        if let Err(err) = self.store.hash_update(&session_key(session_id), &patch).await {
            tracing::warn!(session_id, error = %err, "failed to record session activity");
        }
    }

    /// Set roles and the authenticated flag after password verification.
    /// The TTL is unchanged.
    pub async fn upgrade(
        &self,
        session_id: &str,
        roles: &RoleSet,
        authenticated: bool,
    ) -> AuthResult<SessionRecord> {
        self.patch(
            session_id,
            record::fields([
                ("roles", roles.joined()),
                ("authenticated", authenticated.to_string()),
            ]),
        )
        .await
    }

    /// Replace a session's roles.
    pub async fn set_roles(&self, session_id: &str, roles: &RoleSet) -> AuthResult<SessionRecord> {
        self.patch(session_id, record::fields([("roles", roles.joined())]))
            .await
    }

    /// Replace a session's roles with its user's current roles.
    pub async fn sync_roles(
        &self,
        session_id: &str,
        roles: &RoleSet,
        user_epoch: u64,
    ) -> AuthResult<SessionRecord> {
        self.patch(
            session_id,
            record::fields([
                ("roles", roles.joined()),
                ("user_epoch", user_epoch.to_string()),
            ]),
        )
        .await
    }

    async fn patch(&self, session_id: &str, fields: Fields) -> AuthResult<SessionRecord> {
        let key = session_key(session_id);
        if !self.store.hash_update(&key, &fields).await? {
            return Err(AuthError::NotFound("Session".to_string()));
        }
        self.get(session_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("Session".to_string()))
    }

    /// Delete a session. Returns `false` if it did not exist.
    pub async fn invalidate(&self, session_id: &str) -> AuthResult<bool> {
        let existing = self.get(session_id).await?;
        let deleted = self.store.delete(&session_key(session_id)).await?;
        if let Some(user_id) = existing.and_then(|s| s.user_id) {
            self.store
                .set_remove(&user_index_key(&user_id), session_id)
                .await?;
        }
        if deleted {
            tracing::info!(session_id, "session invalidated");
        }
        Ok(deleted)
    }

    /// Delete every session bound to `user_id`. Returns how many went.
    pub async fn invalidate_for_user(&self, user_id: &str) -> AuthResult<usize> {
        let sessions = self.sessions_for_user(user_id).await?;
        let mut removed = 0;
        for session in &sessions {
            if self
                .store
                .delete(&session.session_id.key())
                .await?
            {
                removed += 1;
            }
        }
        self.store.delete(&user_index_key(user_id)).await?;
        tracing::info!(user_id, removed, "user sessions invalidated");
        Ok(removed)
    }

    /// Live sessions bound to `user_id`.
    pub async fn sessions_for_user(&self, user_id: &str) -> AuthResult<Vec<SessionRecord>> {
        match self.invalidation {
            InvalidationStrategy::Index => self.sessions_from_index(user_id).await,
            InvalidationStrategy::Scan => self.sessions_from_scan(user_id).await,
        }
    }

    async fn sessions_from_index(&self, user_id: &str) -> AuthResult<Vec<SessionRecord>> {
        let index = user_index_key(user_id);
        let mut sessions = Vec::new();
        for session_id in self.store.set_members(&index).await? {
            match self.get(&session_id).await? {
                Some(session) if session.user_id.as_deref() == Some(user_id) => {
                    sessions.push(session)
                }
                // Expired or deleted behind the index's back
                _ => {
                    self.store.set_remove(&index, &session_id).await?;
                }
            }
        }
        Ok(sessions)
    }

    async fn sessions_from_scan(&self, user_id: &str) -> AuthResult<Vec<SessionRecord>> {
        let mut sessions = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list(cursor.as_deref()).await?;
            sessions.extend(
                page.sessions
                    .into_iter()
                    .filter(|s| s.user_id.as_deref() == Some(user_id)),
            );
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(sessions)
    }

    /// List sessions one page at a time.
    ///
    /// Weakly consistent: sessions deleted between the key scan and the
    /// record read are skipped.
    /// The cursor is the id of the last session on the previous page.
    pub async fn list(&self, cursor: Option<&str>) -> AuthResult<SessionPage> {
        let after = cursor.map(session_key);
        let page = self
            .store
            .scan(SESSION_PREFIX, after.as_deref(), self.page_size)
            .await?;

        let mut sessions = Vec::with_capacity(page.keys.len());
        for key in &page.keys {
            if let Some(fields) = self.store.hash_get_all(key).await? {
                sessions.push(SessionRecord::from_fields(key, &fields)?);
            }
        }
        let next_cursor = page
            .cursor
            .and_then(|key| key.strip_prefix(SESSION_PREFIX).map(str::to_string));
        Ok(SessionPage {
            sessions,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_store::{KvStore, ManualClock, MemoryStore};
    use std::sync::Arc;

    struct Fixture {
        sessions: SessionStore,
        store: SharedStore,
        clock: Arc<ManualClock>,
    }

    fn fixture(config: SessionConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let store: SharedStore = Arc::new(MemoryStore::with_clock(clock.clone()));
        Fixture {
            sessions: SessionStore::new(store.clone(), clock.clone(), &config),
            store,
            clock,
        }
    }

    fn user_session(user_id: &str) -> NewSession {
        NewSession::for_user(user_id, "a@x.com", RoleSet::of(["user"]), 0)
    }

    #[tokio::test]
    async fn test_anonymous_session_defaults() {
        let f = fixture(SessionConfig::default());
        let session = f.sessions.create(NewSession::anonymous()).await.unwrap();

        assert!(session.session_id.as_str().starts_with("sess_"));
        assert!(session.is_anonymous());
        assert!(!session.authenticated);
        assert_eq!(session.roles, RoleSet::guest());

        let ttl = f.store.ttl(&session.session_id.key()).await.unwrap();
        assert_eq!(ttl, Some(Duration::from_secs(604_800)));

        let fetched = f.sessions.get(session.session_id.as_str()).await.unwrap();
        assert_eq!(fetched, Some(session));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let ids: std::collections::HashSet<String> =
            (0..100).map(|_| SessionId::generate().0).collect();
        assert_eq!(ids.len(), 100);
    }

    #[tokio::test]
    async fn test_session_expires() {
        let f = fixture(SessionConfig::default());
        let session = f.sessions.create(NewSession::anonymous()).await.unwrap();

        f.clock.advance(Duration::from_secs(604_800));
        assert!(f.sessions.get(session.session_id.as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upgrade_keeps_ttl() {
        let f = fixture(SessionConfig::default());
        let session = f.sessions.create(NewSession::anonymous()).await.unwrap();
        let sid = session.session_id.as_str();

        f.clock.advance(Duration::from_secs(100));
        let upgraded = f
            .sessions
            .upgrade(sid, &RoleSet::of(["editor"]), true)
            .await
            .unwrap();

        assert!(upgraded.authenticated);
        assert_eq!(upgraded.roles, RoleSet::of(["editor"]));
        assert_eq!(
            f.store.ttl(&session.session_id.key()).await.unwrap(),
            Some(Duration::from_secs(604_700))
        );

        assert!(matches!(
            f.sessions.upgrade("sess_missing", &RoleSet::admin(), true).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_touch_never_resurrects() {
        let f = fixture(SessionConfig::default());
        let session = f.sessions.create(NewSession::anonymous()).await.unwrap();
        let sid = session.session_id.as_str();

        f.clock.advance(Duration::from_secs(30));
        f.sessions.touch(sid).await;
        let touched = f.sessions.get(sid).await.unwrap().unwrap();
        assert_eq!(touched.last_activity, session.created_at + 30);

        f.sessions.invalidate(sid).await.unwrap();
        f.sessions.touch(sid).await;
        assert!(f.sessions.get(sid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let f = fixture(SessionConfig::default());
        let session = f.sessions.create(user_session("u1")).await.unwrap();
        let sid = session.session_id.as_str();

        assert!(f.sessions.invalidate(sid).await.unwrap());
        assert!(!f.sessions.invalidate(sid).await.unwrap());
        assert!(f.store.set_members("user_sessions:u1").await.unwrap().is_empty());
    }

    async fn assert_cascade(config: SessionConfig) {
        let f = fixture(config);
        let a1 = f.sessions.create(user_session("u1")).await.unwrap();
        let a2 = f.sessions.create(user_session("u1")).await.unwrap();
        let b = f.sessions.create(user_session("u2")).await.unwrap();
        let anon = f.sessions.create(NewSession::anonymous()).await.unwrap();

        assert_eq!(f.sessions.sessions_for_user("u1").await.unwrap().len(), 2);
        assert_eq!(f.sessions.invalidate_for_user("u1").await.unwrap(), 2);

        for gone in [&a1, &a2] {
            assert!(f.sessions.get(gone.session_id.as_str()).await.unwrap().is_none());
        }
        for kept in [&b, &anon] {
            assert!(f.sessions.get(kept.session_id.as_str()).await.unwrap().is_some());
        }
        assert_eq!(f.sessions.invalidate_for_user("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_for_user_with_index() {
        assert_cascade(SessionConfig::default()).await;
    }

    #[tokio::test]
    async fn test_invalidate_for_user_with_scan() {
        assert_cascade(SessionConfig {
            invalidation: InvalidationStrategy::Scan,
            page_size: 1,
            ..SessionConfig::default()
        })
        .await;
    }

    #[tokio::test]
    async fn test_index_drops_stale_members() {
        let f = fixture(SessionConfig::default());
        let session = f.sessions.create(user_session("u1")).await.unwrap();
        f.store.delete(&session.session_id.key()).await.unwrap();

        assert!(f.sessions.sessions_for_user("u1").await.unwrap().is_empty());
        assert!(!f.store.exists("user_sessions:u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_pages() {
        let f = fixture(SessionConfig {
            page_size: 2,
            ..SessionConfig::default()
        });
        for _ in 0..5 {
            f.sessions.create(NewSession::anonymous()).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = f.sessions.list(cursor.as_deref()).await.unwrap();
            pages += 1;
            seen.extend(page.sessions.into_iter().map(|s| s.session_id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn test_list_skips_sessions_deleted_mid_scan() {
        let f = fixture(SessionConfig {
            page_size: 2,
            ..SessionConfig::default()
        });
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(f.sessions.create(NewSession::anonymous()).await.unwrap().session_id);
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        let first = f.sessions.list(None).await.unwrap();
        f.sessions.invalidate(ids[2].as_str()).await.unwrap();
        let second = f
            .sessions
            .list(first.next_cursor.as_deref())
            .await
            .unwrap();

        assert_eq!(first.sessions.len(), 2);
        assert_eq!(second.sessions.len(), 1);
        assert_eq!(second.sessions[0].session_id, ids[3]);
    }
}
