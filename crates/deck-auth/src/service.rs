//! Session and authentication orchestration.
//!
//! Sessions move from anonymous (`{"guest"}`, unauthenticated) to
//! authenticated through login or unlock, and end on logout, forced
//! logout, cascading invalidation, or TTL expiry. Every transition that
//! grants or revokes access goes through [`AuthService`].

use std::sync::Arc;

use deck_store::{SharedClock, SharedStore, SystemClock};

use crate::audit::{self, AuditEvent};
use crate::config::{AuthConfig, ConfigError, RoleChangePolicy};
use crate::guard::Guard;
use crate::role::RoleSet;
use crate::session::{NewSession, SessionPage, SessionRecord, SessionStore};
use crate::strategy::{AccountLogin, Credentials, IdentityStrategy, SharedSecretUnlock};
use crate::token::TokenCodec;
use crate::user::{CredentialStore, User, UserSummary};
use crate::{AuthError, AuthResult};

/// A session with a freshly issued token pair.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session: SessionRecord,
    pub access_token: String,
    pub refresh_token: String,
}

/// A new access token for an existing session.
#[derive(Debug, Clone)]
pub struct RefreshedAccess {
    pub session: SessionRecord,
    pub access_token: String,
}

/// Outcome of a user-level role change.
#[derive(Debug, Clone)]
pub struct RoleChange {
    pub user: User,
    /// Sessions resynced or invalidated.
    pub sessions_affected: usize,
}

/// Orchestrates credentials, sessions and tokens.
#[derive(Clone)]
pub struct AuthService {
    config: Arc<AuthConfig>,
    codec: TokenCodec,
    credentials: CredentialStore,
    sessions: SessionStore,
    guard: Guard,
    account: Arc<dyn IdentityStrategy>,
    unlock: Option<Arc<dyn IdentityStrategy>>,
}

impl AuthService {
    /// Create a service on the wall clock.
    pub fn new(config: AuthConfig, store: SharedStore) -> Result<Self, ConfigError> {
        Self::with_clock(config, store, SystemClock::shared())
    }

    /// Create a service with an explicit clock.
    ///
    /// Fails if `config` does not validate, so tokens are never signed
    /// with a short or empty secret. Unlock is enabled when
    /// `config.unlock` has grants.
    pub fn with_clock(
        config: AuthConfig,
        store: SharedStore,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let codec = TokenCodec::new(&config.token, clock.clone());
        let credentials =
            CredentialStore::new(store.clone(), clock.clone(), config.credentials.clone());
        let sessions = SessionStore::new(store, clock, &config.session);
        let guard = Guard::new(codec.clone(), sessions.clone(), credentials.clone());
        let unlock = SharedSecretUnlock::from_config(&config.unlock)
            .map(|s| Arc::new(s) as Arc<dyn IdentityStrategy>);

        Ok(Self {
            config: Arc::new(config),
            codec,
            account: Arc::new(AccountLogin::new(credentials.clone())),
            credentials,
            sessions,
            guard,
            unlock,
        })
    }

    /// Replace the unlock strategy.
    pub fn with_unlock_strategy(mut self, strategy: Arc<dyn IdentityStrategy>) -> Self {
        self.unlock = Some(strategy);
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    /// Whether shared-secret unlock is available.
    pub fn unlock_enabled(&self) -> bool {
        self.unlock.is_some()
    }

    /// Create an anonymous session and issue its tokens.
    pub async fn start_session(&self) -> AuthResult<IssuedSession> {
        let session = self.sessions.create(NewSession::anonymous()).await?;
        audit::record(AuditEvent::SessionStarted {
            session_id: session.session_id.to_string(),
        });
        self.issue(session)
    }

    /// Register an account with the default roles.
    pub async fn register(&self, email: &str, password: &str) -> AuthResult<User> {
        let user = self.credentials.create_user(email, password, None).await?;
        audit::record(AuditEvent::UserRegistered {
            user_id: user.id.clone(),
        });
        Ok(user)
    }

    /// Log in with email and password.
    ///
    /// Creates a fresh authenticated session; `current_session`, the
    /// session the caller carried so far, is invalidated.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        current_session: Option<&str>,
    ) -> AuthResult<IssuedSession> {
        let identity = self
            .account
            .authenticate(Credentials::Account { email, password })
            .await?;
        let Some(user) = identity.and_then(|i| i.user) else {
            audit::record(AuditEvent::LoginFailed {
                email: email.to_string(),
            });
            return Err(AuthError::InvalidCredentials);
        };

        // A failed hand-off must not leave a new session behind.
        if let Some(previous) = current_session {
            self.sessions.invalidate(previous).await?;
        }
        let session = self
            .sessions
            .create(NewSession::for_user(
                &user.id,
                &user.email,
                user.roles.clone(),
                user.security_epoch,
            ))
            .await?;

        if let Err(err) = self.credentials.record_login(&user.id).await {
            tracing::warn!(user_id = %user.id, error = %err, "failed to record last login");
        }

        audit::record(AuditEvent::LoginSucceeded {
            user_id: user.id.clone(),
            session_id: session.session_id.to_string(),
        });
        self.issue(session)
    }

    /// Unlock roles on the caller's session with a shared password.
    ///
    /// A caller without a live session gets a new one.
    pub async fn unlock(
        &self,
        password: &str,
        current_session: Option<&str>,
    ) -> AuthResult<IssuedSession> {
        let strategy = self
            .unlock
            .as_ref()
            .ok_or_else(|| AuthError::InvalidRequest("Unlock is not enabled".to_string()))?;

        let Some(identity) = strategy
            .authenticate(Credentials::SharedSecret { password })
            .await?
        else {
            audit::record(AuditEvent::UnlockFailed {
                session_id: current_session.map(str::to_string),
            });
            return Err(AuthError::InvalidCredentials);
        };

        let existing = match current_session {
            Some(sid) => self.sessions.get(sid).await?,
            None => None,
        };
        let session = match existing {
            Some(session) => session,
            None => self.sessions.create(NewSession::anonymous()).await?,
        };
        let session = self
            .sessions
            .upgrade(session.session_id.as_str(), &identity.roles, true)
            .await?;

        audit::record(AuditEvent::Unlocked {
            session_id: session.session_id.to_string(),
            roles: session.roles.clone(),
        });
        self.issue(session)
    }

    /// Issue a new access token from a refresh token.
    ///
    /// Roles and the authenticated flag come from the store, not from the
    /// old tokens. Fails with `TokenInvalid` when the session is gone or
    /// its user is missing or inactive.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> AuthResult<RefreshedAccess> {
        let claims = match self.codec.inspect_refresh(refresh_token) {
            Ok(claims) => claims,
            Err(rejection) => return Err(reject_refresh(rejection.to_string(), None)),
        };

        let Some(mut session) = self.sessions.get(&claims.sid).await? else {
            return Err(reject_refresh("session not found", Some(&claims.sid)));
        };
        if session.subject().id() != claims.sub {
            return Err(reject_refresh("subject mismatch", Some(&claims.sid)));
        }

        if let Some(user_id) = session.user_id.clone() {
            let user = match self.credentials.get_by_id(&user_id).await? {
                Some(user) if user.active => user,
                _ => return Err(reject_refresh("user missing or inactive", Some(&claims.sid))),
            };
            if !session.in_sync_with(&user) {
                session = match self.config.session.on_role_change {
                    RoleChangePolicy::Resync => self
                        .sessions
                        .sync_roles(&claims.sid, &user.roles, user.security_epoch)
                        .await
                        .map_err(|err| match err {
                            AuthError::NotFound(_) => {
                                reject_refresh("session not found", Some(&claims.sid))
                            }
                            other => other,
                        })?,
                    RoleChangePolicy::Invalidate => {
                        self.sessions.invalidate(&claims.sid).await?;
                        return Err(reject_refresh("stale security epoch", Some(&claims.sid)));
                    }
                };
            }
        }

        let access_token = self.codec.issue_access(&session.subject())?;
        audit::record(AuditEvent::RefreshAccepted {
            session_id: claims.sid,
        });
        Ok(RefreshedAccess {
            session,
            access_token,
        })
    }

    /// Delete the caller's session. Succeeds when there is none.
    pub async fn logout(&self, session_id: Option<&str>) -> AuthResult<()> {
        if let Some(sid) = session_id {
            self.sessions.invalidate(sid).await?;
        }
        audit::record(AuditEvent::LoggedOut {
            session_id: session_id.map(str::to_string),
        });
        Ok(())
    }

    /// Delete any session by id.
    pub async fn force_logout(&self, session_id: &str) -> AuthResult<()> {
        if !self.sessions.invalidate(session_id).await? {
            return Err(AuthError::NotFound("Session".to_string()));
        }
        audit::record(AuditEvent::ForcedLogout {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Replace a user's roles and propagate to their sessions.
    ///
    /// Under [`RoleChangePolicy::Resync`] live sessions take the new roles
    /// on their next refresh; under [`RoleChangePolicy::Invalidate`] they
    /// are deleted.
    pub async fn set_user_roles(&self, user_id: &str, roles: &RoleSet) -> AuthResult<RoleChange> {
        let user = self.credentials.update_roles(user_id, roles).await?;

        let sessions_affected = match self.config.session.on_role_change {
            RoleChangePolicy::Invalidate => self.sessions.invalidate_for_user(user_id).await?,
            RoleChangePolicy::Resync => {
                let mut synced = 0;
                for session in self.sessions.sessions_for_user(user_id).await? {
                    match self
                        .sessions
                        .sync_roles(session.session_id.as_str(), &user.roles, user.security_epoch)
                        .await
                    {
                        Ok(_) => synced += 1,
                        Err(AuthError::NotFound(_)) => {}
                        Err(err) => {
                            tracing::error!(user_id, error = %err, "role propagation failed");
                            return Err(err);
                        }
                    }
                }
                synced
            }
        };

        audit::record(AuditEvent::UserRolesChanged {
            user_id: user.id.clone(),
            roles: user.roles.clone(),
            sessions_affected,
        });
        Ok(RoleChange {
            user,
            sessions_affected,
        })
    }

    /// Deactivate a user and invalidate all their sessions.
    pub async fn deactivate_user(&self, user_id: &str) -> AuthResult<User> {
        let user = self.credentials.deactivate(user_id).await?;
        let sessions_invalidated = self
            .sessions
            .invalidate_for_user(user_id)
            .await
            .inspect_err(|err| {
                tracing::error!(user_id, error = %err, "session invalidation failed");
            })?;
        audit::record(AuditEvent::UserDeactivated {
            user_id: user.id.clone(),
            sessions_invalidated,
        });
        Ok(user)
    }

    /// Replace one session's roles.
    pub async fn set_session_roles(
        &self,
        session_id: &str,
        roles: &RoleSet,
    ) -> AuthResult<SessionRecord> {
        if roles.is_empty() {
            return Err(AuthError::InvalidRequest("Roles must not be empty".into()));
        }
        let session = self.sessions.set_roles(session_id, roles).await?;
        audit::record(AuditEvent::SessionRolesChanged {
            session_id: session_id.to_string(),
            roles: session.roles.clone(),
        });
        Ok(session)
    }

    /// Every user, without password hashes.
    pub async fn list_users(&self) -> AuthResult<Vec<UserSummary>> {
        Ok(self
            .credentials
            .list_all()
            .await?
            .iter()
            .map(User::summary)
            .collect())
    }

    /// One page of sessions.
    pub async fn list_sessions(&self, cursor: Option<&str>) -> AuthResult<SessionPage> {
        self.sessions.list(cursor).await
    }

    fn issue(&self, session: SessionRecord) -> AuthResult<IssuedSession> {
        let subject = session.subject();
        let access_token = self.codec.issue_access(&subject)?;
        let refresh_token = self
            .codec
            .issue_refresh(subject.id(), session.session_id.as_str())?;
        Ok(IssuedSession {
            session,
            access_token,
            refresh_token,
        })
    }
}

fn reject_refresh(reason: impl Into<String>, session_id: Option<&str>) -> AuthError {
    audit::record(AuditEvent::RefreshRejected {
        reason: reason.into(),
        session_id: session_id.map(str::to_string),
    });
    AuthError::TokenInvalid
}
