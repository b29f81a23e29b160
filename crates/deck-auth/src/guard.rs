//! Per-request authorization predicates.

use http::HeaderMap;

use crate::cookie;
use crate::role::RoleSet;
use crate::session::{SessionRecord, SessionStore};
use crate::token::{AccessClaims, TokenCodec};
use crate::user::{CredentialStore, User};
use crate::{AuthError, AuthResult};

/// What a protected operation requires of its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Anyone, with or without a token.
    Public,
    /// A valid access token with the authenticated flag set.
    Authenticated,
    /// Authenticated and holding at least one of the roles.
    AnyRole(RoleSet),
    /// Admin role, re-validated against the store.
    Admin,
}

/// Identity confirmed against live store state.
#[derive(Debug, Clone)]
pub struct LiveIdentity {
    pub claims: AccessClaims,
    pub session: SessionRecord,
    pub user: Option<User>,
    /// Roles the store currently grants this session.
    pub roles: RoleSet,
}

/// Resolves and checks the caller of a request.
///
/// Token checks are pure signature and expiry verification; only
/// [`Guard::require_live`] and [`Guard::require_admin`] read the store.
#[derive(Clone)]
pub struct Guard {
    codec: TokenCodec,
    sessions: SessionStore,
    credentials: CredentialStore,
}

impl Guard {
    /// Create a guard.
    pub fn new(codec: TokenCodec, sessions: SessionStore, credentials: CredentialStore) -> Self {
        Self {
            codec,
            sessions,
            credentials,
        }
    }

    /// Claims of the request's access token, if it verifies.
    ///
    /// On success the session's activity timestamp is refreshed in the
    /// background; the result does not wait on it.
    pub fn resolve_identity(&self, headers: &HeaderMap) -> Option<AccessClaims> {
        let token = cookie::access_token(headers);
        let claims = match self.codec.inspect_access(token.as_deref()) {
            Ok(claims) => claims,
            Err(rejection) => {
                tracing::debug!(%rejection, "access token rejected");
                return None;
            }
        };

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let sessions = self.sessions.clone();
            let session_id = claims.sid.clone();
            runtime.spawn(async move { sessions.touch(&session_id).await });
        }
        Some(claims)
    }

    /// Claims of an authenticated caller.
    pub fn require_authenticated(&self, headers: &HeaderMap) -> AuthResult<AccessClaims> {
        match self.resolve_identity(headers) {
            Some(claims) if claims.authenticated => Ok(claims),
            _ => Err(AuthError::Unauthorized),
        }
    }

    /// Claims of an authenticated caller holding any of `required`.
    pub fn require_roles(&self, headers: &HeaderMap, required: &RoleSet) -> AuthResult<AccessClaims> {
        let claims = self.require_authenticated(headers)?;
        if !claims.roles.satisfies(required) {
            tracing::debug!(sid = %claims.sid, required = %required, "missing required role");
            return Err(AuthError::Forbidden);
        }
        Ok(claims)
    }

    /// An authenticated caller whose session is still live.
    ///
    /// Rejects with `Unauthorized` when the session was deleted or the
    /// bound user is gone or inactive, even if the token has not expired.
    pub async fn require_live(&self, headers: &HeaderMap) -> AuthResult<LiveIdentity> {
        let claims = self.require_authenticated(headers)?;
        self.live_identity(claims).await
    }

    /// An admin caller, checked against both the token and the store.
    pub async fn require_admin(&self, headers: &HeaderMap) -> AuthResult<LiveIdentity> {
        let claims = self.require_roles(headers, &RoleSet::admin())?;
        let identity = self.live_identity(claims).await?;
        if !identity.roles.is_admin() {
            tracing::info!(sid = %identity.claims.sid, "admin role revoked since token issuance");
            return Err(AuthError::Forbidden);
        }
        Ok(identity)
    }

    async fn live_identity(&self, claims: AccessClaims) -> AuthResult<LiveIdentity> {
        let session = self
            .sessions
            .get(&claims.sid)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        let (user, roles) = match session.user_id.as_deref() {
            None => (None, session.roles.clone()),
            Some(user_id) => {
                let user = self
                    .credentials
                    .get_by_id(user_id)
                    .await?
                    .filter(|u| u.active)
                    .ok_or(AuthError::Unauthorized)?;
                // A session the last role change missed falls back to the
                // user's own roles.
                let roles = if session.in_sync_with(&user) {
                    session.roles.clone()
                } else {
                    user.roles.clone()
                };
                (Some(user), roles)
            }
        };

        Ok(LiveIdentity {
            claims,
            session,
            user,
            roles,
        })
    }

    /// Check `requirement`. `Ok(None)` for public access without a token.
    pub async fn check(
        &self,
        requirement: &Requirement,
        headers: &HeaderMap,
    ) -> AuthResult<Option<AccessClaims>> {
        match requirement {
            Requirement::Public => Ok(self.resolve_identity(headers)),
            Requirement::Authenticated => self.require_authenticated(headers).map(Some),
            Requirement::AnyRole(required) => self.require_roles(headers, required).map(Some),
            Requirement::Admin => self.require_admin(headers).await.map(|id| Some(id.claims)),
        }
    }
}
