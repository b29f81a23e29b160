//! Sessions, credentials and access control for FlashDeck.
//!
//! Every visitor gets an anonymous session with the `guest` role. Login
//! or a shared-secret unlock upgrades it to an authenticated identity.
//! Access tokens are short-lived and verified without touching the store;
//! refresh tokens are long-lived and exchanged for new access tokens
//! carrying the roles the store holds at that moment, which is how role
//! changes and revocations reach a client.
//!
//! Layers, bottom up:
//!
//! - [`TokenCodec`] signs and verifies access and refresh tokens.
//! - [`CredentialStore`] and [`SessionStore`] keep users and sessions in a
//!   [`deck_store::KvStore`].
//! - [`Guard`] answers per-request authorization questions.
//! - [`AuthService`] runs the session lifecycle.
//! - [`AuthApi`] exposes it as HTTP endpoints.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use deck_auth::{AuthConfig, AuthService};
//! use deck_store::{MemoryStore, SharedStore};
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! let store: SharedStore = Arc::new(MemoryStore::new());
//! let config = AuthConfig::with_secret("0123456789abcdef0123456789abcdef");
//! let auth = AuthService::new(config, store).unwrap();
//!
//! auth.register("a@example.com", "secret1").await.unwrap();
//! let issued = auth.login("a@example.com", "secret1", None).await.unwrap();
//!
//! let claims = auth.codec().verify_access(Some(&issued.access_token)).unwrap();
//! assert!(claims.authenticated);
//! assert!(claims.roles.contains("user"));
//! # });
//! ```

mod api;
pub mod audit;
pub mod config;
pub mod cookie;
mod error;
mod guard;
mod password;
mod record;
mod role;
mod service;
mod session;
mod strategy;
mod token;
mod user;

pub use api::{
    ApiResponse, AuthApi, LoginRequest, RegisterRequest, RolesRequest, UnlockRequest,
    REQUEST_ID_HEADER,
};
pub use audit::{AuditEvent, RequestId};
pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, AuthResult};
pub use guard::{Guard, LiveIdentity, Requirement};
pub use password::{is_valid_hash, validate_email, validate_password, PasswordHasher};
pub use role::{RoleSet, ADMIN, GUEST, USER};
pub use service::{AuthService, IssuedSession, RefreshedAccess, RoleChange};
pub use session::{NewSession, SessionId, SessionPage, SessionRecord, SessionStore};
pub use strategy::{AccountLogin, Credentials, Identity, IdentityStrategy, SharedSecretUnlock};
pub use token::{
    extract_bearer_token, peek_claims, AccessClaims, RefreshClaims, Subject, TokenCodec,
    TokenRejection, ACCESS_CLASS, REFRESH_CLASS,
};
pub use user::{CredentialStore, User, UserSummary};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        AccessClaims, AuthApi, AuthConfig, AuthError, AuthResult, AuthService, Guard, RoleSet,
        SessionRecord, TokenCodec, User,
    };
}
