//! Ways of proving an identity.
//!
//! [`AccountLogin`] checks a per-user email and password.
//! [`SharedSecretUnlock`] checks a shared password that unlocks a fixed
//! set of roles on the caller's current session.

use async_trait::async_trait;

use crate::config::UnlockConfig;
use crate::password::PasswordHasher;
use crate::role::RoleSet;
use crate::user::{CredentialStore, User};
use crate::AuthResult;

/// Credentials presented to a strategy.
#[derive(Clone, Copy)]
pub enum Credentials<'a> {
    /// Per-user email and password.
    Account { email: &'a str, password: &'a str },
    /// Shared unlock password.
    SharedSecret { password: &'a str },
}

impl std::fmt::Debug for Credentials<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Account { email, .. } => f
                .debug_struct("Account")
                .field("email", email)
                .finish_non_exhaustive(),
            Credentials::SharedSecret { .. } => f.debug_struct("SharedSecret").finish_non_exhaustive(),
        }
    }
}

/// A proven identity.
#[derive(Debug, Clone)]
pub struct Identity {
    /// The account, for account-based strategies.
    pub user: Option<User>,
    /// Roles the proof grants.
    pub roles: RoleSet,
}

/// A way of turning credentials into an identity.
#[async_trait]
pub trait IdentityStrategy: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Check credentials. `Ok(None)` when they do not prove anything,
    /// including credentials of a kind this strategy does not accept.
    async fn authenticate(&self, credentials: Credentials<'_>) -> AuthResult<Option<Identity>>;
}

/// Email and password against the credential store.
#[derive(Clone)]
pub struct AccountLogin {
    credentials: CredentialStore,
}

impl AccountLogin {
    pub fn new(credentials: CredentialStore) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl IdentityStrategy for AccountLogin {
    fn name(&self) -> &'static str {
        "account"
    }

    async fn authenticate(&self, credentials: Credentials<'_>) -> AuthResult<Option<Identity>> {
        let Credentials::Account { email, password } = credentials else {
            return Ok(None);
        };
        Ok(self
            .credentials
            .verify_credentials(email, password)
            .await?
            .map(|user| Identity {
                roles: user.roles.clone(),
                user: Some(user),
            }))
    }
}

/// Shared passwords, each unlocking a set of roles.
#[derive(Debug, Clone)]
pub struct SharedSecretUnlock {
    grants: Vec<(RoleSet, String)>,
    hasher: PasswordHasher,
}

impl SharedSecretUnlock {
    /// Build from configured grants. `None` when no grants are configured.
    pub fn from_config(config: &UnlockConfig) -> Option<Self> {
        if !config.enabled() {
            return None;
        }
        Some(Self {
            grants: config
                .grants
                .iter()
                .map(|g| (RoleSet::of(&g.roles), g.password_hash.clone()))
                .collect(),
            hasher: PasswordHasher::new(),
        })
    }
}

#[async_trait]
impl IdentityStrategy for SharedSecretUnlock {
    fn name(&self) -> &'static str {
        "shared_secret"
    }

    async fn authenticate(&self, credentials: Credentials<'_>) -> AuthResult<Option<Identity>> {
        let Credentials::SharedSecret { password } = credentials else {
            return Ok(None);
        };

        // Every grant is checked so the time taken does not depend on
        // which one matched. Matching grants combine.
        let mut roles = RoleSet::new();
        for (granted, hash) in &self.grants {
            if self.hasher.verify(password, hash) {
                for role in granted.iter() {
                    roles.insert(role);
                }
            }
        }

        Ok((!roles.is_empty()).then_some(Identity { user: None, roles }))
    }
}
