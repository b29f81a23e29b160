//! User accounts and the credential store.

use deck_store::{store_key, Fields, SharedClock, SharedStore};
use serde::{Deserialize, Serialize};

use crate::config::CredentialsConfig;
use crate::password::{self, PasswordHasher};
use crate::record::{self, Record};
use crate::role::RoleSet;
use crate::session::generate_secure_id;
use crate::{AuthError, AuthResult};

const USERS_INDEX: &str = "users:all";

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Unique, immutable identifier.
    pub id: String,
    /// Email address, unique and case-sensitive.
    pub email: String,
    /// Argon2 PHC hash.
    pub password_hash: String,
    /// Granted roles, never empty.
    pub roles: RoleSet,
    /// Unix timestamp of registration.
    pub created_at: i64,
    /// Unix timestamp of the last successful login.
    pub last_login_at: Option<i64>,
    /// Deactivated users stay resolvable but cannot authenticate.
    pub active: bool,
    /// Bumped on every role change and deactivation.
    pub security_epoch: u64,
}

impl User {
    /// Public view without the password hash.
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            user_id: self.id.clone(),
            email: self.email.clone(),
            roles: self.roles.clone(),
            created_at: self.created_at,
            last_login_at: self.last_login_at,
            active: self.active,
        }
    }

    fn to_fields(&self) -> Fields {
        let mut fields = record::fields([
            ("user_id", self.id.clone()),
            ("email", self.email.clone()),
            ("password_hash", self.password_hash.clone()),
            ("roles", self.roles.joined()),
            ("created_at", self.created_at.to_string()),
            ("active", self.active.to_string()),
            ("security_epoch", self.security_epoch.to_string()),
        ]);
        if let Some(at) = self.last_login_at {
            fields.insert("last_login_at".to_string(), at.to_string());
        }
        fields
    }

    fn from_fields(key: &str, fields: &Fields) -> AuthResult<Self> {
        let record = Record::new(key, fields);
        Ok(Self {
            id: record.str("user_id")?.to_string(),
            email: record.str("email")?.to_string(),
            password_hash: record.str("password_hash")?.to_string(),
            roles: RoleSet::parse(record.str("roles")?),
            created_at: record.parse("created_at")?,
            last_login_at: record.opt_parse("last_login_at")?,
            active: record.parse_or("active", true)?,
            security_epoch: record.parse_or("security_epoch", 0)?,
        })
    }
}

/// User as shown to clients and admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: String,
    pub email: String,
    pub roles: RoleSet,
    pub created_at: i64,
    pub last_login_at: Option<i64>,
    pub active: bool,
}

fn user_key(user_id: &str) -> String {
    store_key!("user", user_id)
}

fn email_key(email: &str) -> String {
    store_key!("email", email)
}

/// Persists users keyed by id and by email.
///
/// Records are hashes at `user:{id}`; `email:{email}` maps to the id and
/// `users:all` indexes every id for listing.
#[derive(Clone)]
pub struct CredentialStore {
    store: SharedStore,
    clock: SharedClock,
    hasher: PasswordHasher,
    config: CredentialsConfig,
}

impl CredentialStore {
    /// Create a credential store over `store`.
    pub fn new(store: SharedStore, clock: SharedClock, config: CredentialsConfig) -> Self {
        Self {
            store,
            clock,
            hasher: PasswordHasher::new(),
            config,
        }
    }

    /// Register a user. `roles` defaults to the configured default roles.
    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        roles: Option<RoleSet>,
    ) -> AuthResult<User> {
        password::validate_email(email)?;
        password::validate_password(password, self.config.min_password_length)?;
        let roles = match roles {
            Some(roles) if roles.is_empty() => {
                return Err(AuthError::InvalidRequest("Roles must not be empty".into()))
            }
            Some(roles) => roles,
            None => self.config.default_role_set(),
        };

        let user = User {
            id: generate_secure_id("usr"),
            email: email.to_string(),
            password_hash: self.hasher.hash(password)?,
            roles,
            created_at: self.clock.now(),
            last_login_at: None,
            active: true,
            security_epoch: 0,
        };

        // The email reservation is the uniqueness check.
        if !self.store.set_if_absent(&email_key(email), &user.id).await? {
            return Err(AuthError::DuplicateEmail);
        }

        let key = user_key(&user.id);
        let written = async {
            self.store.hash_set(&key, &user.to_fields()).await?;
            self.store.set_add(USERS_INDEX, &user.id).await
        }
        .await;
        if let Err(err) = written {
            tracing::error!(error = %err, "failed to persist new user, releasing email");
            if let Err(cleanup) = self.store.delete(&email_key(email)).await {
                tracing::error!(error = %cleanup, "failed to release email reservation");
            }
            return Err(err.into());
        }

        tracing::info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Check an email/password pair.
    ///
    /// `None` for an unknown email, an inactive user, or a wrong password,
    /// without saying which. Store failures are errors.
    pub async fn verify_credentials(&self, email: &str, password: &str) -> AuthResult<Option<User>> {
        let Some(user) = self.get_by_email(email).await? else {
            self.hasher.verify_dummy(password);
            return Ok(None);
        };

        let matches = self.hasher.verify(password, &user.password_hash);
        if !matches || !user.active {
            tracing::debug!(user_id = %user.id, active = user.active, "credential check failed");
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// Look up a user by id.
    pub async fn get_by_id(&self, user_id: &str) -> AuthResult<Option<User>> {
        let key = user_key(user_id);
        match self.store.hash_get_all(&key).await? {
            Some(fields) => User::from_fields(&key, &fields).map(Some),
            None => Ok(None),
        }
    }

    /// Look up a user by email.
    pub async fn get_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        match self.store.get(&email_key(email)).await? {
            Some(user_id) => self.get_by_id(&user_id).await,
            None => Ok(None),
        }
    }

    /// Replace a user's roles and bump their security epoch.
    pub async fn update_roles(&self, user_id: &str, roles: &RoleSet) -> AuthResult<User> {
        if roles.is_empty() {
            return Err(AuthError::InvalidRequest("Roles must not be empty".into()));
        }
        let mut user = self.require(user_id).await?;
        user.roles = roles.clone();
        user.security_epoch += 1;
        self.write_fields(
            &user,
            [
                ("roles", user.roles.joined()),
                ("security_epoch", user.security_epoch.to_string()),
            ],
        )
        .await?;
        tracing::info!(user_id, roles = %user.roles, "user roles updated");
        Ok(user)
    }

    /// Mark a user inactive and bump their security epoch.
    pub async fn deactivate(&self, user_id: &str) -> AuthResult<User> {
        let mut user = self.require(user_id).await?;
        user.active = false;
        user.security_epoch += 1;
        self.write_fields(
            &user,
            [
                ("active", "false".to_string()),
                ("security_epoch", user.security_epoch.to_string()),
            ],
        )
        .await?;
        tracing::info!(user_id, "user deactivated");
        Ok(user)
    }

    /// Record a successful login.
    pub async fn record_login(&self, user_id: &str) -> AuthResult<()> {
        let now = self.clock.now().to_string();
        self.store
            .hash_update(&user_key(user_id), &record::fields([("last_login_at", now)]))
            .await?;
        Ok(())
    }

    /// Every registered user, oldest first.
    pub async fn list_all(&self) -> AuthResult<Vec<User>> {
        let ids = self.store.set_members(USERS_INDEX).await?;
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(user) = self.get_by_id(&id).await? {
                users.push(user);
            }
        }
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.email.cmp(&b.email)));
        Ok(users)
    }

    async fn require(&self, user_id: &str) -> AuthResult<User> {
        self.get_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".to_string()))
    }

    async fn write_fields<const N: usize>(
        &self,
        user: &User,
        pairs: [(&str, String); N],
    ) -> AuthResult<()> {
        if !self
            .store
            .hash_update(&user_key(&user.id), &record::fields(pairs))
            .await?
        {
            return Err(AuthError::NotFound("User".to_string()));
        }
        Ok(())
    }
}
