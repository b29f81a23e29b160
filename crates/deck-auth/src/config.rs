//! Service configuration.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::password;
use crate::role::{RoleSet, USER};

/// Minimum signing secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed.
    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    /// An environment override held an unusable value.
    #[error("invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },

    /// The loaded configuration is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// HMAC algorithm used to sign tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    HS256,
    HS384,
    HS512,
}

impl Algorithm {
    /// Header name of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::HS256 => "HS256",
            Algorithm::HS384 => "HS384",
            Algorithm::HS512 => "HS512",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(Algorithm::HS256),
            "HS384" => Ok(Algorithm::HS384),
            "HS512" => Ok(Algorithm::HS512),
            other => Err(format!("unsupported algorithm '{}'", other)),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token signing.
    #[serde(default)]
    pub token: TokenConfig,

    /// Session records.
    #[serde(default)]
    pub session: SessionConfig,

    /// User accounts.
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Cookie attributes.
    #[serde(default)]
    pub cookies: CookieConfig,

    /// Shared-secret unlock grants.
    #[serde(default)]
    pub unlock: UnlockConfig,
}

/// Token signing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// HMAC secret. Must be at least [`MIN_SECRET_LEN`] bytes.
    #[serde(default)]
    pub secret: String,

    /// Signing algorithm.
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Access token lifetime (default: 15 minutes).
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,

    /// Refresh token lifetime (default: 7 days).
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,

    /// Issuer claim, embedded and checked when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

fn default_access_ttl() -> u64 {
    15 * 60
}

fn default_refresh_ttl() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            algorithm: Algorithm::default(),
            access_ttl_secs: default_access_ttl(),
            refresh_ttl_secs: default_refresh_ttl(),
            issuer: None,
        }
    }
}

/// How cascading invalidation finds a user's sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationStrategy {
    /// Read the user → sessions reverse index.
    #[default]
    Index,
    /// Scan every session record and filter by bound user.
    Scan,
}

/// What a user-level role change does to that user's live sessions.
///
/// Neither mode both drops the sessions and keeps their refresh tokens
/// working: `Resync` keeps the sessions alive with the new roles, while
/// `Invalidate` deletes them, so their refresh tokens fail with 401.
/// Deactivation always deletes a user's sessions, whatever the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleChangePolicy {
    /// Rewrite the roles of every live session; the next refresh carries
    /// the new roles.
    #[default]
    Resync,
    /// Delete every live session; the user has to log in again.
    Invalidate,
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session record lifetime (default: 7 days).
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// Page size for admin session listing.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Cascading invalidation lookup.
    #[serde(default)]
    pub invalidation: InvalidationStrategy,

    /// Effect of a user role change on live sessions.
    #[serde(default)]
    pub on_role_change: RoleChangePolicy,
}

fn default_session_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_page_size() -> usize {
    100
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            page_size: default_page_size(),
            invalidation: InvalidationStrategy::default(),
            on_role_change: RoleChangePolicy::default(),
        }
    }
}

/// Account configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Roles given to newly registered users.
    #[serde(default = "default_roles")]
    pub default_roles: Vec<String>,

    /// Minimum password length on registration.
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

fn default_roles() -> Vec<String> {
    vec![USER.to_string()]
}

fn default_min_password_length() -> usize {
    6
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            default_roles: default_roles(),
            min_password_length: default_min_password_length(),
        }
    }
}

impl CredentialsConfig {
    /// Default roles as a set.
    pub fn default_role_set(&self) -> RoleSet {
        RoleSet::of(&self.default_roles)
    }
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    /// Attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Cookie attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    /// Emit the `Secure` attribute.
    #[serde(default)]
    pub secure: bool,

    /// `SameSite` attribute.
    #[serde(default)]
    pub same_site: SameSite,

    /// `Path` attribute.
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: false,
            same_site: SameSite::default(),
            path: default_cookie_path(),
        }
    }
}

/// A shared password that unlocks a set of roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockGrant {
    /// Roles granted on unlock.
    pub roles: Vec<String>,

    /// Argon2 PHC hash of the shared password.
    pub password_hash: String,
}

/// Shared-secret unlock configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnlockConfig {
    /// Grants, checked in order. Empty disables unlock.
    #[serde(default)]
    pub grants: Vec<UnlockGrant>,
}

impl UnlockConfig {
    /// Whether shared-secret unlock is enabled.
    pub fn enabled(&self) -> bool {
        !self.grants.is_empty()
    }
}

impl AuthConfig {
    /// Default configuration with the given signing secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.token.secret = secret.into();
        config
    }

    /// Load, apply environment overrides, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML or JSON file (by extension) without overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: display,
                reason: e.to_string(),
            })
        } else {
            Self::from_toml_str(&content).map_err(|e| match e {
                ConfigError::Parse { reason, .. } => ConfigError::Parse {
                    path: display,
                    reason,
                },
                other => other,
            })
        }
    }

    /// Parse TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Apply overrides from `lookup`, normally the process environment.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(secret) = lookup("JWT_SECRET_KEY") {
            self.token.secret = secret;
        }
        if let Some(algo) = lookup("JWT_DECODE_ALGO") {
            self.token.algorithm = algo.parse().map_err(|reason| ConfigError::Env {
                var: "JWT_DECODE_ALGO",
                reason,
            })?;
        }
        if let Some(ttl) = lookup("DECK_ACCESS_TTL_SECS") {
            self.token.access_ttl_secs = parse_env("DECK_ACCESS_TTL_SECS", &ttl)?;
        }
        if let Some(ttl) = lookup("DECK_REFRESH_TTL_SECS") {
            self.token.refresh_ttl_secs = parse_env("DECK_REFRESH_TTL_SECS", &ttl)?;
        }
        if let Some(secure) = lookup("DECK_COOKIE_SECURE") {
            self.cookies.secure = parse_env("DECK_COOKIE_SECURE", &secure)?;
        }
        Ok(())
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "token secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        if self.token.access_ttl_secs == 0 || self.token.refresh_ttl_secs == 0 {
            return Err(ConfigError::Invalid("token TTLs must be positive".into()));
        }
        if self.token.access_ttl_secs > self.token.refresh_ttl_secs {
            return Err(ConfigError::Invalid(
                "access token TTL must not exceed refresh token TTL".into(),
            ));
        }
        if self.session.ttl_secs == 0 || self.session.page_size == 0 {
            return Err(ConfigError::Invalid(
                "session TTL and page size must be positive".into(),
            ));
        }
        if self.credentials.default_role_set().is_empty() {
            return Err(ConfigError::Invalid("default roles must not be empty".into()));
        }
        for (i, grant) in self.unlock.grants.iter().enumerate() {
            if RoleSet::of(&grant.roles).is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "unlock grant {} has no roles",
                    i
                )));
            }
            if !password::is_valid_hash(&grant.password_hash) {
                return Err(ConfigError::Invalid(format!(
                    "unlock grant {} has an unparsable password hash",
                    i
                )));
            }
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var,
        reason: e.to_string(),
    })
}
