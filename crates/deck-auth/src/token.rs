//! Signed, expiring access and refresh tokens.
//!
//! Tokens are compact JWTs signed with HMAC (HS256, HS384 or HS512).
//! Verification fails closed: the public API yields `None` for every
//! failure, while [`TokenCodec::inspect_access`] and
//! [`TokenCodec::inspect_refresh`] report the [`TokenRejection`] kind.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use deck_store::SharedClock;
use hmac::{digest::KeyInit, Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;

use crate::config::{Algorithm, TokenConfig};
use crate::role::RoleSet;
use crate::{AuthError, AuthResult};

/// Class tag of access tokens.
pub const ACCESS_CLASS: &str = "access";
/// Class tag of refresh tokens.
pub const REFRESH_CLASS: &str = "refresh";

/// Why a token was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// No token was presented.
    #[error("token missing")]
    Missing,
    /// Not a well-formed token.
    #[error("token malformed")]
    Malformed,
    /// Signature or algorithm mismatch.
    #[error("signature invalid")]
    SignatureInvalid,
    /// Past its expiry.
    #[error("token expired")]
    Expired,
    /// A refresh token presented as access, or the reverse.
    #[error("wrong token class")]
    WrongClass,
    /// Issued by someone else.
    #[error("wrong issuer")]
    WrongIssuer,
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

/// Identity an access token is issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// Session the token is bound to.
    pub session_id: String,
    /// Bound user, absent for anonymous sessions.
    pub user_id: Option<String>,
    /// Bound user's email.
    pub email: Option<String>,
    /// Roles snapshot.
    pub roles: RoleSet,
    /// Authenticated flag snapshot.
    pub authenticated: bool,
}

impl Subject {
    /// Subject identifier: the user id when bound, else the session id.
    pub fn id(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.session_id)
    }
}

/// Claims of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user id, or session id for anonymous sessions).
    pub sub: String,
    /// Session id.
    pub sid: String,
    /// Bound user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Bound user's email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Roles at issuance.
    pub roles: RoleSet,
    /// Authenticated flag at issuance.
    pub authenticated: bool,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
    /// Token class, always `"access"`.
    pub typ: String,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Claims of a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject (user id, or session id for anonymous sessions).
    pub sub: String,
    /// Session id.
    pub sid: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
    /// Token class, always `"refresh"`.
    pub typ: String,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Fields checked before the payload is decoded into its claim type.
#[derive(Deserialize)]
struct Envelope {
    typ: Option<String>,
    exp: Option<i64>,
    iss: Option<String>,
}

/// Issues and verifies tokens.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
    algorithm: Algorithm,
    access_ttl: Duration,
    refresh_ttl: Duration,
    issuer: Option<String>,
    clock: SharedClock,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Create a codec from token configuration.
    pub fn new(config: &TokenConfig, clock: SharedClock) -> Self {
        Self {
            secret: config.secret.as_bytes().to_vec(),
            algorithm: config.algorithm,
            access_ttl: Duration::from_secs(config.access_ttl_secs),
            refresh_ttl: Duration::from_secs(config.refresh_ttl_secs),
            issuer: config.issuer.clone(),
            clock,
        }
    }

    /// Access token lifetime.
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Refresh token lifetime.
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issue an access token with the configured lifetime.
    pub fn issue_access(&self, subject: &Subject) -> AuthResult<String> {
        self.issue_access_with_ttl(subject, self.access_ttl)
    }

    /// Issue an access token with an explicit lifetime.
    pub fn issue_access_with_ttl(&self, subject: &Subject, ttl: Duration) -> AuthResult<String> {
        let now = self.clock.now();
        let claims = AccessClaims {
            sub: subject.id().to_string(),
            sid: subject.session_id.clone(),
            user_id: subject.user_id.clone(),
            email: subject.email.clone(),
            roles: subject.roles.clone(),
            authenticated: subject.authenticated,
            iat: now,
            exp: now + ttl.as_secs() as i64,
            typ: ACCESS_CLASS.to_string(),
            iss: self.issuer.clone(),
        };
        self.encode(&claims)
    }

    /// Issue a refresh token for `subject_id` bound to `session_id`.
    pub fn issue_refresh(&self, subject_id: &str, session_id: &str) -> AuthResult<String> {
        let now = self.clock.now();
        let claims = RefreshClaims {
            sub: subject_id.to_string(),
            sid: session_id.to_string(),
            iat: now,
            exp: now + self.refresh_ttl.as_secs() as i64,
            typ: REFRESH_CLASS.to_string(),
            iss: self.issuer.clone(),
        };
        self.encode(&claims)
    }

    /// Verify an access token.
    pub fn verify_access(&self, token: Option<&str>) -> Option<AccessClaims> {
        self.inspect_access(token).ok()
    }

    /// Verify a refresh token.
    pub fn verify_refresh(&self, token: Option<&str>) -> Option<RefreshClaims> {
        self.inspect_refresh(token).ok()
    }

    /// Verify an access token, reporting why it was rejected.
    pub fn inspect_access(&self, token: Option<&str>) -> Result<AccessClaims, TokenRejection> {
        self.decode(token, ACCESS_CLASS)
    }

    /// Verify a refresh token, reporting why it was rejected.
    pub fn inspect_refresh(&self, token: Option<&str>) -> Result<RefreshClaims, TokenRejection> {
        self.decode(token, REFRESH_CLASS)
    }

    fn encode<T: Serialize>(&self, claims: &T) -> AuthResult<String> {
        let header = JwtHeader {
            alg: self.algorithm.as_str().to_string(),
            typ: "JWT".to_string(),
        };
        let header_json = serde_json::to_vec(&header)
            .map_err(|e| AuthError::Internal(format!("token header: {}", e)))?;
        let payload_json = serde_json::to_vec(claims)
            .map_err(|e| AuthError::Internal(format!("token payload: {}", e)))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(payload_json)
        );
        let signature = self
            .sign(signing_input.as_bytes())
            .map_err(|e| AuthError::Internal(format!("token signing: {}", e)))?;

        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
    }

    fn decode<T: DeserializeOwned>(
        &self,
        token: Option<&str>,
        class: &str,
    ) -> Result<T, TokenRejection> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(TokenRejection::Missing)?;

        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenRejection::Malformed);
        };

        let header: JwtHeader = decode_segment(header_b64)?;
        if header.alg != self.algorithm.as_str() {
            return Err(TokenRejection::SignatureInvalid);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenRejection::Malformed)?;
        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        if !self.verify_signature(signing_input.as_bytes(), &signature) {
            return Err(TokenRejection::SignatureInvalid);
        }

        let envelope: Envelope = decode_segment(payload_b64)?;
        if envelope.typ.as_deref() != Some(class) {
            return Err(TokenRejection::WrongClass);
        }
        if self.issuer.is_some() && envelope.iss != self.issuer {
            return Err(TokenRejection::WrongIssuer);
        }
        let exp = envelope.exp.ok_or(TokenRejection::Malformed)?;
        if self.clock.now() >= exp {
            return Err(TokenRejection::Expired);
        }

        decode_segment(payload_b64)
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>, hmac::digest::InvalidLength> {
        match self.algorithm {
            Algorithm::HS256 => mac::<Hmac<Sha256>>(&self.secret, input),
            Algorithm::HS384 => mac::<Hmac<Sha384>>(&self.secret, input),
            Algorithm::HS512 => mac::<Hmac<Sha512>>(&self.secret, input),
        }
    }

    fn verify_signature(&self, input: &[u8], signature: &[u8]) -> bool {
        match self.algorithm {
            Algorithm::HS256 => verify_mac::<Hmac<Sha256>>(&self.secret, input, signature),
            Algorithm::HS384 => verify_mac::<Hmac<Sha384>>(&self.secret, input, signature),
            Algorithm::HS512 => verify_mac::<Hmac<Sha512>>(&self.secret, input, signature),
        }
    }
}

fn mac<M: Mac + KeyInit>(key: &[u8], input: &[u8]) -> Result<Vec<u8>, hmac::digest::InvalidLength> {
    let mut mac = <M as KeyInit>::new_from_slice(key)?;
    Mac::update(&mut mac, input);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn verify_mac<M: Mac + KeyInit>(key: &[u8], input: &[u8], signature: &[u8]) -> bool {
    match <M as KeyInit>::new_from_slice(key) {
        Ok(mut mac) => {
            Mac::update(&mut mac, input);
            mac.verify_slice(signature).is_ok()
        }
        Err(_) => false,
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, TokenRejection> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenRejection::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenRejection::Malformed)
}

/// Decode a token's payload without checking its signature or expiry.
///
/// For diagnostics only; never use the result for authorization.
pub fn peek_claims(token: &str) -> Result<serde_json::Value, TokenRejection> {
    let payload = token
        .trim()
        .split('.')
        .nth(1)
        .ok_or(TokenRejection::Malformed)?;
    decode_segment(payload)
}

/// Extract the token from an `Authorization: Bearer` header value.
pub fn extract_bearer_token(auth_header: Option<&str>) -> Option<&str> {
    auth_header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
