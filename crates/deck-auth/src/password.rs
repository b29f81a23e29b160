//! Password hashing with Argon2id.
//!
//! Hashes are stored in PHC string format, salted per password. The
//! plaintext never leaves this module.

use std::sync::OnceLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};

use crate::{AuthError, AuthResult};

/// Password hasher using the default Argon2id parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordHasher;

impl PasswordHasher {
    /// Create a hasher.
    pub fn new() -> Self {
        Self
    }

    /// Hash a password.
    pub fn hash(&self, password: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(format!("failed to hash password: {}", e)))
    }

    /// Verify a password against a stored hash.
    ///
    /// An unparsable hash never matches.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Burn one verification against a fixed hash.
    ///
    /// Used when there is no real hash to check, so a miss costs the same
    /// time as a wrong password.
    pub fn verify_dummy(&self, password: &str) {
        let _ = self.verify(password, dummy_hash());
    }
}

fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| {
        PasswordHasher
            .hash("flashdeck-timing-equalizer")
            .unwrap_or_default()
    })
}

/// Whether `hash` is a well-formed PHC string.
pub fn is_valid_hash(hash: &str) -> bool {
    PasswordHash::new(hash).is_ok()
}

/// Validate password length.
pub fn validate_password(password: &str, min_length: usize) -> AuthResult<()> {
    if password.chars().count() < min_length {
        return Err(AuthError::InvalidRequest(format!(
            "Password must be at least {} characters",
            min_length
        )));
    }
    Ok(())
}

/// Validate email format (basic validation).
pub fn validate_email(email: &str) -> AuthResult<()> {
    let invalid = || AuthError::InvalidRequest("Invalid email address".to_string());

    if email.trim() != email || email.len() < 3 {
        return Err(invalid());
    }

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    if email.contains(char::is_whitespace) {
        return Err(invalid());
    }

    Ok(())
}
