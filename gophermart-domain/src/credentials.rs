//! User credential types
//!
//! # Security Model
//!
//! - Raw passwords live in a zeroizing buffer and are wiped on drop
//! - Stored credentials are Argon2id PHC strings with a random per-user salt
//! - Session tokens are 128 random bits, hex encoded; one live token per user

use argon2::password_hash::{
    PasswordHash as PhcString, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::value_objects::DomainError;

/// Session token size in bytes (128 bits)
const TOKEN_BYTES: usize = 16;

/// Salt size in bytes
const SALT_BYTES: usize = 16;

// =============================================================================
// Password
// =============================================================================

/// Raw password as received from the user.
///
/// Never logged, never persisted; the buffer is zeroed on drop.
pub struct Password(Zeroizing<String>);

impl Password {
    /// Wrap a raw password, rejecting empty input.
    ///
    /// # Errors
    /// Returns `DomainError::EmptyField` if the password is empty
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = Zeroizing::new(raw.into());
        if raw.is_empty() {
            return Err(DomainError::EmptyField("password"));
        }
        Ok(Self(raw))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

// =============================================================================
// Password Hash
// =============================================================================

/// Argon2id hash of a user's password in PHC string format
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Hash a password with a fresh random salt.
    ///
    /// # Errors
    /// Returns `DomainError::PasswordHash` if hashing fails
    pub fn derive(password: &Password) -> Result<Self, DomainError> {
        let mut salt_bytes = [0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt_bytes);

        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| DomainError::PasswordHash(format!("salt encoding failed: {}", e)))?;

        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| DomainError::PasswordHash(e.to_string()))?;

        Ok(Self(hash.to_string()))
    }

    /// Rebuild a hash read back from storage.
    ///
    /// # Errors
    /// Returns `DomainError::PasswordHash` if the value is not a PHC string
    pub fn from_stored(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        PhcString::new(&raw).map_err(|e| DomainError::PasswordHash(e.to_string()))?;
        Ok(Self(raw))
    }

    /// Check a candidate password against this hash
    pub fn verify(&self, password: &Password) -> bool {
        match PhcString::new(&self.0) {
            Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }

    /// PHC string for storage
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(***)")
    }
}

// =============================================================================
// Session Token
// =============================================================================

/// Opaque session bearer: 128 random bits as 32 upper-case hex characters
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh random token
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode_upper(bytes))
    }

    /// Wrap a token presented by a client or read from storage
    pub fn from_string(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Token as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only a prefix, enough to correlate log lines
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "SessionToken({}…)", prefix)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_password_rejects_empty() {
        assert_eq!(Password::new("").unwrap_err(), DomainError::EmptyField("password"));
        assert!(Password::new("secret").is_ok());
    }

    #[test]
    fn test_password_debug_is_redacted() {
        let password = Password::new("hunter2").unwrap();
        assert_eq!(format!("{:?}", password), "Password(***)");
    }

    #[test]
    fn test_hash_and_verify() {
        let password = Password::new("correct horse").unwrap();
        let hash = PasswordHash::derive(&password).unwrap();

        assert!(hash.as_str().starts_with("$argon2id$"));
        assert!(hash.verify(&password));
        assert!(!hash.verify(&Password::new("battery staple").unwrap()));
    }

    #[test]
    fn test_hash_is_salted() {
        let password = Password::new("same").unwrap();
        let a = PasswordHash::derive(&password).unwrap();
        let b = PasswordHash::derive(&password).unwrap();

        assert_ne!(a.as_str(), b.as_str());
        assert!(a.verify(&password));
        assert!(b.verify(&password));
    }

    #[test]
    fn test_hash_from_stored() {
        let password = Password::new("pw").unwrap();
        let hash = PasswordHash::derive(&password).unwrap();

        let restored = PasswordHash::from_stored(hash.as_str()).unwrap();
        assert!(restored.verify(&password));

        assert!(PasswordHash::from_stored("5f4dcc3b5aa765d61d8327deb882cf99").is_err());
    }

    #[test]
    fn test_session_token_format() {
        let token = SessionToken::generate();

        assert_eq!(token.as_str().len(), 32);
        assert!(token
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn test_session_tokens_are_unique() {
        let tokens: HashSet<_> = (0..256).map(|_| SessionToken::generate()).collect();
        assert_eq!(tokens.len(), 256);
    }
}
