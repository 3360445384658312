//! Password hashing and verification (argon2).
//!
//! Plain-text passwords are hashed at the boundary; only hashes reach the
//! [`crate::Account`] entity or storage.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use tradepost_core::{DomainError, DomainResult};

/// Hash a plain-text password with a fresh random salt.
pub fn hash_password(password: &str) -> DomainResult<String> {
    if password.is_empty() {
        return Err(DomainError::validation("password cannot be empty"));
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| DomainError::validation(format!("password hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// Verify a plain-text password against a stored hash.
///
/// Returns `Ok(false)` on a mismatch; errors are reserved for malformed
/// stored hashes.
pub fn verify_password(stored_hash: &str, password: &str) -> DomainResult<bool> {
    if password.is_empty() {
        return Ok(false);
    }

    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| DomainError::validation(format!("stored password hash is malformed: {e}")))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(DomainError::validation(format!(
            "password verification failed: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password(&hash, "hunter2").unwrap());
        assert!(!verify_password(&hash, "hunter3").unwrap());
    }

    #[test]
    fn empty_password_is_rejected() {
        assert!(hash_password("").is_err());
    }

    #[test]
    fn malformed_stored_hash_is_an_error() {
        assert!(verify_password("not-a-phc-string", "pw").is_err());
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }
}
