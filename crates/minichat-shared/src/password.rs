//! Password hashing with Argon2id.
//!
//! Hashes are stored as PHC strings, so algorithm, parameters and salt travel
//! with the hash.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::MinichatError;

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, MinichatError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| MinichatError::PasswordHash(e.to_string()))
}

/// Check a password against a stored PHC hash.
///
/// A stored value that is not a valid PHC string never verifies.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
