//! Response password hashing.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use tempforms_common::{AppError, AppResult};

/// Salted one-way hashing of response passwords.
pub trait SecretHasher: Send + Sync {
    /// Hash a plaintext secret.
    fn hash(&self, secret: &str) -> AppResult<String>;

    /// Check a plaintext secret against a stored hash.
    fn verify(&self, secret: &str, hash: &str) -> AppResult<bool>;
}

/// Argon2id with default parameters, stored as PHC strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Hasher;

impl SecretHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))
    }

    fn verify(&self, secret: &str, hash: &str) -> AppResult<bool> {
        let parsed_hash =
            PasswordHash::new(hash).map_err(|e| AppError::Internal(format!("Invalid hash: {e}")))?;

        Ok(Argon2::default()
            .verify_password(secret.as_bytes(), &parsed_hash)
            .is_ok())
    }
}
