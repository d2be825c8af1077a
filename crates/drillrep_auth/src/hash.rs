//! Credential generation helpers.
//!
//! New credentials are always bcrypt. The other generators exist to write
//! fixtures and to reproduce the formats already present in user stores.

use crate::error::{AuthError, AuthResult};
use crate::pbkdf2_sha256::{derive, encode_passlib, MAX_ITERATIONS};
use crate::scheme::classify;
use crate::verify::DEFAULT_BCRYPT_COST;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Default PBKDF2 rounds, matching passlib's `pbkdf2_sha256` default.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 29_000;

/// Salt length for generated PBKDF2 credentials.
pub const PBKDF2_SALT_LEN: usize = 16;

/// Digest length for generated PBKDF2 credentials.
pub const PBKDF2_DIGEST_LEN: usize = 32;

/// Hashes a password with bcrypt at the default cost.
///
/// # Errors
///
/// Returns an error if bcrypt fails.
pub fn hash_password(plain: &str) -> AuthResult<String> {
    hash_password_with_cost(plain, DEFAULT_BCRYPT_COST)
}

/// Hashes a password with bcrypt at the given cost (4..=31).
///
/// # Errors
///
/// Returns an error if the cost is out of range.
pub fn hash_password_with_cost(plain: &str, cost: u32) -> AuthResult<String> {
    Ok(bcrypt::hash(plain, cost)?)
}

/// Produces a passlib-style `$pbkdf2-sha256$` credential with a random salt.
///
/// # Errors
///
/// Returns [`AuthError::InvalidIterations`] for zero or excessive rounds.
pub fn hash_pbkdf2(plain: &str, iterations: u32) -> AuthResult<String> {
    if iterations == 0 || iterations > MAX_ITERATIONS {
        return Err(AuthError::InvalidIterations(iterations));
    }
    let mut salt = [0u8; PBKDF2_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = derive(plain, &salt, iterations, PBKDF2_DIGEST_LEN);
    Ok(encode_passlib(iterations, &salt, &digest))
}

/// Lowercase hex SHA-256 digest of `plain`.
pub fn sha256_hex(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}

/// Returns true if `stored` uses a scheme that should be replaced.
pub fn needs_rehash(stored: &str) -> bool {
    classify(stored).is_legacy()
}
