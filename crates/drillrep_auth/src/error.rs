//! Error types for credential generation.
//!
//! Verification never fails with an error: every problem collapses to a
//! non-match. These errors only come out of the hashing helpers.

use thiserror::Error;

/// Result type for credential generation.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors that can occur while producing a stored credential.
#[derive(Debug, Error)]
pub enum AuthError {
    /// bcrypt rejected the input or the cost parameter.
    #[error("bcrypt error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    /// The PBKDF2 iteration count is unusable.
    #[error("invalid pbkdf2 iteration count: {0}")]
    InvalidIterations(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = AuthError::InvalidIterations(0);
        assert_eq!(err.to_string(), "invalid pbkdf2 iteration count: 0");
    }

    #[test]
    fn bcrypt_error_converts() {
        let err: AuthError = bcrypt::hash("pw", 99).unwrap_err().into();
        assert!(matches!(err, AuthError::Bcrypt(_)));
    }
}
