//! Password verification against stored credentials.

use crate::hash::sha256_hex;
use crate::pbkdf2_sha256::EncodedPbkdf2;
use crate::scheme::{Credential, Scheme};
use subtle::ConstantTimeEq;

/// Default bcrypt cost for newly generated credentials.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Verifier configuration.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Whether unrecognized stored values are compared as raw passwords.
    ///
    /// Enabled by default so records written before hashing was introduced
    /// keep working. Disabling it makes every `Plaintext` credential fail.
    pub allow_plaintext: bool,
    /// bcrypt cost used by [`CredentialVerifier::hash`].
    pub bcrypt_cost: u32,
}

impl VerifierConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            allow_plaintext: true,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }

    /// Enables or disables the plaintext comparison path.
    pub fn with_plaintext(mut self, allow: bool) -> Self {
        self.allow_plaintext = allow;
        self
    }

    /// Sets the bcrypt cost.
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Stateless credential verifier.
///
/// Cheap to clone and safe to share across threads; calls never interact.
#[derive(Debug, Clone, Default)]
pub struct CredentialVerifier {
    config: VerifierConfig,
}

impl CredentialVerifier {
    /// Creates a verifier with the given configuration.
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Checks `plain` against `stored`.
    ///
    /// Never panics. Malformed or corrupt stored values yield `false`, so a
    /// caller cannot tell a broken record from a wrong password.
    pub fn matches(&self, plain: &str, stored: &str) -> bool {
        let credential = Credential::parse(stored);
        tracing::debug!(scheme = %credential.scheme(), "verifying credential");

        match credential.scheme() {
            Scheme::Bcrypt => verify_bcrypt(plain, credential.payload()),
            Scheme::Pbkdf2 => EncodedPbkdf2::parse(credential.payload())
                .map(|encoded| encoded.verify(plain))
                .unwrap_or(false),
            Scheme::Sha256Hex => verify_sha256_hex(plain, credential.payload()),
            Scheme::Plaintext if self.config.allow_plaintext => {
                constant_time_str_eq(plain, credential.payload())
            }
            Scheme::Plaintext => {
                tracing::debug!("plaintext credential refused by configuration");
                false
            }
        }
    }

    /// Like [`matches`](Self::matches), treating a missing side as a mismatch.
    pub fn matches_opt(&self, plain: Option<&str>, stored: Option<&str>) -> bool {
        match (plain, stored) {
            (Some(plain), Some(stored)) => self.matches(plain, stored),
            _ => false,
        }
    }

    /// Hashes `plain` with bcrypt at the configured cost.
    ///
    /// # Errors
    ///
    /// Returns an error if bcrypt rejects the cost.
    pub fn hash(&self, plain: &str) -> crate::AuthResult<String> {
        crate::hash::hash_password_with_cost(plain, self.config.bcrypt_cost)
    }
}

/// Checks `plain` against `stored` with the default configuration.
///
/// Unrecognized stored values fall back to a raw comparison, see
/// [`VerifierConfig::allow_plaintext`].
pub fn matches(plain: &str, stored: &str) -> bool {
    CredentialVerifier::default().matches(plain, stored)
}

/// Null-tolerant form of [`matches`].
pub fn matches_opt(plain: Option<&str>, stored: Option<&str>) -> bool {
    CredentialVerifier::default().matches_opt(plain, stored)
}

fn verify_bcrypt(plain: &str, stored: &str) -> bool {
    match bcrypt::verify(plain, stored) {
        Ok(matched) => matched,
        Err(e) => {
            tracing::debug!(error = %e, "corrupt bcrypt credential");
            false
        }
    }
}

fn verify_sha256_hex(plain: &str, stored: &str) -> bool {
    let computed = sha256_hex(plain);
    constant_time_str_eq(&computed, &stored.to_ascii_lowercase())
}

fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
