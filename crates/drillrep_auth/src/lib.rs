//! # drillrep auth
//!
//! Stored-credential verification for drillrep.
//!
//! User stores accumulated over time hold passwords in several formats.
//! This crate checks a submitted password against any of them without a
//! migration step:
//!
//! - bcrypt (`$2a$`, `$2b$`, `$2y$`)
//! - PBKDF2-HMAC-SHA256 (passlib `$pbkdf2-sha256$` and Django `pbkdf2_sha256$`)
//! - unsalted SHA-256 hex digests
//! - raw plaintext, for records written before hashing was introduced
//!
//! ## Key Invariants
//!
//! - Verification never panics and never returns an error; anything
//!   malformed is a mismatch.
//! - The scheme is inferred once per call and not revisited.
//! - No state is kept between calls.
//!
//! ## Legacy plaintext
//!
//! A stored value matching no hashed format is compared as a raw password.
//! This keeps old records usable but means such users have no password
//! protection at rest. Use [`needs_rehash`] to find them, and
//! [`VerifierConfig::with_plaintext`] to refuse the path once migrated.
//!
//! ## Example
//!
//! ```rust
//! use drillrep_auth::{classify, matches, sha256_hex, Scheme};
//!
//! let stored = sha256_hex("1234");
//! assert_eq!(classify(&stored), Scheme::Sha256Hex);
//! assert!(matches("1234", &stored));
//! assert!(!matches("4321", &stored));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod hash;
mod pbkdf2_sha256;
mod scheme;
mod verify;

pub use error::{AuthError, AuthResult};
pub use hash::{
    hash_password, hash_password_with_cost, hash_pbkdf2, needs_rehash, sha256_hex,
    DEFAULT_PBKDF2_ITERATIONS,
};
pub use scheme::{classify, Credential, Scheme};
pub use verify::{matches, matches_opt, CredentialVerifier, VerifierConfig, DEFAULT_BCRYPT_COST};
