//! Stored-credential scheme classification.
//!
//! A stored credential carries no explicit tag, so its scheme is inferred
//! from the shape of the string. Classification is a single pass over a
//! fixed order of structural checks; the first match wins and is final.
//!
//! | Order | Shape                                          | Scheme      |
//! |-------|------------------------------------------------|-------------|
//! | 1     | `$2a$`, `$2b$` or `$2y$` prefix                | `Bcrypt`    |
//! | 2     | `pbkdf2` marker, or `alg$iter$salt$hash`       | `Pbkdf2`    |
//! | 3     | exactly 64 hex characters                      | `Sha256Hex` |
//! | 4     | anything else                                  | `Plaintext` |

use std::fmt;

/// Prefixes produced by the bcrypt family of implementations.
const BCRYPT_PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

/// Length of a hex-encoded SHA-256 digest.
pub const SHA256_HEX_LEN: usize = 64;

/// The hashing scheme of a stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// bcrypt (`$2a$`, `$2b$`, `$2y$`).
    Bcrypt,
    /// PBKDF2-HMAC-SHA256 in passlib or Django layout.
    Pbkdf2,
    /// Unsalted SHA-256, hex encoded.
    Sha256Hex,
    /// No hashing at all. Legacy records only.
    Plaintext,
}

impl Scheme {
    /// Returns true for schemes that should be replaced on next login.
    ///
    /// Only bcrypt is considered current.
    pub fn is_legacy(&self) -> bool {
        !matches!(self, Scheme::Bcrypt)
    }

    /// Short lowercase name, used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Bcrypt => "bcrypt",
            Scheme::Pbkdf2 => "pbkdf2",
            Scheme::Sha256Hex => "sha256-hex",
            Scheme::Plaintext => "plaintext",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored credential together with its inferred scheme.
///
/// The scheme is fixed at construction; verification dispatches on it
/// exactly once.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Credential<'a> {
    scheme: Scheme,
    payload: &'a str,
}

impl<'a> Credential<'a> {
    /// Classifies `stored` and wraps it.
    pub fn parse(stored: &'a str) -> Self {
        Self {
            scheme: classify(stored),
            payload: stored,
        }
    }

    /// The inferred scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The raw stored value.
    pub fn payload(&self) -> &'a str {
        self.payload
    }
}

// Stored values may be raw passwords, keep them out of debug output.
impl fmt::Debug for Credential<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("scheme", &self.scheme)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// Infers the scheme of a stored credential from its structure.
pub fn classify(stored: &str) -> Scheme {
    if BCRYPT_PREFIXES.iter().any(|p| stored.starts_with(p)) {
        Scheme::Bcrypt
    } else if looks_like_pbkdf2(stored) {
        Scheme::Pbkdf2
    } else if is_sha256_hex(stored) {
        Scheme::Sha256Hex
    } else {
        Scheme::Plaintext
    }
}

fn looks_like_pbkdf2(stored: &str) -> bool {
    if stored.starts_with("$pbkdf2") || stored.starts_with("pbkdf2") {
        return true;
    }
    let body = stored.strip_prefix('$').unwrap_or(stored);
    body.split('$').count() == 4
}

fn is_sha256_hex(stored: &str) -> bool {
    stored.len() == SHA256_HEX_LEN && stored.bytes().all(|b| b.is_ascii_hexdigit())
}
