//! PBKDF2-HMAC-SHA256 encoded credentials.
//!
//! Two layouts are understood, both with four `$`-separated fields:
//!
//! ```text
//! $pbkdf2-sha256$<rounds>$<ab64 salt>$<ab64 digest>     (passlib)
//! pbkdf2_sha256$<rounds>$<salt text>$<base64 digest>    (Django)
//! ```
//!
//! passlib's "adapted base64" is standard base64 with `.` in place of `+`
//! and no padding.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// passlib identifier.
pub const PASSLIB_IDENT: &str = "pbkdf2-sha256";

/// Django identifier.
pub const DJANGO_IDENT: &str = "pbkdf2_sha256";

/// Upper bound on accepted rounds, keeps a hostile record from stalling a login.
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// Longest digest accepted (two SHA-256 blocks).
const MAX_DIGEST_LEN: usize = 64;

const B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Passlib,
    Django,
}

/// A parsed PBKDF2 credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EncodedPbkdf2 {
    layout: Layout,
    iterations: u32,
    salt: Vec<u8>,
    digest: Vec<u8>,
}

impl EncodedPbkdf2 {
    /// Parses an encoded credential. Returns `None` for anything malformed.
    pub(crate) fn parse(stored: &str) -> Option<Self> {
        let body = stored.strip_prefix('$').unwrap_or(stored);
        let fields: Vec<&str> = body.split('$').collect();
        let [ident, rounds, salt, digest] = fields.as_slice() else {
            return None;
        };

        let iterations = rounds
            .parse::<u32>()
            .ok()
            .filter(|n| (1..=MAX_ITERATIONS).contains(n))?;

        let (layout, salt, digest) = match *ident {
            PASSLIB_IDENT => (Layout::Passlib, ab64_decode(salt)?, ab64_decode(digest)?),
            DJANGO_IDENT => (
                Layout::Django,
                salt.as_bytes().to_vec(),
                B64.decode(digest).ok()?,
            ),
            _ => return None,
        };

        if salt.is_empty() || digest.is_empty() || digest.len() > MAX_DIGEST_LEN {
            return None;
        }

        Some(Self {
            layout,
            iterations,
            salt,
            digest,
        })
    }

    /// Recomputes the digest over `plain` and compares in constant time.
    pub(crate) fn verify(&self, plain: &str) -> bool {
        let derived = derive(plain, &self.salt, self.iterations, self.digest.len());
        derived.as_slice().ct_eq(&self.digest).into()
    }

    /// Re-encodes in the original layout.
    #[cfg(test)]
    fn encode(&self) -> String {
        match self.layout {
            Layout::Passlib => encode_passlib(self.iterations, &self.salt, &self.digest),
            Layout::Django => format!(
                "{DJANGO_IDENT}${}${}${}",
                self.iterations,
                String::from_utf8_lossy(&self.salt),
                B64.encode(&self.digest)
            ),
        }
    }
}

/// Runs PBKDF2-HMAC-SHA256.
pub(crate) fn derive(plain: &str, salt: &[u8], iterations: u32, len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    pbkdf2::pbkdf2_hmac::<Sha256>(plain.as_bytes(), salt, iterations, &mut out);
    out
}

/// Formats a passlib `$pbkdf2-sha256$` string.
pub(crate) fn encode_passlib(iterations: u32, salt: &[u8], digest: &[u8]) -> String {
    format!(
        "${PASSLIB_IDENT}${iterations}${}${}",
        ab64_encode(salt),
        ab64_encode(digest)
    )
}

fn ab64_encode(data: &[u8]) -> String {
    B64.encode(data).replace('+', ".")
}

fn ab64_decode(text: &str) -> Option<Vec<u8>> {
    B64.decode(text.replace('.', "+")).ok()
}
