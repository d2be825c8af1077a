//! Verify and classify command implementations.

use drillrep_auth::{classify as classify_scheme, needs_rehash, CredentialVerifier, VerifierConfig};
use std::process::ExitCode;

/// Runs the verify command. Exits 0 on a match and 1 otherwise.
pub fn run(password: &str, stored: &str, allow_plaintext: bool) -> ExitCode {
    let scheme = classify_scheme(stored);

    if check(password, stored, allow_plaintext) {
        println!("✓ match ({scheme})");
        ExitCode::SUCCESS
    } else {
        println!("✗ no match ({scheme})");
        ExitCode::FAILURE
    }
}

fn check(password: &str, stored: &str, allow_plaintext: bool) -> bool {
    CredentialVerifier::new(VerifierConfig::new().with_plaintext(allow_plaintext))
        .matches(password, stored)
}

/// Runs the classify command.
pub fn classify(stored: &str) -> ExitCode {
    println!("{}", describe(stored));
    ExitCode::SUCCESS
}

fn describe(stored: &str) -> String {
    let scheme = classify_scheme(stored);
    if needs_rehash(stored) {
        format!("{scheme} (legacy, rehash on next login)")
    } else {
        scheme.to_string()
    }
}
