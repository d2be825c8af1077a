//! Property-based test generators using proptest.

use drillrep_storage::{BackendDescriptor, BackendKind};
use proptest::prelude::*;

/// Strategy for plausible passwords, including non-ASCII and `$`.
pub fn password_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::string::string_regex("[a-zA-Z0-9]{1,24}").expect("Invalid regex"),
        prop::string::string_regex("[a-zA-Z0-9!@#%^&*$ ]{1,24}").expect("Invalid regex"),
        "\\PC{1,16}",
    ]
}

/// Strategy for arbitrary strings, including empty ones.
pub fn any_text_strategy() -> impl Strategy<Value = String> {
    "\\PC{0,80}"
}

/// Strategy for random 10-character garbage that hashes to nothing.
pub fn garbage_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9]{10}").expect("Invalid regex")
}

/// Strategy for strings full of `$` separators that are not valid PBKDF2.
pub fn dollar_noise_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9.+/]{0,12}", 1..8).prop_map(|parts| parts.join("$"))
}

/// Strategy for strings with a bcrypt prefix and a truncated body.
///
/// The salt-and-digest part is shorter than the 53 characters bcrypt
/// requires, so none of these parse.
pub fn bcrypt_shaped_strategy() -> impl Strategy<Value = String> {
    (
        prop_oneof![Just("$2a$"), Just("$2b$"), Just("$2y$")],
        0u32..40,
        "[./A-Za-z0-9]{0,52}",
    )
        .prop_map(|(prefix, cost, rest)| format!("{prefix}{cost:02}${rest}"))
}

/// Strategy for PBKDF2 round counts small enough for fast tests.
pub fn pbkdf2_iterations_strategy() -> impl Strategy<Value = u32> {
    1u32..2_000
}

/// Strategy for backend candidate lists with colliding priorities.
pub fn candidates_strategy() -> impl Strategy<Value = Vec<BackendDescriptor>> {
    prop::collection::vec(
        (
            prop_oneof![
                Just(BackendKind::DirectSql),
                Just(BackendKind::RestGateway),
                Just(BackendKind::EmbeddedFile),
            ],
            -2i32..3,
        ),
        1..8,
    )
    .prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (kind, priority))| {
                BackendDescriptor::new(kind, format!("candidate-{i}"), priority)
            })
            .collect()
    })
}
