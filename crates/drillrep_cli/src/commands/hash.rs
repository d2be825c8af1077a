//! Hash command implementation.

use super::{CommandError, CommandResult};
use clap::ValueEnum;
use drillrep_auth::{
    hash_password_with_cost, hash_pbkdf2, DEFAULT_BCRYPT_COST, DEFAULT_PBKDF2_ITERATIONS,
};
use std::io::BufRead;
use std::process::ExitCode;

/// Schemes the hash command can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HashScheme {
    /// bcrypt, the scheme for new credentials.
    Bcrypt,
    /// passlib-style PBKDF2-HMAC-SHA256.
    Pbkdf2,
}

/// Runs the hash command.
pub fn run(
    password: Option<String>,
    scheme: HashScheme,
    cost: Option<u32>,
    rounds: Option<u32>,
) -> CommandResult<ExitCode> {
    let password = match password {
        Some(password) => password,
        None => read_password(std::io::stdin().lock())?,
    };

    println!("{}", hash(&password, scheme, cost, rounds)?);
    Ok(ExitCode::SUCCESS)
}

fn hash(
    password: &str,
    scheme: HashScheme,
    cost: Option<u32>,
    rounds: Option<u32>,
) -> CommandResult<String> {
    let stored = match scheme {
        HashScheme::Bcrypt => {
            hash_password_with_cost(password, cost.unwrap_or(DEFAULT_BCRYPT_COST))?
        }
        HashScheme::Pbkdf2 => {
            hash_pbkdf2(password, rounds.unwrap_or(DEFAULT_PBKDF2_ITERATIONS))?
        }
    };
    Ok(stored)
}

fn read_password(mut input: impl BufRead) -> CommandResult<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err(CommandError::Usage("no password given".into()));
    }
    Ok(password.to_string())
}
