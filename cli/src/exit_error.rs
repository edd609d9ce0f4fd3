//! Typed exit codes: subcommands return one of these instead of calling
//! `std::process::exit` directly, so `main` has a single place that
//! maps failures to a process exit code.

use std::fmt;

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn config(message: impl Into<String>) -> Self {
        Self { code: 2, message: message.into() }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self { code: 3, message: message.into() }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExitError {}

impl From<agentctl_core::CoreError> for ExitError {
    fn from(err: agentctl_core::CoreError) -> Self {
        Self::backend(err.to_string())
    }
}

impl From<anyhow::Error> for ExitError {
    fn from(err: anyhow::Error) -> Self {
        Self::backend(err.to_string())
    }
}
