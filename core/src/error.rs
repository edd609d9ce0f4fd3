//! Error kinds for the Agent Session Runtime: `NotFound`,
//! `AlreadyExists`, `InvalidArgument`, `BackendSpawn`, `SessionClosed`,
//! `ReadyTimeout`, `PatternNotMatched`, `TooManyListeners`,
//! `StateCorrupt`, `PersistWrite`, `ExternalToolAbsent`. A watchdog
//! alert suppressed by its cooldown is not a failure of anything, so
//! it is dropped by [`crate::watchdog::Cooldowns`] before it ever
//! reaches this enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("backend spawn failed: {0}")]
    BackendSpawn(String),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("ready timeout after {0:?}")]
    ReadyTimeout(std::time::Duration),

    #[error("pattern not matched")]
    PatternNotMatched,

    #[error("too many listeners (max {max})")]
    TooManyListeners { max: usize },

    #[error("state corrupt: {0}")]
    StateCorrupt(String),

    #[error("persist write failed: {0}")]
    PersistWrite(#[from] std::io::Error),

    #[error("external tool absent: {0}")]
    ExternalToolAbsent(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
