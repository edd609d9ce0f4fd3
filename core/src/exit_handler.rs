//! Contract the Output Monitor uses to call back into whoever decides
//! restart-vs-inactive on a confirmed exit. Split into its own module
//! so the Monitor and the Supervisor each depend on this trait rather
//! than on each other directly — the Supervisor binds itself in via the
//! [`crate::resolver::LateBound`] the Monitor holds.

use async_trait::async_trait;

use crate::registry::RuntimeKind;

#[derive(Debug, Clone)]
pub struct ExitInfo {
    pub name: String,
    pub runtime_kind: RuntimeKind,
    pub role: String,
    pub team_id: Option<String>,
    pub member_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// A replacement session was created successfully; no Inactive
    /// status should be published for the old name.
    Restarted,
    /// No restart attempted, or restart failed; caller should publish
    /// `Inactive(runtime_exited)`.
    Inactive,
}

#[async_trait]
pub trait ExitHandler: Send + Sync {
    async fn on_exit_detected(&self, info: ExitInfo) -> ExitDecision;
}
