//! External Memory Service contract: a best-effort memory snapshot is
//! delegated here on every confirmed exit. The real store lives outside
//! this crate; core only needs a narrow write-through.

use async_trait::async_trait;

#[async_trait]
pub trait MemorySink: Send + Sync {
    /// Best-effort: failures here must never affect session lifecycle.
    async fn snapshot(&self, session_name: &str, role: &str, tail: String);
}

pub struct NoopMemorySink;

#[async_trait]
impl MemorySink for NoopMemorySink {
    async fn snapshot(&self, _session_name: &str, _role: &str, _tail: String) {}
}
