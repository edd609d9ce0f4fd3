//! Command Helper: higher-level verbs on a session — send text + Enter,
//! send control keys, clear the command line, capture the last N lines,
//! set an env var.

use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::registry::Registry;

#[derive(Clone)]
pub struct CommandHelper {
    registry: Registry,
    send_cr_delay: Duration,
}

/// Fixed key map for `send_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Escape,
    CtrlC,
    CtrlU,
    Tab,
    PageUp,
    PageDown,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
}

impl Key {
    fn bytes(self) -> &'static [u8] {
        match self {
            Key::Enter => b"\r",
            Key::Escape => b"\x1b",
            Key::CtrlC => b"\x03",
            Key::CtrlU => b"\x15",
            Key::Tab => b"\t",
            Key::PageUp => b"\x1b[5~",
            Key::PageDown => b"\x1b[6~",
            Key::ArrowUp => b"\x1b[A",
            Key::ArrowDown => b"\x1b[B",
            Key::ArrowLeft => b"\x1b[D",
            Key::ArrowRight => b"\x1b[C",
        }
    }
}

impl CommandHelper {
    pub fn new(registry: Registry, send_cr_delay: Duration) -> Self {
        Self {
            registry,
            send_cr_delay,
        }
    }

    /// Write `text` without a trailing newline, wait `send_cr_delay`,
    /// then write `\r`. Two-phase because some runtime REPLs coalesce a
    /// same-frame CR with the preceding text.
    pub async fn send_message(&self, name: &str, text: &str) -> Result<()> {
        let session = self
            .registry
            .get(name)
            .ok_or_else(|| CoreError::NotFound(name.to_string()))?;
        session.pty.write(text.as_bytes())?;
        tokio::time::sleep(self.send_cr_delay).await;
        session.pty.write(Key::Enter.bytes())?;
        Ok(())
    }

    pub fn send_key(&self, name: &str, key: Key) -> Result<()> {
        let session = self
            .registry
            .get(name)
            .ok_or_else(|| CoreError::NotFound(name.to_string()))?;
        session.pty.write(key.bytes())
    }

    pub fn send_literal(&self, name: &str, text: &str) -> Result<()> {
        let session = self
            .registry
            .get(name)
            .ok_or_else(|| CoreError::NotFound(name.to_string()))?;
        session.pty.write(text.as_bytes())
    }

    /// C-c then C-u then a short settle delay, to abort a partial input.
    pub async fn clear_command_line(&self, name: &str) -> Result<()> {
        self.send_key(name, Key::CtrlC)?;
        self.send_key(name, Key::CtrlU)?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    /// Up to the last `lines` lines of the session's terminal history.
    /// Does not consume the buffer.
    pub fn capture_pane(&self, name: &str, lines: usize) -> Result<String> {
        self.registry.capture_tail(name, lines)
    }

    /// `export K="V"\r`, escaping inner `"` and `\`.
    pub async fn set_env(&self, name: &str, key: &str, value: &str) -> Result<()> {
        if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') || key.is_empty() {
            return Err(CoreError::InvalidArgument(format!("bad env key: {key}")));
        }
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        let line = format!("export {key}=\"{escaped}\"");
        self.send_message(name, &line).await
    }
}

const DEFAULT_CAPTURE_LINES: usize = 100;
pub fn default_capture_lines() -> usize {
    DEFAULT_CAPTURE_LINES
}
