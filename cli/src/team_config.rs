//! Parses the `--sessions` TOML file `serve` uses to create its
//! initial set of sessions. Kept in the `cli` crate, not core, since
//! it is purely a convenience for the binary entry point.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use agentctl_core::registry::RuntimeKind;
use agentctl_core::supervisor::SessionOptions;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct SessionsFile {
    #[serde(default)]
    session: Vec<SessionDef>,
}

#[derive(Debug, Deserialize)]
struct SessionDef {
    name: String,
    cwd: PathBuf,
    #[serde(default = "default_runtime")]
    runtime: RuntimeKind,
    #[serde(default = "default_role")]
    role: String,
    team_id: Option<String>,
    member_id: Option<String>,
    #[serde(default = "default_shell")]
    shell: String,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default = "default_cols")]
    cols: u16,
    #[serde(default = "default_rows")]
    rows: u16,
    #[serde(default)]
    runtime_flags: Vec<String>,
}

fn default_runtime() -> RuntimeKind {
    RuntimeKind::Generic
}

fn default_role() -> String {
    "developer".to_string()
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}

fn default_cols() -> u16 {
    120
}

fn default_rows() -> u16 {
    40
}

pub fn load(path: &Path) -> Result<Vec<SessionOptions>, String> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let parsed: SessionsFile =
        toml::from_str(&data).map_err(|e| format!("cannot parse {}: {e}", path.display()))?;
    Ok(parsed
        .session
        .into_iter()
        .map(|def| SessionOptions {
            name: def.name,
            cwd: def.cwd,
            runtime_kind: def.runtime,
            role: def.role,
            team_id: def.team_id,
            member_id: def.member_id,
            shell: def.shell,
            env: def.env,
            cols: def.cols,
            rows: def.rows,
            runtime_flags: def.runtime_flags,
        })
        .collect())
}
