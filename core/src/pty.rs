//! PTY Backend: spawn a child process attached to a new pseudo-terminal,
//! write/read its stream, resize, kill, and check liveness via the OS
//! rather than a cached flag.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use crate::error::{CoreError, Result};

pub type ListenerId = u64;
pub type DataListener = Box<dyn Fn(&[u8]) + Send + Sync>;
pub type ExitListener = Box<dyn Fn(Option<i32>) + Send + Sync>;

/// Options for spawning a PTY-backed process.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub cwd: PathBuf,
    pub shell: String,
    pub argv: Vec<String>,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

impl SpawnOptions {
    pub fn validate(&self, max_cols: u16, max_rows: u16) -> Result<()> {
        if !self.cwd.is_absolute() {
            return Err(CoreError::InvalidArgument(format!(
                "cwd must be absolute: {}",
                self.cwd.display()
            )));
        }
        validate_dimensions(self.cols, self.rows, max_cols, max_rows)
    }
}

pub fn validate_dimensions(cols: u16, rows: u16, max_cols: u16, max_rows: u16) -> Result<()> {
    if cols == 0 || rows == 0 {
        return Err(CoreError::InvalidArgument(
            "cols and rows must be positive".into(),
        ));
    }
    if cols > max_cols || rows > max_rows {
        return Err(CoreError::InvalidArgument(format!(
            "dimensions {cols}x{rows} exceed cap {max_cols}x{max_rows}"
        )));
    }
    Ok(())
}

struct Listeners<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, T)>>,
    cap: usize,
}

impl<T> Listeners<T> {
    fn new(cap: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
            cap,
        }
    }

    fn subscribe(&self, listener: T) -> Result<ListenerId> {
        let mut guard = self.entries.lock().expect("listeners mutex");
        if guard.len() >= self.cap {
            return Err(CoreError::TooManyListeners { max: self.cap });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        guard.push((id, listener));
        Ok(id)
    }

    fn unsubscribe(&self, id: ListenerId) {
        let mut guard = self.entries.lock().expect("listeners mutex");
        guard.retain(|(existing, _)| *existing != id);
    }

    fn clear(&self) {
        self.entries.lock().expect("listeners mutex").clear();
    }
}

/// A single PTY-backed child process.
pub struct PtyProcess {
    pid: u32,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    killed: Arc<AtomicBool>,
    data_listeners: Arc<Listeners<DataListener>>,
    exit_listeners: Arc<Listeners<ExitListener>>,
}

impl PtyProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Spawn `opts.argv` inside a new pseudo-terminal.
    pub fn spawn(opts: &SpawnOptions, max_data: usize, max_exit: usize) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: opts.rows,
                cols: opts.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| CoreError::BackendSpawn(e.to_string()))?;

        let mut cmd = match opts.argv.split_first() {
            Some((program, rest)) => {
                let mut c = CommandBuilder::new(program);
                for arg in rest {
                    c.arg(arg);
                }
                c
            }
            None => CommandBuilder::new(&opts.shell),
        };
        cmd.cwd(&opts.cwd);
        for (k, v) in &opts.env {
            cmd.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| CoreError::BackendSpawn(e.to_string()))?;
        let pid = child.process_id().ok_or_else(|| {
            CoreError::BackendSpawn("spawned child has no pid".to_string())
        })?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CoreError::BackendSpawn(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| CoreError::BackendSpawn(e.to_string()))?;

        let process = Self {
            pid,
            writer: Arc::new(Mutex::new(writer)),
            master: Arc::new(Mutex::new(pair.master)),
            child: Arc::new(Mutex::new(child)),
            killed: Arc::new(AtomicBool::new(false)),
            data_listeners: Arc::new(Listeners::new(max_data)),
            exit_listeners: Arc::new(Listeners::new(max_exit)),
        };

        process.spawn_reader_thread(reader);
        process.spawn_exit_poll_thread();
        Ok(process)
    }

    fn spawn_reader_thread(&self, mut reader: Box<dyn Read + Send>) {
        let listeners = Arc::clone(&self.data_listeners);
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => invoke_data(&listeners, &buf[..n]),
                    Err(_) => break,
                }
            }
        });
    }

    fn spawn_exit_poll_thread(&self) {
        let child = Arc::clone(&self.child);
        let listeners = Arc::clone(&self.exit_listeners);
        std::thread::spawn(move || loop {
            let exit_code = {
                let mut guard = match child.lock() {
                    Ok(g) => g,
                    Err(_) => return,
                };
                match guard.try_wait() {
                    Ok(None) => None,
                    Ok(Some(status)) => Some(status.exit_code() as i32),
                    Err(_) => return,
                }
            };
            if let Some(code) = exit_code {
                invoke_exit(&listeners, Some(code));
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(250));
        });
    }

    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(CoreError::SessionClosed(self.pid.to_string()));
        }
        let mut guard = self.writer.lock().expect("writer mutex");
        guard
            .write_all(bytes)
            .map_err(|e| CoreError::PersistWrite(e))
    }

    pub fn resize(&self, cols: u16, rows: u16, max_cols: u16, max_rows: u16) -> Result<()> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(CoreError::SessionClosed(self.pid.to_string()));
        }
        validate_dimensions(cols, rows, max_cols, max_rows)?;
        let guard = self.master.lock().expect("master mutex");
        guard
            .resize(PtySize {
                cols,
                rows,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| CoreError::InvalidArgument(e.to_string()))
    }

    pub fn on_data(&self, listener: DataListener) -> Result<ListenerId> {
        self.data_listeners.subscribe(listener)
    }

    pub fn unsubscribe_data(&self, id: ListenerId) {
        self.data_listeners.unsubscribe(id);
    }

    pub fn on_exit(&self, listener: ExitListener) -> Result<ListenerId> {
        self.exit_listeners.subscribe(listener)
    }

    pub fn unsubscribe_exit(&self, id: ListenerId) {
        self.exit_listeners.unsubscribe(id);
    }

    /// Kill the process (default SIGTERM on unix). Clears all listener
    /// sets and marks the process closed so further write/resize fail.
    pub fn kill(&self) -> Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        let mut guard = self.child.lock().expect("child mutex");
        let result = guard.kill();
        self.data_listeners.clear();
        self.exit_listeners.clear();
        result.map_err(|e| CoreError::PersistWrite(e))
    }

    /// OS-level liveness check — never trusts a cached flag.
    pub fn is_alive(&self) -> bool {
        is_child_alive(self.pid)
    }
}

fn invoke_data(listeners: &Listeners<DataListener>, bytes: &[u8]) {
    let snapshot: Vec<ListenerId> = {
        let guard = listeners.entries.lock().expect("listeners mutex");
        guard.iter().map(|(id, _)| *id).collect()
    };
    for id in snapshot {
        let guard = listeners.entries.lock().expect("listeners mutex");
        if let Some((_, cb)) = guard.iter().find(|(existing, _)| *existing == id) {
            cb(bytes);
        }
    }
}

fn invoke_exit(listeners: &Listeners<ExitListener>, code: Option<i32>) {
    let snapshot: Vec<ListenerId> = {
        let guard = listeners.entries.lock().expect("listeners mutex");
        guard.iter().map(|(id, _)| *id).collect()
    };
    for id in snapshot {
        let guard = listeners.entries.lock().expect("listeners mutex");
        if let Some((_, cb)) = guard.iter().find(|(existing, _)| *existing == id) {
            cb(code);
        }
    }
}

#[cfg(unix)]
pub fn is_child_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn is_child_alive(_pid: u32) -> bool {
    // Best-effort: without a portable process lookup, assume alive;
    // callers fall back to the process-liveness poll in the monitor.
    true
}

/// Send `signal` to the process group (`-pid`) so subprocesses spawned
/// by an in-PTY runtime (LSPs, language runtimes) are caught too. ESRCH
/// ("no such process") is treated as benign — the group is already
/// gone.
#[cfg(unix)]
pub fn kill_process_group(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(-(pid as i32)), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(CoreError::BackendSpawn(e.to_string())),
    }
}

#[cfg(not(unix))]
pub fn kill_process_group(_pid: u32, _signal: ()) -> Result<()> {
    Ok(())
}

/// Send `signal` to the single pid (not its group). Used for the
/// initial SIGTERM of the kill-escalation sequence.
#[cfg(unix)]
pub fn signal_process(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(CoreError::BackendSpawn(e.to_string())),
    }
}

#[cfg(not(unix))]
pub fn signal_process(_pid: u32, _signal: ()) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_rejects_zero_dimensions() {
        assert!(validate_dimensions(0, 24, 500, 200).is_err());
        assert!(validate_dimensions(80, 0, 500, 200).is_err());
    }

    #[test]
    fn resize_rejects_over_cap() {
        assert!(validate_dimensions(1000, 24, 500, 200).is_err());
    }

    #[test]
    fn resize_accepts_in_range() {
        assert!(validate_dimensions(80, 24, 500, 200).is_ok());
    }

    #[test]
    fn spawn_opts_require_absolute_cwd() {
        let opts = SpawnOptions {
            cwd: PathBuf::from("relative/path"),
            shell: "/bin/bash".into(),
            argv: vec!["/bin/echo".into(), "hi".into()],
            env: HashMap::new(),
            cols: 80,
            rows: 24,
        };
        assert!(opts.validate(500, 200).is_err());
    }

    #[test]
    fn spawn_write_read_and_kill_roundtrip() {
        let dir = std::env::temp_dir();
        let opts = SpawnOptions {
            cwd: dir,
            shell: "/bin/sh".into(),
            argv: vec!["/bin/cat".into()],
            env: HashMap::new(),
            cols: 80,
            rows: 24,
        };
        let proc = PtyProcess::spawn(&opts, 8, 8).expect("spawn cat");
        assert!(proc.is_alive());
        proc.write(b"hello\n").unwrap();
        proc.kill().unwrap();
        assert!(proc.write(b"more").is_err());
    }

    #[test]
    fn listener_cap_is_enforced() {
        let dir = std::env::temp_dir();
        let opts = SpawnOptions {
            cwd: dir,
            shell: "/bin/sh".into(),
            argv: vec!["/bin/cat".into()],
            env: HashMap::new(),
            cols: 80,
            rows: 24,
        };
        let proc = PtyProcess::spawn(&opts, 1, 1).expect("spawn cat");
        proc.on_data(Box::new(|_| {})).expect("first listener ok");
        let err = proc.on_data(Box::new(|_| {}));
        assert!(matches!(err, Err(CoreError::TooManyListeners { .. })));
        proc.kill().unwrap();
    }
}
