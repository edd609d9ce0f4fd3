//! Raw terminal history buffer: fixed-capacity, byte-oriented, used for
//! UI replay / `capturePane` / `captureTail`. Distinct from the Output
//! Monitor's rolling buffer — the monitor must never read from this
//! one, and this one is never consulted for exit-pattern matching.

use std::sync::Mutex;

const DEFAULT_CAP_BYTES: usize = 2 * 1024 * 1024;

pub struct CircularBuffer {
    data: Mutex<Vec<u8>>,
    cap: usize,
}

impl CircularBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAP_BYTES)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            cap,
        }
    }

    /// Append bytes; if over capacity, drop oldest.
    pub fn push(&self, bytes: &[u8]) {
        let mut g = self.data.lock().expect("buffer mutex");
        g.extend_from_slice(bytes);
        if g.len() > self.cap {
            let excess = g.len() - self.cap;
            g.drain(..excess);
        }
    }

    /// Return a copy of current buffer contents.
    pub fn dump(&self) -> Vec<u8> {
        self.data.lock().expect("buffer mutex").clone()
    }

    /// Return the last `lines` lines, decoded lossily, as one string.
    pub fn tail_lines(&self, lines: usize) -> String {
        let data = self.dump();
        let text = String::from_utf8_lossy(&data);
        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

impl Default for CircularBuffer {
    fn default() -> Self {
        Self::new()
    }
}
