//! Per-invocation capture of interpreter output.
//!
//! The interpreter's `print`/`io.write` are rebound once at setup to
//! write into a [`LogSlot`]. The slot holds the log callback of the
//! invocation that is currently executing; because invocations are
//! serialized by the manager's mutex, installing the callback at entry
//! and clearing it at exit is race-free.

use parking_lot::Mutex;
use std::sync::Arc;
use tinpot_protocol::LogLevel;

/// Callback receiving one captured log line.
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Swappable capture target shared between the Lua globals and the
/// manager.
///
/// Output is line-buffered: `io.write` fragments accumulate until a
/// newline arrives, `print` appends a trailing newline itself.
/// Whitespace-only lines are dropped; each surviving line becomes one
/// callback invocation.
#[derive(Default)]
pub struct LogSlot {
    callback: Mutex<Option<LogCallback>>,
    partial: Mutex<String>,
}

impl LogSlot {
    /// Creates an empty slot. Output captured while no callback is
    /// installed is discarded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the callback for the invocation about to run.
    pub fn install(&self, callback: LogCallback) {
        *self.callback.lock() = Some(callback);
        self.partial.lock().clear();
    }

    /// Flushes any buffered partial line and removes the callback.
    pub fn clear(&self) {
        self.flush_partial();
        *self.callback.lock() = None;
    }

    /// Emits a single message at `level` through the installed
    /// callback, if any.
    pub fn emit(&self, level: LogLevel, message: &str) {
        if let Some(callback) = self.callback.lock().as_ref() {
            callback(level, message);
        }
    }

    /// Splits `text` on newlines and emits each non-blank line.
    pub fn emit_lines(&self, level: LogLevel, text: &str) {
        for line in text.lines() {
            if !line.trim().is_empty() {
                self.emit(level, line);
            }
        }
    }

    /// Appends raw interpreter output, emitting every completed line.
    pub fn write(&self, text: &str) {
        let mut completed = Vec::new();
        {
            let mut partial = self.partial.lock();
            partial.push_str(text);
            while let Some(pos) = partial.find('\n') {
                let line: String = partial.drain(..=pos).collect();
                completed.push(line);
            }
        }
        for line in completed {
            let line = line.trim_end_matches('\n');
            if !line.trim().is_empty() {
                self.emit(LogLevel::Info, line);
            }
        }
    }

    fn flush_partial(&self) {
        let remainder = std::mem::take(&mut *self.partial.lock());
        if !remainder.trim().is_empty() {
            self.emit(LogLevel::Info, &remainder);
        }
    }
}
