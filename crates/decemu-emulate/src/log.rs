//! Execution traces and the human-readable output log.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Result of emulating one routine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Rendering of every executed statement, in execution order.
    pub statements: Vec<String>,
    /// Value stored by the last `return` that carried one.
    pub return_value: Option<u64>,
    /// Next-handler register at the end of the routine.
    pub next_handler: Option<u64>,
}

impl ExecutionTrace {
    /// Number of executed statements.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Find the first divergence point between two traces.
    pub fn find_divergence(&self, other: &ExecutionTrace) -> Option<usize> {
        for (i, (a, b)) in self.statements.iter().zip(other.statements.iter()).enumerate() {
            if a != b {
                return Some(i);
            }
        }
        if self.statements.len() != other.statements.len() {
            return Some(self.statements.len().min(other.statements.len()));
        }
        None
    }
}

/// Text log shared by the emulator and the call simulators.
///
/// The log only grows. [`OutputLog::flush_to`] rewrites its sink with the
/// whole content, and only when something was appended since the last
/// flush.
#[derive(Debug, Clone, Default)]
pub struct OutputLog {
    text: String,
    flushed: usize,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `line` followed by a newline.
    pub fn push_line(&mut self, line: impl AsRef<str>) {
        self.text.push_str(line.as_ref());
        self.text.push('\n');
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Returns true if content was appended since the last flush.
    pub fn has_unflushed(&self) -> bool {
        self.text.len() != self.flushed
    }

    /// Hand the whole log to `sink` if it grew since the last flush.
    ///
    /// Returns whether the sink was called.
    pub fn flush_with<F>(&mut self, sink: F) -> io::Result<bool>
    where
        F: FnOnce(&str) -> io::Result<()>,
    {
        if !self.has_unflushed() {
            return Ok(false);
        }
        sink(&self.text)?;
        self.flushed = self.text.len();
        Ok(true)
    }

    /// Rewrite `path` with the whole log if it grew since the last flush.
    pub fn flush_to(&mut self, path: &Path) -> io::Result<bool> {
        self.flush_with(|text| fs::write(path, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_only_when_grown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emu.log");
        let mut log = OutputLog::new();

        assert!(!log.flush_to(&path).unwrap());
        assert!(!path.exists());

        log.push_line("S: PUSH 1");
        assert!(log.flush_to(&path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "S: PUSH 1\n");

        // Edits to the sink survive a flush with nothing new.
        fs::write(&path, "edited").unwrap();
        assert!(!log.flush_to(&path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "edited");

        log.push_line("S: POP (1)");
        assert!(log.flush_to(&path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "S: PUSH 1\nS: POP (1)\n");
    }

    #[test]
    fn test_failed_flush_is_retried() {
        let mut log = OutputLog::new();
        log.push_line("x");
        let err = log.flush_with(|_| Err(io::Error::new(io::ErrorKind::Other, "full")));
        assert!(err.is_err());
        assert!(log.has_unflushed());
    }

    #[test]
    fn test_find_divergence() {
        let a = ExecutionTrace {
            statements: vec!["x = 1".into(), "return x".into()],
            ..Default::default()
        };
        let mut b = a.clone();
        assert_eq!(a.find_divergence(&b), None);
        b.statements[1] = "return 0".into();
        assert_eq!(a.find_divergence(&b), Some(1));
        b.statements.truncate(1);
        assert_eq!(a.find_divergence(&b), Some(1));
    }
}
