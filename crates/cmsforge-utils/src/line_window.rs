//! Bounded line window for captured process output
//!
//! Keeps the most recent `max_lines` lines, evicting the oldest first. Used both
//! for the short live window shown while a step runs and for the longer tail
//! retained for error messages.

use std::collections::VecDeque;
use std::fmt;

/// Lines shown live under a running step.
pub const LIVE_WINDOW_LINES: usize = 5;

/// Lines retained for the error message of a failed subprocess.
pub const RETAINED_WINDOW_LINES: usize = 50;

/// A line buffer that never holds more than `max_lines` entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineWindow {
    lines: VecDeque<String>,
    max_lines: usize,
    total_lines_written: usize,
}

impl LineWindow {
    /// Create a new window holding at most `max_lines` lines
    #[must_use]
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_lines.min(256)),
            max_lines,
            total_lines_written: 0,
        }
    }

    /// Window sized for live display under a running step
    #[must_use]
    pub fn live() -> Self {
        Self::new(LIVE_WINDOW_LINES)
    }

    /// Window sized for the tail attached to subprocess failures
    #[must_use]
    pub fn retained() -> Self {
        Self::new(RETAINED_WINDOW_LINES)
    }

    /// Append a line, dropping the oldest line when the window is full.
    ///
    /// Trailing `\r` and `\n` are stripped so CRLF output renders cleanly.
    pub fn push(&mut self, line: impl Into<String>) {
        self.total_lines_written += 1;
        if self.max_lines == 0 {
            return;
        }

        let mut line = line.into();
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }

        if self.lines.len() >= self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub const fn max_lines(&self) -> usize {
        self.max_lines
    }

    /// Total number of lines pushed, including evicted ones
    #[must_use]
    pub const fn total_lines_written(&self) -> usize {
        self.total_lines_written
    }

    /// Snapshot of the retained lines, oldest first
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl fmt::Display for LineWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{line}")?;
        }
        Ok(())
    }
}
