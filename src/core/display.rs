//! Host display boundary.
//!
//! The terminal grid is projected onto a line-oriented text buffer owned by
//! the host. Line numbers are 1-based, matching screen coordinates.

use std::ops::{Deref, DerefMut};

/// A line-oriented buffer the screen is flushed into
pub trait DisplayBuffer {
    /// Replace the visible text of line `row`
    fn set_line(&mut self, row: usize, text: &str);
    /// Insert an empty line so that it becomes line `row`; `line_count() + 1` appends
    fn insert_line(&mut self, row: usize);
    fn delete_line(&mut self, row: usize);
    fn line_count(&self) -> usize;
    fn set_read_only(&mut self, read_only: bool);
}

/// Cursor placement in the host view showing a terminal's buffer
pub trait Viewport {
    fn place_cursor(&mut self, row: usize, col: usize);
}

/// Makes a buffer writable for the guard's lifetime
pub struct WritableGuard<'a, B: DisplayBuffer + ?Sized> {
    buffer: &'a mut B,
}

impl<'a, B: DisplayBuffer + ?Sized> WritableGuard<'a, B> {
    pub fn new(buffer: &'a mut B) -> Self {
        buffer.set_read_only(false);
        Self { buffer }
    }
}

impl<B: DisplayBuffer + ?Sized> Deref for WritableGuard<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.buffer
    }
}

impl<B: DisplayBuffer + ?Sized> DerefMut for WritableGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.buffer
    }
}

impl<B: DisplayBuffer + ?Sized> Drop for WritableGuard<'_, B> {
    fn drop(&mut self) {
        self.buffer.set_read_only(true);
    }
}

/// In-memory display buffer
#[derive(Debug)]
pub struct MemoryBuffer {
    lines: Vec<String>,
    read_only: bool,
    /// Number of `set_line` calls, for tracking flush work
    pub writes: usize,
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            read_only: true,
            writes: 0,
        }
    }

    /// Line `row`, 1-based
    pub fn line(&self, row: usize) -> Option<&str> {
        self.lines.get(row.checked_sub(1)?).map(String::as_str)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl DisplayBuffer for MemoryBuffer {
    fn set_line(&mut self, row: usize, text: &str) {
        debug_assert!(!self.read_only, "write to read-only buffer");
        if let Some(line) = row.checked_sub(1).and_then(|i| self.lines.get_mut(i)) {
            line.clear();
            line.push_str(text);
            self.writes += 1;
        }
    }

    fn insert_line(&mut self, row: usize) {
        let idx = row.saturating_sub(1).min(self.lines.len());
        self.lines.insert(idx, String::new());
    }

    fn delete_line(&mut self, row: usize) {
        if let Some(idx) = row.checked_sub(1).filter(|&i| i < self.lines.len()) {
            self.lines.remove(idx);
        }
    }

    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_buffer_edits() {
        let mut buf = MemoryBuffer::new();
        buf.set_read_only(false);
        buf.insert_line(1);
        buf.insert_line(2);
        buf.set_line(1, "a");
        buf.set_line(2, "b");
        buf.insert_line(1);
        assert_eq!(buf.lines(), &["", "a", "b"]);
        buf.delete_line(3);
        assert_eq!(buf.lines(), &["", "a"]);
        buf.delete_line(9);
        assert_eq!(buf.line_count(), 2);
    }

    #[test]
    fn test_guard_restores_read_only() {
        let mut buf = MemoryBuffer::new();
        {
            let mut guard = WritableGuard::new(&mut buf);
            guard.insert_line(1);
            guard.set_line(1, "x");
        }
        assert!(buf.is_read_only());
        assert_eq!(buf.line(1), Some("x"));
    }
}
