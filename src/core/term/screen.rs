//! Screen grid with scrollback.
//!
//! A `Screen` owns `scrollback + height` lines. The last `height` lines are
//! the visible rows; rows and columns are 1-based throughout. Structural
//! changes (scrolling, line insertion/deletion, resizing) are recorded as
//! [`LineEdit`]s so they can be replayed onto a line-oriented display buffer
//! before the dirty lines are rewritten.

use std::collections::VecDeque;

use super::cell::{Cell, CellAttrs, Line};

/// A structural change to the line sequence, in 1-based absolute line numbers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineEdit {
    Insert(usize),
    Delete(usize),
}

/// Saved cursor state
#[derive(Clone, Copy, Debug)]
pub struct SavedCursor {
    pub row: usize,
    pub col: usize,
    pub attrs: CellAttrs,
}

pub struct Screen {
    lines: VecDeque<Line>,
    width: usize,
    height: usize,
    scrollback: usize,
    /// Widest line width ever seen; lines are never narrowed
    line_width: usize,
    row: usize,
    col: usize,
    saved: Option<SavedCursor>,
    /// Scroll region bounds; 0 means unset
    scroll_top: usize,
    scroll_bottom: usize,
    edits: Vec<LineEdit>,
}

impl Screen {
    pub fn new(width: usize, height: usize, scrollback: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let lines = (0..scrollback + height)
            .map(|_| Line::new(width, CellAttrs::default()))
            .collect();

        Self {
            lines,
            width,
            height,
            scrollback,
            line_width: width,
            row: 1,
            col: 1,
            saved: None,
            scroll_top: 0,
            scroll_bottom: 0,
            edits: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn scrollback(&self) -> usize {
        self.scrollback
    }

    /// Total number of lines, scrollback included
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    /// Cursor row as a 1-based line number counting scrollback
    pub fn absolute_row(&self) -> usize {
        self.scrollback + self.row
    }

    pub fn set_cursor(&mut self, row: usize, col: usize) {
        self.row = row.clamp(1, self.height);
        self.col = col.clamp(1, self.width);
    }

    pub fn move_cursor(&mut self, rows: i64, cols: i64) {
        let row = (self.row as i64).saturating_add(rows).max(1) as usize;
        let col = (self.col as i64).saturating_add(cols).max(1) as usize;
        self.set_cursor(row, col);
    }

    pub fn save_cursor(&mut self, attrs: CellAttrs) {
        self.saved = Some(SavedCursor {
            row: self.row,
            col: self.col,
            attrs,
        });
    }

    /// Restore and forget the saved cursor, returning its attributes
    pub fn restore_cursor(&mut self) -> Option<CellAttrs> {
        let saved = self.saved.take()?;
        self.set_cursor(saved.row, saved.col);
        Some(saved.attrs)
    }

    pub fn set_scroll(&mut self, top: usize, bottom: usize) {
        self.scroll_top = top.min(self.height);
        self.scroll_bottom = bottom.min(self.height);
    }

    pub fn has_scroll_region(&self) -> bool {
        self.scroll_top != 0 || self.scroll_bottom != 0
    }

    /// Top of the scroll region, resolved
    pub fn sctop(&self) -> usize {
        if self.scroll_top == 0 {
            1
        } else {
            self.scroll_top
        }
    }

    /// Bottom of the scroll region, resolved
    pub fn scbottom(&self) -> usize {
        if self.scroll_bottom == 0 {
            self.height
        } else {
            self.scroll_bottom
        }
    }

    /// Visible row, 1-based
    pub fn line(&self, row: usize) -> Option<&Line> {
        let idx = (self.scrollback + row).checked_sub(1)?;
        if row == 0 || row > self.height {
            return None;
        }
        self.lines.get(idx)
    }

    /// Any line, 1-based absolute
    pub fn absolute_line(&self, line: usize) -> Option<&Line> {
        self.lines.get(line.checked_sub(1)?)
    }

    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.lines.iter()
    }

    fn visible_mut(&mut self, row: usize) -> Option<&mut Line> {
        if row == 0 || row > self.height {
            return None;
        }
        self.lines.get_mut(self.scrollback + row - 1)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.line(row)?.cells.get(col.checked_sub(1)?)
    }

    pub fn set(&mut self, row: usize, col: usize, cell: Cell) {
        if col == 0 || col > self.width {
            return;
        }
        if let Some(line) = self.visible_mut(row) {
            line.cells[col - 1] = cell;
            line.dirty = true;
        }
    }

    /// Append a zero-width glyph onto the cell at (row, col)
    pub fn append(&mut self, row: usize, col: usize, ch: char) {
        if col == 0 || col > self.width {
            return;
        }
        if let Some(line) = self.visible_mut(row) {
            line.cells[col - 1].grapheme.push(ch);
            line.dirty = true;
        }
    }

    pub fn erase(&mut self, row: usize, col: usize, attrs: CellAttrs) {
        self.set(row, col, Cell::blank(attrs));
    }

    pub fn insert_cell(&mut self, row: usize, col: usize, attrs: CellAttrs) {
        let width = self.width;
        if col == 0 || col > width {
            return;
        }
        if let Some(line) = self.visible_mut(row) {
            // Shift only within the visible width so wider storage stays put
            line.cells[col - 1..width].rotate_right(1);
            line.cells[col - 1] = Cell::blank(attrs);
            line.dirty = true;
        }
    }

    pub fn delete_cell(&mut self, row: usize, col: usize, attrs: CellAttrs) {
        let width = self.width;
        if col == 0 || col > width {
            return;
        }
        if let Some(line) = self.visible_mut(row) {
            line.cells[col - 1..width].rotate_left(1);
            line.cells[width - 1] = Cell::blank(attrs);
            line.dirty = true;
        }
    }

    pub fn clear_row(&mut self, row: usize, attrs: CellAttrs) {
        if let Some(line) = self.visible_mut(row) {
            line.clear(attrs);
        }
    }

    pub fn clear_page(&mut self, attrs: CellAttrs) {
        for row in 1..=self.height {
            self.clear_row(row, attrs);
        }
    }

    /// Mark every line, scrollback included, for rewriting
    pub fn make_dirty(&mut self) {
        for line in &mut self.lines {
            line.dirty = true;
        }
    }

    fn dirty_region(&mut self) {
        let base = self.scrollback;
        for row in self.sctop()..=self.scbottom() {
            if let Some(line) = self.lines.get_mut(base + row - 1) {
                line.dirty = true;
            }
        }
    }

    /// Remove line `del` and insert a blank at `new`, both 1-based absolute
    fn shift_lines(&mut self, del: usize, new: usize, attrs: CellAttrs) {
        if del == 0 || del > self.lines.len() {
            return;
        }
        self.lines.remove(del - 1);
        let blank = Line::new(self.line_width, attrs);
        if new > self.lines.len() {
            self.lines.push_back(blank);
        } else {
            self.lines.insert(new.max(1) - 1, blank);
        }
        self.edits.push(LineEdit::Delete(del));
        self.edits.push(LineEdit::Insert(new.max(1)));
    }

    /// Scroll the region up one line. Without a region the top row moves into
    /// the scrollback and the oldest scrollback line is dropped.
    pub fn scroll_up(&mut self, attrs: CellAttrs) {
        let del = if self.scroll_top != 0 {
            self.scrollback + self.scroll_top
        } else {
            1
        };
        let new = self.scrollback + self.scbottom();
        self.shift_lines(del, new, attrs);
        self.dirty_region();
    }

    pub fn scroll_down(&mut self, attrs: CellAttrs) {
        let del = self.scrollback + self.scbottom();
        let new = self.scrollback + self.sctop();
        self.shift_lines(del, new, attrs);
        self.dirty_region();
    }

    /// Insert a blank line at `row`, pushing the rest of the region down
    pub fn insert_line(&mut self, row: usize, attrs: CellAttrs) {
        if row < self.sctop() || row > self.scbottom() {
            return;
        }
        let del = self.scrollback + self.scbottom();
        let new = self.scrollback + row;
        self.shift_lines(del, new, attrs);
        self.dirty_region();
    }

    /// Delete the line at `row`, pulling the rest of the region up
    pub fn delete_line(&mut self, row: usize, attrs: CellAttrs) {
        if row < self.sctop() || row > self.scbottom() {
            return;
        }
        let del = self.scrollback + row;
        let new = self.scrollback + self.scbottom();
        self.shift_lines(del, new, attrs);
        if self.has_scroll_region() {
            self.dirty_region();
        }
    }

    /// Resize to `width` x `height`.
    ///
    /// Lines are added at the tail. When shrinking, the tail is dropped if its
    /// last line is blank, otherwise the head goes so the visible rows keep
    /// their content.
    pub fn set_dimensions(&mut self, width: usize, height: usize, attrs: CellAttrs) {
        let width = width.max(1);
        let height = height.max(1);
        let max_width = self
            .lines
            .iter()
            .map(Line::width)
            .fold(width.max(self.line_width), usize::max);
        let target = self.scrollback + height;

        while self.lines.len() < target {
            self.lines.push_back(Line::new(max_width, attrs));
            self.edits.push(LineEdit::Insert(self.lines.len()));
        }
        while self.lines.len() > target {
            let tail_blank = self
                .lines
                .back()
                .and_then(|l| l.cells.first())
                .map_or(true, Cell::is_empty);
            if tail_blank {
                self.edits.push(LineEdit::Delete(self.lines.len()));
                self.lines.pop_back();
            } else {
                self.edits.push(LineEdit::Delete(1));
                self.lines.pop_front();
            }
        }

        if max_width > self.line_width {
            for line in &mut self.lines {
                line.widen(max_width);
            }
            self.line_width = max_width;
        }

        self.width = width;
        self.height = height;
        self.scroll_top = self.scroll_top.min(height);
        self.scroll_bottom = self.scroll_bottom.min(height);
        self.row = self.row.clamp(1, height);
        self.col = self.col.clamp(1, width);

        let first = self.scrollback.saturating_sub(height).max(1);
        for line in self.lines.iter_mut().skip(first - 1) {
            line.dirty = true;
        }
    }

    /// Take the structural edits recorded since the last call
    pub fn take_edits(&mut self) -> Vec<LineEdit> {
        std::mem::take(&mut self.edits)
    }

    pub fn prepend_edits(&mut self, mut edits: Vec<LineEdit>) {
        edits.append(&mut self.edits);
        self.edits = edits;
    }

    pub fn discard_edits(&mut self) {
        self.edits.clear();
    }

    /// Lines needing a rewrite, as (1-based line number, line)
    pub fn dirty_lines_mut(&mut self) -> impl Iterator<Item = (usize, &mut Line)> {
        self.lines
            .iter_mut()
            .enumerate()
            .filter(|(_, l)| l.dirty)
            .map(|(i, l)| (i + 1, l))
    }

    /// Text of a visible row, as it would be flushed
    pub fn row_text(&self, row: usize) -> String {
        self.line(row).map(Line::text).unwrap_or_default()
    }
}
