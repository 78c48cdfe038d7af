//! Terminal state management
//!
//! Holds the main and alternate screens, the current SGR attributes and the
//! mode flags the decoder and dispatcher act on.

use tracing::debug;
use unicode_width::UnicodeWidthChar;

use super::cell::{Cell, CellAttrs, Line};
use super::screen::{LineEdit, Screen};
use crate::core::display::{DisplayBuffer, WritableGuard};

pub const DEFAULT_WIDTH: usize = 80;
pub const DEFAULT_HEIGHT: usize = 24;
pub const DEFAULT_TAB_WIDTH: usize = 8;

/// Terminal modes
#[derive(Clone, Debug)]
pub struct TerminalModes {
    /// Application keypad/cursor keys (DECCKM)
    pub app_keys: bool,
    pub auto_wrap: bool,
    /// The last write filled the final column; wrap before the next one
    pub wrap_next: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            app_keys: false,
            auto_wrap: true,
            wrap_next: false,
        }
    }
}

/// Terminal state holding all screen data
pub struct TerminalState {
    main_screen: Screen,
    alt_screen: Screen,
    using_alternate: bool,
    pub current_attrs: CellAttrs,
    pub modes: TerminalModes,
    pub title: String,
    tab_width: usize,
}

impl TerminalState {
    pub fn new(width: usize, height: usize, scrollback: usize) -> Self {
        Self {
            main_screen: Screen::new(width, height, scrollback),
            alt_screen: Screen::new(width, height, scrollback),
            using_alternate: false,
            current_attrs: CellAttrs::default(),
            modes: TerminalModes::default(),
            title: String::new(),
            tab_width: DEFAULT_TAB_WIDTH,
        }
    }

    pub fn with_tab_width(mut self, tab_width: usize) -> Self {
        self.tab_width = tab_width.max(1);
        self
    }

    pub fn screen(&self) -> &Screen {
        if self.using_alternate {
            &self.alt_screen
        } else {
            &self.main_screen
        }
    }

    pub fn screen_mut(&mut self) -> &mut Screen {
        if self.using_alternate {
            &mut self.alt_screen
        } else {
            &mut self.main_screen
        }
    }

    pub fn is_alternate(&self) -> bool {
        self.using_alternate
    }

    pub fn width(&self) -> usize {
        self.screen().width()
    }

    pub fn height(&self) -> usize {
        self.screen().height()
    }

    pub fn row(&self) -> usize {
        self.screen().row()
    }

    pub fn col(&self) -> usize {
        self.screen().col()
    }

    /// Cursor row counting the scrollback lines above the screen
    pub fn absolute_row(&self) -> usize {
        self.screen().absolute_row()
    }

    pub fn set_cursor(&mut self, row: usize, col: usize) {
        self.modes.wrap_next = false;
        self.screen_mut().set_cursor(row, col);
    }

    pub fn move_cursor(&mut self, rows: i64, cols: i64) {
        self.modes.wrap_next = false;
        self.screen_mut().move_cursor(rows, cols);
    }

    pub fn carriage_return(&mut self) {
        let row = self.row();
        self.set_cursor(row, 1);
    }

    pub fn backspace(&mut self) {
        self.move_cursor(0, -1);
    }

    /// Move down a row, scrolling the region when on its bottom line
    pub fn linefeed(&mut self) {
        if self.row() == self.screen().scbottom() {
            self.modes.wrap_next = false;
            let attrs = self.current_attrs;
            self.screen_mut().scroll_up(attrs);
        } else {
            self.move_cursor(1, 0);
        }
    }

    /// Move up a row, scrolling the region when on its top line
    pub fn reverse_linefeed(&mut self) {
        if self.row() == self.screen().sctop() {
            self.modes.wrap_next = false;
            let attrs = self.current_attrs;
            self.screen_mut().scroll_down(attrs);
        } else {
            self.move_cursor(-1, 0);
        }
    }

    pub fn newline(&mut self) {
        self.linefeed();
        self.carriage_return();
    }

    /// Write spaces up to the next tab stop, stopping at the right margin
    pub fn tab(&mut self) {
        let attrs = self.current_attrs;
        loop {
            let (row, col) = (self.row(), self.col());
            if col == self.width() {
                break;
            }
            let mut space = Cell::blank(attrs);
            space.grapheme.push(' ');
            self.screen_mut().set(row, col, space);
            self.move_cursor(0, 1);
            if (self.col() - 1) % self.tab_width == 0 {
                break;
            }
        }
    }

    /// Put a character at the current cursor position
    pub fn put_char(&mut self, ch: char) {
        let width = ch.width().unwrap_or(0);

        if width == 0 {
            self.append_to_previous_cell(ch);
            return;
        }

        if self.modes.wrap_next {
            self.modes.wrap_next = false;
            if self.col() == self.width() {
                self.wrap_line();
            }
        }

        let screen_width = self.width();
        // A wide glyph never straddles the margin
        if width == 2 && self.col() == screen_width && screen_width > 1 && self.modes.auto_wrap {
            self.wrap_line();
        }

        let (row, col) = (self.row(), self.col());
        self.handle_wide_char_overwrite(row, col);

        let attrs = self.current_attrs;
        let screen = self.screen_mut();
        screen.set(
            row,
            col,
            Cell {
                grapheme: ch.to_string(),
                width: width as u8,
                attrs,
            },
        );
        if width == 2 && col < screen_width {
            screen.set(row, col + 1, Cell::continuation(attrs));
        }

        if col + width > screen_width && self.modes.auto_wrap {
            self.screen_mut().set_cursor(row, screen_width);
            self.modes.wrap_next = true;
        } else {
            self.screen_mut().move_cursor(0, width as i64);
        }
    }

    fn wrap_line(&mut self) {
        self.linefeed();
        self.carriage_return();
    }

    fn append_to_previous_cell(&mut self, ch: char) {
        let (row, col) = (self.row(), self.col());
        let mut target = if self.modes.wrap_next { col } else { col - 1 };
        if target == 0 {
            return;
        }
        if self
            .screen()
            .cell(row, target)
            .is_some_and(Cell::is_continuation)
        {
            target -= 1;
        }
        if target >= 1 {
            self.screen_mut().append(row, target, ch);
        }
    }

    fn handle_wide_char_overwrite(&mut self, row: usize, col: usize) {
        let attrs = self.current_attrs;
        let width = self.width();

        // Overwriting the right half of a wide char
        if col > 1 && self.screen().cell(row, col).is_some_and(Cell::is_continuation) {
            self.screen_mut().erase(row, col - 1, attrs);
        }
        // Overwriting the left half
        if col < width && self.screen().cell(row, col).is_some_and(|c| c.width == 2) {
            self.screen_mut().erase(row, col + 1, attrs);
        }
    }

    pub fn clear_row(&mut self, row: usize) {
        let attrs = self.current_attrs;
        self.screen_mut().clear_row(row, attrs);
    }

    pub fn clear_page(&mut self) {
        let attrs = self.current_attrs;
        self.screen_mut().clear_page(attrs);
    }

    pub fn set_scroll(&mut self, top: usize, bottom: usize) {
        self.screen_mut().set_scroll(top, bottom);
    }

    /// Mode 3 reset: attributes, modes, scroll region, cursor and page
    pub fn reset(&mut self) {
        self.current_attrs.reset();
        self.modes = TerminalModes::default();
        self.set_scroll(0, 0);
        self.set_cursor(1, 1);
        self.clear_page();
    }

    /// `CSI ! p`: like `reset`, but also returns to the main screen
    pub fn soft_reset(&mut self) {
        self.current_attrs.reset();
        self.modes.app_keys = false;
        self.modes.wrap_next = false;
        self.switch_screen(false);
        self.set_scroll(0, 0);
        self.set_cursor(1, 1);
        self.clear_page();
        self.screen_mut().make_dirty();
    }

    /// `ESC c`
    pub fn full_reset(&mut self) {
        self.switch_screen(false);
        self.reset();
        self.title.clear();
        self.screen_mut().make_dirty();
    }

    /// `ESC # 8`: reset, then fill the screen with `E`
    pub fn alignment_test(&mut self) {
        self.reset();
        let attrs = self.current_attrs;
        let (width, height) = (self.width(), self.height());
        let screen = self.screen_mut();
        for row in 1..=height {
            for col in 1..=width {
                let mut cell = Cell::blank(attrs);
                cell.grapheme.push('E');
                screen.set(row, col, cell);
            }
        }
    }

    pub fn save_cursor(&mut self) {
        let attrs = self.current_attrs;
        self.screen_mut().save_cursor(attrs);
    }

    /// Restore the saved cursor, or home and reset attributes if none was saved
    pub fn restore_cursor(&mut self) {
        self.modes.wrap_next = false;
        match self.screen_mut().restore_cursor() {
            Some(attrs) => self.current_attrs = attrs,
            None => {
                self.set_cursor(1, 1);
                self.current_attrs.reset();
            }
        }
    }

    fn switch_screen(&mut self, alternate: bool) {
        if self.using_alternate == alternate {
            return;
        }
        // Edits already recorded still apply to the shared display buffer
        let pending = self.screen_mut().take_edits();
        self.using_alternate = alternate;
        let screen = self.screen_mut();
        screen.prepend_edits(pending);
        screen.make_dirty();
    }

    pub fn enter_alt_screen(&mut self) {
        debug!("alternate screen on");
        self.switch_screen(true);
        self.set_cursor(1, 1);
        self.clear_page();
        self.screen_mut().make_dirty();
    }

    pub fn leave_alt_screen(&mut self) {
        debug!("alternate screen off");
        self.switch_screen(false);
        self.set_cursor(1, 1);
        self.screen_mut().make_dirty();
    }

    /// Resize both screens. Only the active screen's structural edits reach
    /// the display buffer.
    pub fn resize(&mut self, width: usize, height: usize) {
        let attrs = self.current_attrs;
        self.modes.wrap_next = false;
        self.main_screen.set_dimensions(width, height, attrs);
        self.alt_screen.set_dimensions(width, height, attrs);
        if self.using_alternate {
            self.main_screen.discard_edits();
        } else {
            self.alt_screen.discard_edits();
        }
    }

    /// Project the active screen onto `buffer`. Returns the number of lines
    /// rewritten.
    pub fn flush(&mut self, buffer: &mut dyn DisplayBuffer) -> usize {
        let mut buffer = WritableGuard::new(buffer);
        let screen = self.screen_mut();

        for edit in screen.take_edits() {
            match edit {
                LineEdit::Insert(row) => buffer.insert_line(row),
                LineEdit::Delete(row) => buffer.delete_line(row),
            }
        }

        let total = screen.len();
        while buffer.line_count() < total {
            let next = buffer.line_count() + 1;
            buffer.insert_line(next);
        }
        while buffer.line_count() > total {
            let last = buffer.line_count();
            buffer.delete_line(last);
        }

        let mut written = 0;
        for (row, line) in screen.dirty_lines_mut() {
            buffer.set_line(row, &Line::text(line));
            line.dirty = false;
            written += 1;
        }
        written
    }
}
