//! Terminal renderer using crossterm
//!
//! Draws the lines a terminal flushed into its display buffer onto the host
//! console, styled with the attributes of the matching screen cells. Rows
//! are compared with the previous frame and only changed rows are rewritten.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture},
    execute, queue,
    style::{
        Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor,
    },
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use tracing::debug;

use crate::config::Palette;
use crate::core::term::{AttrFlags, Cell, CellAttrs, TerminalState};

/// What the status line shows
#[derive(Debug, Clone, Default)]
pub struct StatusInfo<'a> {
    pub buffer_name: &'a str,
    pub title: &'a str,
    pub term_mode: bool,
    /// Lines scrolled back from the live screen
    pub offset: usize,
}

/// Terminal renderer
pub struct Renderer {
    palette: Palette,
    /// Text and cells last drawn on each host row
    prev_frame: Vec<Option<(String, Vec<Cell>)>>,
    prev_status: String,
    initialized: bool,
}

impl Renderer {
    pub fn new(palette: Palette) -> Self {
        Self {
            palette,
            prev_frame: Vec::new(),
            prev_status: String::new(),
            initialized: false,
        }
    }

    /// Initialize the terminal for rendering
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            EnableMouseCapture,
            EnableBracketedPaste,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        self.initialized = true;
        debug!("renderer initialized");
        Ok(())
    }

    /// Cleanup the terminal
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(
            stdout,
            ResetColor,
            SetAttribute(Attribute::Reset),
            Show,
            EnableLineWrap,
            DisableMouseCapture,
            DisableBracketedPaste,
            LeaveAlternateScreen
        );
        let _ = stdout.flush();
        terminal::disable_raw_mode()
    }

    /// Forget the previous frame so the next render redraws everything
    pub fn invalidate(&mut self) {
        self.prev_frame.clear();
        self.prev_status.clear();
    }

    /// Render to stdout
    pub fn render(
        &mut self,
        lines: &[String],
        state: &TerminalState,
        cursor: Option<(usize, usize)>,
        status: &StatusInfo,
    ) -> io::Result<()> {
        let stdout = io::stdout();
        let mut out = io::BufWriter::with_capacity(65536, stdout.lock());
        self.render_to(&mut out, lines, state, cursor, status)?;
        out.flush()
    }

    /// Draw a window of `lines`, the display buffer contents, then the
    /// status line below it.
    ///
    /// `cursor` is an absolute line and column, shown only when that line is
    /// inside the window.
    pub fn render_to<W: Write>(
        &mut self,
        out: &mut W,
        lines: &[String],
        state: &TerminalState,
        cursor: Option<(usize, usize)>,
        status: &StatusInfo,
    ) -> io::Result<()> {
        let screen = state.screen();
        let height = screen.height();
        let offset = status.offset.min(screen.scrollback());
        let top = screen.scrollback() - offset + 1;

        if self.prev_frame.len() != height {
            self.prev_frame = vec![None; height];
            queue!(out, Clear(ClearType::All))?;
        }

        queue!(out, Hide)?;
        for row in 0..height {
            let text = lines.get(top + row - 1).map_or("", String::as_str);
            let cells = screen
                .absolute_line(top + row)
                .map_or(&[][..], |line| line.cells.as_slice());
            if let Some((prev_text, prev_cells)) = &self.prev_frame[row] {
                if prev_text == text && prev_cells.as_slice() == cells {
                    continue;
                }
            }
            self.draw_row(out, row as u16, text, cells, status.term_mode)?;
            self.prev_frame[row] = Some((text.to_string(), cells.to_vec()));
        }

        let status_text = status_line(status, state.width());
        if status_text != self.prev_status {
            queue!(
                out,
                MoveTo(0, height as u16),
                SetAttribute(Attribute::Reset),
                SetAttribute(Attribute::Reverse),
                Print(&status_text),
                SetAttribute(Attribute::Reset)
            )?;
            self.prev_status = status_text;
        }

        if let Some((line, col)) = cursor {
            if (top..top + height).contains(&line) {
                queue!(out, MoveTo(col.saturating_sub(1) as u16, (line - top) as u16), Show)?;
            }
        }
        Ok(())
    }

    /// Draw `text` in runs of equal attributes. Each glyph takes its
    /// attributes from the next drawn cell; once the two disagree the rest
    /// of the row is drawn plain.
    fn draw_row<W: Write>(
        &self,
        out: &mut W,
        row: u16,
        text: &str,
        cells: &[Cell],
        active: bool,
    ) -> io::Result<()> {
        queue!(out, MoveTo(0, row), SetAttribute(Attribute::Reset), ResetColor)?;
        queue!(out, terminal::Clear(ClearType::UntilNewLine))?;

        let mut glyphs = cells.iter().filter(|c| !c.is_continuation());
        let mut in_sync = true;
        let mut current: Option<CellAttrs> = None;
        let mut run = String::with_capacity(text.len());
        let mut rest = text;

        while !rest.is_empty() {
            let cell = if in_sync { glyphs.next() } else { None };
            let (len, attrs) = match cell {
                Some(cell) if rest.starts_with(cell.display_str()) => {
                    (cell.display_str().len(), cell.attrs)
                }
                _ => {
                    in_sync = false;
                    (rest.chars().next().map_or(rest.len(), char::len_utf8), CellAttrs::default())
                }
            };
            if current != Some(attrs) {
                if let Some(prev) = current {
                    self.apply_attrs(out, &prev, active)?;
                    queue!(out, Print(&run))?;
                    run.clear();
                }
                current = Some(attrs);
            }
            run.push_str(&rest[..len]);
            rest = &rest[len..];
        }
        if let Some(attrs) = current {
            self.apply_attrs(out, &attrs, active)?;
            queue!(out, Print(&run))?;
        }
        queue!(out, SetAttribute(Attribute::Reset), ResetColor)
    }

    /// Apply cell attributes
    fn apply_attrs<W: Write>(&self, out: &mut W, attrs: &CellAttrs, active: bool) -> io::Result<()> {
        queue!(out, SetAttribute(Attribute::Reset))?;
        if attrs.flags.contains(AttrFlags::BOLD) {
            queue!(out, SetAttribute(Attribute::Bold))?;
        }
        if attrs.flags.contains(AttrFlags::UNDERLINE) {
            queue!(out, SetAttribute(Attribute::Underlined))?;
        }
        if attrs.flags.contains(AttrFlags::INVERSE) {
            queue!(out, SetAttribute(Attribute::Reverse))?;
        }
        queue!(
            out,
            SetForegroundColor(self.palette.foreground(attrs.fg, active)),
            SetBackgroundColor(self.palette.background(attrs.bg, active))
        )
    }

    /// Get terminal size
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Status line text padded or cut to `width` columns
fn status_line(status: &StatusInfo, width: usize) -> String {
    let mode = if status.term_mode { "term" } else { "view" };
    let mut text = format!(" {} [{}]", status.buffer_name, mode);
    if status.offset > 0 {
        text.push_str(&format!(" -{}", status.offset));
    }
    if !status.title.is_empty() {
        text.push_str("  ");
        text.push_str(status.title);
    }
    let mut line: String = text.chars().take(width).collect();
    let pad = width.saturating_sub(line.chars().count());
    line.extend(std::iter::repeat(' ').take(pad));
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::display::{DisplayBuffer, MemoryBuffer, WritableGuard};
    use crate::core::term::Decoder;

    /// Decode `input` and flush it into a fresh buffer
    fn flushed(input: &[u8]) -> (TerminalState, MemoryBuffer) {
        let mut state = TerminalState::new(20, 4, 10);
        let mut decoder = Decoder::new();
        decoder.feed(input, &mut state);
        let mut buffer = MemoryBuffer::new();
        state.flush(&mut buffer);
        (state, buffer)
    }

    fn status(offset: usize) -> StatusInfo<'static> {
        StatusInfo {
            buffer_name: "*term1",
            title: "demo",
            term_mode: true,
            offset,
        }
    }

    fn render(renderer: &mut Renderer, state: &TerminalState, buffer: &MemoryBuffer) -> String {
        let mut out = Vec::new();
        renderer
            .render_to(&mut out, buffer.lines(), state, None, &status(0))
            .unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn test_render_text_and_colors() {
        let (state, buffer) = flushed(b"plain \x1b[31mred\x1b[0m");
        let mut renderer = Renderer::new(Palette::default());
        let text = render(&mut renderer, &state, &buffer);
        assert!(text.contains("plain "));
        assert!(text.contains("red"));
        assert!(text.contains("38;5;1"));
        assert!(text.contains(" *term1 [term]  demo"));
    }

    #[test]
    fn test_text_comes_from_display_buffer() {
        let (state, mut buffer) = flushed(b"hello");
        let row = state.absolute_row();
        {
            let mut guard = WritableGuard::new(&mut buffer);
            guard.set_line(row, "howdy");
        }
        let mut renderer = Renderer::new(Palette::default());
        let text = render(&mut renderer, &state, &buffer);
        assert!(text.contains("howdy"));
        assert!(!text.contains("hello"));
    }

    #[test]
    fn test_unchanged_rows_are_skipped() {
        let (state, buffer) = flushed(b"hello");
        let mut renderer = Renderer::new(Palette::default());
        assert!(render(&mut renderer, &state, &buffer).contains("hello"));
        assert!(!render(&mut renderer, &state, &buffer).contains("hello"));

        renderer.invalidate();
        assert!(render(&mut renderer, &state, &buffer).contains("hello"));
    }

    #[test]
    fn test_wide_glyph_drawn_once() {
        let (state, buffer) = flushed("\u{4e2d}x".as_bytes());
        let mut renderer = Renderer::new(Palette::default());
        let text = render(&mut renderer, &state, &buffer);
        assert_eq!(text.matches('\u{4e2d}').count(), 1);
        assert!(text.contains("\u{4e2d}x"));
    }

    #[test]
    fn test_cursor_only_inside_window() {
        let (state, buffer) = flushed(b"ab");
        let line = state.absolute_row();
        let mut renderer = Renderer::new(Palette::default());

        let mut out = Vec::new();
        renderer
            .render_to(&mut out, buffer.lines(), &state, Some((line, 3)), &status(0))
            .unwrap();
        assert!(String::from_utf8_lossy(&out).contains("\x1b[1;3H"));

        // Cursor line below the window
        renderer.invalidate();
        let mut out = Vec::new();
        renderer
            .render_to(&mut out, buffer.lines(), &state, Some((line + 4, 1)), &status(0))
            .unwrap();
        assert!(!String::from_utf8_lossy(&out).contains("\x1b[?25h"));
    }

    #[test]
    fn test_status_line() {
        assert_eq!(status_line(&status(0), 12), " *term1 [ter");
        let mut info = status(3);
        info.term_mode = false;
        info.title = "";
        assert_eq!(status_line(&info, 20), " *term1 [view] -3   ");
    }
}
