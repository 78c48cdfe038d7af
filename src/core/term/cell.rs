//! Cells, lines and display attributes.

use bitflags::bitflags;

/// A single grid cell
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    /// Glyph payload; empty when nothing has been written here
    pub grapheme: String,
    /// Display width: 1, 2 for the lead half of a wide glyph, 0 for its trailing half
    pub width: u8,
    pub attrs: CellAttrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            attrs: CellAttrs::default(),
        }
    }
}

impl Cell {
    pub fn blank(attrs: CellAttrs) -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            attrs,
        }
    }

    pub fn continuation(attrs: CellAttrs) -> Self {
        Self {
            grapheme: String::new(),
            width: 0,
            attrs,
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }

    /// No glyph and default attributes, i.e. trimmable at the end of a line
    pub fn is_blank(&self) -> bool {
        self.grapheme.is_empty() && self.attrs == CellAttrs::default()
    }

    pub fn clear(&mut self, attrs: CellAttrs) {
        self.grapheme.clear();
        self.width = 1;
        self.attrs = attrs;
    }

    /// Byte length of the glyph payload
    pub fn len(&self) -> usize {
        self.grapheme.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grapheme.is_empty()
    }

    /// Get the display text (space if empty)
    pub fn display_str(&self) -> &str {
        if self.grapheme.is_empty() {
            " "
        } else {
            &self.grapheme
        }
    }
}

/// One row of cells plus its dirty flag
#[derive(Clone, Debug)]
pub struct Line {
    pub cells: Vec<Cell>,
    pub dirty: bool,
}

impl Line {
    pub fn new(width: usize, attrs: CellAttrs) -> Self {
        Self {
            cells: vec![Cell::blank(attrs); width],
            dirty: true,
        }
    }

    pub fn width(&self) -> usize {
        self.cells.len()
    }

    /// Grow to `width` cells. Never shrinks.
    pub fn widen(&mut self, width: usize) {
        if width > self.cells.len() {
            self.cells.resize(width, Cell::default());
            self.dirty = true;
        }
    }

    pub fn clear(&mut self, attrs: CellAttrs) {
        for cell in &mut self.cells {
            cell.clear(attrs);
        }
        self.dirty = true;
    }

    /// Visible text with trailing blank cells trimmed and empty cells as spaces
    pub fn text(&self) -> String {
        let end = self
            .cells
            .iter()
            .rposition(|c| !c.is_blank() && !c.is_continuation())
            .map_or(0, |i| i + 1);

        let mut out = String::with_capacity(end);
        for cell in &self.cells[..end] {
            if !cell.is_continuation() {
                out.push_str(cell.display_str());
            }
        }
        out
    }
}

/// Cell attributes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellAttrs {
    pub fg: Color,
    pub bg: Color,
    pub flags: AttrFlags,
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A color tag as selected by SGR
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Color {
    #[default]
    Default,
    /// One of the eight base colors, stored as its SGR foreground code (30..=37)
    Ansi { code: u8, light: bool },
    /// 256-color palette index
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    /// Index into the 16-color palette, for `Ansi` colors
    pub fn palette_index(&self) -> Option<usize> {
        match *self {
            Color::Ansi { code, light } => {
                let base = code.saturating_sub(30) as usize;
                Some(if light { base + 8 } else { base })
            }
            _ => None,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AttrFlags: u8 {
        const BOLD      = 0b0000_0001;
        const UNDERLINE = 0b0000_0010;
        const INVERSE   = 0b0000_0100;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_text_trims_trailing_blanks() {
        let mut line = Line::new(10, CellAttrs::default());
        line.cells[0].grapheme.push('h');
        line.cells[1].grapheme.push('i');
        line.cells[4].grapheme.push('!');
        assert_eq!(line.text(), "hi  !");
    }

    #[test]
    fn test_line_text_keeps_colored_blanks() {
        let mut line = Line::new(5, CellAttrs::default());
        line.cells[0].grapheme.push('a');
        line.cells[2].attrs.bg = Color::Ansi { code: 31, light: false };
        assert_eq!(line.text(), "a  ");
    }

    #[test]
    fn test_palette_index() {
        assert_eq!(Color::Ansi { code: 31, light: false }.palette_index(), Some(1));
        assert_eq!(Color::Ansi { code: 37, light: true }.palette_index(), Some(15));
        assert_eq!(Color::Indexed(200).palette_index(), None);
        assert_eq!(Color::Rgb(1, 2, 3).palette_index(), None);
    }
}
