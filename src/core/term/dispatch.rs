//! CSI and OSC dispatch.
//!
//! Maps a parsed sequence, keyed by (mode, command byte), onto mutations of
//! [`TerminalState`]. Unknown sequences are logged and otherwise ignored.

use tracing::debug;

use super::cell::{AttrFlags, Color};
use super::parser::Response;
use super::sequence::{Csi, CsiMode, Osc};
use super::state::TerminalState;

fn to_usize(n: i64) -> usize {
    n.clamp(0, u32::MAX as i64) as usize
}

impl TerminalState {
    pub fn execute_csi(&mut self, csi: &Csi) -> Option<Response> {
        let n = csi.count(0);

        match (csi.mode, csi.command) {
            (CsiMode::None, b'@') => {
                let (row, col) = (self.row(), self.col());
                for _ in 0..n.min(self.width()) {
                    self.screen_mut().insert_cell(row, col, Default::default());
                }
            }
            (CsiMode::None, b'A') => self.move_cursor(-(n as i64), 0),
            (CsiMode::None, b'B') => self.move_cursor(n as i64, 0),
            (CsiMode::None, b'C') => self.move_cursor(0, n as i64),
            (CsiMode::None, b'D') => self.move_cursor(0, -(n as i64)),
            (CsiMode::None, b'E') => {
                self.move_cursor(n as i64, 0);
                self.carriage_return();
            }
            (CsiMode::None, b'F') => {
                self.move_cursor(-(n as i64), 0);
                self.carriage_return();
            }
            (CsiMode::None, b'd') => {
                let col = self.col();
                self.set_cursor(to_usize(csi.arg(0, 1)), col);
            }
            (CsiMode::None, b'G') => {
                let row = self.row();
                self.set_cursor(row, to_usize(csi.arg(0, 1)));
            }
            (CsiMode::None, b'H') | (CsiMode::None, b'f') => {
                self.set_cursor(to_usize(csi.arg(0, 1)), to_usize(csi.arg(1, 1)));
            }
            (CsiMode::None, b'J') => self.erase_in_display(csi),
            (CsiMode::None, b'K') => self.erase_in_line(csi),
            (CsiMode::None, b'L') => {
                let (row, attrs) = (self.row(), self.current_attrs);
                for _ in 0..n.min(self.height()) {
                    self.screen_mut().insert_line(row, attrs);
                }
            }
            (CsiMode::None, b'M') => {
                let (row, attrs) = (self.row(), self.current_attrs);
                for _ in 0..n.min(self.height()) {
                    self.screen_mut().delete_line(row, attrs);
                }
            }
            (CsiMode::None, b'P') => {
                let (row, col, attrs) = (self.row(), self.col(), self.current_attrs);
                for _ in 0..n.min(self.width()) {
                    self.screen_mut().delete_cell(row, col, attrs);
                }
            }
            (CsiMode::None, b'X') => {
                let (row, col, attrs) = (self.row(), self.col(), self.current_attrs);
                let last = (col + n - 1).min(self.width());
                for c in col..=last {
                    self.screen_mut().erase(row, c, attrs);
                }
            }
            (CsiMode::None, b'S') => {
                let attrs = self.current_attrs;
                for _ in 0..n.min(self.height()) {
                    self.screen_mut().scroll_up(attrs);
                }
            }
            (CsiMode::None, b'T') => {
                let attrs = self.current_attrs;
                for _ in 0..n.min(self.height()) {
                    self.screen_mut().scroll_down(attrs);
                }
            }
            (CsiMode::None, b'r') => {
                self.set_cursor(1, 1);
                match csi.args.as_slice() {
                    [] => self.set_scroll(0, 0),
                    [top] => self.set_scroll(to_usize(*top), 0),
                    [top, bottom, ..] if bottom >= top => {
                        self.set_scroll(to_usize(*top), to_usize(*bottom))
                    }
                    _ => debug!("Ignoring scroll region {:?}", csi.args),
                }
            }
            (CsiMode::None, b's') => self.save_cursor(),
            (CsiMode::None, b'u') => self.restore_cursor(),
            (CsiMode::None, b'm') => self.execute_sgr(&csi.args),
            (CsiMode::Xterm, b'm') => {}
            (CsiMode::None, b'n') => match csi.arg(0, 0) {
                5 => return Some(Response::StatusOk),
                6 => return Some(Response::CursorPosition(self.row(), self.col())),
                other => debug!("Unhandled device status request {}", other),
            },
            (CsiMode::None, b'c') => return Some(Response::DeviceAttributes),
            (CsiMode::Xterm, b'c') => return Some(Response::SecondaryDeviceAttributes),
            (CsiMode::Private, b'h') => self.set_private_modes(&csi.args, true),
            (CsiMode::Private, b'l') => self.set_private_modes(&csi.args, false),
            (CsiMode::Reset, b'p') => self.soft_reset(),
            (CsiMode::None, b't') | (CsiMode::Xterm, b't') => {}
            _ => debug!(
                "Unhandled CSI: mode={:?}, args={:?}, command={:?}",
                csi.mode, csi.args, csi.command as char
            ),
        }
        None
    }

    fn erase_in_display(&mut self, csi: &Csi) {
        let (row, col, attrs) = (self.row(), self.col(), self.current_attrs);
        match csi.arg(0, 0) {
            0 => {
                for r in row + 1..=self.height() {
                    self.clear_row(r);
                }
                for c in col..=self.width() {
                    self.screen_mut().erase(row, c, attrs);
                }
            }
            1 => {
                for r in 1..row {
                    self.clear_row(r);
                }
                for c in 1..=col {
                    self.screen_mut().erase(row, c, attrs);
                }
            }
            2 => self.clear_page(),
            other => debug!("Unhandled erase in display {}", other),
        }
    }

    fn erase_in_line(&mut self, csi: &Csi) {
        let (row, col, attrs) = (self.row(), self.col(), self.current_attrs);
        match csi.arg(0, 0) {
            0 => {
                for c in col..=self.width() {
                    self.screen_mut().erase(row, c, attrs);
                }
            }
            1 => {
                for c in 1..=col {
                    self.screen_mut().erase(row, c, attrs);
                }
            }
            2 => self.clear_row(row),
            other => debug!("Unhandled erase in line {}", other),
        }
    }

    fn set_private_modes(&mut self, args: &[i64], enable: bool) {
        let modes: &[i64] = if args.is_empty() { &[1] } else { args };

        for &mode in modes {
            match mode {
                1 => self.modes.app_keys = enable,
                3 => self.reset(),
                7 => self.modes.auto_wrap = enable,
                // Cursor blink and visibility, bracketed paste
                12 | 25 | 2004 => {}
                1049 if enable => self.enter_alt_screen(),
                1049 => self.leave_alt_screen(),
                other => debug!("Unhandled private mode {} ({})", other, enable),
            }
        }
    }

    fn execute_sgr(&mut self, args: &[i64]) {
        if args.is_empty() {
            self.current_attrs.reset();
            return;
        }

        let attrs = &mut self.current_attrs;
        let mut iter = args.iter().copied();

        while let Some(param) = iter.next() {
            match param {
                0 => attrs.reset(),
                1 => attrs.flags |= AttrFlags::BOLD,
                4 => attrs.flags |= AttrFlags::UNDERLINE,
                7 => attrs.flags |= AttrFlags::INVERSE,
                22 => attrs.flags &= !AttrFlags::BOLD,
                24 => attrs.flags &= !AttrFlags::UNDERLINE,
                27 => attrs.flags &= !AttrFlags::INVERSE,
                // Dim, italic, blink, hidden, strikethrough and their resets
                2 | 3 | 5 | 6 | 8 | 9 | 23 | 25 | 26 | 28 | 29 => {}

                30..=37 => {
                    attrs.fg = Color::Ansi {
                        code: param as u8,
                        light: false,
                    }
                }
                38 => {
                    if let Some(color) = extended_color(&mut iter) {
                        attrs.fg = color;
                    }
                }
                39 => attrs.fg = Color::Default,

                // Backgrounds share the foreground code space
                40..=47 => {
                    attrs.bg = Color::Ansi {
                        code: (param - 10) as u8,
                        light: false,
                    }
                }
                48 => {
                    if let Some(color) = extended_color(&mut iter) {
                        attrs.bg = color;
                    }
                }
                49 => attrs.bg = Color::Default,

                90..=97 => {
                    attrs.fg = Color::Ansi {
                        code: (param - 60) as u8,
                        light: true,
                    }
                }
                100..=107 => {
                    attrs.bg = Color::Ansi {
                        code: (param - 70) as u8,
                        light: true,
                    }
                }

                other => debug!("Unhandled SGR {}", other),
            }
        }
    }

    pub fn execute_osc(&mut self, osc: &Osc) -> Option<Response> {
        match osc.command {
            0 | 2 => self.title = osc.arg.clone(),
            4 | 10 | 11 if osc.arg == "?" => {
                return Some(Response::ColorQuery(osc.command));
            }
            4 | 10 | 11 => {}
            52 => return Some(Response::Clipboard(osc.arg.clone())),
            // Icon name and palette resets
            1 | 104 | 110 | 111 => {}
            other => debug!("Unhandled OSC {}", other),
        }
        None
    }
}

/// Read the `5;n` or `2;r;g;b` tail of an SGR 38/48
fn extended_color(iter: &mut impl Iterator<Item = i64>) -> Option<Color> {
    match iter.next()? {
        5 => {
            let n = iter.next()?;
            Some(Color::Indexed(n.clamp(0, 255) as u8))
        }
        2 => {
            let mut channel = || iter.next().unwrap_or(0).clamp(0, 255) as u8;
            let (r, g, b) = (channel(), channel(), channel());
            Some(Color::Rgb(r, g, b))
        }
        other => {
            debug!("Unhandled extended color kind {}", other);
            None
        }
    }
}
