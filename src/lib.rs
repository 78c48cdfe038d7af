//! vtbuf - a terminal emulator core that projects a VT100/xterm screen onto
//! a line-oriented text buffer.
//!
//! Output from a shell running on a pty is decoded into a grid of cells
//! with scrollback, an alternate screen and a scroll region. Changes are
//! flushed line by line into a [`core::display::DisplayBuffer`].

pub mod config;
pub mod core;
pub mod ui;
