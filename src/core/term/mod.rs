//! Terminal emulation: cell grid, sequence tokenizers, decoder and dispatch.

pub mod cell;
pub mod dispatch;
pub mod parser;
pub mod screen;
pub mod sequence;
pub mod state;

pub use cell::{AttrFlags, Cell, CellAttrs, Color, Line};
pub use parser::{Decoder, Response};
pub use screen::{LineEdit, Screen};
pub use sequence::{Csi, CsiMode, Dcs, Osc};
pub use state::{TerminalModes, TerminalState, DEFAULT_HEIGHT, DEFAULT_WIDTH};
