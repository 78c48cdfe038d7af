//! Host-side input and output.
//!
//! - **keymapper**: keys to the byte sequences the child expects
//! - **renderer**: draws a terminal onto the console with crossterm

pub mod keymapper;
pub mod renderer;

pub use keymapper::{Key, KeyMapper};
pub use renderer::{Renderer, StatusInfo};
