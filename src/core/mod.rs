//! Core terminal emulation components.
//!
//! - **term**: cell grid, escape sequence decoder and dispatch
//! - **display**: the line-buffer boundary screens are flushed into
//! - **queue**: byte queue between the pty reader and the decoder
//! - **pty**: Unix pseudo-terminal and shell child
//! - **session**: a terminal session combining all of the above
//!
//! # Architecture
//!
//! ```text
//! TermManager
//! └── Term
//!     ├── Pty (shell on the slave side)
//!     ├── reader thread -> ByteQueue
//!     ├── Decoder
//!     └── TerminalState
//!         ├── Screen (main)
//!         └── Screen (alternate)
//! ```

pub mod display;
pub mod pty;
pub mod queue;
pub mod session;
pub mod term;
