//! Terminal abstraction: raw input fan-out, structured key events, an ANSI
//! write surface, interrupt signaling and a line editor with history.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod ansi;
mod error;
mod keys;
mod line_editor;
mod terminal;

pub use error::Result;
pub use error::TermError;
pub use keys::KeyCode;
pub use keys::KeyDecoder;
pub use keys::KeyEvent;
pub use terminal::Completer;
pub use terminal::DEFAULT_COLS;
pub use terminal::DEFAULT_ROWS;
pub use terminal::TermEvent;
pub use terminal::Terminal;
