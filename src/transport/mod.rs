//! Chat transports feeding the session controller
//!
//! - [`command`] - parsing of administrative commands
//! - [`console`] - line-based transport over stdin/stdout

pub mod command;
pub mod console;

use thiserror::Error;

pub use command::{CommandError, ConsoleCommand};
pub use console::ConsoleTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}
