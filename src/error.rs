//! Error types for the fxchat library.

use std::io;
use std::string::FromUtf8Error;

use crate::command::Arity;

/// Result type alias for fxchat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing, dispatching or executing a command.
///
/// The `Display` text is what a client sees after the `Error: ` prefix, so
/// variants read as sentences.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] FromUtf8Error),

    #[error("Line exceeds {0} bytes.")]
    LineTooLong(usize),

    #[error("Connection closed by peer.")]
    ConnectionClosed,

    #[error("Empty command.")]
    EmptyCommand,

    #[error("Unknown or invalid command: {0}")]
    UnknownCommand(String),

    #[error("Command {verb} expects {expected} argument(s), got {actual}.")]
    Arity {
        verb: &'static str,
        expected: Arity,
        actual: usize,
    },

    #[error("You must be registered to use this command.")]
    NotRegistered,

    #[error("Unauthorized shutdown attempt.")]
    Unauthorized,

    #[error("Handle {0} already exists.")]
    HandleTaken(String),

    #[error("Already registered as {0}.")]
    AlreadyRegistered(String),

    #[error("Handle {0} not found.")]
    HandleNotFound(String),

    #[error("Server is shutting down.")]
    ShuttingDown,

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("File {0} not found.")]
    FileNotFound(String),

    #[error("Directory not found: {0}")]
    DirectoryUnavailable(String),

    #[error("Size mismatch: expected {expected} bytes, received {received}.")]
    SizeMismatch { expected: u64, received: u64 },

    #[error("Integrity check failed: expected digest {expected}, got {actual}.")]
    Integrity { expected: String, actual: String },

    #[error("Storage error: {0}")]
    Storage(#[source] io::Error),

    #[error("Transfer timed out.")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reply received from the server, text as sent.
    #[error("{0}")]
    Remote(String),
}

/// Coarse classification used by the dispatcher to decide what to do with a
/// failed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Protocol,
    Authorization,
    RegistryConflict,
    Transfer,
    ConnectionFault,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::EmptyCommand
            | Error::UnknownCommand(_)
            | Error::Arity { .. }
            | Error::InvalidFilename(_)
            | Error::ShuttingDown
            | Error::Protocol(_)
            | Error::Remote(_) => ErrorCategory::Protocol,
            Error::NotRegistered | Error::Unauthorized => ErrorCategory::Authorization,
            Error::HandleTaken(_) | Error::AlreadyRegistered(_) | Error::HandleNotFound(_) => {
                ErrorCategory::RegistryConflict
            }
            Error::FileNotFound(_)
            | Error::DirectoryUnavailable(_)
            | Error::SizeMismatch { .. }
            | Error::Integrity { .. }
            | Error::Storage(_)
            | Error::Timeout => ErrorCategory::Transfer,
            Error::Io(_) | Error::Utf8(_) | Error::LineTooLong(_) | Error::ConnectionClosed => {
                ErrorCategory::ConnectionFault
            }
        }
    }

    /// Connection faults end the session instead of being reported.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::ConnectionFault
    }

    /// Text sent to the client in an error frame.
    pub fn to_reply(&self) -> String {
        format!("{}{}", crate::constants::ERROR_PREFIX, self)
    }
}
