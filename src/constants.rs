//! Protocol constants and enumerations.

use crate::{Error, Result};

pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 12345;

/// Handle allowed to shut the server down unless configured otherwise.
pub const DEFAULT_ADMIN_HANDLE: &str = "ADMIN";

/// Bytes per data write during a transfer. Receivers never depend on it.
pub const CHUNK_SIZE: usize = 4096;

/// Longest command or token line accepted, newline included.
pub const MAX_LINE_LEN: usize = 8192;

/// Prefix of every error reply, so clients can tell errors from data.
pub const ERROR_PREFIX: &str = "Error: ";

pub const NO_FILES: &str = "No files found.";
pub const DIRECTORY_HEADER: &str = "Server Directory:";

pub const FINAL_SHUTDOWN_NOTICE: &str = "Server has been shutdown by admin for maintenance.";

pub const HELP_TEXT: &str = "\
/register <handle> - Register your handle
/leave - Disconnect from the server
/unicast <handle> <message> - Send a message to a specific user
/broadcast <message> - Send a message to all users
/store <filename> - Upload a file to the server
/dir - List files on the server
/get <filename> - Download a file from the server
/shutdown - Shutdown the server (authorized users only)
/? or /help - Display this command list";

/// Frame header keywords.
pub mod tokens {
    pub const REPLY: &str = "OK";
    pub const ERROR: &str = "ERR";
    pub const NOTICE: &str = "MSG";
    pub const SIZE: &str = "SIZE";
    pub const ACK: &str = "ACK";
    pub const EOF: &str = "EOF";
}

/// Whether the receiver acknowledges each chunk of a transfer.
///
/// Chosen by the sender and announced in the size header, so both ends
/// agree for the lifetime of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AckMode {
    #[default]
    Ack,
    Stream,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Ack => "ack",
            AckMode::Stream => "stream",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ack" => Ok(AckMode::Ack),
            "stream" => Ok(AckMode::Stream),
            _ => Err(Error::Protocol(format!("unknown ack mode {s:?}"))),
        }
    }
}

impl From<bool> for AckMode {
    fn from(ack: bool) -> Self {
        if ack { AckMode::Ack } else { AckMode::Stream }
    }
}
